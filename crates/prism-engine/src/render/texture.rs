//! Texture decoding and CPU mip generation.

use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbaImage;

/// One RGBA8 mip level.
#[derive(Debug, Clone)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Decoded texture with its full mip chain, level 0 first.
#[derive(Debug, Clone)]
pub struct TextureImage {
    levels: Vec<MipLevel>,
}

impl TextureImage {
    /// Decodes `path` into RGBA8 and builds mip levels down to 1x1.
    ///
    /// `max_levels == 0` keeps the whole chain.
    pub fn load(path: &Path, flip_vertical: bool, max_levels: u32) -> Result<Self> {
        let decoded = image::open(path)
            .with_context(|| format!("failed to decode texture {}", path.display()))?;
        let mut rgba = decoded.to_rgba8();
        if flip_vertical {
            image::imageops::flip_vertical_in_place(&mut rgba);
        }
        Ok(Self::from_rgba(rgba, max_levels))
    }

    pub fn from_rgba(base: RgbaImage, max_levels: u32) -> Self {
        let (w, h) = base.dimensions();
        let mut count = mip_level_count(w, h);
        if max_levels > 0 {
            count = count.min(max_levels);
        }

        let mut levels = Vec::with_capacity(count as usize);
        let mut current = base;
        for level in 0..count {
            if level > 0 {
                let (pw, ph) = current.dimensions();
                current = image::imageops::resize(
                    &current,
                    (pw / 2).max(1),
                    (ph / 2).max(1),
                    FilterType::Triangle,
                );
            }
            let (width, height) = current.dimensions();
            levels.push(MipLevel { width, height, pixels: current.as_raw().clone() });
        }

        Self { levels }
    }

    /// Downscales level 0 so neither side exceeds `max_dim` and rebuilds the
    /// chain from it, keeping at most the current level count.
    ///
    /// Returns false when the image already fits.
    pub fn fit_within(&mut self, max_dim: u32) -> bool {
        let (width, height) = (self.width(), self.height());
        let (fit_w, fit_h) = clamp_extent(width, height, max_dim);
        if (fit_w, fit_h) == (width, height) {
            return false;
        }
        let Some(base) = self
            .levels
            .first()
            .and_then(|l| RgbaImage::from_raw(l.width, l.height, l.pixels.clone()))
        else {
            return false;
        };
        let resized = image::imageops::resize(&base, fit_w, fit_h, FilterType::Triangle);
        *self = Self::from_rgba(resized, self.level_count());
        true
    }

    /// Opaque white 1x1 texture bound for untextured draws.
    pub fn white() -> Self {
        Self::from_rgba(RgbaImage::from_pixel(1, 1, image::Rgba([255; 4])), 1)
    }

    pub fn width(&self) -> u32 {
        self.levels.first().map_or(0, |l| l.width)
    }

    pub fn height(&self) -> u32 {
        self.levels.first().map_or(0, |l| l.height)
    }

    pub fn levels(&self) -> &[MipLevel] {
        &self.levels
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Total byte size of all levels; the staging size for an upload.
    pub fn byte_len(&self) -> usize {
        self.levels.iter().map(|l| l.pixels.len()).sum()
    }
}

/// Largest extent with the same aspect ratio whose longer side is at most
/// `max_dim`. Neither side drops below 1.
pub fn clamp_extent(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let max_dim = max_dim.max(1);
    let longest = width.max(height);
    if longest <= max_dim {
        return (width, height);
    }
    let scale = |side: u32| {
        let scaled = u64::from(side) * u64::from(max_dim) / u64::from(longest);
        scaled.max(1) as u32
    };
    (scale(width), scale(height))
}

/// `floor(log2(max(w, h))) + 1`.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_count_matches_largest_side() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(300, 20), 9);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn chain_halves_down_to_one() {
        let img = TextureImage::from_rgba(RgbaImage::new(8, 2), 0);
        let dims: Vec<_> = img.levels().iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(dims, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
        assert_eq!(img.byte_len(), (16 + 4 + 2 + 1) * 4);
    }

    #[test]
    fn max_levels_truncates() {
        let img = TextureImage::from_rgba(RgbaImage::new(16, 16), 2);
        assert_eq!(img.level_count(), 2);
    }

    #[test]
    fn oversize_extents_keep_their_aspect() {
        assert_eq!(clamp_extent(512, 256, 8192), (512, 256));
        assert_eq!(clamp_extent(8192, 8192, 8192), (8192, 8192));
        assert_eq!(clamp_extent(10000, 10000, 8192), (8192, 8192));
        assert_eq!(clamp_extent(16384, 4096, 8192), (8192, 2048));
        assert_eq!(clamp_extent(4096, 16384, 8192), (2048, 8192));
        assert_eq!(clamp_extent(100_000, 1, 8192), (8192, 1));
    }

    #[test]
    fn fit_within_rebuilds_a_smaller_chain() {
        let mut img = TextureImage::from_rgba(RgbaImage::new(64, 16), 0);
        assert!(!img.fit_within(64));
        assert_eq!(img.level_count(), 7);

        assert!(img.fit_within(16));
        assert_eq!((img.width(), img.height()), (16, 4));
        let dims: Vec<_> = img.levels().iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(dims, vec![(16, 4), (8, 2), (4, 1), (2, 1), (1, 1)]);
        assert_eq!(img.levels()[0].pixels.len(), 16 * 4 * 4);
    }

    #[test]
    fn fit_within_respects_the_level_cap() {
        let mut img = TextureImage::from_rgba(RgbaImage::new(64, 64), 2);
        assert!(img.fit_within(32));
        assert_eq!(img.level_count(), 2);
        assert_eq!((img.width(), img.height()), (32, 32));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = TextureImage::load(Path::new("definitely/not/here.png"), true, 0).unwrap_err();
        assert!(format!("{err:#}").contains("here.png"));
    }

    #[test]
    fn flip_puts_first_row_last() {
        let dir = std::env::temp_dir().join(format!("prism-tex-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rows.png");

        let mut src = RgbaImage::new(1, 2);
        src.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        src.put_pixel(0, 1, image::Rgba([0, 0, 255, 255]));
        src.save(&path).unwrap();

        let img = TextureImage::load(&path, true, 1).unwrap();
        assert_eq!(&img.levels()[0].pixels[..4], &[0, 0, 255, 255]);
    }
}
