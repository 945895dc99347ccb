//! Per-model GPU resources, keyed by [`ModelId`].
//!
//! A backend owns exactly one [`ResourceRegistry`]. Entries are created by
//! `setup_model`, removed by `clean_model` and drained by `cleanup`; the
//! handles themselves are released through [`GpuResources`].

use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::config::RendererConfig;
use crate::scene::{Model, ModelId};

use super::texture::TextureImage;
use super::vertex::{self, VertexLayout};

/// Buffer and texture creation as the registry needs it.
pub trait GpuResources {
    type Buffer;
    type Texture;

    fn create_vertex_buffer(&mut self, label: &str, vertices: &[f32]) -> Result<Self::Buffer>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    /// Longest texture side the device accepts.
    fn max_texture_dimension(&self) -> u32;

    /// Uploads every mip level of `image`.
    fn create_texture(&mut self, label: &str, image: &TextureImage) -> Result<Self::Texture>;
    fn destroy_texture(&mut self, texture: Self::Texture);
}

/// Resources of one non-empty shape.
#[derive(Debug)]
pub struct ShapeResources<B, T> {
    /// Index into `Model::shapes()`; empty shapes have no entry.
    pub shape_index: usize,
    pub vertex_buffer: B,
    pub vertex_count: u32,
    pub layout: VertexLayout,
    pub texture: Option<T>,
}

#[derive(Debug)]
pub struct ModelResources<B, T> {
    pub shapes: Vec<ShapeResources<B, T>>,
}

impl<B, T> Default for ModelResources<B, T> {
    fn default() -> Self {
        Self { shapes: Vec::new() }
    }
}

impl<B, T> ModelResources<B, T> {
    pub fn shape(&self, shape_index: usize) -> Option<&ShapeResources<B, T>> {
        self.shapes.iter().find(|s| s.shape_index == shape_index)
    }

    /// Uploads every non-empty shape of `model`.
    ///
    /// A texture that fails to decode or upload is logged and the shape
    /// renders untextured; one larger than the device limit is downscaled
    /// first. A vertex buffer failure releases what was already created.
    pub fn upload<G>(gpu: &mut G, model: &Model, config: &RendererConfig) -> Result<Self>
    where
        G: GpuResources<Buffer = B, Texture = T>,
    {
        let mut out = Self::default();
        for (shape_index, shape) in model.shapes().iter().enumerate() {
            if shape.vertex_count() == 0 {
                log::debug!("model '{}': shape {shape_index} is empty; skipped", model.name());
                continue;
            }
            match upload_shape(gpu, model, shape_index, config) {
                Ok(res) => out.shapes.push(res),
                Err(e) => {
                    out.release(gpu);
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    /// Hands every handle back to `gpu`.
    pub fn release<G>(self, gpu: &mut G)
    where
        G: GpuResources<Buffer = B, Texture = T>,
    {
        for shape in self.shapes {
            gpu.destroy_buffer(shape.vertex_buffer);
            if let Some(texture) = shape.texture {
                gpu.destroy_texture(texture);
            }
        }
    }
}

fn upload_shape<G: GpuResources>(
    gpu: &mut G,
    model: &Model,
    shape_index: usize,
    config: &RendererConfig,
) -> Result<ShapeResources<G::Buffer, G::Texture>> {
    let shape = &model.shapes()[shape_index];
    let label = format!("{}/{}", model.name(), shape.name());

    let data = vertex::interleave(shape);
    let vertex_buffer = gpu
        .create_vertex_buffer(&label, &data)
        .with_context(|| format!("failed to upload vertices of {label}"))?;

    let image = shape.texture_path().and_then(|path| {
        match TextureImage::load(path, config.flip_textures, config.max_mip_levels) {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("{label}: {e:#}; rendering untextured");
                None
            }
        }
    });

    let texture = image.and_then(|mut image| {
        let max_dim = gpu.max_texture_dimension();
        let (width, height) = (image.width(), image.height());
        if image.fit_within(max_dim) {
            log::warn!(
                "{label}: texture {width}x{height} exceeds the device limit of {max_dim}; \
                 downscaled to {}x{}",
                image.width(),
                image.height()
            );
        }
        match gpu.create_texture(&label, &image) {
            Ok(texture) => Some(texture),
            Err(e) => {
                log::warn!("{label}: {e:#}; rendering untextured");
                None
            }
        }
    });

    Ok(ShapeResources {
        shape_index,
        vertex_buffer,
        vertex_count: shape.vertex_count() as u32,
        layout: VertexLayout::of(shape),
        texture,
    })
}

/// GPU resources of every set-up model.
#[derive(Debug)]
pub struct ResourceRegistry<B, T> {
    entries: HashMap<ModelId, ModelResources<B, T>>,
}

impl<B, T> Default for ResourceRegistry<B, T> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<B, T> ResourceRegistry<B, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous entry for `id`, which the caller must release.
    pub fn insert(
        &mut self,
        id: ModelId,
        resources: ModelResources<B, T>,
    ) -> Option<ModelResources<B, T>> {
        self.entries.insert(id, resources)
    }

    pub fn get(&self, id: ModelId) -> Option<&ModelResources<B, T>> {
        self.entries.get(&id)
    }

    pub fn remove(&mut self, id: ModelId) -> Option<ModelResources<B, T>> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: ModelId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn drain(&mut self) -> impl Iterator<Item = (ModelId, ModelResources<B, T>)> + '_ {
        self.entries.drain()
    }

    pub fn release_all<G>(&mut self, gpu: &mut G)
    where
        G: GpuResources<Buffer = B, Texture = T>,
    {
        for (_, resources) in self.entries.drain() {
            resources.release(gpu);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;

    use anyhow::bail;
    use glam::Vec3;

    use super::*;
    use crate::scene::{Shape, primitives};

    /// Hands out numbered handles and remembers which are alive.
    #[derive(Default)]
    pub(crate) struct CountingGpu {
        next: u64,
        pub buffers: HashSet<u64>,
        pub textures: HashSet<u64>,
        pub fail_texture: bool,
        pub max_dimension: Option<u32>,
        pub texture_sizes: Vec<(u32, u32)>,
    }

    impl GpuResources for CountingGpu {
        type Buffer = u64;
        type Texture = u64;

        fn create_vertex_buffer(&mut self, _: &str, vertices: &[f32]) -> Result<u64> {
            assert!(!vertices.is_empty());
            self.next += 1;
            self.buffers.insert(self.next);
            Ok(self.next)
        }

        fn destroy_buffer(&mut self, buffer: u64) {
            assert!(self.buffers.remove(&buffer), "double free of buffer {buffer}");
        }

        fn max_texture_dimension(&self) -> u32 {
            self.max_dimension.unwrap_or(8192)
        }

        fn create_texture(&mut self, _: &str, image: &TextureImage) -> Result<u64> {
            if self.fail_texture {
                bail!("out of device memory");
            }
            let max = self.max_texture_dimension();
            if image.width() > max || image.height() > max {
                bail!("texture {}x{} exceeds {max}", image.width(), image.height());
            }
            self.texture_sizes.push((image.width(), image.height()));
            self.next += 1;
            self.textures.insert(self.next);
            Ok(self.next)
        }

        fn destroy_texture(&mut self, texture: u64) {
            assert!(self.textures.remove(&texture), "double free of texture {texture}");
        }
    }

    pub(crate) fn write_png(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("prism-res-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();
        path
    }

    fn triangle() -> Shape {
        Shape::new("tri", vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![], vec![]).unwrap()
    }

    #[test]
    fn empty_shapes_get_no_entry() {
        let empty = Shape::new("empty", vec![], vec![], vec![]).unwrap();
        let model = Model::new("m", vec![empty, triangle()]);

        let mut gpu = CountingGpu::default();
        let res = ModelResources::upload(&mut gpu, &model, &RendererConfig::default()).unwrap();

        assert_eq!(res.shapes.len(), 1);
        assert_eq!(res.shapes[0].shape_index, 1);
        assert_eq!(res.shapes[0].vertex_count, 3);
        assert!(res.shape(0).is_none());
    }

    #[test]
    fn undecodable_texture_renders_untextured() {
        let model = Model::new("m", vec![primitives::cube(1.0).with_texture("missing/tex.png")]);

        let mut gpu = CountingGpu::default();
        let res = ModelResources::upload(&mut gpu, &model, &RendererConfig::default()).unwrap();

        assert!(res.shapes[0].texture.is_none());
        assert!(gpu.textures.is_empty());
    }

    #[test]
    fn texture_upload_failure_renders_untextured() {
        let tex = write_png("ok.png");
        let model = Model::new(
            "m",
            vec![primitives::cube(1.0), primitives::cube(1.0).with_texture(&tex)],
        );

        let mut gpu = CountingGpu { fail_texture: true, ..Default::default() };
        let res = ModelResources::upload(&mut gpu, &model, &RendererConfig::default()).unwrap();
        assert_eq!(res.shapes.len(), 2);
        assert!(res.shapes.iter().all(|s| s.texture.is_none()));
        assert!(gpu.textures.is_empty());

        res.release(&mut gpu);
        assert!(gpu.buffers.is_empty());
    }

    #[test]
    fn oversize_texture_is_downscaled_to_the_device_limit() {
        let tex = write_png("big.png");
        let model = Model::new("m", vec![primitives::cube(1.0).with_texture(&tex)]);

        let mut gpu = CountingGpu { max_dimension: Some(2), ..Default::default() };
        let res = ModelResources::upload(&mut gpu, &model, &RendererConfig::default()).unwrap();

        assert!(res.shapes[0].texture.is_some());
        assert_eq!(gpu.texture_sizes, vec![(2, 2)]);
    }

    #[test]
    fn registry_release_all_frees_every_handle() {
        let tex = write_png("all.png");
        let mut gpu = CountingGpu::default();
        let mut reg = ResourceRegistry::new();

        for _ in 0..3 {
            let model = Model::new("m", vec![primitives::cube(1.0).with_texture(&tex)]);
            let res = ModelResources::upload(&mut gpu, &model, &RendererConfig::default()).unwrap();
            assert!(reg.insert(model.id(), res).is_none());
        }
        assert_eq!((gpu.buffers.len(), gpu.textures.len()), (3, 3));

        reg.release_all(&mut gpu);
        assert!(reg.is_empty());
        assert!(gpu.buffers.is_empty() && gpu.textures.is_empty());
    }
}
