//! Surface configuration, acquisition and presentation.

use winit::dpi::PhysicalSize;

/// What the frame loop does after a failed acquire.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// The surface was reconfigured; the next frame can draw.
    Reconfigured,
    /// Transient; drop this frame.
    SkipFrame,
    Fatal,
}

/// Lost and outdated surfaces are rebuilt, timeouts skipped, OOM is fatal.
pub fn classify(err: &wgpu::SurfaceError) -> SurfaceErrorAction {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => SurfaceErrorAction::Reconfigured,
        wgpu::SurfaceError::Timeout | wgpu::SurfaceError::Other => SurfaceErrorAction::SkipFrame,
        wgpu::SurfaceError::OutOfMemory => SurfaceErrorAction::Fatal,
    }
}

/// Format, alpha and present mode chosen from the surface capabilities.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SurfaceChoice {
    pub format: wgpu::TextureFormat,
    pub alpha_mode: wgpu::CompositeAlphaMode,
    pub present_mode: wgpu::PresentMode,
}

impl SurfaceChoice {
    /// sRGB formats win; an unsupported `present_mode` falls back to FIFO.
    pub fn from_caps(caps: &wgpu::SurfaceCapabilities, present_mode: wgpu::PresentMode) -> Option<Self> {
        let srgb = [wgpu::TextureFormat::Bgra8UnormSrgb, wgpu::TextureFormat::Rgba8UnormSrgb];
        let format = srgb
            .into_iter()
            .find(|f| caps.formats.contains(f))
            .or_else(|| caps.formats.first().copied())?;

        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let present_mode = if caps.present_modes.contains(&present_mode) {
            present_mode
        } else {
            log::warn!("present mode {present_mode:?} unsupported; using Fifo");
            wgpu::PresentMode::Fifo
        };

        Some(Self { format, alpha_mode, present_mode })
    }
}

/// The window surface plus the configuration it was last given.
///
/// A zero-area surface is left unconfigured until the next non-zero resize.
pub struct Presenter {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
}

impl Presenter {
    pub fn new(
        surface: wgpu::Surface<'static>,
        device: &wgpu::Device,
        choice: SurfaceChoice,
        size: PhysicalSize<u32>,
        frame_latency: u32,
    ) -> Self {
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: choice.format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: choice.present_mode,
            alpha_mode: choice.alpha_mode,
            view_formats: Vec::new(),
            desired_maximum_frame_latency: frame_latency,
        };
        let presenter = Self { surface, config, size };
        presenter.configure(device);
        presenter
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn is_zero_sized(&self) -> bool {
        self.size.width == 0 || self.size.height == 0
    }

    fn configure(&self, device: &wgpu::Device) {
        if !self.is_zero_sized() {
            self.surface.configure(device, &self.config);
        }
    }

    pub fn resize(&mut self, device: &wgpu::Device, size: PhysicalSize<u32>) {
        self.size = size;
        if self.is_zero_sized() {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.configure(device);
        log::debug!("surface reconfigured at {}x{}", size.width, size.height);
    }

    /// Acquires the next texture, reconfiguring when the surface went stale.
    pub fn acquire(
        &self,
        device: &wgpu::Device,
    ) -> Result<wgpu::SurfaceTexture, SurfaceErrorAction> {
        self.surface.get_current_texture().map_err(|err| {
            let action = classify(&err);
            match action {
                SurfaceErrorAction::Reconfigured => {
                    log::debug!("surface {err}; reconfiguring");
                    self.configure(device);
                }
                SurfaceErrorAction::SkipFrame => log::debug!("surface {err}; skipping frame"),
                SurfaceErrorAction::Fatal => log::error!("surface {err}"),
            }
            action
        })
    }

    /// Presents `texture`; a suboptimal one triggers a reconfigure afterwards.
    pub fn present(&self, device: &wgpu::Device, texture: wgpu::SurfaceTexture) {
        let suboptimal = texture.suboptimal;
        texture.present();
        if suboptimal {
            log::debug!("surface suboptimal; reconfiguring");
            self.configure(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(formats: Vec<wgpu::TextureFormat>) -> wgpu::SurfaceCapabilities {
        wgpu::SurfaceCapabilities {
            formats,
            present_modes: vec![wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate],
            alpha_modes: vec![wgpu::CompositeAlphaMode::Opaque],
            usages: wgpu::TextureUsages::RENDER_ATTACHMENT,
        }
    }

    #[test]
    fn srgb_format_is_preferred() {
        let c = caps(vec![wgpu::TextureFormat::Bgra8Unorm, wgpu::TextureFormat::Rgba8UnormSrgb]);
        let choice = SurfaceChoice::from_caps(&c, wgpu::PresentMode::Fifo).unwrap();
        assert_eq!(choice.format, wgpu::TextureFormat::Rgba8UnormSrgb);
        assert_eq!(choice.alpha_mode, wgpu::CompositeAlphaMode::Opaque);

        let plain = caps(vec![wgpu::TextureFormat::Bgra8Unorm]);
        let choice = SurfaceChoice::from_caps(&plain, wgpu::PresentMode::Fifo).unwrap();
        assert_eq!(choice.format, wgpu::TextureFormat::Bgra8Unorm);

        assert!(SurfaceChoice::from_caps(&caps(vec![]), wgpu::PresentMode::Fifo).is_none());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let c = caps(vec![wgpu::TextureFormat::Bgra8UnormSrgb]);
        let mailbox = SurfaceChoice::from_caps(&c, wgpu::PresentMode::Mailbox).unwrap();
        assert_eq!(mailbox.present_mode, wgpu::PresentMode::Fifo);
        let immediate = SurfaceChoice::from_caps(&c, wgpu::PresentMode::Immediate).unwrap();
        assert_eq!(immediate.present_mode, wgpu::PresentMode::Immediate);
    }

    #[test]
    fn stale_surfaces_are_recoverable_and_oom_is_not() {
        assert_eq!(classify(&wgpu::SurfaceError::Outdated), SurfaceErrorAction::Reconfigured);
        assert_eq!(classify(&wgpu::SurfaceError::Lost), SurfaceErrorAction::Reconfigured);
        assert_eq!(classify(&wgpu::SurfaceError::Timeout), SurfaceErrorAction::SkipFrame);
        assert_eq!(classify(&wgpu::SurfaceError::OutOfMemory), SurfaceErrorAction::Fatal);
    }
}
