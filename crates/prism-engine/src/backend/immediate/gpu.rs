use std::sync::Arc;

use anyhow::{Context, Result};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::config::ImmediateConfig;

use super::surface::{Presenter, SurfaceChoice, SurfaceErrorAction};

/// wgpu device, queue and the window's presenter.
///
/// The surface holds its own `Arc` of the window, so the window outlives the
/// surface whatever the host does with its handle.
pub struct Gpu {
    _instance: wgpu::Instance,
    adapter_name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    presenter: Presenter,
    /// `PolygonMode::Line` is available.
    line_mode: bool,
}

/// One acquired surface texture and the encoder recording into it.
///
/// Holding it blocks acquisition of the next frame.
pub struct GpuFrame {
    pub surface_texture: wgpu::SurfaceTexture,
    pub view: wgpu::TextureView,
    pub encoder: wgpu::CommandEncoder,
}

impl Gpu {
    pub async fn new(window: Arc<Window>, init: &ImmediateConfig) -> Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: init.backends,
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no GPU adapter can present to this window")?;
        let (device, queue, line_mode) = request_device(&adapter).await?;

        let choice = SurfaceChoice::from_caps(&surface.get_capabilities(&adapter), init.present_mode)
            .context("surface reports no formats")?;
        let presenter =
            Presenter::new(surface, &device, choice, size, init.desired_maximum_frame_latency);

        let adapter_name = adapter.get_info().name;
        log::info!(
            "wgpu adapter: {adapter_name} ({:?}, {:?})",
            choice.format,
            choice.present_mode
        );

        Ok(Self { _instance: instance, adapter_name, device, queue, presenter, line_mode })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.presenter.format()
    }

    /// Drawable size in physical pixels; may be zero-area.
    pub fn size(&self) -> PhysicalSize<u32> {
        self.presenter.size()
    }

    pub fn is_zero_sized(&self) -> bool {
        self.presenter.is_zero_sized()
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn supports_line_mode(&self) -> bool {
        self.line_mode
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        self.presenter.resize(&self.device, size);
    }

    pub fn begin_frame(&self) -> Result<GpuFrame, SurfaceErrorAction> {
        let surface_texture = self.presenter.acquire(&self.device)?;
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("prism frame encoder"),
        });
        Ok(GpuFrame { surface_texture, view, encoder })
    }

    pub fn submit(&self, frame: GpuFrame) {
        let GpuFrame { surface_texture, view, encoder } = frame;
        self.queue.submit(std::iter::once(encoder.finish()));
        drop(view);
        self.presenter.present(&self.device, surface_texture);
    }
}

/// Requests line polygon mode when the adapter has it.
async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue, bool)> {
    let line_mode = adapter.features().contains(wgpu::Features::POLYGON_MODE_LINE);
    if !line_mode {
        log::warn!("adapter lacks POLYGON_MODE_LINE; wireframe and outline draw filled");
    }
    let required_features = if line_mode {
        wgpu::Features::POLYGON_MODE_LINE
    } else {
        wgpu::Features::empty()
    };

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("prism device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        })
        .await
        .context("failed to create wgpu device")?;
    Ok((device, queue, line_mode))
}
