//! Size-dependent render targets: the main depth buffer and the pick target.

use anyhow::{Context, Result};
use winit::dpi::PhysicalSize;

use crate::render::picking;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const PICK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;

/// Row pitch of the one-pixel readback.
const READBACK_BYTES: u64 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64;

fn attachment(
    device: &wgpu::Device,
    label: &str,
    size: PhysicalSize<u32>,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size.width.max(1),
            height: size.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

pub struct DepthTarget {
    size: PhysicalSize<u32>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthTarget {
    pub fn new(device: &wgpu::Device, size: PhysicalSize<u32>) -> Self {
        let (texture, view) = attachment(
            device,
            "prism depth",
            size,
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        Self { size, texture, view }
    }

    /// Recreates the buffer when `size` differs from the current one.
    pub fn ensure(&mut self, device: &wgpu::Device, size: PhysicalSize<u32>) {
        if self.size != size {
            self.texture.destroy();
            *self = Self::new(device, size);
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

/// Offscreen R32Uint colour + depth pair with a one-pixel readback buffer.
pub struct PickTarget {
    size: PhysicalSize<u32>,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth: DepthTarget,
    readback: wgpu::Buffer,
}

impl PickTarget {
    pub fn new(device: &wgpu::Device, size: PhysicalSize<u32>) -> Self {
        let (color, color_view) = attachment(
            device,
            "prism pick",
            size,
            PICK_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prism pick readback"),
            size: READBACK_BYTES,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self { size, color, color_view, depth: DepthTarget::new(device, size), readback }
    }

    pub fn ensure(&mut self, device: &wgpu::Device, size: PhysicalSize<u32>) {
        if self.size != size {
            self.destroy();
            *self = Self::new(device, size);
        }
    }

    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color_view
    }

    pub fn depth_view(&self) -> &wgpu::TextureView {
        self.depth.view()
    }

    /// Copies the texel under `(x, y)` to the host and returns it.
    ///
    /// Blocks until the GPU has finished every submitted pass.
    pub fn read(&self, device: &wgpu::Device, queue: &wgpu::Queue, x: u32, y: u32) -> Result<u32> {
        let (x, y) = picking::clamp_to_target(x, y, self.size.width, self.size.height);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("prism pick readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.color,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(READBACK_BYTES as u32),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .context("device poll failed during pick readback")?;
        rx.recv()
            .context("pick readback callback dropped")?
            .context("failed to map pick readback buffer")?;

        let value = {
            let bytes = slice.get_mapped_range();
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        };
        self.readback.unmap();
        Ok(value)
    }

    pub fn destroy(&mut self) {
        self.color.destroy();
        self.depth.texture.destroy();
        self.readback.destroy();
    }
}
