//! [`ExplicitDevice`] over Vulkan via `ash`.

mod context;
mod generation;
mod memory;
mod pipeline;
mod texture;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow, bail};
use ash::vk;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::config::{ExplicitConfig, PresentModePreference};
use crate::render::{PassTarget, PipelineKey, TextureImage, vertex};

use super::device::{Acquire, ExplicitDevice, Present, Recording};

use context::Context;
use generation::Bindings;
use memory::GpuBuffer;
use pipeline::Layouts;
use texture::TexturePool;

pub use generation::Generation;
pub use texture::TextureId;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BufferId(u64);

pub struct VulkanDevice {
    ctx: Context,
    present_mode: PresentModePreference,
    layouts: Layouts,
    /// Per-instance zeros for attributes a layout lacks.
    defaults: GpuBuffer,
    textures: TexturePool,
    buffers: HashMap<BufferId, GpuBuffer>,
    next_buffer: u64,
}

impl VulkanDevice {
    fn bindings(&self) -> Bindings<'_> {
        Bindings {
            buffers: &self.buffers,
            textures: &self.textures,
            defaults: self.defaults.buffer,
            pipeline_layout: self.layouts.pipeline,
        }
    }
}

impl ExplicitDevice for VulkanDevice {
    type Buffer = BufferId;
    type Texture = TextureId;
    type Pipeline = vk::Pipeline;
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type Generation = Generation;

    fn open(window: Option<Arc<Window>>, config: &ExplicitConfig) -> Result<Self> {
        let window = window.context("the explicit backend needs a window")?;
        let ctx = Context::new(window, config)?;

        let layouts = match Layouts::new(&ctx.device) {
            Ok(layouts) => layouts,
            Err(err) => {
                ctx.destroy();
                return Err(err);
            }
        };
        let defaults = memory::device_local_buffer(
            &ctx,
            bytemuck::cast_slice(&vertex::DEFAULT_ATTRIBUTES),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        );
        let defaults = match defaults {
            Ok(buffer) => buffer,
            Err(err) => {
                layouts.destroy(&ctx.device);
                ctx.destroy();
                return Err(err);
            }
        };
        let textures = match TexturePool::new(&ctx, layouts.texture, config.max_textures) {
            Ok(pool) => pool,
            Err(err) => {
                defaults.destroy(&ctx.device);
                layouts.destroy(&ctx.device);
                ctx.destroy();
                return Err(err);
            }
        };

        Ok(Self {
            ctx,
            present_mode: config.present_mode,
            layouts,
            defaults,
            textures,
            buffers: HashMap::new(),
            next_buffer: 1,
        })
    }

    fn framebuffer_size(&self) -> PhysicalSize<u32> {
        self.ctx.window.inner_size()
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.ctx.device.device_wait_idle() }.context("vkDeviceWaitIdle failed")
    }

    fn close(mut self) {
        if !self.buffers.is_empty() {
            log::warn!("closing device with {} live buffers", self.buffers.len());
        }
        for (_, buffer) in self.buffers.drain() {
            buffer.destroy(&self.ctx.device);
        }
        self.textures.destroy(&self.ctx);
        self.defaults.destroy(&self.ctx.device);
        self.layouts.destroy(&self.ctx.device);
        self.ctx.destroy();
    }

    fn create_generation(&mut self, extent: PhysicalSize<u32>) -> Result<Generation> {
        Generation::new(&self.ctx, self.layouts.object, extent, self.present_mode)
    }

    fn destroy_generation(&mut self, generation: Generation) {
        generation.destroy(&self.ctx);
    }

    fn create_vertex_buffer(&mut self, label: &str, vertices: &[f32]) -> Result<BufferId> {
        let buffer = memory::device_local_buffer(
            &self.ctx,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )
        .with_context(|| format!("failed to upload vertices of {label}"))?;
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        match self.buffers.remove(&buffer) {
            Some(buffer) => buffer.destroy(&self.ctx.device),
            None => log::warn!("destroying unknown buffer {buffer:?}"),
        }
    }

    fn max_texture_dimension(&self) -> u32 {
        self.ctx.max_image_dimension
    }

    fn create_texture(&mut self, label: &str, image: &TextureImage) -> Result<TextureId> {
        self.textures
            .create(&self.ctx, self.layouts.texture, image)
            .with_context(|| format!("failed to upload texture {label}"))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.destroy_texture(&self.ctx, texture);
    }

    fn create_pipeline(
        &mut self,
        generation: &Generation,
        spirv: &[u32],
        key: &PipelineKey,
    ) -> Result<vk::Pipeline> {
        let render_pass = match key.target {
            PassTarget::Present => generation.render_pass(),
            PassTarget::Pick => generation.pick_render_pass(),
        };
        pipeline::create_pipeline(
            &self.ctx.device,
            &self.layouts,
            render_pass,
            spirv,
            key,
            self.ctx.fill_mode_non_solid,
        )
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe { self.ctx.device.destroy_pipeline(pipeline, None) };
    }

    fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence> {
        let mut info = vk::FenceCreateInfo::default();
        if signaled {
            info = info.flags(vk::FenceCreateFlags::SIGNALED);
        }
        Ok(unsafe { self.ctx.device.create_fence(&info, None)? })
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.ctx.device.destroy_fence(fence, None) };
    }

    fn create_semaphore(&mut self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.ctx.device.create_semaphore(&info, None)? })
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.ctx.device.destroy_semaphore(semaphore, None) };
    }

    fn wait_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        match unsafe { self.ctx.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => bail!("timed out waiting for a frame fence"),
            Err(err) => Err(anyhow!(err).context("vkWaitForFences failed")),
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
        Ok(unsafe { self.ctx.device.reset_fences(&[fence])? })
    }

    fn acquire_image(
        &mut self,
        generation: &Generation,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<Acquire> {
        generation.acquire(&self.ctx, signal, timeout_ns)
    }

    fn record_frame(
        &mut self,
        generation: &mut Generation,
        image: u32,
        frame: &Recording<Self>,
    ) -> Result<()> {
        let bindings = self.bindings();
        generation.record(&self.ctx, image, frame, &bindings)
    }

    fn submit(
        &mut self,
        generation: &Generation,
        image: u32,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        generation.submit(&self.ctx, image, wait, signal, fence)
    }

    fn present(
        &mut self,
        generation: &Generation,
        image: u32,
        wait: vk::Semaphore,
    ) -> Result<Present> {
        generation.present(&self.ctx, image, wait)
    }

    fn render_pick(&mut self, generation: &mut Generation, frame: &Recording<Self>) -> Result<()> {
        let bindings = self.bindings();
        generation.render_pick(&self.ctx, frame, &bindings)
    }

    fn read_pick(&mut self, generation: &Generation, x: u32, y: u32) -> Result<u32> {
        generation.read_pick(x, y)
    }
}
