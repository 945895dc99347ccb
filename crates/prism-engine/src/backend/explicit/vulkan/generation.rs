//! One swapchain generation and everything sized or counted by it.

use anyhow::{Context as _, Result, anyhow, bail};
use ash::vk;
use winit::dpi::PhysicalSize;

use crate::backend::explicit::device::{Acquire, FrameRecording, Present, SwapchainGeneration};
use crate::config::PresentModePreference;
use crate::render::{ObjectUniforms, picking};

use super::BufferId;
use super::context::Context;
use super::memory::{self, GpuBuffer, GpuImage};
use super::texture::{TextureId, TexturePool};

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
pub const PICK_FORMAT: vk::Format = vk::Format::R32_UINT;

pub type VulkanRecording = FrameRecording<BufferId, TextureId, vk::Pipeline>;

/// Handle lookups a recording needs.
pub struct Bindings<'a> {
    pub buffers: &'a std::collections::HashMap<BufferId, GpuBuffer>,
    pub textures: &'a TexturePool,
    pub defaults: vk::Buffer,
    pub pipeline_layout: vk::PipelineLayout,
}

/// Dynamic-offset uniform buffer with one slot per draw.
#[derive(Default)]
struct UniformRing {
    buffer: Option<GpuBuffer>,
    slots: usize,
    set: vk::DescriptorSet,
}

impl UniformRing {
    const INITIAL_SLOTS: usize = 64;

    /// Reallocates when `slots` do not fit. Callers guarantee the buffer is
    /// not in use by a pending submission.
    fn grow(&mut self, ctx: &Context, slots: usize, stride: u64) -> Result<()> {
        if self.buffer.is_some() && slots <= self.slots {
            return Ok(());
        }
        let slots = slots.max(Self::INITIAL_SLOTS).next_power_of_two();
        let buffer = GpuBuffer::new(
            ctx,
            stride * slots as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            memory::HOST,
        )?;
        if let Some(old) = self.buffer.replace(buffer) {
            old.destroy(&ctx.device);
            log::debug!("uniform ring grown to {slots} slots");
        }
        self.slots = slots;
        self.write_descriptor(ctx);
        Ok(())
    }

    fn bind(&mut self, ctx: &Context, set: vk::DescriptorSet) {
        self.set = set;
        self.write_descriptor(ctx);
    }

    fn write_descriptor(&self, ctx: &Context) {
        let Some(buffer) = &self.buffer else { return };
        if self.set == vk::DescriptorSet::null() {
            return;
        }
        let info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer.buffer)
            .offset(0)
            .range(ObjectUniforms::SIZE)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(&info);
        unsafe { ctx.device.update_descriptor_sets(&[write], &[]) };
    }

    fn upload(&mut self, ctx: &Context, stride: u64, frame: &VulkanRecording) -> Result<()> {
        self.grow(ctx, frame.draw_count(), stride)?;
        let buffer = self.buffer.as_ref().context("uniform ring has no buffer")?;
        let draws = frame.passes.iter().flat_map(|p| &p.draws);
        for (slot, draw) in draws.enumerate() {
            buffer.write(slot as u64 * stride, bytemuck::bytes_of(&draw.uniforms))?;
        }
        Ok(())
    }

    fn destroy(&mut self, device: &ash::Device) {
        if let Some(buffer) = self.buffer.take() {
            buffer.destroy(device);
        }
    }
}

/// Offscreen R32Uint target drawn by the index pass and read back on the host.
#[derive(Default)]
struct PickTarget {
    render_pass: vk::RenderPass,
    color: Option<GpuImage>,
    depth: Option<GpuImage>,
    framebuffer: vk::Framebuffer,
    staging: Option<GpuBuffer>,
    uniforms: UniformRing,
    command_buffer: vk::CommandBuffer,
}

pub struct Generation {
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    depth: Option<GpuImage>,
    framebuffers: Vec<vk::Framebuffer>,
    uniforms: Vec<UniformRing>,
    descriptor_pool: vk::DescriptorPool,
    command_buffers: Vec<vk::CommandBuffer>,
    pick: PickTarget,
    /// Uniform slot pitch honouring `minUniformBufferOffsetAlignment`.
    stride: u64,
}

impl SwapchainGeneration for Generation {
    fn image_count(&self) -> usize {
        self.views.len()
    }

    fn extent(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.extent.width, self.extent.height)
    }

    fn target_signature(&self) -> u64 {
        (u64::from(self.format.as_raw() as u32) << 32) | u64::from(DEPTH_FORMAT.as_raw() as u32)
    }
}

impl Generation {
    pub fn new(
        ctx: &Context,
        object_layout: vk::DescriptorSetLayout,
        size: PhysicalSize<u32>,
        preference: PresentModePreference,
    ) -> Result<Self> {
        let align = ctx.uniform_alignment;
        let mut generation = Self {
            swapchain: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            depth: None,
            framebuffers: Vec::new(),
            uniforms: Vec::new(),
            descriptor_pool: vk::DescriptorPool::null(),
            command_buffers: Vec::new(),
            pick: PickTarget::default(),
            stride: ObjectUniforms::SIZE.div_ceil(align) * align,
        };
        match generation.build(ctx, object_layout, size, preference) {
            Ok(()) => Ok(generation),
            Err(err) => {
                generation.destroy(ctx);
                Err(err)
            }
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn pick_render_pass(&self) -> vk::RenderPass {
        self.pick.render_pass
    }

    fn build(
        &mut self,
        ctx: &Context,
        object_layout: vk::DescriptorSetLayout,
        size: PhysicalSize<u32>,
        preference: PresentModePreference,
    ) -> Result<()> {
        let device = &ctx.device;

        // ── swapchain ─────────────────────────────────────────────────────
        let caps = ctx.surface_capabilities()?;
        let surface_format = choose_surface_format(&ctx.surface_formats()?)?;
        let present_mode = choose_present_mode(&ctx.present_modes()?, preference);
        let extent = choose_extent(&caps, size);
        if extent.width == 0 || extent.height == 0 {
            bail!("surface reports a zero-area extent");
        }
        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        self.swapchain = unsafe { ctx.swapchain_loader.create_swapchain(&info, None) }
            .context("failed to create swapchain")?;
        self.format = surface_format.format;
        self.extent = extent;

        // ── image views ───────────────────────────────────────────────────
        let images = unsafe { ctx.swapchain_loader.get_swapchain_images(self.swapchain)? };
        for image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .subresource_range(memory::subresource_range(vk::ImageAspectFlags::COLOR, 1));
            self.views.push(unsafe { device.create_image_view(&view_info, None)? });
        }

        // ── render pass, depth, framebuffers ──────────────────────────────
        self.render_pass = create_render_pass(device, self.format, vk::ImageLayout::PRESENT_SRC_KHR)?;
        let depth = self.depth.insert(depth_image(ctx, extent)?);
        let depth_view = depth.view;
        for view in &self.views {
            let framebuffer = create_framebuffer(device, self.render_pass, [*view, depth_view], extent)?;
            self.framebuffers.push(framebuffer);
        }

        // ── pick target ───────────────────────────────────────────────────
        self.pick.render_pass =
            create_render_pass(device, PICK_FORMAT, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
        let color = self.pick.color.insert(GpuImage::new(
            ctx,
            extent,
            PICK_FORMAT,
            1,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
        )?);
        let color_view = color.view;
        let pick_depth = self.pick.depth.insert(depth_image(ctx, extent)?);
        let pick_depth_view = pick_depth.view;
        self.pick.framebuffer =
            create_framebuffer(device, self.pick.render_pass, [color_view, pick_depth_view], extent)?;
        self.pick.staging = Some(GpuBuffer::new(
            ctx,
            u64::from(extent.width) * u64::from(extent.height) * picking::TEXEL_BYTES,
            vk::BufferUsageFlags::TRANSFER_DST,
            memory::HOST,
        )?);

        // ── per-image uniform buffers ─────────────────────────────────────
        let ring_count = self.views.len() + 1;
        for _ in 0..self.views.len() {
            let mut ring = UniformRing::default();
            ring.grow(ctx, UniformRing::INITIAL_SLOTS, self.stride)?;
            self.uniforms.push(ring);
        }
        self.pick.uniforms.grow(ctx, UniformRing::INITIAL_SLOTS, self.stride)?;

        // ── descriptor pool and sets ──────────────────────────────────────
        let sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(ring_count as u32)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(ring_count as u32)
            .pool_sizes(&sizes);
        self.descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };
        let layouts = vec![object_layout; ring_count];
        let alloc = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        let sets = unsafe { device.allocate_descriptor_sets(&alloc)? };
        for (ring, set) in self.uniforms.iter_mut().zip(&sets) {
            ring.bind(ctx, *set);
        }
        self.pick.uniforms.bind(ctx, sets[ring_count - 1]);

        // ── command buffers ───────────────────────────────────────────────
        let alloc = vk::CommandBufferAllocateInfo::default()
            .command_pool(ctx.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(ring_count as u32);
        let mut buffers = unsafe { device.allocate_command_buffers(&alloc)? };
        self.pick.command_buffer = buffers.pop().context("no pick command buffer")?;
        self.command_buffers = buffers;

        log::debug!(
            "swapchain {:?} {:?} {}x{}, {} images",
            self.format,
            present_mode,
            extent.width,
            extent.height,
            self.views.len()
        );
        Ok(())
    }

    pub fn acquire(&self, ctx: &Context, signal: vk::Semaphore, timeout_ns: u64) -> Result<Acquire> {
        let acquired = unsafe {
            ctx.swapchain_loader
                .acquire_next_image(self.swapchain, timeout_ns, signal, vk::Fence::null())
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                bail!("timed out acquiring a swapchain image")
            }
            Err(err) => Err(anyhow!(err).context("failed to acquire swapchain image")),
        }
    }

    /// Writes the frame's uniforms and records the command buffer of `image`.
    pub fn record(
        &mut self,
        ctx: &Context,
        image: u32,
        frame: &VulkanRecording,
        bindings: &Bindings<'_>,
    ) -> Result<()> {
        let index = image as usize;
        let cmd = *self.command_buffers.get(index).context("image index out of range")?;
        let framebuffer = self.framebuffers[index];
        self.uniforms[index].upload(ctx, self.stride, frame)?;

        let [r, g, b, a] = frame.clear_color;
        let clear = [
            vk::ClearValue { color: vk::ClearColorValue { float32: [r, g, b, a] } },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];

        let device = &ctx.device;
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())?;
            let begin = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent: self.extent })
                .clear_values(&clear);
            device.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);
        }
        let drawn = self.draw(ctx, cmd, &self.uniforms[index], frame, bindings);
        unsafe {
            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }
        drawn
    }

    fn draw(
        &self,
        ctx: &Context,
        cmd: vk::CommandBuffer,
        ring: &UniformRing,
        frame: &VulkanRecording,
        bindings: &Bindings<'_>,
    ) -> Result<()> {
        let device = &ctx.device;
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D { offset: vk::Offset2D::default(), extent: self.extent };

        unsafe {
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_bind_vertex_buffers(cmd, 1, &[bindings.defaults], &[0]);
        }

        let mut bound = vk::Pipeline::null();
        let draws = frame.passes.iter().flat_map(|p| &p.draws);
        for (slot, draw) in draws.enumerate() {
            let vertex_buffer = bindings
                .buffers
                .get(&draw.vertex_buffer)
                .with_context(|| format!("unknown vertex buffer {:?}", draw.vertex_buffer))?;
            let texture_set = match draw.texture {
                Some(id) => bindings
                    .textures
                    .set(id)
                    .with_context(|| format!("unknown texture {id:?}"))?,
                None => bindings.textures.white,
            };

            unsafe {
                if draw.pipeline != bound {
                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
                    bound = draw.pipeline;
                }
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    bindings.pipeline_layout,
                    0,
                    &[ring.set, texture_set],
                    &[(slot as u64 * self.stride) as u32],
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer.buffer], &[0]);
                device.cmd_draw(cmd, draw.vertex_count, 1, 0, 0);
            }
        }
        Ok(())
    }

    pub fn submit(
        &self,
        ctx: &Context,
        image: u32,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let waits = [wait];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let cmds = [*self.command_buffers.get(image as usize).context("image index out of range")?];
        let signals = [signal];
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signals);
        unsafe { ctx.device.queue_submit(ctx.queue, &[info], fence) }
            .context("queue submit failed")
    }

    pub fn present(&self, ctx: &Context, image: u32, wait: vk::Semaphore) -> Result<Present> {
        let waits = [wait];
        let swapchains = [self.swapchain];
        let indices = [image];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { ctx.swapchain_loader.queue_present(ctx.queue, &info) } {
            Ok(false) => Ok(Present::Ok),
            Ok(true) => Ok(Present::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::OutOfDate),
            Err(err) => Err(anyhow!(err).context("present failed")),
        }
    }

    /// Draws the index pass, copies the target to the host and waits.
    pub fn render_pick(
        &mut self,
        ctx: &Context,
        frame: &VulkanRecording,
        bindings: &Bindings<'_>,
    ) -> Result<()> {
        self.pick.uniforms.upload(ctx, self.stride, frame)?;
        let color = self.pick.color.as_ref().context("pick target missing")?;
        let staging = self.pick.staging.as_ref().context("pick staging missing")?;
        let cmd = self.pick.command_buffer;
        let device = &ctx.device;

        let clear = [
            vk::ClearValue { color: vk::ClearColorValue { uint32: [0; 4] } },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;
            let begin = vk::RenderPassBeginInfo::default()
                .render_pass(self.pick.render_pass)
                .framebuffer(self.pick.framebuffer)
                .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent: self.extent })
                .clear_values(&clear);
            device.cmd_begin_render_pass(cmd, &begin, vk::SubpassContents::INLINE);
        }
        let drawn = self.draw(ctx, cmd, &self.pick.uniforms, frame, bindings);
        unsafe {
            device.cmd_end_render_pass(cmd);

            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_extent(vk::Extent3D {
                    width: self.extent.width,
                    height: self.extent.height,
                    depth: 1,
                });
            device.cmd_copy_image_to_buffer(
                cmd,
                color.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging.buffer,
                &[region],
            );
            let barrier = vk::BufferMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(staging.buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
            device.end_command_buffer(cmd)?;
        }
        drawn?;

        let cmds = [cmd];
        let info = vk::SubmitInfo::default().command_buffers(&cmds);
        unsafe {
            device.queue_submit(ctx.queue, &[info], vk::Fence::null())?;
            device.queue_wait_idle(ctx.queue)?;
        }
        Ok(())
    }

    pub fn read_pick(&self, x: u32, y: u32) -> Result<u32> {
        let staging = self.pick.staging.as_ref().context("pick staging missing")?;
        let offset = picking::texel_offset(x, y, self.extent.width, self.extent.height);
        let bytes = staging.read(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Destroys in reverse build order. Null handles are skipped by Vulkan.
    pub fn destroy(mut self, ctx: &Context) {
        let device = &ctx.device;
        unsafe {
            let mut cmds = std::mem::take(&mut self.command_buffers);
            if self.pick.command_buffer != vk::CommandBuffer::null() {
                cmds.push(self.pick.command_buffer);
            }
            if !cmds.is_empty() {
                device.free_command_buffers(ctx.command_pool, &cmds);
            }
            device.destroy_descriptor_pool(self.descriptor_pool, None);
        }
        for ring in &mut self.uniforms {
            ring.destroy(device);
        }
        self.pick.uniforms.destroy(device);

        unsafe {
            if let Some(staging) = self.pick.staging.take() {
                staging.destroy(device);
            }
            device.destroy_framebuffer(self.pick.framebuffer, None);
            for image in [self.pick.depth.take(), self.pick.color.take()].into_iter().flatten() {
                image.destroy(device);
            }
            device.destroy_render_pass(self.pick.render_pass, None);

            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            if let Some(depth) = self.depth.take() {
                depth.destroy(device);
            }
            device.destroy_render_pass(self.render_pass, None);
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            ctx.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let srgb = formats.iter().copied().find(|f| {
        matches!(f.format, vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB)
            && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    srgb.or_else(|| formats.first().copied())
        .context("surface reports no formats")
}

fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentModePreference,
) -> vk::PresentModeKHR {
    let wanted = match preference {
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };
    if modes.contains(&wanted) {
        wanted
    } else {
        log::warn!("present mode {wanted:?} unavailable, using FIFO");
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, size: PhysicalSize<u32>) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: size.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: size.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

fn depth_image(ctx: &Context, extent: vk::Extent2D) -> Result<GpuImage> {
    GpuImage::new(
        ctx,
        extent,
        DEPTH_FORMAT,
        1,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        vk::ImageAspectFlags::DEPTH,
    )
}

/// Colour + depth, both cleared; colour ends in `final_layout`.
fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    final_layout: vk::ImageLayout,
) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(final_layout),
        vk::AttachmentDescription::default()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];
    let color_ref = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let depth_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref)
        .depth_stencil_attachment(&depth_ref)];

    let dependencies = pass_dependencies(final_layout);

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    Ok(unsafe { device.create_render_pass(&info, None)? })
}

/// Subpass dependencies for a single-subpass pass ending in `final_layout`.
///
/// A pass that ends in `TRANSFER_SRC_OPTIMAL` is read back by a copy, so its
/// colour writes and the layout transition must complete before transfer reads.
fn pass_dependencies(final_layout: vk::ImageLayout) -> Vec<vk::SubpassDependency> {
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let mut dependencies = vec![vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .dst_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];
    if final_layout == vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
        dependencies.push(
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ),
        );
    }
    dependencies
}

fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    attachments: [vk::ImageView; 2],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);
    Ok(unsafe { device.create_framebuffer(&info, None)? })
}
