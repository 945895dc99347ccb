//! Buffers, images and synchronous one-shot command submission.

use anyhow::{Context as _, Result, bail};
use ash::vk;

use super::context::Context;

pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..properties.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && properties.memory_types[i as usize].property_flags.contains(flags)
        })
        .with_context(|| format!("no memory type with {flags:?}"))
}

fn allocate(
    ctx: &Context,
    requirements: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type =
        find_memory_type(&ctx.memory_properties, requirements.memory_type_bits, flags)?;
    let info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    Ok(unsafe { ctx.device.allocate_memory(&info, None)? })
}

pub const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// A buffer with its own allocation. Host-visible buffers stay mapped.
#[derive(Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    pub size: u64,
    mapped: *mut u8,
}

impl GpuBuffer {
    pub fn new(
        ctx: &Context,
        size: u64,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let device = &ctx.device;
        let info = vk::BufferCreateInfo::default()
            .size(size.max(4))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&info, None)? };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = match allocate(ctx, requirements, flags) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };
        let mut this = Self { buffer, memory, size, mapped: std::ptr::null_mut() };

        let bound = unsafe { device.bind_buffer_memory(buffer, memory, 0) }.and_then(|()| {
            if flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
                let ptr = unsafe {
                    device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
                };
                this.mapped = ptr.cast();
            }
            Ok(())
        });
        if let Err(err) = bound {
            this.destroy(device);
            return Err(err.into());
        }
        Ok(this)
    }

    /// Copies `bytes` to `offset` of a mapped buffer.
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.mapped.is_null() {
            bail!("buffer is not host visible");
        }
        if offset + bytes.len() as u64 > self.size {
            bail!("write of {} bytes at {offset} overflows {}", bytes.len(), self.size);
        }
        // SAFETY: the range was checked against the mapped allocation.
        unsafe {
            let dst = self.mapped.add(offset as usize);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        Ok(())
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<&[u8]> {
        if self.mapped.is_null() {
            bail!("buffer is not host visible");
        }
        if offset + len as u64 > self.size {
            bail!("read of {len} bytes at {offset} overflows {}", self.size);
        }
        // SAFETY: as in `write`; host-coherent memory needs no invalidation.
        Ok(unsafe { std::slice::from_raw_parts(self.mapped.add(offset as usize), len) })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            if !self.mapped.is_null() {
                device.unmap_memory(self.memory);
            }
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Uploads `bytes` into a new device-local buffer through a staging copy.
pub fn device_local_buffer(
    ctx: &Context,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let size = bytes.len() as u64;
    let staging = GpuBuffer::new(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC, HOST)?;
    let result = staging.write(0, bytes).and_then(|()| {
        let buffer = GpuBuffer::new(
            ctx,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let copied = one_shot(ctx, |cmd| unsafe {
            let region = vk::BufferCopy::default().size(size.max(4));
            ctx.device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
        });
        match copied {
            Ok(()) => Ok(buffer),
            Err(err) => {
                buffer.destroy(&ctx.device);
                Err(err)
            }
        }
    });
    staging.destroy(&ctx.device);
    result
}

#[derive(Debug)]
pub struct GpuImage {
    pub image: vk::Image,
    memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
}

impl GpuImage {
    pub fn new(
        ctx: &Context,
        extent: vk::Extent2D,
        format: vk::Format,
        mip_levels: u32,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let device = &ctx.device;
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&info, None)? };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match allocate(ctx, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err);
            }
        };
        let mut this = Self { image, memory, view: vk::ImageView::null(), extent, mip_levels };

        let viewed = unsafe { device.bind_image_memory(image, memory, 0) }.and_then(|()| {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(subresource_range(aspect, mip_levels));
            this.view = unsafe { device.create_image_view(&view_info, None)? };
            Ok(())
        });
        if let Err(err) = viewed {
            this.destroy(device);
            return Err(err.into());
        }
        Ok(this)
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

pub fn subresource_range(aspect: vk::ImageAspectFlags, levels: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(levels)
        .base_array_layer(0)
        .layer_count(1)
}

/// Records a layout transition of every mip level of a colour image.
pub fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    levels: u32,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) {
    use vk::{AccessFlags as A, ImageLayout as L, PipelineStageFlags as S};

    let (src_access, dst_access, src_stage, dst_stage) = match (from, to) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        _ => (
            A::MEMORY_READ | A::MEMORY_WRITE,
            A::MEMORY_READ | A::MEMORY_WRITE,
            S::ALL_COMMANDS,
            S::ALL_COMMANDS,
        ),
    };

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(from)
        .new_layout(to)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR, levels))
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Records with `record`, submits, and waits for the queue to drain.
pub fn one_shot(ctx: &Context, record: impl FnOnce(vk::CommandBuffer)) -> Result<()> {
    let device = &ctx.device;
    let info = vk::CommandBufferAllocateInfo::default()
        .command_pool(ctx.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let cmd = unsafe { device.allocate_command_buffers(&info)? }[0];

    let begin = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    let result = unsafe { device.begin_command_buffer(cmd, &begin) }.and_then(|()| {
        record(cmd);
        let cmds = [cmd];
        let submit = vk::SubmitInfo::default().command_buffers(&cmds);
        unsafe {
            device.end_command_buffer(cmd)?;
            device.queue_submit(ctx.queue, &[submit], vk::Fence::null())?;
            device.queue_wait_idle(ctx.queue)
        }
    });
    unsafe { device.free_command_buffers(ctx.command_pool, &[cmd]) };
    Ok(result?)
}
