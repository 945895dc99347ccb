//! One uniform buffer per frame, addressed with dynamic offsets.
//!
//! Every draw of a frame gets its own [`ObjectUniforms`] slot; all slots are
//! written with a single `write_buffer` before the passes are recorded.

use crate::render::ObjectUniforms;

pub struct UniformArena {
    layout: wgpu::BindGroupLayout,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: usize,
}

impl UniformArena {
    const INITIAL_SLOTS: usize = 64;

    pub fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout) -> Self {
        let align = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let stride = ObjectUniforms::SIZE.div_ceil(align) * align;
        let (buffer, bind_group) = Self::allocate(device, layout, stride, Self::INITIAL_SLOTS);
        Self { layout: layout.clone(), buffer, bind_group, stride, capacity: Self::INITIAL_SLOTS }
    }

    pub fn layout_entry() -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(ObjectUniforms::SIZE),
            },
            count: None,
        }
    }

    fn allocate(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        stride: u64,
        slots: usize,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prism object uniforms"),
            size: stride * slots as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prism object uniforms bind group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(ObjectUniforms::SIZE),
                }),
            }],
        });
        (buffer, bind_group)
    }

    /// Uploads one slot per entry of `uniforms`, growing the buffer first if
    /// needed. Slot `i` is at [`Self::offset`]`(i)`.
    pub fn write(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, uniforms: &[ObjectUniforms]) {
        if uniforms.is_empty() {
            return;
        }
        if uniforms.len() > self.capacity {
            let slots = uniforms.len().next_power_of_two();
            self.buffer.destroy();
            (self.buffer, self.bind_group) = Self::allocate(device, &self.layout, self.stride, slots);
            self.capacity = slots;
            log::debug!("object uniform arena grown to {slots} slots");
        }

        let mut bytes = vec![0u8; self.stride as usize * uniforms.len()];
        for (chunk, u) in bytes.chunks_exact_mut(self.stride as usize).zip(uniforms) {
            chunk[..ObjectUniforms::SIZE as usize].copy_from_slice(bytemuck::bytes_of(u));
        }
        queue.write_buffer(&self.buffer, 0, &bytes);
    }

    pub fn offset(&self, slot: usize) -> u32 {
        (self.stride * slot as u64) as u32
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    pub fn destroy(&mut self) {
        self.buffer.destroy();
    }
}
