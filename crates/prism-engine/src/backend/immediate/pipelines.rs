//! Shared binding layouts, shader modules and pipeline construction.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use wgpu::util::DeviceExt;

use crate::render::shading::Program;
use crate::render::vertex::{self, AttributeFormat};
use crate::render::{
    PassTarget, PipelineKey, PolygonMode, ProgramLibrary, ShadingKind, TextureImage, VertexLayout,
};

use super::targets::{DEPTH_FORMAT, PICK_FORMAT};
use super::uniforms::UniformArena;

/// A sampled texture with its group-1 bind group.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub bind_group: wgpu::BindGroup,
}

/// Device objects every pipeline and draw shares.
pub struct SharedObjects {
    pub uniform_layout: wgpu::BindGroupLayout,
    pub texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pub sampler: wgpu::Sampler,
    /// Bound for shapes without a texture.
    pub white: GpuTexture,
    /// Per-instance values for absent vertex channels.
    pub defaults: wgpu::Buffer,
    modules: HashMap<ShadingKind, wgpu::ShaderModule>,
    surface_format: wgpu::TextureFormat,
    line_mode: bool,
}

impl SharedObjects {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        programs: &ProgramLibrary,
        surface_format: wgpu::TextureFormat,
        line_mode: bool,
    ) -> Result<Self> {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prism object bgl"),
            entries: &[UniformArena::layout_entry()],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prism texture bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("prism pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            immediate_size: 0,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("prism sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let white = create_texture(
            device,
            queue,
            &texture_layout,
            &sampler,
            "prism white",
            &TextureImage::white(),
        )?;

        let defaults = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("prism default attributes"),
            contents: bytemuck::cast_slice(&vertex::DEFAULT_ATTRIBUTES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let mut modules = HashMap::new();
        for kind in programs.kinds() {
            let program = programs.require(kind)?;
            modules.insert(kind, create_module(device, program)?);
        }

        Ok(Self {
            uniform_layout,
            texture_layout,
            pipeline_layout,
            sampler,
            white,
            defaults,
            modules,
            surface_format,
            line_mode,
        })
    }

    pub fn create_pipeline(
        &self,
        device: &wgpu::Device,
        key: &PipelineKey,
    ) -> Result<wgpu::RenderPipeline> {
        let module = self
            .modules
            .get(&key.program)
            .with_context(|| format!("no shader module for {}", key.program))?;

        let (format, blend) = match key.target {
            PassTarget::Present => (self.surface_format, Some(wgpu::BlendState::REPLACE)),
            PassTarget::Pick => (PICK_FORMAT, None),
        };

        let polygon_mode = match key.program.polygon_mode() {
            PolygonMode::Line if self.line_mode => wgpu::PolygonMode::Line,
            _ => wgpu::PolygonMode::Fill,
        };

        let (own, defaults): (Vec<_>, Vec<_>) = vertex_attributes(key.layout)
            .into_iter()
            .partition(|(binding, _)| *binding == vertex::VERTEX_SLOT);
        let own: Vec<wgpu::VertexAttribute> = own.into_iter().map(|(_, a)| a).collect();
        let defaults: Vec<wgpu::VertexAttribute> = defaults.into_iter().map(|(_, a)| a).collect();

        let buffers = [
            wgpu::VertexBufferLayout {
                array_stride: u64::from(key.layout.stride()),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &own,
            },
            wgpu::VertexBufferLayout {
                array_stride: u64::from(vertex::DEFAULTS_STRIDE),
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &defaults,
            },
        ];

        let targets = [Some(wgpu::ColorTargetState {
            format,
            blend,
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let label = format!("prism {} pipeline", key.program.name());
        let descriptor = wgpu::RenderPipelineDescriptor {
            label: Some(&label),
            layout: Some(&self.pipeline_layout),

            vertex: wgpu::VertexState {
                module,
                entry_point: Some(Program::VERTEX_ENTRY),
                compilation_options: Default::default(),
                buffers: &buffers,
            },

            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some(Program::FRAGMENT_ENTRY),
                compilation_options: Default::default(),
                targets: &targets,
            }),

            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode,
                unclipped_depth: false,
                conservative: false,
            },

            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),

            multiview_mask: None,
            cache: None,
        };
        scoped(device, &label, || device.create_render_pipeline(&descriptor))
    }

    pub fn destroy(&mut self) {
        self.white.texture.destroy();
        self.defaults.destroy();
        self.modules.clear();
    }
}

/// Runs `create` inside a validation error scope, so a wgpu failure comes
/// back as an error here instead of reaching the uncaptured-error handler.
fn scoped<T>(device: &wgpu::Device, what: &str, create: impl FnOnce() -> T) -> Result<T> {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    match pollster::block_on(scope.pop()) {
        None => Ok(value),
        Some(err) => Err(anyhow!("{err}")).with_context(|| format!("failed to create {what}")),
    }
}

fn create_module(device: &wgpu::Device, program: &Program) -> Result<wgpu::ShaderModule> {
    let name = program.kind().name();
    scoped(device, &format!("{name} shader module"), || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(program.wgsl().into()),
        })
    })
}

fn vertex_attributes(layout: VertexLayout) -> [(u32, wgpu::VertexAttribute); 3] {
    layout.attributes().map(|slot| {
        let format = match slot.format {
            AttributeFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            AttributeFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        };
        (
            slot.binding,
            wgpu::VertexAttribute {
                format,
                offset: u64::from(slot.offset),
                shader_location: slot.location,
            },
        )
    })
}

/// Uploads every mip level as sRGB RGBA8 and builds its bind group.
///
/// `image` must already fit `max_texture_dimension_2d`; anything wgpu still
/// rejects is returned as an error.
pub fn create_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    label: &str,
    image: &TextureImage,
) -> Result<GpuTexture> {
    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: image.width(),
            height: image.height(),
            depth_or_array_layers: 1,
        },
        mip_level_count: image.level_count(),
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    for (level, mip) in image.levels().iter().enumerate() {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: level as u32,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &mip.pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * mip.width),
                rows_per_image: Some(mip.height),
            },
            wgpu::Extent3d {
                width: mip.width,
                height: mip.height,
                depth_or_array_layers: 1,
            },
        );
    }

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    });

    if let Some(err) = pollster::block_on(scope.pop()) {
        texture.destroy();
        return Err(anyhow!("{err}")).with_context(|| format!("failed to create texture {label}"));
    }
    Ok(GpuTexture { texture, bind_group })
}
