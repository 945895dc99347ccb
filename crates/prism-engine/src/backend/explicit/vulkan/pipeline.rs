//! Descriptor set layouts, the shared pipeline layout and graphics pipelines.

use std::ffi::CString;

use anyhow::{Context as _, Result, anyhow};
use ash::vk;

use crate::render::shading::Program;
use crate::render::vertex::{self, AttributeFormat};
use crate::render::{PipelineKey, PolygonMode};

/// Set 0: per-draw uniforms (dynamic offset). Set 1: texture and sampler.
pub struct Layouts {
    pub object: vk::DescriptorSetLayout,
    pub texture: vk::DescriptorSetLayout,
    pub pipeline: vk::PipelineLayout,
}

impl Layouts {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let object_bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)];
        let texture_bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];

        let mut this = Self {
            object: vk::DescriptorSetLayout::null(),
            texture: vk::DescriptorSetLayout::null(),
            pipeline: vk::PipelineLayout::null(),
        };
        let created: ash::prelude::VkResult<()> = unsafe {
            (|| {
                this.object = device.create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo::default().bindings(&object_bindings),
                    None,
                )?;
                this.texture = device.create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo::default().bindings(&texture_bindings),
                    None,
                )?;
                let sets = [this.object, this.texture];
                this.pipeline = device.create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::default().set_layouts(&sets),
                    None,
                )?;
                Ok(())
            })()
        };
        if let Err(err) = created {
            this.destroy(device);
            return Err(anyhow!(err).context("failed to create pipeline layout"));
        }
        Ok(this)
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline_layout(self.pipeline, None);
            device.destroy_descriptor_set_layout(self.texture, None);
            device.destroy_descriptor_set_layout(self.object, None);
        }
    }
}

fn vk_format(format: AttributeFormat) -> vk::Format {
    match format {
        AttributeFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        AttributeFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
    }
}

/// Builds the pipeline for `key` against a compatible `render_pass`.
///
/// Viewport and scissor are dynamic so a pipeline survives swapchain
/// rebuilds that keep the attachment formats.
pub fn create_pipeline(
    device: &ash::Device,
    layouts: &Layouts,
    render_pass: vk::RenderPass,
    spirv: &[u32],
    key: &PipelineKey,
    line_mode: bool,
) -> Result<vk::Pipeline> {
    let vs_entry = CString::new(Program::VERTEX_ENTRY)?;
    let fs_entry = CString::new(Program::FRAGMENT_ENTRY)?;
    let module = unsafe {
        device.create_shader_module(&vk::ShaderModuleCreateInfo::default().code(spirv), None)
    }
    .with_context(|| format!("failed to create shader module for {}", key.program))?;

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(module)
            .name(&vs_entry),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(module)
            .name(&fs_entry),
    ];

    let bindings = [
        vk::VertexInputBindingDescription::default()
            .binding(vertex::VERTEX_SLOT)
            .stride(key.layout.stride())
            .input_rate(vk::VertexInputRate::VERTEX),
        vk::VertexInputBindingDescription::default()
            .binding(vertex::DEFAULTS_SLOT)
            .stride(vertex::DEFAULTS_STRIDE)
            .input_rate(vk::VertexInputRate::INSTANCE),
    ];
    let attributes = key.layout.attributes().map(|slot| {
        vk::VertexInputAttributeDescription::default()
            .location(slot.location)
            .binding(slot.binding)
            .format(vk_format(slot.format))
            .offset(slot.offset)
    });
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let polygon_mode = match key.program.polygon_mode() {
        PolygonMode::Line if line_mode => vk::PolygonMode::LINE,
        _ => vk::PolygonMode::FILL,
    };
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(polygon_mode)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);
    let attachments = [vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth)
        .color_blend_state(&blend)
        .dynamic_state(&dynamic)
        .layout(layouts.pipeline)
        .render_pass(render_pass)
        .subpass(0);

    let created = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
    };
    unsafe { device.destroy_shader_module(module, None) };

    let pipelines = created
        .map_err(|(_, err)| anyhow!(err))
        .with_context(|| format!("failed to create {} pipeline", key.program))?;
    pipelines
        .into_iter()
        .next()
        .with_context(|| format!("driver returned no {} pipeline", key.program))
}
