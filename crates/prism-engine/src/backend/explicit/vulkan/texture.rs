//! Sampled textures: staged upload of every mip and one descriptor set each.

use std::collections::HashMap;

use anyhow::{Context as _, Result};
use ash::vk;

use crate::render::TextureImage;

use super::context::Context;
use super::memory::{self, GpuBuffer, GpuImage};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TextureId(u64);

pub struct GpuTexture {
    image: GpuImage,
    pub set: vk::DescriptorSet,
}

/// Every live texture plus the white fallback, allocated from one
/// free-able descriptor pool.
pub struct TexturePool {
    pool: vk::DescriptorPool,
    pub sampler: vk::Sampler,
    pub white: vk::DescriptorSet,
    white_image: Option<GpuImage>,
    textures: HashMap<TextureId, GpuTexture>,
    next_id: u64,
}

impl TexturePool {
    pub fn new(ctx: &Context, layout: vk::DescriptorSetLayout, max_textures: u32) -> Result<Self> {
        let capacity = max_textures + 1;
        let sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(capacity),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::SAMPLER)
                .descriptor_count(capacity),
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(capacity)
            .pool_sizes(&sizes);
        let pool = unsafe { ctx.device.create_descriptor_pool(&pool_info, None)? };

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = match unsafe { ctx.device.create_sampler(&sampler_info, None) } {
            Ok(sampler) => sampler,
            Err(err) => {
                unsafe { ctx.device.destroy_descriptor_pool(pool, None) };
                return Err(err.into());
            }
        };

        let mut this = Self {
            pool,
            sampler,
            white: vk::DescriptorSet::null(),
            white_image: None,
            textures: HashMap::new(),
            next_id: 1,
        };
        match this.upload(ctx, layout, &TextureImage::white()) {
            Ok(white) => {
                this.white = white.set;
                this.white_image = Some(white.image);
                Ok(this)
            }
            Err(err) => {
                this.destroy(ctx);
                Err(err.context("failed to create fallback texture"))
            }
        }
    }

    pub fn create(
        &mut self,
        ctx: &Context,
        layout: vk::DescriptorSetLayout,
        image: &TextureImage,
    ) -> Result<TextureId> {
        let texture = self.upload(ctx, layout, image)?;
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(id, texture);
        Ok(id)
    }

    pub fn set(&self, id: TextureId) -> Option<vk::DescriptorSet> {
        self.textures.get(&id).map(|t| t.set)
    }

    pub fn destroy_texture(&mut self, ctx: &Context, id: TextureId) {
        if let Some(texture) = self.textures.remove(&id) {
            self.release(ctx, texture);
        }
    }

    fn release(&self, ctx: &Context, texture: GpuTexture) {
        unsafe {
            if let Err(err) = ctx.device.free_descriptor_sets(self.pool, &[texture.set]) {
                log::warn!("failed to free texture descriptor set: {err}");
            }
        }
        texture.image.destroy(&ctx.device);
    }

    fn upload(
        &self,
        ctx: &Context,
        layout: vk::DescriptorSetLayout,
        image: &TextureImage,
    ) -> Result<GpuTexture> {
        let extent = vk::Extent2D { width: image.width(), height: image.height() };
        let levels = image.level_count();
        let gpu_image = GpuImage::new(
            ctx,
            extent,
            TEXTURE_FORMAT,
            levels,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;

        let written = self.write_levels(ctx, &gpu_image, image).and_then(|()| {
            let layouts = [layout];
            let alloc = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(self.pool)
                .set_layouts(&layouts);
            let set = unsafe { ctx.device.allocate_descriptor_sets(&alloc) }
                .context("texture descriptor pool exhausted")?[0];

            let image_info = [vk::DescriptorImageInfo::default()
                .image_view(gpu_image.view)
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
            let sampler_info = [vk::DescriptorImageInfo::default().sampler(self.sampler)];
            let writes = [
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(&image_info),
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(&sampler_info),
            ];
            unsafe { ctx.device.update_descriptor_sets(&writes, &[]) };
            Ok(set)
        });

        match written {
            Ok(set) => Ok(GpuTexture { image: gpu_image, set }),
            Err(err) => {
                gpu_image.destroy(&ctx.device);
                Err(err)
            }
        }
    }

    /// Stages every level and leaves the image shader-readable.
    fn write_levels(&self, ctx: &Context, target: &GpuImage, image: &TextureImage) -> Result<()> {
        let staging = GpuBuffer::new(
            ctx,
            image.byte_len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            memory::HOST,
        )?;

        let mut regions = Vec::with_capacity(image.levels().len());
        let mut offset = 0u64;
        let staged = image.levels().iter().enumerate().try_for_each(|(level, mip)| {
            staging.write(offset, &mip.pixels)?;
            regions.push(
                vk::BufferImageCopy::default()
                    .buffer_offset(offset)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(level as u32)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D { width: mip.width, height: mip.height, depth: 1 }),
            );
            offset += mip.pixels.len() as u64;
            anyhow::Ok(())
        });

        let result = staged.and_then(|()| {
            memory::one_shot(ctx, |cmd| {
                let levels = target.mip_levels;
                memory::transition(
                    &ctx.device,
                    cmd,
                    target.image,
                    levels,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                unsafe {
                    ctx.device.cmd_copy_buffer_to_image(
                        cmd,
                        staging.buffer,
                        target.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &regions,
                    );
                }
                memory::transition(
                    &ctx.device,
                    cmd,
                    target.image,
                    levels,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            })
        });
        staging.destroy(&ctx.device);
        result
    }

    pub fn destroy(&mut self, ctx: &Context) {
        let leftover: Vec<_> = self.textures.drain().map(|(_, t)| t).collect();
        if !leftover.is_empty() {
            log::warn!("destroying {} textures still owned by models", leftover.len());
        }
        for texture in leftover {
            self.release(ctx, texture);
        }
        unsafe {
            if let Some(white) = self.white_image.take() {
                white.destroy(&ctx.device);
            }
            ctx.device.destroy_sampler(self.sampler, None);
            ctx.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}
