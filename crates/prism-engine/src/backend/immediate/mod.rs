//! Immediate backend on wgpu.
//!
//! Uploads happen synchronously in `setup_model`; `render` acquires the
//! surface texture, records the planned passes and presents. The surface
//! handles buffering, so there is no frame-slot bookkeeping here.

mod gpu;
mod pipelines;
mod surface;
mod targets;
mod uniforms;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use glam::Mat4;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::config::RendererConfig;
use crate::render::{
    self, FramePlan, GpuResources, ModelResources, PassPlan, PipelineCache, PipelineKey,
    ProgramLibrary, ResourceRegistry, ShadingKind, ShadingSelection, TextureImage, ViewProjection,
};
use crate::scene::{Model, ModelId, Scene};

use super::{BackendKind, ClientApi, FrameStatus, RenderBackend, WindowHints};

pub use gpu::{Gpu, GpuFrame};
pub use pipelines::GpuTexture;
pub use surface::SurfaceErrorAction;

use pipelines::SharedObjects;
use targets::{DepthTarget, PickTarget};
use uniforms::UniformArena;

/// Device state that exists between `init` and `cleanup`.
struct Live {
    gpu: Gpu,
    shared: SharedObjects,
    depth: DepthTarget,
    pick: Option<PickTarget>,
    uniforms: UniformArena,
    pipelines: PipelineCache<wgpu::RenderPipeline>,
}

/// Creates and destroys registry handles on a live device.
struct Uploader<'a> {
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
    shared: &'a SharedObjects,
}

impl GpuResources for Uploader<'_> {
    type Buffer = wgpu::Buffer;
    type Texture = GpuTexture;

    fn create_vertex_buffer(&mut self, label: &str, vertices: &[f32]) -> Result<wgpu::Buffer> {
        use wgpu::util::DeviceExt;
        Ok(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        }))
    }

    fn destroy_buffer(&mut self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_texture(&mut self, label: &str, image: &TextureImage) -> Result<GpuTexture> {
        pipelines::create_texture(
            self.device,
            self.queue,
            &self.shared.texture_layout,
            &self.shared.sampler,
            label,
            image,
        )
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        texture.texture.destroy();
    }
}

impl Live {
    fn uploader(&self) -> Uploader<'_> {
        Uploader { device: self.gpu.device(), queue: self.gpu.queue(), shared: &self.shared }
    }

    /// Resolves one pipeline per draw before any pass is recorded.
    fn resolve(
        &mut self,
        passes: &[&PassPlan<'_, wgpu::Buffer, GpuTexture>],
    ) -> Result<Vec<Vec<wgpu::RenderPipeline>>> {
        let Live { gpu, shared, pipelines, .. } = self;
        passes
            .iter()
            .map(|pass| {
                pass.draws
                    .iter()
                    .map(|draw| {
                        let key = PipelineKey::new(pass.program, draw.resources.layout);
                        pipelines.get_or_create(key, |k| shared.create_pipeline(gpu.device(), k))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }

    fn upload_uniforms(&mut self, passes: &[&PassPlan<'_, wgpu::Buffer, GpuTexture>]) {
        let all: Vec<_> = passes
            .iter()
            .flat_map(|p| p.draws.iter().map(|d| d.uniforms))
            .collect();
        self.uniforms.write(self.gpu.device(), self.gpu.queue(), &all);
    }

    /// Records `passes` into one encoder. The first pass clears.
    fn record(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        color: &wgpu::TextureView,
        depth: &wgpu::TextureView,
        clear: wgpu::Color,
        passes: &[&PassPlan<'_, wgpu::Buffer, GpuTexture>],
        pipelines: &[Vec<wgpu::RenderPipeline>],
    ) {
        let mut slot = 0;
        for (i, (pass, pass_pipelines)) in passes.iter().zip(pipelines).enumerate() {
            let (color_load, depth_load) = if i == 0 {
                (wgpu::LoadOp::Clear(clear), wgpu::LoadOp::Clear(1.0))
            } else {
                (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
            };

            let label = format!("prism {} pass", pass.program.name());
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            rpass.set_vertex_buffer(1, self.shared.defaults.slice(..));
            for (draw, pipeline) in pass.draws.iter().zip(pass_pipelines) {
                let texture = draw.resources.texture.as_ref().unwrap_or(&self.shared.white);
                rpass.set_pipeline(pipeline);
                rpass.set_bind_group(0, self.uniforms.bind_group(), &[self.uniforms.offset(slot)]);
                rpass.set_bind_group(1, &texture.bind_group, &[]);
                rpass.set_vertex_buffer(0, draw.resources.vertex_buffer.slice(..));
                rpass.draw(0..draw.resources.vertex_count, 0..1);
                slot += 1;
            }
        }
    }

    fn destroy(mut self) {
        self.pipelines.drain().for_each(drop);
        if let Some(pick) = self.pick.as_mut() {
            pick.destroy();
        }
        self.uniforms.destroy();
        self.shared.destroy();
    }
}

pub struct ImmediateBackend {
    config: RendererConfig,
    window: Option<Arc<Window>>,
    programs: ProgramLibrary,
    shading: ShadingSelection,
    registry: ResourceRegistry<wgpu::Buffer, GpuTexture>,
    live: Option<Live>,
}

impl ImmediateBackend {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            window: None,
            programs: ProgramLibrary::default(),
            shading: ShadingSelection::default(),
            registry: ResourceRegistry::new(),
            live: None,
        }
    }

    fn live_mut(&mut self) -> Result<&mut Live> {
        self.live.as_mut().ok_or_else(|| anyhow!("immediate backend is not initialised"))
    }

    fn clear_color(&self) -> wgpu::Color {
        let [r, g, b, a] = self.config.clear_color;
        wgpu::Color { r, g, b, a }
    }
}

impl RenderBackend for ImmediateBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Immediate
    }

    fn window_hints(&self) -> WindowHints {
        WindowHints { client_api: ClientApi::OpenGl { major: 4, minor: 5, core_profile: true } }
    }

    fn attach_window(&mut self, window: Arc<Window>) {
        self.window = Some(window);
    }

    fn init(&mut self) -> Result<()> {
        if self.live.is_some() {
            return Ok(());
        }
        let window = self.window.clone().context("no window attached")?;

        self.programs = ProgramLibrary::load(&self.config.shader_dir)?;
        let gpu = pollster::block_on(Gpu::new(window, &self.config.immediate))?;

        let shared = SharedObjects::new(
            gpu.device(),
            gpu.queue(),
            &self.programs,
            gpu.surface_format(),
            gpu.supports_line_mode(),
        )?;
        let depth = DepthTarget::new(gpu.device(), gpu.size());
        let uniforms = UniformArena::new(gpu.device(), &shared.uniform_layout);

        let mut live = Live {
            gpu,
            shared,
            depth,
            pick: None,
            uniforms,
            pipelines: PipelineCache::default(),
        };

        // Every user program against every layout, so a bad program fails here.
        let Live { gpu, shared, pipelines, .. } = &mut live;
        for key in PipelineKey::all() {
            pipelines.get_or_create(key, |k| shared.create_pipeline(gpu.device(), k))?;
        }

        log::info!(
            "immediate backend ready on {} ({} pipelines)",
            live.gpu.adapter_name(),
            live.pipelines.len()
        );
        self.live = Some(live);
        Ok(())
    }

    fn setup(&mut self, scene: &Scene) -> Result<()> {
        let live = self.live.as_ref().context("immediate backend is not initialised")?;
        self.registry.release_all(&mut live.uploader());
        for model in scene.models() {
            self.setup_model(model)?;
        }
        log::debug!("uploaded {} models", self.registry.len());
        Ok(())
    }

    fn setup_model(&mut self, model: &Model) -> Result<()> {
        let live = self.live.as_ref().context("immediate backend is not initialised")?;
        let mut uploader = live.uploader();
        let resources = ModelResources::upload(&mut uploader, model, &self.config)
            .with_context(|| format!("failed to set up model '{}'", model.name()))?;
        log::debug!("model '{}': {} shape bundles", model.name(), resources.shapes.len());
        if let Some(old) = self.registry.insert(model.id(), resources) {
            old.release(&mut uploader);
        }
        Ok(())
    }

    fn clean_model(&mut self, id: ModelId) {
        let Some(resources) = self.registry.remove(id) else { return };
        match self.live.as_ref() {
            Some(live) => resources.release(&mut live.uploader()),
            None => drop(resources),
        }
        log::debug!("released model {}", id.raw());
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if let Some(live) = self.live.as_mut() {
            live.gpu.resize(size);
            if size.width > 0 && size.height > 0 {
                live.depth.ensure(live.gpu.device(), size);
            }
        }
    }

    fn render(&mut self, scene: &Scene, view: Mat4, proj: Mat4) -> Result<FrameStatus> {
        let clear = self.clear_color();
        let shading = self.shading.current();
        let outline_color = self.config.outline_color;
        let registry = &self.registry;
        let live = self.live.as_mut().context("immediate backend is not initialised")?;

        if live.gpu.is_zero_sized() {
            return Ok(FrameStatus::Suspended);
        }

        let mut frame = match live.gpu.begin_frame() {
            Ok(frame) => frame,
            Err(SurfaceErrorAction::Fatal) => bail!("surface is out of memory"),
            Err(SurfaceErrorAction::Reconfigured | SurfaceErrorAction::SkipFrame) => {
                return Ok(FrameStatus::Dropped);
            }
        };

        let camera = ViewProjection { view, proj };
        let plan: FramePlan<'_, _, _> =
            render::plan::build_frame(scene, registry, shading, camera, outline_color);
        let passes: Vec<_> = plan.passes().collect();

        let pipelines = live.resolve(&passes)?;
        live.upload_uniforms(&passes);

        let GpuFrame { view: color, encoder, .. } = &mut frame;
        live.record(encoder, color, live.depth.view(), clear, &passes, &pipelines);

        live.gpu.submit(frame);
        Ok(FrameStatus::Presented)
    }

    fn render_index(&mut self, scene: &Scene, view: Mat4, proj: Mat4) -> Result<()> {
        let registry = &self.registry;
        let live = self.live.as_mut().context("immediate backend is not initialised")?;
        let size = live.gpu.size();
        if size.width == 0 || size.height == 0 {
            bail!("cannot pick on a zero-area surface");
        }

        match live.pick.as_mut() {
            Some(pick) => pick.ensure(live.gpu.device(), size),
            None => live.pick = Some(PickTarget::new(live.gpu.device(), size)),
        }

        let pass = render::plan::build_index(scene, registry, ViewProjection { view, proj });
        let passes = [&pass];
        let pipelines = live.resolve(&passes)?;
        live.upload_uniforms(&passes);

        let mut encoder = live.gpu.device().create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("prism index encoder"),
        });
        let pick = live.pick.as_ref().context("pick target missing")?;
        live.record(
            &mut encoder,
            pick.color_view(),
            pick.depth_view(),
            wgpu::Color::TRANSPARENT,
            &passes,
            &pipelines,
        );
        live.gpu.queue().submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_index(&mut self, x: u32, y: u32) -> Result<u32> {
        let live = self.live_mut()?;
        let pick = live.pick.as_ref().context("read_index called before render_index")?;
        pick.read(live.gpu.device(), live.gpu.queue(), x, y)
    }

    fn cleanup(&mut self) {
        if let Some(live) = self.live.take() {
            self.registry.release_all(&mut live.uploader());
            live.destroy();
            log::info!("immediate backend shut down");
        }
        self.registry.drain().for_each(drop);
        self.programs.clear();
        self.window = None;
    }

    fn programs(&self) -> Vec<ShadingKind> {
        self.programs.kinds()
    }

    fn current_shading(&self) -> ShadingKind {
        self.shading.current()
    }

    fn set_current_shading(&mut self, kind: ShadingKind) -> bool {
        self.shading.set(kind, &self.programs)
    }

    fn has_model(&self, id: ModelId) -> bool {
        self.registry.contains(id)
    }

    fn model_count(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for ImmediateBackend {
    fn drop(&mut self) {
        self.cleanup();
    }
}
