//! Explicit backend: the frame protocol over an [`ExplicitDevice`].
//!
//! One `render` call waits on the current slot's fence, acquires an image,
//! waits for whichever slot still owns that image, records and submits, then
//! presents. Stale swapchains are rebuilt lazily at the start of the next
//! frame that sees a non-zero framebuffer.

mod device;
mod frame_sync;
#[cfg(test)]
mod mock;
mod swapchain;
mod vulkan;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use glam::Mat4;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::config::RendererConfig;
use crate::render::{
    self, ModelResources, PassPlan, PipelineCache, PipelineKey, ProgramLibrary, ResourceRegistry,
    ShadingKind, ShadingSelection, ViewProjection,
};
use crate::scene::{Model, ModelId, Scene};

use super::{BackendKind, ClientApi, FrameStatus, RenderBackend, WindowHints};

pub use device::{
    Acquire, DeviceResources, DrawCall, ExplicitDevice, FrameRecording, PassRecording, Present,
    Recording, SwapchainGeneration,
};
pub use frame_sync::{FRAMES_IN_FLIGHT, FrameSlot, FrameSync};
pub use swapchain::{Swapchain, SwapchainState};
pub use vulkan::VulkanDevice;

struct Live<D: ExplicitDevice> {
    device: D,
    sync: FrameSync<D::Fence, D::Semaphore>,
    swapchain: Swapchain<D::Generation>,
    pipelines: PipelineCache<D::Pipeline>,
    /// Render-target signature the cached pipelines were built against.
    signature: Option<u64>,
    resized: bool,
    pick_ready: bool,
    timeout_ns: u64,
}

impl<D: ExplicitDevice> Live<D> {
    /// Replaces the swapchain generation with one of `size`.
    fn rebuild(&mut self, programs: &ProgramLibrary, size: PhysicalSize<u32>) -> Result<()> {
        if let Some(old) = self.swapchain.take() {
            self.device.wait_idle()?;
            self.device.destroy_generation(old);
        }
        let generation = self
            .device
            .create_generation(size)
            .context("failed to create swapchain")?;
        self.sync.reset_images(generation.image_count());
        self.pick_ready = false;

        let signature = generation.target_signature();
        if self.signature != Some(signature) {
            for pipeline in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline);
            }
            self.signature = Some(signature);
        }

        let Live { device, pipelines, .. } = &mut *self;
        let prewarmed = PipelineKey::all()
            .filter(|key| programs.contains(key.program))
            .try_for_each(|key| {
                pipelines
                    .get_or_create(key, |k| {
                        let program = programs.require(k.program)?;
                        device.create_pipeline(&generation, program.spirv(), k)
                    })
                    .map(drop)
            });
        if let Err(err) = prewarmed {
            self.device.destroy_generation(generation);
            return Err(err);
        }

        let images = generation.image_count();
        self.swapchain.install(generation);
        self.resized = false;
        log::info!(
            "swapchain {}x{} with {images} images (rebuild #{})",
            size.width,
            size.height,
            self.swapchain.rebuilds()
        );
        Ok(())
    }

    fn ensure_swapchain(
        &mut self,
        programs: &ProgramLibrary,
        size: PhysicalSize<u32>,
    ) -> Result<()> {
        if self.resized {
            self.swapchain.invalidate("window resized");
        }
        if !self.swapchain.is_valid() {
            self.rebuild(programs, size)?;
        }
        Ok(())
    }

    /// Resolves every draw of `passes` to a device pipeline.
    fn record(
        &mut self,
        programs: &ProgramLibrary,
        clear_color: [f32; 4],
        passes: &[&PassPlan<'_, D::Buffer, D::Texture>],
    ) -> Result<Recording<D>> {
        let Live { device, swapchain, pipelines, .. } = self;
        let generation = swapchain.generation().context("no swapchain generation")?;

        let mut recorded = Vec::with_capacity(passes.len());
        for pass in passes {
            let mut draws = Vec::with_capacity(pass.draws.len());
            for draw in &pass.draws {
                let key = PipelineKey::new(pass.program, draw.resources.layout);
                let pipeline = pipelines.get_or_create(key, |k| {
                    let program = programs.require(k.program)?;
                    device.create_pipeline(generation, program.spirv(), k)
                })?;
                draws.push(DrawCall {
                    pipeline,
                    vertex_buffer: draw.resources.vertex_buffer,
                    vertex_count: draw.resources.vertex_count,
                    layout: draw.resources.layout,
                    texture: draw.resources.texture,
                    uniforms: draw.uniforms,
                });
            }
            recorded.push(PassRecording { program: pass.program, draws });
        }
        Ok(FrameRecording { clear_color, passes: recorded })
    }

    fn destroy(mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::warn!("wait for device idle failed during shutdown: {err:#}");
        }
        for pipeline in self.pipelines.drain() {
            self.device.destroy_pipeline(pipeline);
        }
        if let Some(generation) = self.swapchain.take() {
            self.device.destroy_generation(generation);
        }
        self.sync.destroy(&mut self.device);
        self.device.close();
    }
}

pub struct ExplicitBackend<D: ExplicitDevice> {
    config: RendererConfig,
    window: Option<Arc<Window>>,
    programs: ProgramLibrary,
    shading: ShadingSelection,
    registry: ResourceRegistry<D::Buffer, D::Texture>,
    live: Option<Live<D>>,
}

impl<D: ExplicitDevice> ExplicitBackend<D> {
    /// Does not touch the GPU; see [`RenderBackend::init`].
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

    fn live_mut(&mut self) -> Result<&mut Live<D>> {
        self.live.as_mut().ok_or_else(|| anyhow!("explicit backend is not initialised"))
    }

    /// Swapchain rebuilds since `init`.
    pub fn swapchain_rebuilds(&self) -> u64 {
        self.live.as_ref().map_or(0, |live| live.swapchain.rebuilds())
    }

    fn clear_color(&self) -> [f32; 4] {
        self.config.clear_color.map(|c| c as f32)
    }
}

impl<D: ExplicitDevice + 'static> RenderBackend for ExplicitBackend<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::Explicit
    }

    fn window_hints(&self) -> WindowHints {
        WindowHints { client_api: ClientApi::None }
    }

    fn attach_window(&mut self, window: Arc<Window>) {
        self.window = Some(window);
    }

    fn init(&mut self) -> Result<()> {
        if self.live.is_some() {
            return Ok(());
        }
        self.programs = ProgramLibrary::load(&self.config.shader_dir)?;

        let mut device = D::open(self.window.clone(), &self.config.explicit)?;
        let sync = match FrameSync::create(&mut device) {
            Ok(sync) => sync,
            Err(err) => {
                device.close();
                return Err(err.context("failed to create frame synchronization objects"));
            }
        };

        let mut live = Live {
            device,
            sync,
            swapchain: Swapchain::default(),
            pipelines: PipelineCache::default(),
            signature: None,
            resized: false,
            pick_ready: false,
            timeout_ns: self.config.explicit.timeout_ns(),
        };

        // A minimised window gets its swapchain on the first visible frame.
        let size = live.device.framebuffer_size();
        if size.width > 0 && size.height > 0 {
            if let Err(err) = live.rebuild(&self.programs, size) {
                live.destroy();
                return Err(err);
            }
        }

        log::info!("explicit backend ready ({} pipelines)", live.pipelines.len());
        self.live = Some(live);
        Ok(())
    }

    fn setup(&mut self, scene: &Scene) -> Result<()> {
        let live = self.live_mut()?;
        live.device.wait_idle()?;
        self.release_all();
        for model in scene.models() {
            self.setup_model(model)?;
        }
        log::debug!("uploaded {} models", self.registry.len());
        Ok(())
    }

    fn setup_model(&mut self, model: &Model) -> Result<()> {
        let live = self.live.as_mut().context("explicit backend is not initialised")?;
        let resources =
            ModelResources::upload(&mut DeviceResources(&mut live.device), model, &self.config)
                .with_context(|| format!("failed to set up model '{}'", model.name()))?;
        log::debug!("model '{}': {} shape bundles", model.name(), resources.shapes.len());

        if let Some(old) = self.registry.insert(model.id(), resources) {
            live.device.wait_idle()?;
            old.release(&mut DeviceResources(&mut live.device));
        }
        Ok(())
    }

    fn clean_model(&mut self, id: ModelId) {
        let Some(resources) = self.registry.remove(id) else { return };
        match self.live.as_mut() {
            Some(live) => {
                // In-flight frames may still read the buffers.
                if let Err(err) = live.device.wait_idle() {
                    log::warn!("wait for device idle failed before releasing model: {err:#}");
                }
                resources.release(&mut DeviceResources(&mut live.device));
            }
            None => drop(resources),
        }
        log::debug!("released model {}", id.raw());
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if let Some(live) = self.live.as_mut() {
            log::trace!("resize to {}x{}", size.width, size.height);
            live.resized = true;
        }
    }

    fn render(&mut self, scene: &Scene, view: Mat4, proj: Mat4) -> Result<FrameStatus> {
        let clear = self.clear_color();
        let shading = self.shading.current();
        let outline_color = self.config.outline_color;
        let Self { registry, programs, live, .. } = self;
        let live = live.as_mut().context("explicit backend is not initialised")?;
        let timeout = live.timeout_ns;

        let size = live.device.framebuffer_size();
        if size.width == 0 || size.height == 0 {
            live.swapchain.invalidate("zero-area framebuffer");
            return Ok(FrameStatus::Suspended);
        }
        live.ensure_swapchain(programs, size)?;

        live.sync.wait_current(&mut live.device, timeout)?;
        let slot = live.sync.current();

        let generation = live.swapchain.generation().context("no swapchain generation")?;
        let (image, acquired_suboptimal) =
            match live.device.acquire_image(generation, slot.image_available, timeout)? {
                Acquire::Image { index, suboptimal } => (index, suboptimal),
                Acquire::OutOfDate => {
                    live.swapchain.invalidate("acquire reported out of date");
                    live.rebuild(programs, size)?;
                    return Ok(FrameStatus::Dropped);
                }
            };

        live.sync.claim_image(&mut live.device, image, timeout)?;

        let camera = ViewProjection { view, proj };
        let plan = render::plan::build_frame(scene, registry, shading, camera, outline_color);
        let passes: Vec<_> = plan.passes().collect();
        let recording = live.record(programs, clear, &passes)?;

        let Live { device, swapchain, .. } = &mut *live;
        let generation = swapchain.generation_mut().context("no swapchain generation")?;
        device.record_frame(generation, image, &recording)?;
        device.reset_fence(slot.in_flight)?;
        device.submit(
            generation,
            image,
            slot.image_available,
            slot.render_finished,
            slot.in_flight,
        )?;
        let presented = device.present(generation, image, slot.render_finished)?;
        live.sync.advance();

        let status = match presented {
            Present::OutOfDate => {
                live.swapchain.invalidate("present reported out of date");
                FrameStatus::Dropped
            }
            Present::Suboptimal => {
                live.swapchain.invalidate("present reported suboptimal");
                FrameStatus::Presented
            }
            Present::Ok => {
                if acquired_suboptimal {
                    live.swapchain.invalidate("acquire reported suboptimal");
                }
                FrameStatus::Presented
            }
        };
        Ok(status)
    }

    fn render_index(&mut self, scene: &Scene, view: Mat4, proj: Mat4) -> Result<()> {
        let Self { registry, programs, live, .. } = self;
        let live = live.as_mut().context("explicit backend is not initialised")?;

        let size = live.device.framebuffer_size();
        if size.width == 0 || size.height == 0 {
            bail!("cannot pick on a zero-area surface");
        }
        live.ensure_swapchain(programs, size)?;

        let pass = render::plan::build_index(scene, registry, ViewProjection { view, proj });
        let recording = live.record(programs, [0.0; 4], &[&pass])?;

        let Live { device, swapchain, .. } = &mut *live;
        let generation = swapchain.generation_mut().context("no swapchain generation")?;
        device.render_pick(generation, &recording)?;
        live.pick_ready = true;
        Ok(())
    }

    fn read_index(&mut self, x: u32, y: u32) -> Result<u32> {
        let live = self.live_mut()?;
        if !live.pick_ready {
            bail!("read_index called before render_index");
        }
        let generation = live.swapchain.generation().context("no swapchain generation")?;
        let extent = generation.extent();
        let (x, y) = render::picking::clamp_to_target(x, y, extent.width, extent.height);
        live.device.read_pick(generation, x, y)
    }

    fn cleanup(&mut self) {
        self.shutdown();
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

impl<D: ExplicitDevice> ExplicitBackend<D> {
    fn release_all(&mut self) {
        if let Some(live) = self.live.as_mut() {
            self.registry.release_all(&mut DeviceResources(&mut live.device));
        }
    }

    /// Releases bundles, then device objects in reverse creation order.
    fn shutdown(&mut self) {
        if let Some(mut live) = self.live.take() {
            if let Err(err) = live.device.wait_idle() {
                log::warn!("wait for device idle failed during cleanup: {err:#}");
            }
            self.registry.release_all(&mut DeviceResources(&mut live.device));
            live.destroy();
            log::info!("explicit backend shut down");
        }
        self.registry.drain().for_each(drop);
        self.programs.clear();
        self.window = None;
    }
}

impl<D: ExplicitDevice> Drop for ExplicitBackend<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::resources::tests::write_png;
    use crate::scene::primitives;

    use mock::{Event, MockDevice};

    fn backend() -> ExplicitBackend<MockDevice> {
        let mut backend = ExplicitBackend::new(RendererConfig::default());
        backend.init().unwrap();
        backend
    }

    fn device(backend: &mut ExplicitBackend<MockDevice>) -> &mut MockDevice {
        &mut backend.live.as_mut().unwrap().device
    }

    fn frame(backend: &mut ExplicitBackend<MockDevice>, scene: &Scene) -> FrameStatus {
        backend.render(scene, Mat4::IDENTITY, Mat4::IDENTITY).unwrap()
    }

    fn buffers_of(backend: &ExplicitBackend<MockDevice>, id: ModelId) -> Vec<u64> {
        backend.registry.get(id).unwrap().shapes.iter().map(|s| s.vertex_buffer).collect()
    }

    #[test]
    fn init_builds_one_generation_and_prewarms() {
        let mut backend = backend();
        assert_eq!(device(&mut backend).generations_created(), 1);
        assert_eq!(device(&mut backend).pipelines.len(), PipelineKey::all().count());
        assert_eq!(backend.programs().len(), ShadingKind::ALL.len());
    }

    #[test]
    fn third_frame_waits_for_first_slot() {
        let mut scene = Scene::new();
        scene.add_model(primitives::cube_model("cube", 1.0));
        let mut backend = backend();
        backend.setup(&scene).unwrap();
        device(&mut backend).events.clear();

        for _ in 0..3 {
            assert_eq!(frame(&mut backend, &scene), FrameStatus::Presented);
        }

        let dev = device(&mut backend);
        let waits = dev.waits();
        assert_eq!(waits.len(), 3);
        let (slot0, slot1) = (waits[0].0, waits[1].0);
        assert_ne!(slot0, slot1);
        assert_eq!(waits, vec![(slot0, false), (slot1, false), (slot0, true)]);

        // The blocking wait sits between frame 0's submit and frame 2's.
        let blocked_at = dev
            .events
            .iter()
            .position(|e| *e == Event::Wait { fence: slot0, blocked: true })
            .unwrap();
        let submits: Vec<usize> = dev
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::Submit { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(submits.len(), 3);
        assert!(submits[0] < blocked_at && blocked_at < submits[2]);
    }

    #[test]
    fn recreation_keeps_bundle_handles() {
        let mut scene = Scene::new();
        let id = scene.add_model(primitives::cube_model("cube", 1.0));
        let mut backend = backend();
        backend.setup(&scene).unwrap();
        frame(&mut backend, &scene);
        let before = buffers_of(&backend, id);

        device(&mut backend).framebuffer = PhysicalSize::new(1024, 768);
        backend.resize(PhysicalSize::new(1024, 768));
        assert_eq!(frame(&mut backend, &scene), FrameStatus::Presented);

        assert_eq!(backend.swapchain_rebuilds(), 1);
        assert_eq!(buffers_of(&backend, id), before);
        let dev = device(&mut backend);
        assert!(before.iter().all(|b| dev.buffers.contains(b)));
        let drawn = &dev.last_frame.as_ref().unwrap().passes[0].draws[0];
        assert_eq!(drawn.vertex_buffer, before[0]);
    }

    #[test]
    fn zero_area_then_full_size_recreates_once() {
        let scene = Scene::new();
        let mut backend = backend();
        frame(&mut backend, &scene);

        device(&mut backend).framebuffer = PhysicalSize::new(0, 0);
        backend.resize(PhysicalSize::new(0, 0));
        for _ in 0..3 {
            assert_eq!(frame(&mut backend, &scene), FrameStatus::Suspended);
        }
        assert_eq!(device(&mut backend).generations_created(), 1);

        device(&mut backend).framebuffer = PhysicalSize::new(800, 600);
        backend.resize(PhysicalSize::new(800, 600));
        assert_eq!(frame(&mut backend, &scene), FrameStatus::Presented);
        assert_eq!(frame(&mut backend, &scene), FrameStatus::Presented);

        assert_eq!(device(&mut backend).generations_created(), 2);
        assert_eq!(backend.swapchain_rebuilds(), 1);
    }

    #[test]
    fn clean_model_releases_every_handle() {
        let mut scene = Scene::new();
        let gone = scene.add_model(primitives::cube_model("gone", 1.0));
        let kept = scene.add_model(primitives::cube_model("kept", 1.0));
        let mut backend = backend();
        backend.setup(&scene).unwrap();
        let gone_buffers = buffers_of(&backend, gone);

        backend.clean_model(gone);
        backend.clean_model(gone);
        assert!(!backend.has_model(gone));
        assert!(backend.has_model(kept));

        frame(&mut backend, &scene);
        let dev = device(&mut backend);
        assert!(gone_buffers.iter().all(|b| !dev.buffers.contains(b)));
        let recorded = dev.last_frame.as_ref().unwrap();
        assert!(
            recorded
                .passes
                .iter()
                .flat_map(|p| &p.draws)
                .all(|d| !gone_buffers.contains(&d.vertex_buffer))
        );
        assert_eq!(recorded.passes[0].draws.len(), 1);
    }

    #[test]
    fn textured_and_untextured_flags_reach_the_recording() {
        let tex = write_png("explicit.png");
        let mut scene = Scene::new();
        scene.add_model(Model::new("textured", vec![primitives::cube(1.0).with_texture(&tex)]));
        scene.add_model(primitives::cube_model("plain", 1.0));
        let mut backend = backend();
        backend.setup(&scene).unwrap();
        assert_eq!(device(&mut backend).textures.len(), 1);

        assert_eq!(frame(&mut backend, &scene), FrameStatus::Presented);
        let recorded = device(&mut backend).last_frame.clone().unwrap();
        let main = &recorded.passes[0];
        assert_eq!(main.program, ShadingKind::MaterialPreview);
        let flags: Vec<u32> = main.draws.iter().map(|d| d.uniforms.has_texture).collect();
        assert_eq!(flags, vec![1, 0]);
        assert!(main.draws[0].texture.is_some());
        assert!(main.draws[1].texture.is_none());
    }

    #[test]
    fn texture_over_the_device_limit_still_sets_up_textured() {
        let tex = write_png("limit.png");
        let mut scene = Scene::new();
        let id = scene.add_model(Model::new("big", vec![primitives::cube(1.0).with_texture(&tex)]));
        let mut backend = backend();
        device(&mut backend).max_texture_dimension = 1;

        backend.setup(&scene).unwrap();
        assert!(backend.has_model(id));
        assert_eq!(device(&mut backend).textures.len(), 1);
        assert!(backend.registry.get(id).unwrap().shapes[0].texture.is_some());
    }

    #[test]
    fn out_of_date_acquire_drops_the_frame() {
        let scene = Scene::new();
        let mut backend = backend();
        device(&mut backend).acquire_script.push_back(Acquire::OutOfDate);

        assert_eq!(frame(&mut backend, &scene), FrameStatus::Dropped);
        assert_eq!(backend.swapchain_rebuilds(), 1);
        assert!(!device(&mut backend).events.iter().any(|e| matches!(e, Event::Submit { .. })));
        assert_eq!(frame(&mut backend, &scene), FrameStatus::Presented);
    }

    #[test]
    fn stale_present_rebuilds_before_next_frame() {
        let scene = Scene::new();
        let mut backend = backend();
        device(&mut backend).present_script.push_back(Present::Suboptimal);
        device(&mut backend).present_script.push_back(Present::OutOfDate);

        assert_eq!(frame(&mut backend, &scene), FrameStatus::Presented);
        assert_eq!(backend.swapchain_rebuilds(), 0);
        assert_eq!(frame(&mut backend, &scene), FrameStatus::Dropped);
        assert_eq!(backend.swapchain_rebuilds(), 1);
        assert_eq!(frame(&mut backend, &scene), FrameStatus::Presented);
        assert_eq!(backend.swapchain_rebuilds(), 2);
    }

    #[test]
    fn index_pass_feeds_picking() {
        let mut scene = Scene::new();
        scene.add_model(primitives::cube_model("a", 1.0));
        scene.add_model(primitives::cube_model("b", 1.0));
        let mut backend = backend();
        backend.setup(&scene).unwrap();

        assert!(backend.read_index(0, 0).is_err());
        device(&mut backend).pick_value = 2;
        let (view, proj) = (Mat4::IDENTITY, Mat4::IDENTITY);
        let picked = render::picking::pick(&mut backend, &scene, view, proj, 5000, 5000).unwrap();
        assert_eq!(picked, Some(1));

        let pass = &device(&mut backend).last_pick.as_ref().unwrap().passes[0];
        assert_eq!(pass.program, ShadingKind::Index);
        let ids: Vec<u32> = pass.draws.iter().map(|d| d.uniforms.object_index).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn cleanup_is_idempotent_and_leak_free() {
        let mut scene = Scene::new();
        scene.add_model(primitives::cube_model("a", 1.0));
        let mut backend = backend();
        backend.setup(&scene).unwrap();
        frame(&mut backend, &scene);

        // MockDevice::close asserts every handle was released.
        backend.cleanup();
        backend.cleanup();
        assert_eq!(backend.model_count(), 0);
        assert!(backend.programs().is_empty());
        assert!(backend.render(&scene, Mat4::IDENTITY, Mat4::IDENTITY).is_err());
    }
}
