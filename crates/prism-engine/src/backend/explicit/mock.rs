//! Instrumented device for protocol tests.
//!
//! Handles are plain integers. A fence stays unsignaled after a submit until
//! someone waits on it; the wait is logged as blocking, then the fence is
//! treated as retired.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::config::ExplicitConfig;
use crate::render::{PipelineKey, TextureImage};

use super::device::{Acquire, ExplicitDevice, Present, Recording, SwapchainGeneration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    WaitIdle,
    Wait { fence: u64, blocked: bool },
    Submit { fence: u64, image: u32 },
    Present { image: u32 },
    CreateGeneration { width: u32, height: u32 },
    DestroyGeneration { id: u64 },
}

#[derive(Debug)]
pub struct MockGeneration {
    pub id: u64,
    image_count: usize,
    extent: PhysicalSize<u32>,
    signature: u64,
}

impl SwapchainGeneration for MockGeneration {
    fn image_count(&self) -> usize {
        self.image_count
    }

    fn extent(&self) -> PhysicalSize<u32> {
        self.extent
    }

    fn target_signature(&self) -> u64 {
        self.signature
    }
}

#[derive(Debug)]
pub struct MockDevice {
    next_handle: u64,
    next_image: u32,

    pub framebuffer: PhysicalSize<u32>,
    pub image_count: usize,
    pub signature: u64,

    pub events: Vec<Event>,
    pub acquire_script: VecDeque<Acquire>,
    pub present_script: VecDeque<Present>,

    pub buffers: HashSet<u64>,
    pub textures: HashSet<u64>,
    pub pipelines: HashSet<u64>,
    /// Live fences and whether they are signaled.
    pub fences: HashMap<u64, bool>,
    pub semaphores: HashSet<u64>,
    pub generations: HashSet<u64>,

    pub last_frame: Option<Recording<Self>>,
    pub last_pick: Option<Recording<Self>>,
    pub pick_value: u32,
    pub max_texture_dimension: u32,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            next_handle: 1,
            next_image: 0,
            framebuffer: PhysicalSize::new(800, 600),
            image_count: 3,
            signature: 1,
            events: Vec::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            buffers: HashSet::new(),
            textures: HashSet::new(),
            pipelines: HashSet::new(),
            fences: HashMap::new(),
            semaphores: HashSet::new(),
            generations: HashSet::new(),
            last_frame: None,
            last_pick: None,
            pick_value: 0,
            max_texture_dimension: 8192,
        }
    }
}

impl MockDevice {
    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    pub fn generations_created(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::CreateGeneration { .. }))
            .count()
    }

    pub fn waits(&self) -> Vec<(u64, bool)> {
        self.events
            .iter()
            .filter_map(|e| match *e {
                Event::Wait { fence, blocked } => Some((fence, blocked)),
                _ => None,
            })
            .collect()
    }

    fn is_leak_free(&self) -> bool {
        self.buffers.is_empty()
            && self.textures.is_empty()
            && self.pipelines.is_empty()
            && self.fences.is_empty()
            && self.semaphores.is_empty()
            && self.generations.is_empty()
    }
}

impl ExplicitDevice for MockDevice {
    type Buffer = u64;
    type Texture = u64;
    type Pipeline = u64;
    type Fence = u64;
    type Semaphore = u64;
    type Generation = MockGeneration;

    fn open(_window: Option<Arc<Window>>, _config: &ExplicitConfig) -> Result<Self> {
        Ok(Self::default())
    }

    fn framebuffer_size(&self) -> PhysicalSize<u32> {
        self.framebuffer
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.events.push(Event::WaitIdle);
        self.fences.values_mut().for_each(|signaled| *signaled = true);
        Ok(())
    }

    fn close(self) {
        if !std::thread::panicking() {
            assert!(self.is_leak_free(), "device closed with live handles: {self:?}");
        }
    }

    fn create_generation(&mut self, extent: PhysicalSize<u32>) -> Result<MockGeneration> {
        if extent.width == 0 || extent.height == 0 {
            bail!("zero-area swapchain requested");
        }
        let id = self.handle();
        self.generations.insert(id);
        self.events.push(Event::CreateGeneration { width: extent.width, height: extent.height });
        Ok(MockGeneration { id, image_count: self.image_count, extent, signature: self.signature })
    }

    fn destroy_generation(&mut self, generation: MockGeneration) {
        self.generations.remove(&generation.id);
        self.events.push(Event::DestroyGeneration { id: generation.id });
    }

    fn create_vertex_buffer(&mut self, _label: &str, _vertices: &[f32]) -> Result<u64> {
        let h = self.handle();
        self.buffers.insert(h);
        Ok(h)
    }

    fn destroy_buffer(&mut self, buffer: u64) {
        assert!(self.buffers.remove(&buffer), "double free of buffer {buffer}");
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn create_texture(&mut self, _label: &str, image: &TextureImage) -> Result<u64> {
        ensure!(
            image.width() <= self.max_texture_dimension
                && image.height() <= self.max_texture_dimension,
            "texture {}x{} exceeds {}",
            image.width(),
            image.height(),
            self.max_texture_dimension
        );
        let h = self.handle();
        self.textures.insert(h);
        Ok(h)
    }

    fn destroy_texture(&mut self, texture: u64) {
        assert!(self.textures.remove(&texture), "double free of texture {texture}");
    }

    fn create_pipeline(
        &mut self,
        generation: &MockGeneration,
        spirv: &[u32],
        _key: &PipelineKey,
    ) -> Result<u64> {
        if !self.generations.contains(&generation.id) {
            bail!("pipeline built against destroyed generation {}", generation.id);
        }
        if spirv.is_empty() {
            bail!("empty SPIR-V");
        }
        let h = self.handle();
        self.pipelines.insert(h);
        Ok(h)
    }

    fn destroy_pipeline(&mut self, pipeline: u64) {
        self.pipelines.remove(&pipeline);
    }

    fn create_fence(&mut self, signaled: bool) -> Result<u64> {
        let h = self.handle();
        self.fences.insert(h, signaled);
        Ok(h)
    }

    fn destroy_fence(&mut self, fence: u64) {
        self.fences.remove(&fence);
    }

    fn create_semaphore(&mut self) -> Result<u64> {
        let h = self.handle();
        self.semaphores.insert(h);
        Ok(h)
    }

    fn destroy_semaphore(&mut self, semaphore: u64) {
        self.semaphores.remove(&semaphore);
    }

    fn wait_fence(&mut self, fence: u64, _timeout_ns: u64) -> Result<()> {
        let signaled = self.fences.get_mut(&fence).context("wait on unknown fence")?;
        self.events.push(Event::Wait { fence, blocked: !*signaled });
        *signaled = true;
        Ok(())
    }

    fn reset_fence(&mut self, fence: u64) -> Result<()> {
        *self.fences.get_mut(&fence).context("reset of unknown fence")? = false;
        Ok(())
    }

    fn acquire_image(
        &mut self,
        generation: &MockGeneration,
        _signal: u64,
        _timeout_ns: u64,
    ) -> Result<Acquire> {
        if let Some(scripted) = self.acquire_script.pop_front() {
            return Ok(scripted);
        }
        let index = self.next_image % generation.image_count as u32;
        self.next_image += 1;
        Ok(Acquire::Image { index, suboptimal: false })
    }

    fn record_frame(
        &mut self,
        _generation: &mut MockGeneration,
        _image: u32,
        frame: &Recording<Self>,
    ) -> Result<()> {
        self.last_frame = Some(frame.clone());
        Ok(())
    }

    fn submit(
        &mut self,
        _generation: &MockGeneration,
        image: u32,
        _wait: u64,
        _signal: u64,
        fence: u64,
    ) -> Result<()> {
        if self.fences.get(&fence).copied().context("submit with unknown fence")? {
            bail!("submit with a signaled fence {fence}");
        }
        self.events.push(Event::Submit { fence, image });
        Ok(())
    }

    fn present(&mut self, _generation: &MockGeneration, image: u32, _wait: u64) -> Result<Present> {
        self.events.push(Event::Present { image });
        Ok(self.present_script.pop_front().unwrap_or(Present::Ok))
    }

    fn render_pick(&mut self, _generation: &mut MockGeneration, frame: &Recording<Self>) -> Result<()> {
        self.last_pick = Some(frame.clone());
        Ok(())
    }

    fn read_pick(&mut self, generation: &MockGeneration, x: u32, y: u32) -> Result<u32> {
        if x >= generation.extent.width || y >= generation.extent.height {
            bail!("pick read outside the target at ({x}, {y})");
        }
        Ok(self.pick_value)
    }
}
