//! The device seam of the explicit backend.
//!
//! [`ExplicitBackend`](super::ExplicitBackend) drives the frame protocol
//! (fences, acquisition, swapchain generations) and delegates every API call
//! to an [`ExplicitDevice`]. Handles are small copyable ids so the protocol
//! can be tested against an instrumented device.

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Result;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::config::ExplicitConfig;
use crate::render::{
    GpuResources, ObjectUniforms, PipelineKey, ShadingKind, TextureImage, VertexLayout,
};

/// What a swapchain generation exposes to the protocol.
pub trait SwapchainGeneration {
    fn image_count(&self) -> usize;

    fn extent(&self) -> PhysicalSize<u32>;

    /// Identifies the colour/depth formats pipelines were built against.
    /// Pipelines survive a rebuild only while this is unchanged.
    fn target_signature(&self) -> u64;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface.
    OutOfDate,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Present {
    Ok,
    Suboptimal,
    OutOfDate,
}

/// One recorded draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall<B, T, P> {
    pub pipeline: P,
    pub vertex_buffer: B,
    pub vertex_count: u32,
    pub layout: VertexLayout,
    /// `None` binds the default white texture.
    pub texture: Option<T>,
    pub uniforms: ObjectUniforms,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassRecording<B, T, P> {
    pub program: ShadingKind,
    pub draws: Vec<DrawCall<B, T, P>>,
}

/// Everything one command buffer draws, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecording<B, T, P> {
    pub clear_color: [f32; 4],
    pub passes: Vec<PassRecording<B, T, P>>,
}

impl<B, T, P> FrameRecording<B, T, P> {
    pub fn draw_count(&self) -> usize {
        self.passes.iter().map(|p| p.draws.len()).sum()
    }
}

pub type Recording<D> = FrameRecording<
    <D as ExplicitDevice>::Buffer,
    <D as ExplicitDevice>::Texture,
    <D as ExplicitDevice>::Pipeline,
>;

/// Explicit-API operations in the granularity the frame protocol needs.
pub trait ExplicitDevice: Sized {
    type Buffer: Copy + Eq + Debug;
    type Texture: Copy + Eq + Debug;
    type Pipeline: Copy + Eq + Debug;
    type Fence: Copy + Eq + Debug;
    type Semaphore: Copy + Eq + Debug;
    type Generation: SwapchainGeneration;

    // ── lifecycle ─────────────────────────────────────────────────────────

    /// Creates instance, surface, device, queue and command pool.
    fn open(window: Option<Arc<Window>>, config: &ExplicitConfig) -> Result<Self>;

    /// Current drawable size; may be zero-area.
    fn framebuffer_size(&self) -> PhysicalSize<u32>;

    fn wait_idle(&mut self) -> Result<()>;

    /// Destroys everything `open` created. Every other handle must already
    /// be released.
    fn close(self);

    // ── swapchain ─────────────────────────────────────────────────────────

    /// Swapchain, image views, render pass, depth, framebuffers, per-image
    /// uniform buffers, descriptor sets and command buffers, in that order.
    fn create_generation(&mut self, extent: PhysicalSize<u32>) -> Result<Self::Generation>;

    fn destroy_generation(&mut self, generation: Self::Generation);

    // ── model resources ───────────────────────────────────────────────────

    /// Device-local vertex buffer with its own allocation.
    fn create_vertex_buffer(&mut self, label: &str, vertices: &[f32]) -> Result<Self::Buffer>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    /// `maxImageDimension2D`; uploads larger than this are downscaled first.
    fn max_texture_dimension(&self) -> u32;

    /// Staged upload of every mip level, ending in shader-read-only layout.
    fn create_texture(&mut self, label: &str, image: &TextureImage) -> Result<Self::Texture>;
    fn destroy_texture(&mut self, texture: Self::Texture);

    // ── pipelines ─────────────────────────────────────────────────────────

    fn create_pipeline(
        &mut self,
        generation: &Self::Generation,
        spirv: &[u32],
        key: &PipelineKey,
    ) -> Result<Self::Pipeline>;

    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);

    // ── synchronization ───────────────────────────────────────────────────

    fn create_fence(&mut self, signaled: bool) -> Result<Self::Fence>;
    fn destroy_fence(&mut self, fence: Self::Fence);
    fn create_semaphore(&mut self) -> Result<Self::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore);

    /// Blocks until `fence` is signaled or `timeout_ns` elapses.
    fn wait_fence(&mut self, fence: Self::Fence, timeout_ns: u64) -> Result<()>;
    fn reset_fence(&mut self, fence: Self::Fence) -> Result<()>;

    // ── frame ─────────────────────────────────────────────────────────────

    fn acquire_image(
        &mut self,
        generation: &Self::Generation,
        signal: Self::Semaphore,
        timeout_ns: u64,
    ) -> Result<Acquire>;

    /// Writes uniforms and records the command buffer of `image`.
    ///
    /// Callers guarantee that no pending submission uses `image`.
    fn record_frame(
        &mut self,
        generation: &mut Self::Generation,
        image: u32,
        frame: &Recording<Self>,
    ) -> Result<()>;

    fn submit(
        &mut self,
        generation: &Self::Generation,
        image: u32,
        wait: Self::Semaphore,
        signal: Self::Semaphore,
        fence: Self::Fence,
    ) -> Result<()>;

    fn present(
        &mut self,
        generation: &Self::Generation,
        image: u32,
        wait: Self::Semaphore,
    ) -> Result<Present>;

    // ── picking ───────────────────────────────────────────────────────────

    /// Records, submits and waits for an index pass into the pick target.
    fn render_pick(
        &mut self,
        generation: &mut Self::Generation,
        frame: &Recording<Self>,
    ) -> Result<()>;

    /// Reads one texel of the pick target; `(x, y)` is within the extent.
    fn read_pick(&mut self, generation: &Self::Generation, x: u32, y: u32) -> Result<u32>;
}

/// Lends a device to the resource registry.
pub struct DeviceResources<'a, D>(pub &'a mut D);

impl<D: ExplicitDevice> GpuResources for DeviceResources<'_, D> {
    type Buffer = D::Buffer;
    type Texture = D::Texture;

    fn create_vertex_buffer(&mut self, label: &str, vertices: &[f32]) -> Result<D::Buffer> {
        self.0.create_vertex_buffer(label, vertices)
    }

    fn destroy_buffer(&mut self, buffer: D::Buffer) {
        self.0.destroy_buffer(buffer);
    }

    fn max_texture_dimension(&self) -> u32 {
        self.0.max_texture_dimension()
    }

    fn create_texture(&mut self, label: &str, image: &TextureImage) -> Result<D::Texture> {
        self.0.create_texture(label, image)
    }

    fn destroy_texture(&mut self, texture: D::Texture) {
        self.0.destroy_texture(texture);
    }
}
