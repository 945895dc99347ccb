//! Render backends.
//!
//! Two implementations sit behind [`RenderBackend`]:
//! - [`immediate::ImmediateBackend`] (wgpu): synchronous uploads, one frame
//!   at a time, presentation handled by the surface.
//! - [`explicit::ExplicitBackend`] (Vulkan via ash): owns its swapchain,
//!   frame slots and command buffers.
//!
//! A backend owns every GPU object it creates, including the resource bundle
//! of each model it was told to set up. Switching backends means building a
//! fresh instance and re-uploading the scene (see [`switch`]).

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use glam::Mat4;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::config::RendererConfig;
use crate::render::ShadingKind;
use crate::scene::{Model, ModelId, Scene};

pub mod explicit;
pub mod immediate;
pub mod switch;

pub use switch::{SwitchHost, SwitchOutcome, WindowGeometry, switch_backend};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BackendKind {
    /// wgpu; the OpenGL-style path.
    Immediate,
    /// Vulkan with explicit command buffers and synchronization.
    Explicit,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Immediate => "Immediate (wgpu)",
            BackendKind::Explicit => "Explicit (Vulkan)",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one `render` call.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameStatus {
    Presented,
    /// The surface or swapchain was stale; it has been rebuilt and this frame
    /// was not drawn.
    Dropped,
    /// Zero-area framebuffer; nothing was submitted.
    Suspended,
}

/// Client API a host should request when it creates the window.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClientApi {
    /// The backend creates its own surface; no context is needed.
    None,
    OpenGl { major: u8, minor: u8, core_profile: bool },
}

/// Window creation hints a backend asks its host for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WindowHints {
    pub client_api: ClientApi,
}

/// The contract every render backend satisfies.
///
/// Call order: `attach_window`, `init`, then `setup` / `setup_model` /
/// `render` in any order, `cleanup` last. `cleanup` is idempotent and also
/// runs on drop.
pub trait RenderBackend {
    fn kind(&self) -> BackendKind;

    fn window_hints(&self) -> WindowHints;

    /// Gives the backend the window it presents to. Must precede `init`.
    fn attach_window(&mut self, window: Arc<Window>);

    /// Compiles every shading program and creates all device objects.
    fn init(&mut self) -> Result<()>;

    /// Releases every bundle, then sets up each model of `scene`.
    fn setup(&mut self, scene: &Scene) -> Result<()>;

    /// Builds the bundle of one model. An existing bundle is replaced.
    fn setup_model(&mut self, model: &Model) -> Result<()>;

    /// Releases the bundle of one model; no-op when there is none.
    fn clean_model(&mut self, id: ModelId);

    fn resize(&mut self, size: PhysicalSize<u32>);

    /// Draws the scene with the current shading and an outline over the
    /// selection, then presents.
    fn render(&mut self, scene: &Scene, view: Mat4, proj: Mat4) -> Result<FrameStatus>;

    /// Draws every model's encoded index into the offscreen pick target.
    fn render_index(&mut self, scene: &Scene, view: Mat4, proj: Mat4) -> Result<()>;

    /// Reads one pixel of the pick target; coordinates are clamped to it.
    fn read_index(&mut self, x: u32, y: u32) -> Result<u32>;

    fn cleanup(&mut self);

    /// Compiled shading programs.
    fn programs(&self) -> Vec<ShadingKind>;

    fn current_shading(&self) -> ShadingKind;

    /// Returns false, leaving the selection unchanged, for auxiliary or
    /// uncompiled programs.
    fn set_current_shading(&mut self, kind: ShadingKind) -> bool;

    fn has_model(&self, id: ModelId) -> bool;

    fn model_count(&self) -> usize;
}

/// Builds an uninitialised backend of `kind`.
pub fn create(kind: BackendKind, config: RendererConfig) -> Box<dyn RenderBackend> {
    match kind {
        BackendKind::Immediate => Box::new(immediate::ImmediateBackend::new(config)),
        BackendKind::Explicit => {
            Box::new(explicit::ExplicitBackend::<explicit::VulkanDevice>::new(config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_builds_requested_kind_without_touching_the_gpu() {
        for kind in [BackendKind::Immediate, BackendKind::Explicit] {
            let mut backend = create(kind, RendererConfig::default());
            assert_eq!(backend.kind(), kind);
            assert_eq!(backend.model_count(), 0);
            assert!(backend.programs().is_empty());
            backend.cleanup();
            backend.cleanup();
        }
    }

    #[test]
    fn hints_follow_backend() {
        let gl = create(BackendKind::Immediate, RendererConfig::default()).window_hints();
        assert!(matches!(gl.client_api, ClientApi::OpenGl { major: 4, .. }));
        let vk = create(BackendKind::Explicit, RendererConfig::default()).window_hints();
        assert_eq!(vk.client_api, ClientApi::None);
    }
}
