//! Renderer configuration.
//!
//! Plain structs with conservative defaults, passed by value when a backend is
//! constructed. A backend never re-reads configuration after `init`.

use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by both backends.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Directory holding `<program>.wgsl` for every shading program.
    pub shader_dir: PathBuf,

    /// Background colour of the main pass (linear RGBA).
    pub clear_color: [f64; 4],

    /// Colour written by the outline pass over selected models.
    pub outline_color: [f32; 4],

    /// Flip decoded textures vertically so V runs bottom-to-top, as model
    /// files author it.
    pub flip_textures: bool,

    /// Upper bound on generated mip levels per texture (0 = full chain).
    pub max_mip_levels: u32,

    pub immediate: ImmediateConfig,
    pub explicit: ExplicitConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/shaders")),
            clear_color: [0.45, 0.55, 0.60, 1.0],
            outline_color: [1.0, 0.6, 0.1, 1.0],
            flip_textures: true,
            max_mip_levels: 0,
            immediate: ImmediateConfig::default(),
            explicit: ExplicitConfig::default(),
        }
    }
}

/// Initialization parameters for the immediate (wgpu) backend.
#[derive(Debug, Clone)]
pub struct ImmediateConfig {
    /// Backends wgpu may choose from.
    pub backends: wgpu::Backends,

    pub power_preference: wgpu::PowerPreference,

    /// FIFO is supported everywhere.
    pub present_mode: wgpu::PresentMode,

    /// Hint only; support depends on platform.
    pub desired_maximum_frame_latency: u32,
}

impl Default for ImmediateConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
        }
    }
}

/// Preferred presentation mode for the explicit backend.
///
/// FIFO is the fallback whenever the preference is unavailable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PresentModePreference {
    Mailbox,
    Fifo,
    Immediate,
}

/// Initialization parameters for the explicit (Vulkan) backend.
#[derive(Debug, Clone)]
pub struct ExplicitConfig {
    pub present_mode: PresentModePreference,

    /// Prefer a discrete GPU; an integrated one is used otherwise.
    pub prefer_discrete_gpu: bool,

    /// Enable `VK_LAYER_KHRONOS_validation` when it is installed.
    pub validation: bool,

    /// Bound on fence waits and image acquisition. `None` waits indefinitely.
    pub fence_timeout: Option<Duration>,

    /// Capacity of the texture descriptor pool.
    pub max_textures: u32,
}

impl Default for ExplicitConfig {
    fn default() -> Self {
        Self {
            present_mode: PresentModePreference::Mailbox,
            prefer_discrete_gpu: true,
            validation: cfg!(debug_assertions),
            fence_timeout: None,
            max_textures: 1024,
        }
    }
}

impl ExplicitConfig {
    /// Timeout in nanoseconds as the Vulkan API expects it.
    pub fn timeout_ns(&self) -> u64 {
        self.fence_timeout
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(u64::MAX)
    }
}
