//! Prism engine crate.
//!
//! A render core with two interchangeable backends behind
//! [`backend::RenderBackend`]: an immediate one on `wgpu` and an explicit
//! one on Vulkan. Hosts own the window and the frame loop; the engine owns
//! every GPU object and keys per-model resources by [`scene::ModelId`].

pub mod assets;
pub mod backend;
pub mod config;
pub mod logging;
pub mod render;
pub mod scene;
