//! Backend-neutral rendering pieces.
//!
//! Everything here is shared by the immediate and explicit backends: the
//! vertex layout, texture decoding, shading programs, the per-model resource
//! registry, pipeline caching and frame planning.
//!
//! Convention:
//! - Right-handed world space, camera looking down -Z.
//! - Clip-space depth in [0, 1]; depth test is `LessEqual`.

pub mod picking;
pub mod pipeline_cache;
pub mod plan;
pub mod resources;
pub mod shading;
pub mod texture;
pub mod vertex;

pub use pipeline_cache::{PassTarget, PipelineCache, PipelineKey};
pub use plan::{DrawItem, FramePlan, ObjectUniforms, PassPlan, ViewProjection};
pub use resources::{GpuResources, ModelResources, ResourceRegistry, ShapeResources};
pub use shading::{PolygonMode, Program, ProgramLibrary, ShadingKind, ShadingSelection};
pub use texture::{MipLevel, TextureImage};
pub use vertex::VertexLayout;
