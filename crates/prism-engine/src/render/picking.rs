//! Index-encoded picking.
//!
//! Model `i` is drawn with the value `i + 1` into an R32Uint target cleared to
//! 0, so 0 always means background.

use anyhow::Result;
use glam::Mat4;

use crate::backend::RenderBackend;
use crate::scene::Scene;

pub const BACKGROUND: u32 = 0;

/// Size of one R32Uint texel in a readback.
pub const TEXEL_BYTES: u64 = 4;

pub fn encode(model_index: usize) -> u32 {
    u32::try_from(model_index).map_or(u32::MAX, |i| i.saturating_add(1))
}

/// Maps a read-back value to a model index.
pub fn decode(raw: u32, model_count: usize) -> Option<usize> {
    if raw == BACKGROUND {
        return None;
    }
    let index = raw as usize - 1;
    (index < model_count).then_some(index)
}

/// Clamps a cursor position into a `width` x `height` target.
///
/// A zero-area target clamps everything to `(0, 0)`.
pub fn clamp_to_target(x: u32, y: u32, width: u32, height: u32) -> (u32, u32) {
    (x.min(width.saturating_sub(1)), y.min(height.saturating_sub(1)))
}

/// Byte offset of the texel under `(x, y)` in a tightly packed R32Uint
/// readback of a `width` x `height` target. Coordinates are clamped first.
pub fn texel_offset(x: u32, y: u32, width: u32, height: u32) -> u64 {
    let (x, y) = clamp_to_target(x, y, width, height);
    (u64::from(y) * u64::from(width) + u64::from(x)) * TEXEL_BYTES
}

/// Renders the index pass and decodes the value under `(x, y)`.
///
/// Coordinates are physical pixels from the top-left corner; the backend
/// clamps them to its target.
pub fn pick(
    backend: &mut dyn RenderBackend,
    scene: &Scene,
    view: Mat4,
    proj: Mat4,
    x: u32,
    y: u32,
) -> Result<Option<usize>> {
    backend.render_index(scene, view, proj)?;
    let raw = backend.read_index(x, y)?;
    let hit = decode(raw, scene.len());
    log::debug!("pick at ({x}, {y}): raw {raw} -> {hit:?}");
    Ok(hit)
}
