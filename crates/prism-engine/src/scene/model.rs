use std::sync::atomic::{AtomicU64, Ordering};

use glam::{EulerRot, Mat4, Quat, Vec3};

use super::Shape;

/// Stable identity of a model, independent of its position in the scene.
///
/// Render backends key their per-model GPU resources on this value.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ModelId(u64);

impl ModelId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A named collection of shapes sharing one transform and selection state.
#[derive(Debug, Clone)]
pub struct Model {
    id: ModelId,
    name: String,
    shapes: Vec<Shape>,

    position: Vec3,
    /// Euler angles in degrees, applied X then Y then Z.
    rotation: Vec3,
    scale: Vec3,
    matrix: Mat4,

    selected: bool,
}

impl Model {
    pub fn new(name: impl Into<String>, shapes: Vec<Shape>) -> Self {
        Self {
            id: ModelId::next(),
            name: name.into(),
            shapes,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            matrix: Mat4::IDENTITY,
            selected: false,
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn shapes_mut(&mut self) -> &mut [Shape] {
        &mut self.shapes
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.update_matrix();
    }

    pub fn set_rotation(&mut self, degrees: Vec3) {
        self.rotation = degrees;
        self.update_matrix();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.update_matrix();
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub(crate) fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    fn update_matrix(&mut self) {
        let r = self.rotation;
        let rotation = Quat::from_euler(
            EulerRot::XYZ,
            r.x.to_radians(),
            r.y.to_radians(),
            r.z.to_radians(),
        );
        self.matrix = Mat4::from_scale_rotation_translation(self.scale, rotation, self.position);
    }
}
