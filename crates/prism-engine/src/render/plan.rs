//! Backend-neutral frame planning.
//!
//! The scene and the resource registry are turned into ordered draw lists
//! before any GPU work is recorded, so both backends draw the same thing and
//! the rules are testable without a device.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::scene::{ModelId, Scene};

use super::picking;
use super::resources::{ResourceRegistry, ShapeResources};
use super::shading::ShadingKind;

/// Per-draw uniform block, bound at group 0 binding 0 with a dynamic offset.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ObjectUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    /// Outline colour; unused by other programs.
    pub color: [f32; 4],
    pub has_texture: u32,
    /// Encoded model index; 0 is background.
    pub object_index: u32,
    pub _pad: [u32; 2],
}

impl ObjectUniforms {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Camera matrices for one frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewProjection {
    pub view: Mat4,
    pub proj: Mat4,
}

#[derive(Debug)]
pub struct DrawItem<'a, B, T> {
    pub model: ModelId,
    /// Position of the model in the scene.
    pub model_index: usize,
    pub resources: &'a ShapeResources<B, T>,
    pub uniforms: ObjectUniforms,
}

#[derive(Debug)]
pub struct PassPlan<'a, B, T> {
    pub program: ShadingKind,
    pub draws: Vec<DrawItem<'a, B, T>>,
}

impl<B, T> PassPlan<'_, B, T> {
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }
}

/// Everything a presented frame draws, in order.
#[derive(Debug)]
pub struct FramePlan<'a, B, T> {
    pub main: PassPlan<'a, B, T>,
    /// Selected models again with [`ShadingKind::Outline`].
    pub outline: Option<PassPlan<'a, B, T>>,
}

impl<'a, B, T> FramePlan<'a, B, T> {
    pub fn passes(&self) -> impl Iterator<Item = &PassPlan<'a, B, T>> {
        std::iter::once(&self.main).chain(self.outline.as_ref())
    }

    pub fn draw_count(&self) -> usize {
        self.passes().map(|p| p.draws.len()).sum()
    }
}

/// Plans the main pass with `shading` plus an outline pass over the selection.
///
/// Every visible model is drawn in the main pass. The outline pass is omitted
/// in wireframe shading and when nothing is selected.
pub fn build_frame<'a, B, T>(
    scene: &Scene,
    registry: &'a ResourceRegistry<B, T>,
    shading: ShadingKind,
    camera: ViewProjection,
    outline_color: [f32; 4],
) -> FramePlan<'a, B, T> {
    let main = build_pass(scene, registry, shading, camera, |_| true, |u| u);

    let outline = if shading == ShadingKind::Wireframe {
        None
    } else {
        let pass = build_pass(
            scene,
            registry,
            ShadingKind::Outline,
            camera,
            |index| scene.models()[index].is_selected(),
            |mut u| {
                u.color = outline_color;
                u
            },
        );
        (!pass.is_empty()).then_some(pass)
    };

    FramePlan { main, outline }
}

/// Plans the offscreen index pass: every model with its encoded index.
pub fn build_index<'a, B, T>(
    scene: &Scene,
    registry: &'a ResourceRegistry<B, T>,
    camera: ViewProjection,
) -> PassPlan<'a, B, T> {
    build_pass(scene, registry, ShadingKind::Index, camera, |_| true, |u| u)
}

fn build_pass<'a, B, T>(
    scene: &Scene,
    registry: &'a ResourceRegistry<B, T>,
    program: ShadingKind,
    camera: ViewProjection,
    include: impl Fn(usize) -> bool,
    finish: impl Fn(ObjectUniforms) -> ObjectUniforms,
) -> PassPlan<'a, B, T> {
    let mut draws = Vec::new();

    for (model_index, model) in scene.models().iter().enumerate() {
        if !include(model_index) {
            continue;
        }
        let Some(resources) = registry.get(model.id()) else {
            log::trace!("model '{}' has no GPU resources yet", model.name());
            continue;
        };

        for shape in &resources.shapes {
            let visible = model
                .shapes()
                .get(shape.shape_index)
                .is_some_and(|s| s.is_visible());
            if !visible {
                continue;
            }

            let uniforms = ObjectUniforms {
                model: model.matrix().to_cols_array_2d(),
                view: camera.view.to_cols_array_2d(),
                proj: camera.proj.to_cols_array_2d(),
                color: [0.0; 4],
                has_texture: u32::from(shape.texture.is_some()),
                object_index: picking::encode(model_index),
                _pad: [0; 2],
            };

            draws.push(DrawItem {
                model: model.id(),
                model_index,
                resources: shape,
                uniforms: finish(uniforms),
            });
        }
    }

    PassPlan { program, draws }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RendererConfig;
    use crate::render::resources::ModelResources;
    use crate::render::resources::tests::{CountingGpu, write_png};
    use crate::scene::{Model, primitives};

    const ORANGE: [f32; 4] = [1.0, 0.5, 0.0, 1.0];

    #[test]
    fn uniform_block_matches_the_shader_layout() {
        use std::mem::offset_of;
        assert_eq!(ObjectUniforms::SIZE, 224);
        assert_eq!(offset_of!(ObjectUniforms, color), 192);
        assert_eq!(offset_of!(ObjectUniforms, has_texture), 208);
        assert_eq!(offset_of!(ObjectUniforms, object_index), 212);
    }

    fn camera() -> ViewProjection {
        ViewProjection { view: Mat4::IDENTITY, proj: Mat4::IDENTITY }
    }

    fn setup(scene: &Scene) -> ResourceRegistry<u64, u64> {
        let mut gpu = CountingGpu::default();
        let mut reg = ResourceRegistry::new();
        for model in scene.models() {
            let res = ModelResources::upload(&mut gpu, model, &RendererConfig::default()).unwrap();
            reg.insert(model.id(), res);
        }
        reg
    }

    #[test]
    fn uniforms_flag_textured_shapes() {
        let tex = write_png("plan.png");
        let mut scene = Scene::new();
        scene.add_model(Model::new(
            "mixed",
            vec![primitives::cube(1.0).with_texture(&tex), primitives::cube(1.0)],
        ));
        let reg = setup(&scene);

        let plan = build_frame(&scene, &reg, ShadingKind::MaterialPreview, camera(), ORANGE);
        let flags: Vec<u32> = plan.main.draws.iter().map(|d| d.uniforms.has_texture).collect();
        assert_eq!(flags, vec![1, 0]);
    }

    #[test]
    fn outline_covers_selection_only() {
        let mut scene = Scene::new();
        scene.add_model(primitives::cube_model("a", 1.0));
        scene.add_model(primitives::cube_model("b", 1.0));
        let reg = setup(&scene);

        let plan = build_frame(&scene, &reg, ShadingKind::Solid, camera(), ORANGE);
        assert_eq!(plan.main.draws.len(), 2);

        let outline = plan.outline.expect("b is selected");
        assert_eq!(outline.program, ShadingKind::Outline);
        assert_eq!(outline.draws.len(), 1);
        assert_eq!(outline.draws[0].model_index, 1);
        assert_eq!(outline.draws[0].uniforms.color, ORANGE);
    }

    #[test]
    fn no_outline_in_wireframe_or_without_selection() {
        let mut scene = Scene::new();
        scene.add_model(primitives::cube_model("a", 1.0));
        let reg = setup(&scene);

        let plan = build_frame(&scene, &reg, ShadingKind::Wireframe, camera(), ORANGE);
        assert!(plan.outline.is_none());

        scene.select_only(None);
        let plan = build_frame(&scene, &reg, ShadingKind::Solid, camera(), ORANGE);
        assert!(plan.outline.is_none());
        assert_eq!(plan.draw_count(), 1);
    }

    #[test]
    fn hidden_shapes_and_unset_models_are_skipped() {
        let mut scene = Scene::new();
        let id = scene.add_model(Model::new(
            "two",
            vec![primitives::cube(1.0), primitives::cube(2.0)],
        ));
        let reg = setup(&scene);
        scene.model_mut(id).unwrap().shapes_mut()[0].set_visible(false);
        scene.add_model(primitives::cube_model("late", 1.0));

        let plan = build_frame(&scene, &reg, ShadingKind::Solid, camera(), ORANGE);
        assert_eq!(plan.main.draws.len(), 1);
        assert_eq!(plan.main.draws[0].resources.shape_index, 1);
    }

    #[test]
    fn index_pass_encodes_position_plus_one() {
        let mut scene = Scene::new();
        for name in ["a", "b", "c"] {
            scene.add_model(primitives::cube_model(name, 1.0));
        }
        let reg = setup(&scene);

        let pass = build_index(&scene, &reg, camera());
        assert_eq!(pass.program, ShadingKind::Index);
        let ids: Vec<u32> = pass.draws.iter().map(|d| d.uniforms.object_index).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
