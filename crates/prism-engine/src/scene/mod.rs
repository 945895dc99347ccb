//! Scene data consumed by the render backends.
//!
//! Models are ordered (the order defines picking indices) and carry a stable
//! [`ModelId`] that backends use as the key for GPU resources.

mod model;
pub mod primitives;
mod shape;

pub use model::{Model, ModelId};
pub use shape::{Shape, ShapeError};

/// Ordered collection of models.
#[derive(Debug, Default)]
pub struct Scene {
    models: Vec<Model>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a model and makes it the only selected one.
    pub fn add_model(&mut self, model: Model) -> ModelId {
        let id = model.id();
        self.models.push(model);
        self.select_only(Some(self.models.len() - 1));
        id
    }

    /// Removes a model from the scene.
    ///
    /// Callers must release the model's GPU resources (`clean_model`) first.
    pub fn remove_model(&mut self, id: ModelId) -> Option<Model> {
        let index = self.index_of(id)?;
        Some(self.models.remove(index))
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.iter().find(|m| m.id() == id)
    }

    pub fn model_mut(&mut self, id: ModelId) -> Option<&mut Model> {
        self.models.iter_mut().find(|m| m.id() == id)
    }

    pub fn index_of(&self, id: ModelId) -> Option<usize> {
        self.models.iter().position(|m| m.id() == id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn total_shape_count(&self) -> usize {
        self.models.iter().map(Model::shape_count).sum()
    }

    pub fn selected(&self) -> impl Iterator<Item = &Model> {
        self.models.iter().filter(|m| m.is_selected())
    }

    /// Selects the model at `index` and deselects every other one.
    /// `None` (or an out-of-range index) clears the selection.
    pub fn select_only(&mut self, index: Option<usize>) {
        for (i, m) in self.models.iter_mut().enumerate() {
            m.set_selected(Some(i) == index);
        }
    }

    /// Clears the selection if `index` is selected, otherwise selects only it.
    pub fn toggle_select(&mut self, index: usize) {
        let Some(model) = self.models.get(index) else { return };
        if model.is_selected() {
            self.select_only(None);
        } else {
            self.select_only(Some(index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene_of(n: usize) -> (Scene, Vec<ModelId>) {
        let mut scene = Scene::new();
        let ids = (0..n)
            .map(|i| scene.add_model(primitives::cube_model(&format!("m{i}"), 1.0)))
            .collect();
        (scene, ids)
    }

    #[test]
    fn add_selects_newest_only() {
        let (scene, ids) = scene_of(3);
        let selected: Vec<_> = scene.selected().map(Model::id).collect();
        assert_eq!(selected, vec![ids[2]]);
    }

    #[test]
    fn toggle_select_flips_between_one_and_none() {
        let (mut scene, ids) = scene_of(2);

        scene.toggle_select(0);
        assert_eq!(scene.selected().map(Model::id).collect::<Vec<_>>(), vec![ids[0]]);

        scene.toggle_select(0);
        assert_eq!(scene.selected().count(), 0);

        // Out-of-range toggles are ignored.
        scene.toggle_select(7);
        assert_eq!(scene.selected().count(), 0);
    }

    #[test]
    fn remove_keeps_other_ids_stable() {
        let (mut scene, ids) = scene_of(3);
        let removed = scene.remove_model(ids[1]).unwrap();
        assert_eq!(removed.id(), ids[1]);
        assert_eq!(scene.index_of(ids[2]), Some(1));
        assert!(scene.model(ids[1]).is_none());
        assert!(scene.remove_model(ids[1]).is_none());
    }

    #[test]
    fn total_shape_count_sums_models() {
        let (scene, _) = scene_of(3);
        assert_eq!(scene.total_shape_count(), 3);
    }
}
