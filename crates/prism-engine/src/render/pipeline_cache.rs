//! Pipelines keyed by program, vertex layout and target.

use std::collections::HashMap;

use anyhow::Result;

use super::shading::ShadingKind;
use super::vertex::VertexLayout;

/// Attachment set a pipeline renders into.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PassTarget {
    /// Swapchain colour + depth.
    Present,
    /// R32Uint pick target + depth.
    Pick,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PipelineKey {
    pub program: ShadingKind,
    pub layout: VertexLayout,
    pub target: PassTarget,
}

impl PipelineKey {
    pub fn new(program: ShadingKind, layout: VertexLayout) -> Self {
        let target = match program {
            ShadingKind::Index => PassTarget::Pick,
            _ => PassTarget::Present,
        };
        Self { program, layout, target }
    }

    /// Every key a backend may be asked for.
    pub fn all() -> impl Iterator<Item = PipelineKey> {
        ShadingKind::ALL
            .into_iter()
            .flat_map(|program| VertexLayout::ALL.into_iter().map(move |l| Self::new(program, l)))
    }
}

/// Lazily built pipelines. `P` is a backend handle, cheap to clone.
#[derive(Debug)]
pub struct PipelineCache<P> {
    pipelines: HashMap<PipelineKey, P>,
}

impl<P> Default for PipelineCache<P> {
    fn default() -> Self {
        Self { pipelines: HashMap::new() }
    }
}

impl<P: Clone> PipelineCache<P> {
    pub fn get(&self, key: &PipelineKey) -> Option<P> {
        self.pipelines.get(key).cloned()
    }

    pub fn get_or_create(
        &mut self,
        key: PipelineKey,
        create: impl FnOnce(&PipelineKey) -> Result<P>,
    ) -> Result<P> {
        if let Some(p) = self.pipelines.get(&key) {
            return Ok(p.clone());
        }
        let p = create(&key)?;
        log::debug!("created pipeline {:?}/{:?}/{:?}", key.program, key.layout, key.target);
        self.pipelines.insert(key, p.clone());
        Ok(p)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Empties the cache, yielding every handle for destruction.
    pub fn drain(&mut self) -> impl Iterator<Item = P> + '_ {
        self.pipelines.drain().map(|(_, p)| p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_program_targets_pick() {
        let layout = VertexLayout::default();
        assert_eq!(PipelineKey::new(ShadingKind::Index, layout).target, PassTarget::Pick);
        assert_eq!(PipelineKey::new(ShadingKind::Outline, layout).target, PassTarget::Present);
        assert_eq!(PipelineKey::all().count(), 24);
    }

    #[test]
    fn creates_once_per_key() {
        let mut cache = PipelineCache::default();
        let key = PipelineKey::new(ShadingKind::Solid, VertexLayout::ALL[3]);
        let mut built = 0;

        for _ in 0..3 {
            let p = cache
                .get_or_create(key, |_| {
                    built += 1;
                    Ok(7u32)
                })
                .unwrap();
            assert_eq!(p, 7);
        }
        assert_eq!(built, 1);
        assert_eq!(cache.drain().collect::<Vec<_>>(), vec![7]);
        assert!(cache.is_empty());
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let mut cache = PipelineCache::<u32>::default();
        let key = PipelineKey::new(ShadingKind::Custom, VertexLayout::default());
        assert!(cache.get_or_create(key, |_| anyhow::bail!("bad")).is_err());
        assert!(cache.get(&key).is_none());
    }
}
