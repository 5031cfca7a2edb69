use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::element::Element;
use crate::geometry::Rect;
use crate::layer::Layer;
use crate::placement::Placement;
use crate::shapes::Shapes;
use crate::spatial::SpatialIndex;

slotmap::new_key_type! {
    /// Stable handle of a cell inside its [`Layout`](crate::layout::Layout).
    pub struct CellKey;
}

/// A placement of one cell inside another.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub cell: CellKey,
    pub placement: Placement,
}

impl Instance {
    pub fn new(cell: CellKey, placement: Placement) -> Self {
        Self { cell, placement }
    }
}

/// Which cached values an edit invalidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlag {
    pub bbox: bool,
    pub spatial_index: bool,
    /// The set of layers used by the cell and its descendants.
    pub layer: bool,
}

impl DirtyFlag {
    pub const SHAPES: DirtyFlag = DirtyFlag {
        bbox: true,
        spatial_index: true,
        layer: false,
    };
    pub const INDEX: DirtyFlag = DirtyFlag {
        bbox: false,
        spatial_index: true,
        layer: false,
    };
    pub const ALL: DirtyFlag = DirtyFlag {
        bbox: true,
        spatial_index: true,
        layer: true,
    };

    pub fn with_layer(mut self) -> Self {
        self.layer = true;
        self
    }
}

/// Memoised per-cell values. A missing entry means dirty.
#[derive(Debug, Default)]
pub(crate) struct CellCache {
    pub bboxes: BTreeMap<Layer, Rect>,
    pub indexes: BTreeMap<Layer, Arc<SpatialIndex>>,
    pub layers: Option<Arc<[Layer]>>,
    pub max_level: Option<u32>,
}

impl CellCache {
    /// Drop the entries selected by `flag` on `layer` (every layer when `None`).
    /// Returns whether a clean entry was dropped.
    pub fn invalidate(&mut self, flag: DirtyFlag, layer: Option<Layer>) -> bool {
        let mut changed = false;
        if flag.bbox {
            changed |= match layer {
                Some(l) => self.bboxes.remove(&l).is_some(),
                None => !std::mem::take(&mut self.bboxes).is_empty(),
            };
        }
        if flag.spatial_index {
            changed |= match layer {
                Some(l) => self.indexes.remove(&l).is_some(),
                None => !std::mem::take(&mut self.indexes).is_empty(),
            };
        }
        if flag.layer {
            changed |= self.layers.take().is_some();
        }
        changed
    }
}

/// A named unit of layout: shapes per layer plus instances of other cells.
///
/// Mutation goes through [`Layout`](crate::layout::Layout), which keeps the
/// parent sets and the caches of every ancestor consistent.
#[derive(Debug, Default)]
pub struct Cell {
    pub(crate) name: String,
    pub(crate) shapes: BTreeMap<Layer, Shapes>,
    pub(crate) instances: Vec<Instance>,
    pub(crate) parents: HashSet<CellKey>,
    pub(crate) cache: RwLock<CellCache>,
}

impl Cell {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Shapes ───────────────────────────────────────────────────────

    pub fn shapes(&self, layer: Layer) -> Option<&Shapes> {
        self.shapes.get(&layer)
    }

    /// Layers holding shapes in this cell itself.
    pub fn layers(&self) -> impl Iterator<Item = Layer> + '_ {
        self.shapes.keys().copied()
    }

    pub fn has_layer(&self, layer: Layer) -> bool {
        self.shapes.contains_key(&layer)
    }

    /// Own shapes on `layer`, not counting descendants.
    pub fn shape_count(&self, layer: Layer) -> usize {
        self.shapes.get(&layer).map_or(0, |s| s.len(true))
    }

    // ── Instances ────────────────────────────────────────────────────

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn instance(&self, element: Element) -> Option<&Instance> {
        match element {
            Element::Instance(i) => self.instances.get(i as usize),
            _ => None,
        }
    }

    pub fn has_instances(&self) -> bool {
        !self.instances.is_empty()
    }

    /// Distinct cells instanced here.
    pub fn children(&self) -> HashSet<CellKey> {
        self.instances.iter().map(|i| i.cell).collect()
    }

    /// Cells instancing this one.
    pub fn parents(&self) -> &HashSet<CellKey> {
        &self.parents
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    // ── Cache access ─────────────────────────────────────────────────

    pub(crate) fn cache(&self) -> RwLockReadGuard<'_, CellCache> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn cache_write(&self) -> RwLockWriteGuard<'_, CellCache> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn cache_mut(&mut self) -> &mut CellCache {
        self.cache.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_spatial_index(&self, layer: Layer) -> bool {
        self.cache().indexes.contains_key(&layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidate_reports_clean_entries() {
        let mut cache = CellCache::default();
        let l = Layer::new(1, 0);
        assert!(!cache.invalidate(DirtyFlag::ALL, Some(l)));
        cache.bboxes.insert(l, Rect::new(0, 0, 1, 1));
        assert!(cache.invalidate(DirtyFlag::SHAPES, Some(l)));
        assert!(!cache.invalidate(DirtyFlag::SHAPES, Some(l)));

        cache.layers = Some(Arc::from(vec![l]));
        assert!(!cache.invalidate(DirtyFlag::SHAPES, None));
        assert!(cache.invalidate(DirtyFlag::SHAPES.with_layer(), None));
        assert!(cache.layers.is_none());
    }

    #[test]
    fn test_index_flag_leaves_bbox() {
        let mut cache = CellCache::default();
        let l = Layer::new(2, 0);
        cache.bboxes.insert(l, Rect::new(0, 0, 1, 1));
        assert!(!cache.invalidate(DirtyFlag::INDEX, None));
        assert_eq!(cache.bboxes.len(), 1);
    }
}
