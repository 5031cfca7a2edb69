use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use slotmap::SlotMap;
use uuid::Uuid;

use crate::cell::{Cell, CellKey, DirtyFlag, Instance};
use crate::compress::{CompressAlgo, Compressor};
use crate::element::{Element, ElementSource};
use crate::error::{LayoutError, LayoutResult};
use crate::geometry::{Rect, Vector};
use crate::iter::{ElementIterator, ElementIteratorOption};
use crate::layer::{Layer, LayerNames};
use crate::options::{
    LayoutOptions, SpatialIndexOption, UpdateOption, SHAPES_INDEX_THRESHOLD, UPDATE_BOUNDING_BOX, UPDATE_LAYER,
    UPDATE_SPATIAL_INDEX, UPDATE_TOP_CELL,
};
use crate::placement::Placement;
use crate::shapes::{ShapeKind, ShapeType, Shapes};
use crate::spatial::{QueryElementType, SpatialIndex};
use crate::transform::{SimpleTrans, Trans};

/// How [`Layout::delete_cell`] treats the children of a deleted cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Only the cell itself.
    Shallow,
    /// Also every descendant left without a parent.
    Deep,
}

/// The pool of all cells, plus the top cell, database unit and layer names.
#[derive(Debug)]
pub struct Layout {
    pub id: Uuid,
    name: String,
    cells: SlotMap<CellKey, Cell>,
    names: HashMap<String, CellKey>,
    top_cell: Option<CellKey>,
    /// Micrometres per database unit.
    dbu: f64,
    layer_names: LayerNames,
    options: LayoutOptions,
}

impl Layout {
    pub fn new(name: &str) -> Self {
        Self::with_options(name, LayoutOptions::default())
    }

    pub fn with_options(name: &str, options: LayoutOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            cells: SlotMap::with_key(),
            names: HashMap::new(),
            top_cell: None,
            dbu: 0.001,
            layer_names: LayerNames::new(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &LayoutOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: LayoutOptions) {
        self.options = options;
    }

    pub fn dbu(&self) -> f64 {
        self.dbu
    }

    pub fn set_dbu(&mut self, dbu: f64) -> LayoutResult<()> {
        if !dbu.is_finite() || dbu <= 0.0 {
            return Err(LayoutError::InvalidParam(format!("database unit must be positive, got {dbu}")));
        }
        self.dbu = dbu;
        Ok(())
    }

    // ── Cell management ──────────────────────────────────────────────

    pub fn create_cell(&mut self, name: &str) -> LayoutResult<CellKey> {
        if name.is_empty() {
            return Err(LayoutError::InvalidParam("cell name is empty".into()));
        }
        if self.names.contains_key(name) {
            return Err(LayoutError::CellExists(name.to_string()));
        }
        let key = self.cells.insert(Cell::new(name));
        self.names.insert(name.to_string(), key);
        log::debug!("created cell '{}'", name);
        Ok(key)
    }

    pub fn get_or_create_cell(&mut self, name: &str) -> LayoutResult<CellKey> {
        match self.names.get(name) {
            Some(&key) => Ok(key),
            None => self.create_cell(name),
        }
    }

    pub fn cell_by_name(&self, name: &str) -> Option<CellKey> {
        self.names.get(name).copied()
    }

    pub fn cell(&self, key: CellKey) -> Option<&Cell> {
        self.cells.get(key)
    }

    fn cell_ref(&self, key: CellKey) -> LayoutResult<&Cell> {
        self.cells.get(key).ok_or(LayoutError::StaleCell)
    }

    fn cell_mut(&mut self, key: CellKey) -> LayoutResult<&mut Cell> {
        self.cells.get_mut(key).ok_or(LayoutError::StaleCell)
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellKey, &Cell)> {
        self.cells.iter()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn rename_cell(&mut self, key: CellKey, name: &str) -> LayoutResult<()> {
        if name.is_empty() {
            return Err(LayoutError::InvalidParam("cell name is empty".into()));
        }
        match self.names.get(name) {
            Some(&other) if other == key => return Ok(()),
            Some(_) => return Err(LayoutError::CellExists(name.to_string())),
            None => {}
        }
        let cell = self.cell_mut(key)?;
        let old = std::mem::replace(&mut cell.name, name.to_string());
        self.names.remove(&old);
        self.names.insert(name.to_string(), key);
        Ok(())
    }

    /// Cells no other cell instances.
    pub fn root_cells(&self) -> Vec<CellKey> {
        self.cells.iter().filter(|(_, c)| c.is_root()).map(|(k, _)| k).collect()
    }

    pub fn top_cell(&self) -> Option<CellKey> {
        self.top_cell
    }

    pub fn set_top_cell(&mut self, key: CellKey) -> LayoutResult<()> {
        self.cell_ref(key)?;
        self.top_cell = Some(key);
        Ok(())
    }

    fn require_top_cell(&self) -> LayoutResult<CellKey> {
        self.top_cell.ok_or(LayoutError::TopCellNotSet)
    }

    /// Remove a cell and every instance of it. Returns the number of cells deleted.
    pub fn delete_cell(&mut self, key: CellKey, mode: DeleteMode) -> LayoutResult<usize> {
        self.cell_ref(key)?;
        let mut doomed = vec![key];
        let mut deleted = 0;
        while let Some(k) = doomed.pop() {
            let parents: Vec<CellKey> = match self.cells.get(k) {
                Some(cell) => cell.parents.iter().copied().collect(),
                None => continue,
            };
            for parent in parents {
                if let Some(p) = self.cells.get_mut(parent) {
                    p.instances.retain(|inst| inst.cell != k);
                }
                self.instances_changed(parent);
            }
            let Some(cell) = self.cells.remove(k) else {
                continue;
            };
            self.names.remove(&cell.name);
            if self.top_cell == Some(k) {
                self.top_cell = None;
            }
            for child in cell.children() {
                if let Some(c) = self.cells.get_mut(child) {
                    c.parents.remove(&k);
                    if mode == DeleteMode::Deep && c.parents.is_empty() {
                        doomed.push(child);
                    }
                }
            }
            log::debug!("deleted cell '{}'", cell.name);
            deleted += 1;
        }
        Ok(deleted)
    }

    // ── Dirty propagation ────────────────────────────────────────────

    /// Invalidate caches of `key` and walk up the parent edges, continuing only
    /// past cells where something clean was dropped. Returns the number of
    /// cells visited.
    pub(crate) fn set_dirty(&mut self, key: CellKey, flag: DirtyFlag, layer: Option<Layer>) -> usize {
        let mut stack = vec![key];
        let mut visits = 0;
        while let Some(k) = stack.pop() {
            let Some(cell) = self.cells.get_mut(k) else {
                continue;
            };
            visits += 1;
            if cell.cache_mut().invalidate(flag, layer) {
                log::trace!("dirtied cell '{}' ({:?} on {:?})", cell.name, flag, layer);
                stack.extend(cell.parents.iter().copied());
            }
        }
        visits
    }

    fn clear_max_level(&mut self, key: CellKey) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if let Some(cell) = self.cells.get_mut(k) {
                if cell.cache_mut().max_level.take().is_some() {
                    stack.extend(cell.parents.iter().copied());
                }
            }
        }
    }

    fn shapes_changed(&mut self, key: CellKey, layer: Layer, layer_set_changed: bool) {
        let flag = if layer_set_changed {
            DirtyFlag::SHAPES.with_layer()
        } else {
            DirtyFlag::SHAPES
        };
        self.set_dirty(key, flag, Some(layer));
    }

    fn instances_changed(&mut self, key: CellKey) {
        self.set_dirty(key, DirtyFlag::ALL, None);
        self.clear_max_level(key);
    }

    // ── Cached queries ───────────────────────────────────────────────

    /// Box of the cell on `layer`, descendants included. Empty for unknown
    /// cells and layers used nowhere below the cell.
    pub fn bounding_box(&self, key: CellKey, layer: Layer) -> Rect {
        let Some(cell) = self.cells.get(key) else {
            return Rect::empty();
        };
        if let Some(bb) = cell.cache().bboxes.get(&layer) {
            return *bb;
        }
        let mut bb = cell.shapes.get(&layer).map_or(Rect::empty(), Shapes::bounding_box);
        for inst in &cell.instances {
            let child = self.bounding_box(inst.cell, layer);
            bb = bb.union(&inst.placement.bounding_box(&child));
        }
        cell.cache_write().bboxes.insert(layer, bb);
        bb
    }

    /// Box of the cell over every layer it or its descendants use.
    pub fn bounding_box_all(&self, key: CellKey) -> Rect {
        self.layers_including_children(key)
            .iter()
            .fold(Rect::empty(), |bb, &l| bb.union(&self.bounding_box(key, l)))
    }

    /// Box of the top cell over `layers`, or over all of its layers when empty.
    pub fn top_bounding_box(&self, layers: &[Layer]) -> LayoutResult<Rect> {
        let top = self.require_top_cell()?;
        if layers.is_empty() {
            return Ok(self.bounding_box_all(top));
        }
        Ok(layers
            .iter()
            .fold(Rect::empty(), |bb, &l| bb.union(&self.bounding_box(top, l))))
    }

    /// Sorted layers used by the cell or any descendant.
    pub fn layers_including_children(&self, key: CellKey) -> Arc<[Layer]> {
        let Some(cell) = self.cells.get(key) else {
            return Arc::from(Vec::new());
        };
        if let Some(layers) = &cell.cache().layers {
            return Arc::clone(layers);
        }
        let mut set: BTreeSet<Layer> = cell.shapes.keys().copied().collect();
        for child in cell.children() {
            set.extend(self.layers_including_children(child).iter().copied());
        }
        let layers: Arc<[Layer]> = set.into_iter().collect();
        cell.cache_write().layers = Some(Arc::clone(&layers));
        layers
    }

    pub fn has_layer_including_children(&self, key: CellKey, layer: Layer) -> bool {
        self.layers_including_children(key).binary_search(&layer).is_ok()
    }

    /// Depth of the deepest instancing chain below the cell; 0 for a leaf.
    pub fn max_level(&self, key: CellKey) -> u32 {
        let Some(cell) = self.cells.get(key) else {
            return 0;
        };
        if let Some(level) = cell.cache().max_level {
            return level;
        }
        let level = cell
            .children()
            .into_iter()
            .map(|c| self.max_level(c) + 1)
            .max()
            .unwrap_or(0);
        cell.cache_write().max_level = Some(level);
        level
    }

    /// Flattened polygon count of the cell on `layer`.
    pub fn cell_polygon_count(&self, key: CellKey, layer: Layer) -> usize {
        let mut memo = HashMap::new();
        self.count_polygons(key, layer, &mut memo)
    }

    fn count_polygons(&self, key: CellKey, layer: Layer, memo: &mut HashMap<CellKey, usize>) -> usize {
        if let Some(&n) = memo.get(&key) {
            return n;
        }
        let Some(cell) = self.cells.get(key) else {
            return 0;
        };
        let mut n = cell.shapes.get(&layer).map_or(0, Shapes::polygon_count);
        for inst in &cell.instances {
            n = n.saturating_add(inst.placement.size().saturating_mul(self.count_polygons(inst.cell, layer, memo)));
        }
        memo.insert(key, n);
        n
    }

    /// Flattened polygon count of the top cell on `layer`.
    pub fn polygon_count(&self, layer: Layer) -> LayoutResult<usize> {
        Ok(self.cell_polygon_count(self.require_top_cell()?, layer))
    }

    pub fn has_spatial_index(&self, key: CellKey, layer: Layer) -> bool {
        self.cells.get(key).is_some_and(|c| c.has_spatial_index(layer))
    }

    /// Cached index of the cell on `layer`, built on first use.
    pub fn spatial_index(&self, key: CellKey, layer: Layer) -> Option<Arc<SpatialIndex>> {
        let cell = self.cells.get(key)?;
        if let Some(index) = cell.cache().indexes.get(&layer) {
            return Some(Arc::clone(index));
        }
        let view = CellLayerView::new(self, key, layer)?;
        let elements = view.elements();
        let option = self.index_option(key, layer, self.options.window_step);
        let index = Arc::new(SpatialIndex::build(&view, &elements, &option));
        cell.cache_write().indexes.insert(layer, Arc::clone(&index));
        Some(index)
    }

    fn index_option(&self, key: CellKey, layer: Layer, window_step: u32) -> SpatialIndexOption {
        SpatialIndexOption {
            window_step,
            region: if window_step > 0 {
                self.bounding_box(key, layer)
            } else {
                Rect::empty()
            },
        }
    }

    // ── Shape editing ────────────────────────────────────────────────

    pub fn shapes(&self, key: CellKey, layer: Layer) -> Option<&Shapes> {
        self.cells.get(key)?.shapes.get(&layer)
    }

    pub fn insert_shape<T: ShapeKind>(&mut self, key: CellKey, layer: Layer, shape: T) -> LayoutResult<Element> {
        let cell = self.cell_mut(key)?;
        let new_layer = !cell.shapes.contains_key(&layer);
        let element = cell.shapes.entry(layer).or_default().insert(shape);
        self.shapes_changed(key, layer, new_layer);
        Ok(element)
    }

    pub fn insert_shapes<T, I>(&mut self, key: CellKey, layer: Layer, shapes: I) -> LayoutResult<()>
    where
        T: ShapeKind,
        I: IntoIterator<Item = T>,
    {
        let cell = self.cell_mut(key)?;
        let new_layer = !cell.shapes.contains_key(&layer);
        cell.shapes.entry(layer).or_default().insert_many(shapes);
        self.shapes_changed(key, layer, new_layer);
        Ok(())
    }

    pub fn replace_shape<T: ShapeKind>(&mut self, key: CellKey, layer: Layer, index: usize, shape: T) -> LayoutResult<()> {
        self.cell_mut(key)?
            .shapes
            .get_mut(&layer)
            .ok_or(LayoutError::LayerNotFound(layer))?
            .replace(index, shape)?;
        self.shapes_changed(key, layer, false);
        Ok(())
    }

    /// Delete shapes of kind `ty` by index. A layer left without shapes is removed.
    pub fn delete_shapes(&mut self, key: CellKey, layer: Layer, ty: ShapeType, indices: &[usize]) -> LayoutResult<()> {
        let cell = self.cell_mut(key)?;
        let shapes = cell.shapes.get_mut(&layer).ok_or(LayoutError::LayerNotFound(layer))?;
        shapes.delete(ty, indices)?;
        let emptied = shapes.is_empty();
        if emptied {
            cell.shapes.remove(&layer);
        }
        self.shapes_changed(key, layer, emptied);
        Ok(())
    }

    // ── Layers ───────────────────────────────────────────────────────

    pub fn create_layer(&mut self, layer: Layer, name: &str) -> LayoutResult<()> {
        if self.layer_names.get(layer).is_some() {
            return Err(LayoutError::LayerExists(layer));
        }
        self.layer_names.set(layer, name);
        Ok(())
    }

    pub fn set_layer_name(&mut self, layer: Layer, name: &str) {
        self.layer_names.set(layer, name);
    }

    pub fn layer_name(&self, layer: Layer) -> Option<&str> {
        self.layer_names.get(layer)
    }

    pub fn find_layer(&self, name: &str) -> Option<Layer> {
        self.layer_names.find(name)
    }

    /// Every layer holding shapes in some cell or carrying a name.
    pub fn layers(&self) -> Vec<Layer> {
        let mut set: BTreeSet<Layer> = self.cells.values().flat_map(|c| c.layers()).collect();
        set.extend(self.layer_names.layers());
        set.into_iter().collect()
    }

    fn cells_with_layer(&self, layer: Layer) -> Vec<CellKey> {
        self.cells.iter().filter(|(_, c)| c.has_layer(layer)).map(|(k, _)| k).collect()
    }

    fn layer_in_use(&self, layer: Layer) -> bool {
        self.layer_names.get(layer).is_some() || self.cells.values().any(|c| c.has_layer(layer))
    }

    pub fn copy_cell_layer(&mut self, key: CellKey, src: Layer, dst: Layer) -> LayoutResult<()> {
        let cell = self.cell_mut(key)?;
        if cell.shapes.contains_key(&dst) {
            return Err(LayoutError::LayerExists(dst));
        }
        let shapes = cell.shapes.get(&src).ok_or(LayoutError::LayerNotFound(src))?.clone();
        cell.shapes.insert(dst, shapes);
        self.shapes_changed(key, dst, true);
        Ok(())
    }

    pub fn move_cell_layer(&mut self, key: CellKey, src: Layer, dst: Layer) -> LayoutResult<()> {
        let cell = self.cell_mut(key)?;
        if cell.shapes.contains_key(&dst) {
            return Err(LayoutError::LayerExists(dst));
        }
        let shapes = cell.shapes.remove(&src).ok_or(LayoutError::LayerNotFound(src))?;
        cell.shapes.insert(dst, shapes);
        self.shapes_changed(key, src, true);
        self.shapes_changed(key, dst, true);
        Ok(())
    }

    pub fn remove_cell_layer(&mut self, key: CellKey, layer: Layer) -> LayoutResult<()> {
        self.cell_mut(key)?
            .shapes
            .remove(&layer)
            .ok_or(LayoutError::LayerNotFound(layer))?;
        self.shapes_changed(key, layer, true);
        Ok(())
    }

    /// Copy `src` to `dst` in every cell. Fails without changes if `dst` is in use.
    pub fn copy_layer(&mut self, src: Layer, dst: Layer) -> LayoutResult<()> {
        if !self.layer_in_use(src) {
            return Err(LayoutError::LayerNotFound(src));
        }
        if self.layer_in_use(dst) {
            return Err(LayoutError::LayerExists(dst));
        }
        for key in self.cells_with_layer(src) {
            self.copy_cell_layer(key, src, dst)?;
        }
        if let Some(name) = self.layer_names.get(src).map(str::to_string) {
            self.layer_names.set(dst, &name);
        }
        Ok(())
    }

    /// Rename `src` to `dst` in every cell. Fails without changes if `dst` is in use.
    pub fn move_layer(&mut self, src: Layer, dst: Layer) -> LayoutResult<()> {
        if !self.layer_in_use(src) {
            return Err(LayoutError::LayerNotFound(src));
        }
        if self.layer_in_use(dst) {
            return Err(LayoutError::LayerExists(dst));
        }
        for key in self.cells_with_layer(src) {
            self.move_cell_layer(key, src, dst)?;
        }
        self.layer_names.rename(src, dst);
        Ok(())
    }

    pub fn remove_layer(&mut self, layer: Layer) -> LayoutResult<()> {
        if !self.layer_in_use(layer) {
            return Err(LayoutError::LayerNotFound(layer));
        }
        for key in self.cells_with_layer(layer) {
            self.remove_cell_layer(key, layer)?;
        }
        self.layer_names.remove(layer);
        Ok(())
    }

    // ── Instance editing ─────────────────────────────────────────────

    /// Place `child` inside `parent`. Rejects placements that would make the
    /// hierarchy cyclic.
    pub fn insert_instance(&mut self, parent: CellKey, child: CellKey, placement: Placement) -> LayoutResult<Element> {
        self.cell_ref(parent)?;
        self.cell_ref(child)?;
        if parent == child || self.is_reachable(child, parent) {
            return Err(LayoutError::CyclicReference {
                parent: self.cell_ref(parent)?.name.clone(),
                child: self.cell_ref(child)?.name.clone(),
            });
        }
        let cell = self.cell_mut(parent)?;
        cell.instances.push(Instance::new(child, placement));
        let element = Element::instance(cell.instances.len() - 1);
        self.cell_mut(child)?.parents.insert(parent);
        self.instances_changed(parent);
        Ok(element)
    }

    fn is_reachable(&self, from: CellKey, to: CellKey) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(k) = stack.pop() {
            if k == to {
                return true;
            }
            if !seen.insert(k) {
                continue;
            }
            if let Some(cell) = self.cells.get(k) {
                stack.extend(cell.instances.iter().map(|i| i.cell));
            }
        }
        false
    }

    /// Delete instances by index. Nothing is removed if any index is out of range.
    pub fn delete_instances(&mut self, parent: CellKey, indices: &[usize]) -> LayoutResult<()> {
        let cell = self.cell_mut(parent)?;
        let len = cell.instances.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(LayoutError::IndexOutOfRange {
                kind: "instance",
                index,
                len,
            });
        }
        let doomed: BTreeSet<usize> = indices.iter().copied().collect();
        if doomed.is_empty() {
            return Ok(());
        }
        let mut touched = HashSet::new();
        let mut i = 0;
        cell.instances.retain(|inst| {
            let keep = !doomed.contains(&i);
            if !keep {
                touched.insert(inst.cell);
            }
            i += 1;
            keep
        });
        let remaining = cell.children();
        for child in touched.difference(&remaining) {
            if let Some(c) = self.cells.get_mut(*child) {
                c.parents.remove(&parent);
            }
        }
        self.instances_changed(parent);
        Ok(())
    }

    /// Delete every instance of `child` in `parent`; returns how many were removed.
    pub fn delete_instances_of(&mut self, parent: CellKey, child: CellKey) -> LayoutResult<usize> {
        let indices: Vec<usize> = self
            .cell_ref(parent)?
            .instances
            .iter()
            .enumerate()
            .filter(|(_, inst)| inst.cell == child)
            .map(|(i, _)| i)
            .collect();
        self.delete_instances(parent, &indices)?;
        Ok(indices.len())
    }

    pub fn clear_instances(&mut self, key: CellKey) -> LayoutResult<()> {
        let indices: Vec<usize> = (0..self.cell_ref(key)?.instances.len()).collect();
        self.delete_instances(key, &indices)
    }

    /// Remove all shapes and instances of the cell.
    pub fn clear(&mut self, key: CellKey) -> LayoutResult<()> {
        self.clear_instances(key)?;
        self.cell_mut(key)?.shapes.clear();
        self.set_dirty(key, DirtyFlag::ALL, None);
        Ok(())
    }

    // ── Whole-cell operations ────────────────────────────────────────

    /// Apply `trans` to every shape and instance placement of the cell.
    pub fn transform_cell(&mut self, key: CellKey, trans: &Trans) -> LayoutResult<()> {
        let cell = self.cell_mut(key)?;
        for shapes in cell.shapes.values_mut() {
            shapes.transform(trans);
        }
        for inst in &mut cell.instances {
            inst.placement.transform(trans);
        }
        self.set_dirty(key, DirtyFlag::SHAPES, None);
        Ok(())
    }

    /// Replace the instances of the cell by transformed copies of the shapes
    /// below them. With `delete_unused`, former children left without a parent
    /// are deleted along with their own unused descendants.
    pub fn flatten_cell(&mut self, key: CellKey, delete_unused: bool) -> LayoutResult<()> {
        let cell = self.cell_ref(key)?;
        let mut flat: BTreeMap<Layer, Shapes> = BTreeMap::new();
        for inst in &cell.instances {
            for i in 0..inst.placement.size() {
                self.collect_flat(inst.cell, &inst.placement.trans(i), &mut flat);
            }
        }
        let children = cell.children();
        let count = cell.instances.len();

        let cell = self.cell_mut(key)?;
        cell.instances.clear();
        for (layer, shapes) in flat {
            cell.shapes.entry(layer).or_default().merge(shapes);
        }
        for child in &children {
            if let Some(c) = self.cells.get_mut(*child) {
                c.parents.remove(&key);
            }
        }
        self.instances_changed(key);
        log::info!("flattened {} instances into cell", count);

        if delete_unused {
            for child in children {
                let unused = self.cells.get(child).is_some_and(Cell::is_root);
                if unused && self.top_cell != Some(child) {
                    self.delete_cell(child, DeleteMode::Deep)?;
                }
            }
        }
        Ok(())
    }

    pub fn flatten_top_cell(&mut self, delete_unused: bool) -> LayoutResult<()> {
        let top = self.require_top_cell()?;
        self.flatten_cell(top, delete_unused)
    }

    fn collect_flat(&self, key: CellKey, trans: &Trans, out: &mut BTreeMap<Layer, Shapes>) {
        let Some(cell) = self.cells.get(key) else {
            return;
        };
        for (layer, shapes) in &cell.shapes {
            let mut moved = shapes.clone();
            moved.transform(trans);
            out.entry(*layer).or_default().merge(moved);
        }
        for inst in &cell.instances {
            for i in 0..inst.placement.size() {
                self.collect_flat(inst.cell, &trans.compose(&inst.placement.trans(i)), out);
            }
        }
    }

    /// Group identical shapes and translation-only placements into repetitions.
    pub fn compress_cell(&mut self, key: CellKey, level: u32) -> LayoutResult<()> {
        let cell = self.cell_mut(key)?;
        for shapes in cell.shapes.values_mut() {
            shapes.compress(level);
        }
        compress_instances(&mut cell.instances, CompressAlgo::for_boxes(level));
        self.set_dirty(key, DirtyFlag::INDEX, None);
        Ok(())
    }

    /// Expand every shape repetition and repeated placement of the cell.
    pub fn decompress_cell(&mut self, key: CellKey) -> LayoutResult<()> {
        let cell = self.cell_mut(key)?;
        for shapes in cell.shapes.values_mut() {
            shapes.decompress();
        }
        let mut expanded = Vec::with_capacity(cell.instances.len());
        for inst in cell.instances.drain(..) {
            if inst.placement.is_repeated() {
                expanded.extend(
                    (0..inst.placement.size()).map(|i| Instance::new(inst.cell, Placement::single(inst.placement.trans(i)))),
                );
            } else {
                expanded.push(inst);
            }
        }
        cell.instances = expanded;
        self.set_dirty(key, DirtyFlag::INDEX, None);
        Ok(())
    }

    pub fn compress(&mut self, level: u32) -> LayoutResult<()> {
        let keys: Vec<CellKey> = self.cells.keys().collect();
        for key in keys {
            self.compress_cell(key, level)?;
        }
        Ok(())
    }

    pub fn decompress(&mut self) -> LayoutResult<()> {
        let keys: Vec<CellKey> = self.cells.keys().collect();
        for key in keys {
            self.decompress_cell(key)?;
        }
        Ok(())
    }

    /// Cells placed below the top cell (down to `level`) whose footprint on
    /// any of `layers` touches `region`. An empty layer list means all layers.
    pub fn cells_in_region(&self, region: &Rect, layers: &[Layer], level: u32) -> LayoutResult<Vec<CellKey>> {
        let top = self.require_top_cell()?;
        let layers: Vec<Layer> = if layers.is_empty() {
            self.layers_including_children(top).to_vec()
        } else {
            layers.to_vec()
        };
        let mut found = BTreeSet::new();
        if layers.iter().any(|&l| self.bounding_box(top, l).intersects(region)) {
            found.insert(top);
        }
        if level == 0 {
            return Ok(found.into_iter().collect());
        }
        for layer in layers {
            let option = ElementIteratorOption::new(top, layer)
                .with_region(*region)
                .with_max_level(level - 1)
                .with_element_type(QueryElementType::OnlyInstance);
            let mut it = ElementIterator::new(self, option);
            while let Some((element, _)) = it.current() {
                if let Some(inst) = self.cell(it.current_cell()).and_then(|c| c.instance(element)) {
                    found.insert(inst.cell);
                }
                it.move_next();
            }
        }
        Ok(found.into_iter().collect())
    }

    // ── Bulk rebuild ─────────────────────────────────────────────────

    /// Rebuild the caches selected by `flags` (`UPDATE_*`) for every cell,
    /// spreading the per-cell work over `option.thread_num` threads.
    pub fn update(&mut self, flags: u16, option: &UpdateOption) -> LayoutResult<()> {
        let mut sorted = 0;
        for cell in self.cells.values_mut() {
            for shapes in cell.shapes.values_mut() {
                if shapes.sort_repetitions() {
                    sorted += 1;
                }
            }
        }
        if sorted > 0 {
            log::debug!("sorted repetitions on {} layers", sorted);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(option.thread_num.max(1))
            .build()?;
        let keys: Vec<CellKey> = self.cells.keys().collect();
        let layout = &*self;
        pool.install(|| {
            keys.par_iter().for_each(|&key| {
                let layers = layout.layers_including_children(key);
                let wanted = layers.iter().copied().filter(|&l| option.wants_layer(l));
                if flags & UPDATE_BOUNDING_BOX != 0 {
                    for layer in wanted.clone() {
                        layout.bounding_box(key, layer);
                    }
                }
                if flags & UPDATE_SPATIAL_INDEX != 0 {
                    for layer in wanted {
                        layout.update_index(key, layer, option);
                    }
                }
                if flags & UPDATE_LAYER != 0 {
                    layout.max_level(key);
                }
            });
        });

        if flags & UPDATE_TOP_CELL != 0 {
            let roots = self.root_cells();
            match roots.as_slice() {
                [only] => self.top_cell = Some(*only),
                _ if self.top_cell.is_some_and(|t| roots.contains(&t)) => {}
                _ => log::warn!("cannot pick a top cell among {} root cells", roots.len()),
            }
        }
        log::info!("updated caches of {} cells (flags {:#06b})", keys.len(), flags);
        Ok(())
    }

    fn update_index(&self, key: CellKey, layer: Layer, option: &UpdateOption) {
        let Some(view) = CellLayerView::new(self, key, layer) else {
            return;
        };
        if view.cell.has_spatial_index(layer) {
            return;
        }
        let elements = view.elements();
        let index_option = self.index_option(key, layer, option.window_step);
        let bbox = self.bounding_box(key, layer);
        if elements.len() <= SHAPES_INDEX_THRESHOLD || SpatialIndex::grid_size(elements.len(), &bbox, &index_option) == (1, 1) {
            return;
        }
        let index = SpatialIndex::build(&view, &elements, &index_option);
        view.cell.cache_write().indexes.insert(layer, Arc::new(index));
    }
}

/// Group translation-only single placements per child into repeated ones.
fn compress_instances(instances: &mut Vec<Instance>, algo: CompressAlgo) {
    if algo == CompressAlgo::None {
        return;
    }
    let mut groups: BTreeMap<CellKey, Vec<Vector>> = BTreeMap::new();
    let mut kept = Vec::with_capacity(instances.len());
    for inst in instances.drain(..) {
        match inst.placement {
            Placement::SimpleSingle(t) => groups.entry(inst.cell).or_default().push(t.translation),
            _ => kept.push(inst),
        }
    }
    for (cell, offsets) in groups {
        let c = Compressor::new(offsets).compress(algo);
        kept.extend(
            c.leftovers
                .into_iter()
                .map(|v| Instance::new(cell, Placement::SimpleSingle(SimpleTrans::new(v)))),
        );
        kept.extend(
            c.repetitions
                .into_iter()
                .map(|(base, rep)| Instance::new(cell, Placement::SimpleRepeated(SimpleTrans::new(base), rep))),
        );
    }
    *instances = kept;
}

/// One cell on one layer seen as an element source: own shapes plus instances.
#[derive(Debug, Clone, Copy)]
pub struct CellLayerView<'a> {
    layout: &'a Layout,
    cell: &'a Cell,
    layer: Layer,
}

impl<'a> CellLayerView<'a> {
    pub fn new(layout: &'a Layout, key: CellKey, layer: Layer) -> Option<Self> {
        Some(Self {
            layout,
            cell: layout.cell(key)?,
            layer,
        })
    }

    pub fn cell(&self) -> &'a Cell {
        self.cell
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn shapes(&self) -> Option<&'a Shapes> {
        self.cell.shapes(self.layer)
    }

    /// Shapes with a box, then every instance.
    pub fn elements(&self) -> Vec<Element> {
        let mut elements: Vec<Element> = self.shapes().map(|s| s.elements().collect()).unwrap_or_default();
        elements.extend((0..self.cell.instances.len()).map(Element::instance));
        elements
    }

    /// Box of the instance's child on this layer, before placement.
    pub fn child_bbox(&self, inst: &Instance) -> Rect {
        self.layout.bounding_box(inst.cell, self.layer)
    }
}

impl ElementSource for CellLayerView<'_> {
    fn bounding_box(&self, element: Element) -> Rect {
        match self.cell.instance(element) {
            Some(inst) => inst.placement.bounding_box(&self.child_bbox(inst)),
            None => self.shapes().map_or(Rect::empty(), |s| s.element_bbox(element)),
        }
    }

    fn intersects(&self, element: Element, region: &Rect) -> bool {
        match self.cell.instance(element) {
            Some(inst) => inst.placement.touches(&self.child_bbox(inst), region),
            None => self.shapes().is_some_and(|s| s.element_intersects(element, region)),
        }
    }

    fn is_sparse(&self, element: Element) -> bool {
        match self.cell.instance(element) {
            Some(inst) => inst.placement.is_repeated(),
            None => element.is_repetition(),
        }
    }
}
