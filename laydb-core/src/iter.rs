//! Region-filtered iteration over one cell and over a whole hierarchy.
//!
//! [`CellElementIterator`] walks the shapes and instances a single cell holds
//! on one layer, switching to the cell's spatial index for large cells.
//! [`ElementIterator`] runs a depth-first walk from a root cell, expanding
//! repeated placements one transform at a time and pruning branches that
//! cannot contribute to the query.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cell::{CellKey, Instance};
use crate::element::{Element, ElementSource};
use crate::geometry::{Path, Point, Polygon, Rect, Vector};
use crate::layer::Layer;
use crate::layout::{CellLayerView, Layout};
use crate::options::{INSTANCES_INDEX_THRESHOLD, SHAPES_INDEX_THRESHOLD};
use crate::shape_repetition::ShapeRepetition;
use crate::shapes::{Shape, ShapeType};
use crate::spatial::{QueryElementType, SpatialIndex, SpatialIterator, SpatialQueryMode};
use crate::transform::Trans;

// ── Cell element iterator ────────────────────────────────────────────

enum Cursor<'a> {
    Shapes { ty: usize, pos: usize },
    Instances { pos: usize },
    Indexed {
        instances: bool,
        it: SpatialIterator<Arc<SpatialIndex>, CellLayerView<'a>>,
    },
    Done,
}

enum Step {
    Candidate(Element),
    ShapesDone,
    InstancesDone,
}

/// Elements of one cell on one layer: shapes by kind, then instances.
///
/// Shapes and instances without a box on the layer are skipped. With a
/// region, only elements touching it are returned; repetitions are matched
/// member-wise and repeated placements placement-wise.
pub struct CellElementIterator<'a> {
    layout: &'a Layout,
    key: CellKey,
    view: Option<CellLayerView<'a>>,
    region: Option<Rect>,
    kind: QueryElementType,
    mode: SpatialQueryMode,
    cursor: Cursor<'a>,
    current: Option<Element>,
}

impl<'a> CellElementIterator<'a> {
    pub fn new(
        layout: &'a Layout,
        key: CellKey,
        layer: Layer,
        region: Option<Rect>,
        kind: QueryElementType,
        mode: SpatialQueryMode,
    ) -> Self {
        let mut it = Self {
            layout,
            key,
            view: CellLayerView::new(layout, key, layer),
            region,
            kind,
            mode,
            cursor: Cursor::Done,
            current: None,
        };
        let bbox = layout.bounding_box(key, layer);
        if it.view.is_some() && !bbox.is_empty() {
            match region {
                Some(r) if !r.intersects(&bbox) => {}
                Some(r) if r.contains(&bbox) => {
                    it.region = None;
                    it.start_shapes();
                }
                _ => it.start_shapes(),
            }
        }
        it.current = it.fetch();
        it
    }

    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }

    pub fn current(&self) -> Option<Element> {
        self.current
    }

    fn indexed(&self, count: usize, threshold: usize, kind: QueryElementType) -> Option<Cursor<'a>> {
        let region = self.region?;
        let view = self.view?;
        // Small cells are scanned; simple mode reuses an index that already exists.
        let cached = self.mode == SpatialQueryMode::Simple && self.layout.has_spatial_index(self.key, view.layer());
        if count <= threshold && !cached {
            return None;
        }
        let index = self.layout.spatial_index(self.key, view.layer())?;
        Some(Cursor::Indexed {
            instances: kind == QueryElementType::OnlyInstance,
            it: SpatialIterator::new(index, view, region, self.mode, kind),
        })
    }

    fn start_shapes(&mut self) {
        if !self.kind.wants_shapes() {
            self.start_instances();
            return;
        }
        let count = self.view.and_then(|v| v.shapes()).map_or(0, |s| s.len(true));
        self.cursor = self
            .indexed(count, SHAPES_INDEX_THRESHOLD, QueryElementType::OnlyShape)
            .unwrap_or(Cursor::Shapes { ty: 0, pos: 0 });
    }

    fn start_instances(&mut self) {
        if !self.kind.wants_instances() {
            self.cursor = Cursor::Done;
            return;
        }
        let count = self.view.map_or(0, |v| v.cell().instances().len());
        self.cursor = self
            .indexed(count, INSTANCES_INDEX_THRESHOLD, QueryElementType::OnlyInstance)
            .unwrap_or(Cursor::Instances { pos: 0 });
    }

    fn accept(&self, element: Element) -> bool {
        let Some(view) = self.view else {
            return false;
        };
        match self.region {
            Some(r) => view.intersects(element, &r),
            None => !view.bounding_box(element).is_empty(),
        }
    }

    fn fetch(&mut self) -> Option<Element> {
        let view = self.view?;
        loop {
            let step = match &mut self.cursor {
                Cursor::Done => return None,
                Cursor::Indexed { instances, it } => match it.next() {
                    Some(e) => return Some(e),
                    None if *instances => Step::InstancesDone,
                    None => Step::ShapesDone,
                },
                Cursor::Shapes { ty, pos } => match ShapeType::ALL.get(*ty) {
                    None => Step::ShapesDone,
                    Some(&t) if *pos >= view.shapes().map_or(0, |s| s.len_of(t)) => {
                        *ty += 1;
                        *pos = 0;
                        continue;
                    }
                    Some(&t) => {
                        *pos += 1;
                        Step::Candidate(Element::shape(t, *pos - 1))
                    }
                },
                Cursor::Instances { pos } => {
                    if *pos >= view.cell().instances().len() {
                        Step::InstancesDone
                    } else {
                        *pos += 1;
                        Step::Candidate(Element::instance(*pos - 1))
                    }
                }
            };
            match step {
                Step::Candidate(e) if self.accept(e) => return Some(e),
                Step::Candidate(_) => {}
                Step::ShapesDone => self.start_instances(),
                Step::InstancesDone => self.cursor = Cursor::Done,
            }
        }
    }
}

impl Iterator for CellElementIterator<'_> {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        let e = self.current?;
        self.current = self.fetch();
        Some(e)
    }
}

// ── Hierarchical iterator ────────────────────────────────────────────

/// Parameters of an [`ElementIterator`] walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementIteratorOption {
    pub cell: CellKey,
    pub layer: Layer,
    /// Query region in the root cell's coordinates.
    pub region: Option<Rect>,
    /// Deepest level visited; the root is level 0.
    pub max_level: u32,
    pub element_type: QueryElementType,
    pub mode: SpatialQueryMode,
    /// Expand shape repetitions member by member (shape-only walks).
    pub need_polygon_data: bool,
}

impl ElementIteratorOption {
    pub fn new(cell: CellKey, layer: Layer) -> Self {
        Self {
            cell,
            layer,
            region: None,
            max_level: u32::MAX,
            element_type: QueryElementType::ShapeAndInstance,
            mode: SpatialQueryMode::Accurate,
            need_polygon_data: false,
        }
    }

    pub fn with_region(mut self, region: Rect) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_max_level(mut self, max_level: u32) -> Self {
        self.max_level = max_level;
        self
    }

    pub fn with_element_type(mut self, element_type: QueryElementType) -> Self {
        self.element_type = element_type;
        self
    }

    pub fn with_mode(mut self, mode: SpatialQueryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_polygon_data(mut self, need_polygon_data: bool) -> Self {
        self.need_polygon_data = need_polygon_data;
        self
    }

    fn polygon_mode(&self) -> bool {
        self.need_polygon_data && self.element_type == QueryElementType::OnlyShape
    }
}

/// A closed outline in root coordinates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolygonData {
    pub points: Vec<Point>,
}

impl PolygonData {
    pub fn bbox(&self) -> Rect {
        Rect::from_points(&self.points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl From<Polygon> for PolygonData {
    fn from(polygon: Polygon) -> Self {
        Self {
            points: polygon.vertices,
        }
    }
}

impl From<Rect> for PolygonData {
    fn from(rect: Rect) -> Self {
        Polygon::from(rect).into()
    }
}

enum Offsets {
    All(std::ops::Range<usize>),
    Touching(std::vec::IntoIter<Vector>),
}

/// Placements of one instance still to be visited.
struct PlacementCursor<'a> {
    instance: &'a Instance,
    offsets: Offsets,
}

impl PlacementCursor<'_> {
    fn next_trans(&mut self) -> Option<Trans> {
        let placement = &self.instance.placement;
        match &mut self.offsets {
            Offsets::All(range) => range.next().map(|i| placement.trans(i)),
            Offsets::Touching(it) => it.next().map(|v| placement.base_trans().offset_by(v)),
        }
    }
}

struct Frame<'a> {
    cell: CellKey,
    level: u32,
    /// Composed transform from this cell to the root.
    trans: Trans,
    /// Query region in this cell's coordinates.
    region: Option<Rect>,
    elements: CellElementIterator<'a>,
    /// Instances to descend into; `None` at the deepest level.
    instances: Option<CellElementIterator<'a>>,
    placement: Option<PlacementCursor<'a>>,
}

impl<'a> Frame<'a> {
    fn new(layout: &'a Layout, option: &ElementIteratorOption, cell: CellKey, level: u32, trans: Trans) -> Self {
        let region = option.region.map(|r| {
            if level == 0 {
                r
            } else {
                trans.inverted().apply_rect(&r)
            }
        });
        let elements = CellElementIterator::new(layout, cell, option.layer, region, option.element_type, option.mode);
        let instances = (level < option.max_level).then(|| {
            CellElementIterator::new(
                layout,
                cell,
                option.layer,
                region,
                QueryElementType::OnlyInstance,
                option.mode,
            )
        });
        Self {
            cell,
            level,
            trans,
            region,
            elements,
            instances,
            placement: None,
        }
    }

    /// Nothing to yield here and nothing to descend into.
    fn is_empty(&self) -> bool {
        self.elements.is_end() && self.instances.as_ref().map_or(true, CellElementIterator::is_end)
    }
}

/// Pre-order walk over the elements of a cell hierarchy on one layer.
///
/// Each yielded element comes with the transform from its owning cell to the
/// root. Typical use:
///
/// ```ignore
/// let mut it = ElementIterator::new(&layout, option);
/// while let Some((element, trans)) = it.current() {
///     // ...
///     it.move_next();
/// }
/// ```
pub struct ElementIterator<'a> {
    layout: &'a Layout,
    option: ElementIteratorOption,
    stack: Vec<Frame<'a>>,
    current: Option<Element>,
    /// Member of the current repetition in polygon mode.
    member: usize,
}

impl<'a> ElementIterator<'a> {
    pub fn new(layout: &'a Layout, option: ElementIteratorOption) -> Self {
        let mut it = Self {
            layout,
            option,
            stack: Vec::new(),
            current: None,
            member: 0,
        };
        it.begin();
        it
    }

    pub fn option(&self) -> &ElementIteratorOption {
        &self.option
    }

    /// Restart from the root cell.
    pub fn begin(&mut self) {
        self.stack.clear();
        self.current = None;
        self.member = 0;
        if self.layout.cell(self.option.cell).is_none() {
            return;
        }
        let root = Frame::new(self.layout, &self.option, self.option.cell, 0, Trans::identity());
        if !root.is_empty() {
            self.stack.push(root);
        }
        self.advance();
    }

    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }

    /// Current element and the transform from its cell to the root.
    pub fn current(&self) -> Option<(Element, Trans)> {
        Some((self.current?, self.current_trans()))
    }

    pub fn current_trans(&self) -> Trans {
        self.stack.last().map_or_else(Trans::identity, |f| f.trans)
    }

    pub fn current_level(&self) -> u32 {
        self.stack.last().map_or(0, |f| f.level)
    }

    /// Cell owning the current element.
    pub fn current_cell(&self) -> CellKey {
        self.stack.last().map_or(self.option.cell, |f| f.cell)
    }

    /// Member index of the current repetition. Only advances in polygon mode.
    pub fn current_member(&self) -> usize {
        self.member
    }

    /// Outline of the current shape in root coordinates. Repetitions yield
    /// their current member; instances yield nothing.
    pub fn current_polygon_data(&self) -> Option<PolygonData> {
        let (element, trans) = self.current()?;
        let shapes = self.layout.shapes(self.current_cell(), self.option.layer)?;
        let polygon = match element {
            Element::Box(_) => Polygon::from(*shapes.resolve::<Rect>(element)?),
            Element::Polygon(_) => shapes.resolve::<Polygon>(element)?.clone(),
            Element::Path(_) => shapes.resolve::<Path>(element)?.to_polygon(),
            Element::BoxRepetition(_) => Polygon::from(shapes.resolve::<ShapeRepetition<Rect>>(element)?.shape_at(self.member)),
            Element::PolygonRepetition(_) => shapes.resolve::<ShapeRepetition<Polygon>>(element)?.shape_at(self.member),
            Element::Instance(_) | Element::Invalid => return None,
        };
        Some(Shape::transformed(&polygon, &trans).into())
    }

    pub fn move_next(&mut self) {
        if self.option.polygon_mode() {
            if let Some(e) = self.current.filter(Element::is_repetition) {
                if let Some(next) = self.touching_member(e, self.member + 1) {
                    self.member = next;
                    return;
                }
            }
        }
        self.advance();
    }

    /// First member at or after `start` of repetition `element` touching the
    /// region of the current frame.
    fn touching_member(&self, element: Element, start: usize) -> Option<usize> {
        let frame = self.stack.last()?;
        let shapes = self.layout.shapes(frame.cell, self.option.layer)?;
        let (size, found) = match element {
            Element::BoxRepetition(_) => {
                let rep = shapes.resolve::<ShapeRepetition<Rect>>(element)?;
                (rep.size(), frame.region.map(|r| rep.find_intersected(&r, start)))
            }
            Element::PolygonRepetition(_) => {
                let rep = shapes.resolve::<ShapeRepetition<Polygon>>(element)?;
                (rep.size(), frame.region.map(|r| rep.find_intersected(&r, start)))
            }
            _ => return None,
        };
        let index = found.unwrap_or(start);
        (index < size).then_some(index)
    }

    fn advance(&mut self) {
        loop {
            let Some(top) = self.stack.last_mut() else {
                self.current = None;
                return;
            };
            if let Some(e) = top.elements.next() {
                self.member = 0;
                if self.option.polygon_mode() && e.is_repetition() {
                    match self.touching_member(e, 0) {
                        Some(first) => self.member = first,
                        None => continue,
                    }
                }
                self.current = Some(e);
                return;
            }
            match self.next_child() {
                Some(frame) => self.stack.push(frame),
                None => {
                    self.stack.pop();
                }
            }
        }
    }

    /// Next non-empty child frame of the top frame, or `None` once its
    /// instances are exhausted.
    fn next_child(&mut self) -> Option<Frame<'a>> {
        let layout = self.layout;
        let option = self.option;
        let top = self.stack.last_mut()?;
        loop {
            if let Some(cursor) = &mut top.placement {
                if let Some(local) = cursor.next_trans() {
                    let child = cursor.instance.cell;
                    let frame = Frame::new(layout, &option, child, top.level + 1, top.trans.compose(&local));
                    if !frame.is_empty() {
                        return Some(frame);
                    }
                    continue;
                }
                top.placement = None;
            }

            let element = top.instances.as_mut()?.next()?;
            let Some(instance) = layout.cell(top.cell).and_then(|c| c.instance(element)) else {
                continue;
            };
            if !layout.has_layer_including_children(instance.cell, option.layer) {
                continue;
            }
            if option.element_type == QueryElementType::OnlyInstance
                && !layout.cell(instance.cell).is_some_and(|c| c.has_instances())
            {
                continue;
            }
            let offsets = match top.region {
                Some(r) if instance.placement.is_repeated() => {
                    let child_bbox = layout.bounding_box(instance.cell, option.layer);
                    Offsets::Touching(instance.placement.offsets_touching(&child_bbox, &r).into_iter())
                }
                _ => Offsets::All(0..instance.placement.size()),
            };
            top.placement = Some(PlacementCursor { instance, offsets });
        }
    }
}

impl Iterator for ElementIterator<'_> {
    type Item = (Element, Trans);

    fn next(&mut self) -> Option<(Element, Trans)> {
        let item = self.current()?;
        self.move_next();
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DPoint;
    use crate::options::LayoutOptions;
    use crate::placement::Placement;
    use crate::repetition::ArrayInfo;
    use crate::transform::{FullTrans, Rotation};

    const L1: Layer = Layer::new(1, 0);

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn key(r: &Rect) -> (i32, i32, i32, i32) {
        (r.left(), r.bottom(), r.right(), r.top())
    }

    /// TOP places MID at (1000, 1000); MID places LEAF rotated by 90 degrees at (100, 0).
    fn chain() -> (Layout, [CellKey; 3]) {
        let mut layout = Layout::new("chain");
        let top = layout.create_cell("TOP").unwrap();
        let mid = layout.create_cell("MID").unwrap();
        let leaf = layout.create_cell("LEAF").unwrap();
        layout.insert_shape(leaf, L1, Rect::new(0, 0, 10, 5)).unwrap();
        let rot = Trans::Full(FullTrans::new(DPoint::new(100.0, 0.0), Rotation::R90, 1.0));
        layout.insert_instance(mid, leaf, Placement::single(rot)).unwrap();
        layout.insert_instance(top, mid, Placement::at(1000, 1000)).unwrap();
        (layout, [top, mid, leaf])
    }

    #[test]
    fn test_cell_iterator_filters_by_region() {
        init();
        let mut layout = Layout::new("cell");
        let top = layout.create_cell("TOP").unwrap();
        let child = layout.create_cell("CHILD").unwrap();
        layout.insert_shape(child, L1, Rect::new(0, 0, 2, 2)).unwrap();
        let near = layout.insert_shape(top, L1, Rect::new(0, 0, 5, 5)).unwrap();
        layout.insert_shape(top, L1, Rect::new(50, 50, 60, 60)).unwrap();
        let rep = layout
            .insert_shape(
                top,
                L1,
                ShapeRepetition::new(Rect::new(0, 20, 2, 22), ArrayInfo::new(1, 4, Point::zero(), Point::new(10, 0)).into()),
            )
            .unwrap();
        let inst = layout
            .insert_instance(top, child, Placement::repeated(Trans::translate(0, 40), ArrayInfo::new(1, 3, Point::zero(), Point::new(20, 0)).into()))
            .unwrap();

        let collect = |region: Option<Rect>, kind| -> Vec<Element> {
            CellElementIterator::new(&layout, top, L1, region, kind, SpatialQueryMode::Accurate).collect()
        };
        assert_eq!(collect(None, QueryElementType::ShapeAndInstance).len(), 4);
        assert_eq!(collect(Some(Rect::new(3, 3, 4, 4)), QueryElementType::ShapeAndInstance), vec![near]);
        // Between repetition members and between placements.
        assert!(collect(Some(Rect::new(4, 19, 8, 45)), QueryElementType::ShapeAndInstance).is_empty());
        assert_eq!(collect(Some(Rect::new(29, 21, 31, 41)), QueryElementType::ShapeAndInstance), vec![rep]);
        assert_eq!(collect(Some(Rect::new(40, 41, 40, 41)), QueryElementType::OnlyInstance), vec![inst]);
        assert!(collect(Some(Rect::new(-100, -100, -90, -90)), QueryElementType::ShapeAndInstance).is_empty());
    }

    #[test]
    fn test_cell_iterator_with_index_matches_scan() {
        init();
        let mut layout = Layout::new("many");
        let top = layout.create_cell("TOP").unwrap();
        for i in 0..30 {
            for j in 0..10 {
                layout.insert_shape(top, L1, Rect::new(i * 10, j * 10, i * 10 + 6, j * 10 + 6)).unwrap();
            }
        }
        let region = Rect::new(33, 12, 71, 48);
        let got: Vec<Element> =
            CellElementIterator::new(&layout, top, L1, Some(region), QueryElementType::OnlyShape, SpatialQueryMode::Accurate).collect();
        assert!(layout.has_spatial_index(top, L1));
        let shapes = layout.shapes(top, L1).unwrap();
        let mut expected: Vec<Element> = shapes.elements().filter(|&e| shapes.element_bbox(e).intersects(&region)).collect();
        let mut got = got;
        got.sort();
        expected.sort();
        assert_eq!(got, expected);
        assert_eq!(got.len(), 5 * 4);
    }

    #[test]
    fn test_indexed_instances_match_scan_between_placements() {
        init();
        let options = LayoutOptions {
            window_step: 10,
            ..Default::default()
        };
        let mut layout = Layout::with_options("gaps", options);
        let top = layout.create_cell("TOP").unwrap();
        let child = layout.create_cell("CHILD").unwrap();
        layout.insert_shape(child, L1, Rect::new(0, 0, 10, 10)).unwrap();
        let pair = ArrayInfo::new(1, 2, Point::zero(), Point::new(1000, 0));
        let array = layout
            .insert_instance(top, child, Placement::repeated(Trans::identity(), pair.into()))
            .unwrap();
        for i in 0..150 {
            layout.insert_instance(top, child, Placement::at(i * 20, 500)).unwrap();
        }

        let view = CellLayerView::new(&layout, top, L1).unwrap();
        for region in [
            Rect::new(402, 2, 405, 5),
            Rect::new(1002, 2, 1005, 5),
            Rect::new(0, 2, 3000, 5),
            Rect::new(35, 495, 85, 505),
        ] {
            let mut got: Vec<Element> =
                CellElementIterator::new(&layout, top, L1, Some(region), QueryElementType::OnlyInstance, SpatialQueryMode::Accurate)
                    .collect();
            got.sort();
            let scan: Vec<Element> = (0..layout.cell(top).unwrap().instances().len())
                .map(Element::instance)
                .filter(|&e| view.intersects(e, &region))
                .collect();
            assert_eq!(got, scan, "region {region:?}");
        }
        assert!(layout.has_spatial_index(top, L1));

        let gap: Vec<Element> = CellElementIterator::new(
            &layout,
            top,
            L1,
            Some(Rect::new(402, 2, 405, 5)),
            QueryElementType::OnlyInstance,
            SpatialQueryMode::Accurate,
        )
        .collect();
        assert!(gap.is_empty());
        let hit: Vec<Element> = CellElementIterator::new(
            &layout,
            top,
            L1,
            Some(Rect::new(1002, 2, 1005, 5)),
            QueryElementType::OnlyInstance,
            SpatialQueryMode::Accurate,
        )
        .collect();
        assert_eq!(hit, vec![array]);
    }

    #[test]
    fn test_simple_mode_scans_small_cells() {
        let (layout, [top, mid, _]) = chain();
        // Regions cross each cell's box without covering it.
        for (key, region) in [(top, Rect::new(0, 0, 1097, 1005)), (mid, Rect::new(0, 0, 97, 5))] {
            let n = CellElementIterator::new(&layout, key, L1, Some(region), QueryElementType::ShapeAndInstance, SpatialQueryMode::Simple).count();
            assert_eq!(n, 1);
            assert!(!layout.has_spatial_index(key, L1));
        }
    }

    #[test]
    fn test_hierarchy_composes_transforms() {
        init();
        let (layout, [top, mid, leaf]) = chain();
        let mut it = ElementIterator::new(&layout, ElementIteratorOption::new(top, L1));
        let mut seen = Vec::new();
        while let Some((element, trans)) = it.current() {
            seen.push((element, it.current_level(), it.current_cell()));
            if element == Element::Box(0) {
                assert_eq!(trans.apply_rect(&Rect::new(0, 0, 10, 5)), Rect::new(1095, 1000, 1100, 1010));
                let data = it.current_polygon_data().unwrap();
                assert_eq!(data.bbox(), Rect::new(1095, 1000, 1100, 1010));
                assert_eq!(data.len(), 4);
            }
            it.move_next();
        }
        assert_eq!(
            seen,
            vec![
                (Element::Instance(0), 0, top),
                (Element::Instance(0), 1, mid),
                (Element::Box(0), 2, leaf),
            ]
        );

        it.begin();
        assert_eq!(it.count(), 3);
    }

    #[test]
    fn test_max_level_limits_depth() {
        let (layout, [top, ..]) = chain();
        let levels = |max_level| -> Vec<u32> {
            let mut it = ElementIterator::new(&layout, ElementIteratorOption::new(top, L1).with_max_level(max_level));
            let mut out = Vec::new();
            while !it.is_end() {
                out.push(it.current_level());
                it.move_next();
            }
            out
        };
        assert_eq!(levels(0), vec![0]);
        assert_eq!(levels(1), vec![0, 1]);
        assert_eq!(levels(5), vec![0, 1, 2]);
    }

    #[test]
    fn test_region_selects_repeated_placements() {
        init();
        let mut layout = Layout::new("array");
        let top = layout.create_cell("TOP").unwrap();
        let c = layout.create_cell("C").unwrap();
        layout.insert_shape(c, L1, Rect::new(0, 0, 4, 4)).unwrap();
        let rep = ArrayInfo::new(10, 10, Point::new(0, 10), Point::new(10, 0));
        layout.insert_instance(top, c, Placement::repeated(Trans::identity(), rep.into())).unwrap();

        let option = ElementIteratorOption::new(top, L1)
            .with_region(Rect::new(12, 12, 35, 15))
            .with_element_type(QueryElementType::OnlyShape);
        let mut offsets: Vec<Point> = ElementIterator::new(&layout, option)
            .map(|(e, t)| {
                assert_eq!(e, Element::Box(0));
                t.translation()
            })
            .collect();
        offsets.sort();
        assert_eq!(offsets, vec![Point::new(10, 10), Point::new(20, 10), Point::new(30, 10)]);

        let all = ElementIterator::new(&layout, ElementIteratorOption::new(top, L1).with_element_type(QueryElementType::OnlyShape));
        assert_eq!(all.count(), 100);
    }

    #[test]
    fn test_polygon_data_expands_members() {
        let mut layout = Layout::new("members");
        let top = layout.create_cell("TOP").unwrap();
        let rep = ShapeRepetition::new(Rect::new(0, 0, 2, 2), ArrayInfo::new(1, 5, Point::zero(), Point::new(10, 0)).into());
        layout.insert_shape(top, L1, rep).unwrap();
        layout.insert_shape(top, L1, Rect::new(0, 100, 5, 105)).unwrap();

        let option = ElementIteratorOption::new(top, L1)
            .with_region(Rect::new(9, 0, 21, 1))
            .with_element_type(QueryElementType::OnlyShape);
        let mut it = ElementIterator::new(&layout, option.with_polygon_data(true));
        let mut boxes = Vec::new();
        while !it.is_end() {
            boxes.push(it.current_polygon_data().unwrap().bbox());
            it.move_next();
        }
        assert_eq!(boxes, vec![Rect::new(10, 0, 12, 2), Rect::new(20, 0, 22, 2)]);

        // Without polygon data the repetition is reported once.
        assert_eq!(ElementIterator::new(&layout, option).count(), 1);
    }

    #[test]
    fn test_only_instance_skips_leaf_children() {
        let (layout, [top, mid, _]) = chain();
        let option = ElementIteratorOption::new(top, L1).with_element_type(QueryElementType::OnlyInstance);
        let cells: Vec<CellKey> = {
            let mut it = ElementIterator::new(&layout, option);
            let mut out = Vec::new();
            while !it.is_end() {
                out.push(it.current_cell());
                it.move_next();
            }
            out
        };
        assert_eq!(cells, vec![top, mid]);
        assert!(it_is_empty(&layout, ElementIteratorOption::new(top, Layer::new(9, 9))));
    }

    fn it_is_empty(layout: &Layout, option: ElementIteratorOption) -> bool {
        ElementIterator::new(layout, option).is_end()
    }

    #[test]
    fn test_polygon_walk_matches_flatten() {
        init();
        let build = || {
            let mut layout = Layout::new("flat");
            let top = layout.create_cell("TOP").unwrap();
            let a = layout.create_cell("A").unwrap();
            let b = layout.create_cell("B").unwrap();
            layout.insert_shape(b, L1, Rect::new(0, 0, 3, 1)).unwrap();
            layout
                .insert_shape(b, L1, ShapeRepetition::new(Rect::new(0, 5, 1, 6), ArrayInfo::new(2, 2, Point::new(0, 4), Point::new(3, 0)).into()))
                .unwrap();
            let mirror = Trans::Full(FullTrans::new(DPoint::new(7.0, 3.0), Rotation::R180, -1.0));
            layout.insert_instance(a, b, Placement::single(mirror)).unwrap();
            layout.insert_shape(a, L1, Rect::new(-2, -2, 0, 0)).unwrap();
            layout
                .insert_instance(top, a, Placement::repeated(Trans::translate(100, 0), ArrayInfo::new(2, 3, Point::new(0, 50), Point::new(40, 0)).into()))
                .unwrap();
            layout.insert_instance(top, b, Placement::at(-30, -30)).unwrap();
            (layout, top)
        };

        let (layout, top) = build();
        let option = ElementIteratorOption::new(top, L1)
            .with_element_type(QueryElementType::OnlyShape)
            .with_polygon_data(true);
        let mut it = ElementIterator::new(&layout, option);
        let mut walked = Vec::new();
        while !it.is_end() {
            walked.push(key(&it.current_polygon_data().unwrap().bbox()));
            it.move_next();
        }
        assert_eq!(walked.len(), layout.cell_polygon_count(top, L1));

        let (mut flat, top) = build();
        flat.flatten_cell(top, false).unwrap();
        flat.decompress_cell(top).unwrap();
        let mut flattened: Vec<_> = flat.shapes(top, L1).unwrap().boxes().iter().map(key).collect();
        walked.sort();
        flattened.sort();
        assert_eq!(walked, flattened);
    }
}
