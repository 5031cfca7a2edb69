//! Uniform-grid spatial index over the elements of one cell on one layer.
//!
//! Each grid node keeps its shapes and instances in two separate
//! [`TripleRange`]s ordered as: elements whose box covers the node, elements
//! crossing the node boundary, elements inside the node. Queries emit the first
//! segment without testing and only check the rest against the query region.

use std::collections::HashSet;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementSource};
use crate::geometry::{Point, Rect};
use crate::options::{SpatialIndexOption, GRID_ROWS_MAX, GRID_ROWS_MIN, NODE_CAPACITY};

/// How strictly a region query filters its results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpatialQueryMode {
    /// Only elements touching the region.
    #[default]
    Accurate,
    /// Everything registered in the grid nodes overlapping the region.
    Simple,
}

/// Which element kinds a query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryElementType {
    OnlyShape,
    OnlyInstance,
    #[default]
    ShapeAndInstance,
}

impl QueryElementType {
    pub fn wants_shapes(self) -> bool {
        self != QueryElementType::OnlyInstance
    }

    pub fn wants_instances(self) -> bool {
        self != QueryElementType::OnlyShape
    }
}

/// Elements of one grid node, partitioned into three contiguous segments.
///
/// `[0, intersect_offset)` cover the node, `[intersect_offset, inside_offset)`
/// cross its boundary and `[inside_offset, len)` lie inside it.
#[derive(Debug, Clone, Default)]
pub struct TripleRange {
    elements: Vec<Element>,
    intersect_offset: usize,
    inside_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placing {
    Covers,
    Crosses,
    Inside,
}

impl TripleRange {
    fn insert(&mut self, e: Element, placing: Placing) {
        self.elements.push(e);
        let last = self.elements.len() - 1;
        match placing {
            Placing::Inside => {}
            Placing::Crosses => {
                self.elements.swap(last, self.inside_offset);
                self.inside_offset += 1;
            }
            Placing::Covers => {
                self.elements.swap(last, self.inside_offset);
                self.elements.swap(self.inside_offset, self.intersect_offset);
                self.intersect_offset += 1;
                self.inside_offset += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn covering(&self) -> &[Element] {
        &self.elements[..self.intersect_offset]
    }

    pub fn crossing(&self) -> &[Element] {
        &self.elements[self.intersect_offset..self.inside_offset]
    }

    pub fn inside(&self) -> &[Element] {
        &self.elements[self.inside_offset..]
    }
}

#[derive(Debug, Clone, Default)]
struct GridNode {
    shapes: TripleRange,
    instances: TripleRange,
}

impl GridNode {
    fn range(&self, instances: bool) -> &TripleRange {
        if instances {
            &self.instances
        } else {
            &self.shapes
        }
    }
}

fn clamp_coord(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

fn ceil_div(n: i64, d: i64) -> i64 {
    -(-n).div_euclid(d)
}

/// Immutable grid index. Rebuild it when the underlying data changes.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    origin: (i64, i64),
    step: (i64, i64),
    rows: u32,
    cols: u32,
    /// Union of the grid area and every indexed element.
    bounds: Rect,
    nodes: Vec<GridNode>,
    shape_count: usize,
    instance_count: usize,
}

impl SpatialIndex {
    /// Grid rows and columns for `count` elements spread over `area`.
    pub fn grid_size(count: usize, area: &Rect, option: &SpatialIndexOption) -> (u32, u32) {
        if option.window_step == 0 {
            let n = if count < NODE_CAPACITY {
                1
            } else {
                ((count as f64 / NODE_CAPACITY as f64).sqrt().ceil() as u32).clamp(GRID_ROWS_MIN, GRID_ROWS_MAX)
            };
            return (n, n);
        }
        let step = option.window_step as i64;
        let rows = ceil_div(area.height(), step).max(1);
        let cols = ceil_div(area.width(), step).max(1);
        (rows.min(u32::MAX as i64) as u32, cols.min(u32::MAX as i64) as u32)
    }

    /// Index `elements`, resolving their geometry through `source`.
    /// Elements with an empty box are skipped.
    pub fn build<S: ElementSource + ?Sized>(source: &S, elements: &[Element], option: &SpatialIndexOption) -> Self {
        let boxed: Vec<(Element, Rect)> = elements
            .iter()
            .map(|&e| (e, source.bounding_box(e)))
            .filter(|(_, b)| !b.is_empty())
            .collect();
        let mut bounds = option.region;
        for (_, b) in &boxed {
            bounds = bounds.union(b);
        }

        let (rows, cols) = Self::grid_size(boxed.len(), &bounds, option);
        let step = if option.window_step > 0 {
            (option.window_step as i64, option.window_step as i64)
        } else {
            (
                ceil_div(bounds.width(), cols as i64).max(1),
                ceil_div(bounds.height(), rows as i64).max(1),
            )
        };
        let mut index = SpatialIndex {
            origin: (bounds.left() as i64, bounds.bottom() as i64),
            step,
            rows,
            cols,
            bounds,
            nodes: vec![GridNode::default(); rows as usize * cols as usize],
            shape_count: 0,
            instance_count: 0,
        };

        for (e, b) in boxed {
            let sparse = source.is_sparse(e);
            let (c0, c1) = (index.col_of(b.left()), index.col_of(b.right()));
            let (r0, r1) = (index.row_of(b.bottom()), index.row_of(b.top()));
            for r in r0..=r1 {
                for c in c0..=c1 {
                    let node_box = index.node_box(r, c);
                    if sparse && !source.intersects(e, &node_box) {
                        continue;
                    }
                    let placing = if !sparse && b.contains(&node_box) {
                        Placing::Covers
                    } else if node_box.contains(&b) {
                        Placing::Inside
                    } else {
                        Placing::Crosses
                    };
                    let node = &mut index.nodes[(r * cols + c) as usize];
                    if e.is_instance() {
                        node.instances.insert(e, placing);
                    } else {
                        node.shapes.insert(e, placing);
                    }
                }
            }
            if e.is_instance() {
                index.instance_count += 1;
            } else {
                index.shape_count += 1;
            }
        }
        log::debug!(
            "built {}x{} spatial index over {} shapes and {} instances",
            rows,
            cols,
            index.shape_count,
            index.instance_count
        );
        index
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn shape_count(&self) -> usize {
        self.shape_count
    }

    pub fn instance_count(&self) -> usize {
        self.instance_count
    }

    fn col_of(&self, x: i32) -> u32 {
        ((x as i64 - self.origin.0).div_euclid(self.step.0)).clamp(0, self.cols as i64 - 1) as u32
    }

    fn row_of(&self, y: i32) -> u32 {
        ((y as i64 - self.origin.1).div_euclid(self.step.1)).clamp(0, self.rows as i64 - 1) as u32
    }

    /// Last column overlapped by a region ending at `x`, not counting a node it only touches.
    fn col_before(&self, x: i32) -> u32 {
        ((x as i64 - self.origin.0 - 1).div_euclid(self.step.0)).clamp(0, self.cols as i64 - 1) as u32
    }

    fn row_before(&self, y: i32) -> u32 {
        ((y as i64 - self.origin.1 - 1).div_euclid(self.step.1)).clamp(0, self.rows as i64 - 1) as u32
    }

    fn node_box(&self, row: u32, col: u32) -> Rect {
        let left = self.origin.0 + col as i64 * self.step.0;
        let bottom = self.origin.1 + row as i64 * self.step.1;
        Rect {
            bottom_left: Point::new(clamp_coord(left), clamp_coord(bottom)),
            top_right: Point::new(clamp_coord(left + self.step.0), clamp_coord(bottom + self.step.1)),
        }
    }

    /// Collect the query result. See [`SpatialIterator`].
    pub fn query<S: ElementSource>(
        &self,
        source: S,
        region: &Rect,
        mode: SpatialQueryMode,
        kind: QueryElementType,
    ) -> Vec<Element> {
        SpatialIterator::new(self, source, *region, mode, kind).collect()
    }
}

/// Lazy, deduplicated region query over a [`SpatialIndex`].
///
/// Holds the index through any pointer type so it can own an `Arc` snapshot.
pub struct SpatialIterator<R: Deref<Target = SpatialIndex>, S: ElementSource> {
    index: R,
    source: S,
    region: Rect,
    mode: SpatialQueryMode,
    kind: QueryElementType,
    /// Region covers every indexed element.
    all: bool,
    row_range: (u32, u32),
    col_range: (u32, u32),
    row: u32,
    col: u32,
    instances: bool,
    pos: usize,
    node_inside: bool,
    done: bool,
    seen: HashSet<Element>,
}

impl<R: Deref<Target = SpatialIndex>, S: ElementSource> SpatialIterator<R, S> {
    pub fn new(index: R, source: S, region: Rect, mode: SpatialQueryMode, kind: QueryElementType) -> Self {
        let bounds = index.bounds;
        let all = region.contains(&bounds);
        let done = bounds.is_empty() || !region.intersects(&bounds);
        let (row_range, col_range) = if all {
            ((0, index.rows - 1), (0, index.cols - 1))
        } else {
            let (c0, r0) = (index.col_of(region.left()), index.row_of(region.bottom()));
            let (c1, r1) = match mode {
                SpatialQueryMode::Accurate => (index.col_of(region.right()), index.row_of(region.top())),
                SpatialQueryMode::Simple => (
                    index.col_before(region.right()).max(c0),
                    index.row_before(region.top()).max(r0),
                ),
            };
            ((r0, r1), (c0, c1))
        };
        let mut it = SpatialIterator {
            index,
            source,
            region,
            mode,
            kind,
            all,
            row_range,
            col_range,
            row: row_range.0,
            col: col_range.0,
            instances: !kind.wants_shapes(),
            pos: 0,
            node_inside: false,
            done,
            seen: HashSet::new(),
        };
        it.enter_node();
        it
    }

    fn enter_node(&mut self) {
        self.node_inside = self.all || self.region.contains(&self.index.node_box(self.row, self.col));
    }

    /// Move to the next segment kind or node; returns false at the end.
    fn advance(&mut self) -> bool {
        self.pos = 0;
        if !self.instances && self.kind.wants_instances() {
            self.instances = true;
            return true;
        }
        self.instances = !self.kind.wants_shapes();
        if self.col < self.col_range.1 {
            self.col += 1;
        } else if self.row < self.row_range.1 {
            self.row += 1;
            self.col = self.col_range.0;
        } else {
            return false;
        }
        self.enter_node();
        true
    }
}

impl<R: Deref<Target = SpatialIndex>, S: ElementSource> Iterator for SpatialIterator<R, S> {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        while !self.done {
            let node = &self.index.nodes[(self.row * self.index.cols + self.col) as usize];
            let range = node.range(self.instances);
            if self.pos >= range.len() {
                if !self.advance() {
                    self.done = true;
                }
                continue;
            }
            let e = range.elements[self.pos];
            let hit = self.mode == SpatialQueryMode::Simple
                || self.node_inside
                || self.pos < range.intersect_offset
                || self.source.intersects(e, &self.region);
            self.pos += 1;
            if hit && self.seen.insert(e) {
                return Some(e);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use crate::repetition::ArrayInfo;
    use crate::shape_repetition::ShapeRepetition;
    use crate::shapes::Shapes;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstar::{RTree, RTreeObject, AABB};

    /// R-tree entry used as an independent reference.
    struct Entry {
        element: Element,
        bbox: Rect,
    }

    impl RTreeObject for Entry {
        type Envelope = AABB<[i64; 2]>;

        fn envelope(&self) -> Self::Envelope {
            AABB::from_corners(
                [self.bbox.left() as i64, self.bbox.bottom() as i64],
                [self.bbox.right() as i64, self.bbox.top() as i64],
            )
        }
    }

    fn random_rect(rng: &mut StdRng, span: i32, max_size: i32) -> Rect {
        let x = rng.gen_range(-span..span);
        let y = rng.gen_range(-span..span);
        Rect::new(x, y, x + rng.gen_range(1..max_size), y + rng.gen_range(1..max_size))
    }

    fn random_shapes(rng: &mut StdRng) -> Shapes {
        let mut shapes = Shapes::new();
        for _ in 0..60 {
            shapes.insert(random_rect(rng, 1000, 300));
        }
        for _ in 0..40 {
            let r = random_rect(rng, 1000, 200);
            let tip = Point::new(r.left(), r.top());
            shapes.insert(Polygon::new(vec![r.bottom_left, Point::new(r.right(), r.bottom()), tip]));
        }
        shapes
    }

    fn sorted(mut v: Vec<Element>) -> Vec<Element> {
        v.sort();
        v
    }

    #[test]
    fn test_scenario_window_step_query() {
        let mut shapes = Shapes::new();
        let first = shapes.insert(Rect::new(0, 0, 1, 1));
        shapes.insert(Rect::new(5, 5, 6, 6));
        shapes.insert(Rect::new(10, 10, 11, 11));
        let elements: Vec<Element> = shapes.elements().collect();
        let index = SpatialIndex::build(&shapes, &elements, &SpatialIndexOption::with_window_step(4));
        assert_eq!((index.rows(), index.cols()), (3, 3));
        let got = index.query(
            &shapes,
            &Rect::new(0, 0, 2, 2),
            SpatialQueryMode::Accurate,
            QueryElementType::ShapeAndInstance,
        );
        assert_eq!(got, vec![first]);
    }

    #[test]
    fn test_accurate_query_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x2545_f491_4f6c_dd1d);
        let shapes = random_shapes(&mut rng);
        let elements: Vec<Element> = shapes.elements().collect();
        let tree = RTree::bulk_load(
            elements
                .iter()
                .map(|&e| Entry {
                    element: e,
                    bbox: shapes.element_bbox(e),
                })
                .collect(),
        );
        for step in [0, 97, 250, 5000] {
            let index = SpatialIndex::build(&shapes, &elements, &SpatialIndexOption::with_window_step(step));
            for _ in 0..20 {
                let region = random_rect(&mut rng, 1200, 700);
                let got = sorted(index.query(
                    &shapes,
                    &region,
                    SpatialQueryMode::Accurate,
                    QueryElementType::OnlyShape,
                ));
                let brute = sorted(
                    elements
                        .iter()
                        .copied()
                        .filter(|&e| shapes.element_bbox(e).intersects(&region))
                        .collect(),
                );
                let envelope = AABB::from_corners(
                    [region.left() as i64, region.bottom() as i64],
                    [region.right() as i64, region.top() as i64],
                );
                let oracle = sorted(tree.locate_in_envelope_intersecting(&envelope).map(|en| en.element).collect());
                assert_eq!(got, brute, "step {step} region {region:?}");
                assert_eq!(got, oracle);
            }
        }
    }

    #[test]
    fn test_simple_query_is_superset() {
        let mut rng = StdRng::seed_from_u64(99);
        let shapes = random_shapes(&mut rng);
        let elements: Vec<Element> = shapes.elements().collect();
        let index = SpatialIndex::build(&shapes, &elements, &SpatialIndexOption::with_window_step(150));
        for _ in 0..20 {
            let region = random_rect(&mut rng, 1200, 500);
            let accurate: HashSet<Element> = index
                .query(&shapes, &region, SpatialQueryMode::Accurate, QueryElementType::OnlyShape)
                .into_iter()
                .collect();
            let simple = index.query(&shapes, &region, SpatialQueryMode::Simple, QueryElementType::OnlyShape);
            let simple_set: HashSet<Element> = simple.iter().copied().collect();
            assert_eq!(simple.len(), simple_set.len());
            // Contacts exactly on a grid line may fall outside the simple span.
            for e in accurate {
                let bb = shapes.element_bbox(e);
                if bb.intersection(&region).area() > 0 {
                    assert!(simple_set.contains(&e));
                }
            }
        }
    }

    #[test]
    fn test_region_covering_everything() {
        let mut rng = StdRng::seed_from_u64(5);
        let shapes = random_shapes(&mut rng);
        let elements: Vec<Element> = shapes.elements().collect();
        let index = SpatialIndex::build(&shapes, &elements, &SpatialIndexOption::with_window_step(100));
        let got = index.query(
            &shapes,
            &index.bounds().enlarged(10),
            SpatialQueryMode::Accurate,
            QueryElementType::ShapeAndInstance,
        );
        assert_eq!(sorted(got), sorted(elements));
    }

    #[test]
    fn test_triple_range_partition() {
        let mut tr = TripleRange::default();
        tr.insert(Element::Box(0), Placing::Inside);
        tr.insert(Element::Box(1), Placing::Crosses);
        tr.insert(Element::Box(2), Placing::Covers);
        tr.insert(Element::Box(3), Placing::Inside);
        tr.insert(Element::Box(4), Placing::Covers);
        assert_eq!(sorted(tr.covering().to_vec()), vec![Element::Box(2), Element::Box(4)]);
        assert_eq!(tr.crossing(), &[Element::Box(1)]);
        assert_eq!(sorted(tr.inside().to_vec()), vec![Element::Box(0), Element::Box(3)]);
    }

    #[test]
    fn test_repetition_only_in_touched_nodes() {
        let mut shapes = Shapes::new();
        let rep = shapes.insert(ShapeRepetition::new(
            Rect::new(0, 0, 2, 2),
            ArrayInfo::new(1, 2, Point::zero(), Point::new(90, 0)).into(),
        ));
        shapes.insert(Rect::new(0, 50, 100, 60));
        let elements: Vec<Element> = shapes.elements().collect();
        let index = SpatialIndex::build(&shapes, &elements, &SpatialIndexOption::with_window_step(10));
        // The gap between the two members holds nothing of the repetition.
        let got = index.query(&shapes, &Rect::new(30, 0, 60, 5), SpatialQueryMode::Simple, QueryElementType::OnlyShape);
        assert!(!got.contains(&rep));
        let got = index.query(&shapes, &Rect::new(85, 0, 95, 5), SpatialQueryMode::Accurate, QueryElementType::OnlyShape);
        assert_eq!(got, vec![rep]);
    }
}
