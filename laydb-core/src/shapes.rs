use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::compress::{CompressAlgo, Compressor};
use crate::element::{Element, ElementSource};
use crate::error::{LayoutError, LayoutResult};
use crate::geometry::{Path, Point, Polygon, Rect, Vector};
use crate::shape_repetition::ShapeRepetition;
use crate::transform::Trans;

/// Geometry stored in a [`Shapes`] container.
pub trait Shape: Clone {
    fn bbox(&self) -> Rect;
    fn area(&self) -> i64;
    fn translated(&self, v: Vector) -> Self;
    fn transformed(&self, trans: &Trans) -> Self;
}

impl Shape for Rect {
    fn bbox(&self) -> Rect {
        *self
    }

    fn area(&self) -> i64 {
        Rect::area(self)
    }

    fn translated(&self, v: Vector) -> Self {
        Rect::translated(self, v)
    }

    fn transformed(&self, trans: &Trans) -> Self {
        trans.apply_rect(self)
    }
}

impl Shape for Polygon {
    fn bbox(&self) -> Rect {
        Polygon::bbox(self)
    }

    fn area(&self) -> i64 {
        Polygon::area(self)
    }

    fn translated(&self, v: Vector) -> Self {
        Polygon::translated(self, v)
    }

    fn transformed(&self, trans: &Trans) -> Self {
        Polygon::new(self.vertices.iter().map(|p| trans.apply(*p)).collect())
    }
}

impl Shape for Path {
    fn bbox(&self) -> Rect {
        Path::bbox(self)
    }

    fn area(&self) -> i64 {
        Path::area(self)
    }

    fn translated(&self, v: Vector) -> Self {
        Path::new(self.points.iter().map(|p| *p + v).collect(), self.width)
    }

    fn transformed(&self, trans: &Trans) -> Self {
        let width = (self.width as f64 * trans.magnification().abs()).round() as u32;
        Path::new(self.points.iter().map(|p| trans.apply(*p)).collect(), width)
    }
}

/// The kinds of shape a [`Shapes`] container holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShapeType {
    Box,
    Polygon,
    Path,
    BoxRepetition,
    PolygonRepetition,
}

impl ShapeType {
    pub const ALL: [ShapeType; 5] = [
        ShapeType::Box,
        ShapeType::Polygon,
        ShapeType::Path,
        ShapeType::BoxRepetition,
        ShapeType::PolygonRepetition,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ShapeType::Box => "box",
            ShapeType::Polygon => "polygon",
            ShapeType::Path => "path",
            ShapeType::BoxRepetition => "box repetition",
            ShapeType::PolygonRepetition => "polygon repetition",
        }
    }
}

/// Static link between a stored type and its slot in [`Shapes`].
pub trait ShapeKind: Clone + Sized + 'static {
    const TYPE: ShapeType;

    fn slice(shapes: &Shapes) -> &[Self];
    fn vec_mut(shapes: &mut Shapes) -> &mut Vec<Self>;
    fn bounding_box(&self) -> Rect;
    fn area(&self) -> i64;
    fn transform(&mut self, trans: &Trans);
}

macro_rules! plain_shape_kind {
    ($ty:ty, $kind:ident, $field:ident) => {
        impl ShapeKind for $ty {
            const TYPE: ShapeType = ShapeType::$kind;

            fn slice(shapes: &Shapes) -> &[Self] {
                &shapes.$field
            }

            fn vec_mut(shapes: &mut Shapes) -> &mut Vec<Self> {
                &mut shapes.$field
            }

            fn bounding_box(&self) -> Rect {
                Shape::bbox(self)
            }

            fn area(&self) -> i64 {
                Shape::area(self)
            }

            fn transform(&mut self, trans: &Trans) {
                *self = Shape::transformed(self, trans);
            }
        }
    };
}

macro_rules! repeated_shape_kind {
    ($inner:ty, $kind:ident, $field:ident) => {
        impl ShapeKind for ShapeRepetition<$inner> {
            const TYPE: ShapeType = ShapeType::$kind;

            fn slice(shapes: &Shapes) -> &[Self] {
                &shapes.$field
            }

            fn vec_mut(shapes: &mut Shapes) -> &mut Vec<Self> {
                &mut shapes.$field
            }

            fn bounding_box(&self) -> Rect {
                ShapeRepetition::bounding_box(self)
            }

            fn area(&self) -> i64 {
                ShapeRepetition::area(self)
            }

            fn transform(&mut self, trans: &Trans) {
                ShapeRepetition::transform(self, trans);
            }
        }
    };
}

plain_shape_kind!(Rect, Box, boxes);
plain_shape_kind!(Polygon, Polygon, polygons);
plain_shape_kind!(Path, Path, paths);
repeated_shape_kind!(Rect, BoxRepetition, box_repetitions);
repeated_shape_kind!(Polygon, PolygonRepetition, polygon_repetitions);

/// All shapes of one cell on one layer, stored per kind.
///
/// Elements referring into this container are plain indices; any mutation
/// that removes or reorders shapes invalidates them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Shapes {
    boxes: Vec<Rect>,
    polygons: Vec<Polygon>,
    paths: Vec<Path>,
    box_repetitions: Vec<ShapeRepetition<Rect>>,
    polygon_repetitions: Vec<ShapeRepetition<Polygon>>,
    #[serde(skip)]
    bbox: OnceLock<Rect>,
}

impl Shapes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: ShapeKind>(&self) -> &[T] {
        T::slice(self)
    }

    pub fn boxes(&self) -> &[Rect] {
        &self.boxes
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn box_repetitions(&self) -> &[ShapeRepetition<Rect>] {
        &self.box_repetitions
    }

    pub fn polygon_repetitions(&self) -> &[ShapeRepetition<Polygon>] {
        &self.polygon_repetitions
    }

    fn touch(&mut self) {
        self.bbox = OnceLock::new();
    }

    /// Append a shape and return its element handle.
    pub fn insert<T: ShapeKind>(&mut self, shape: T) -> Element {
        self.touch();
        let v = T::vec_mut(self);
        v.push(shape);
        Element::shape(T::TYPE, v.len() - 1)
    }

    pub fn insert_many<T: ShapeKind, I: IntoIterator<Item = T>>(&mut self, shapes: I) {
        self.touch();
        T::vec_mut(self).extend(shapes);
    }

    /// Overwrite the shape at `index`.
    pub fn replace<T: ShapeKind>(&mut self, index: usize, shape: T) -> LayoutResult<()> {
        let len = T::slice(self).len();
        if index >= len {
            return Err(LayoutError::IndexOutOfRange {
                kind: T::TYPE.name(),
                index,
                len,
            });
        }
        self.touch();
        T::vec_mut(self)[index] = shape;
        Ok(())
    }

    /// Remove the shapes of kind `ty` at `indices`, keeping the order of the
    /// others. Nothing is removed if any index is out of range.
    pub fn delete(&mut self, ty: ShapeType, indices: &[usize]) -> LayoutResult<()> {
        let len = self.len_of(ty);
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(LayoutError::IndexOutOfRange {
                kind: ty.name(),
                index,
                len,
            });
        }
        let doomed: BTreeSet<usize> = indices.iter().copied().collect();
        if doomed.is_empty() {
            return Ok(());
        }
        self.touch();
        match ty {
            ShapeType::Box => retain_indices(&mut self.boxes, &doomed),
            ShapeType::Polygon => retain_indices(&mut self.polygons, &doomed),
            ShapeType::Path => retain_indices(&mut self.paths, &doomed),
            ShapeType::BoxRepetition => retain_indices(&mut self.box_repetitions, &doomed),
            ShapeType::PolygonRepetition => retain_indices(&mut self.polygon_repetitions, &doomed),
        }
        Ok(())
    }

    /// Move every shape of `other` into this container.
    pub fn merge(&mut self, other: Shapes) {
        self.touch();
        self.boxes.extend(other.boxes);
        self.polygons.extend(other.polygons);
        self.paths.extend(other.paths);
        self.box_repetitions.extend(other.box_repetitions);
        self.polygon_repetitions.extend(other.polygon_repetitions);
    }

    pub fn transform(&mut self, trans: &Trans) {
        self.touch();
        self.boxes.iter_mut().for_each(|s| ShapeKind::transform(s, trans));
        self.polygons.iter_mut().for_each(|s| ShapeKind::transform(s, trans));
        self.paths.iter_mut().for_each(|s| ShapeKind::transform(s, trans));
        self.box_repetitions.iter_mut().for_each(|s| s.transform(trans));
        self.polygon_repetitions.iter_mut().for_each(|s| s.transform(trans));
    }

    pub fn clear(&mut self) {
        *self = Shapes::default();
    }

    pub fn len_of(&self, ty: ShapeType) -> usize {
        match ty {
            ShapeType::Box => self.boxes.len(),
            ShapeType::Polygon => self.polygons.len(),
            ShapeType::Path => self.paths.len(),
            ShapeType::BoxRepetition => self.box_repetitions.len(),
            ShapeType::PolygonRepetition => self.polygon_repetitions.len(),
        }
    }

    /// Number of stored shapes. Shapes with an empty box are only counted when
    /// `include_without_area` is set.
    pub fn len(&self, include_without_area: bool) -> usize {
        if include_without_area {
            return ShapeType::ALL.iter().map(|&t| self.len_of(t)).sum();
        }
        self.elements().count()
    }

    pub fn is_empty(&self) -> bool {
        ShapeType::ALL.iter().all(|&t| self.len_of(t) == 0)
    }

    /// Number of individual polygons, with each repetition member counted.
    pub fn polygon_count(&self) -> usize {
        self.boxes.len()
            + self.polygons.len()
            + self.paths.len()
            + self.box_repetitions.iter().map(|r| r.size()).sum::<usize>()
            + self.polygon_repetitions.iter().map(|r| r.size()).sum::<usize>()
    }

    /// Union of all shape boxes, cached until the next mutation.
    pub fn bounding_box(&self) -> Rect {
        *self.bbox.get_or_init(|| {
            let mut bb = Rect::empty();
            for e in self.all_elements() {
                bb = bb.union(&self.element_bbox(e));
            }
            bb
        })
    }

    fn all_elements(&self) -> impl Iterator<Item = Element> + '_ {
        ShapeType::ALL
            .into_iter()
            .flat_map(move |t| (0..self.len_of(t)).map(move |i| Element::shape(t, i)))
    }

    /// Handles to every shape with a non-empty box.
    pub fn elements(&self) -> impl Iterator<Item = Element> + '_ {
        self.all_elements().filter(move |e| !self.element_bbox(*e).is_empty())
    }

    /// Typed access through an element handle.
    pub fn resolve<T: ShapeKind>(&self, element: Element) -> Option<&T> {
        match element.shape_type() {
            Some(t) if t == T::TYPE => T::slice(self).get(element.index()),
            _ => None,
        }
    }

    pub fn element_bbox(&self, element: Element) -> Rect {
        match element {
            Element::Box(i) => self.boxes.get(i as usize).map_or(Rect::empty(), |s| *s),
            Element::Polygon(i) => self.polygons.get(i as usize).map_or(Rect::empty(), |s| s.bbox()),
            Element::Path(i) => self.paths.get(i as usize).map_or(Rect::empty(), |s| s.bbox()),
            Element::BoxRepetition(i) => self
                .box_repetitions
                .get(i as usize)
                .map_or(Rect::empty(), |s| s.bounding_box()),
            Element::PolygonRepetition(i) => self
                .polygon_repetitions
                .get(i as usize)
                .map_or(Rect::empty(), |s| s.bounding_box()),
            Element::Instance(_) | Element::Invalid => Rect::empty(),
        }
    }

    pub fn element_area(&self, element: Element) -> i64 {
        match element {
            Element::Box(_) => self.resolve::<Rect>(element).map_or(0, |s| s.area()),
            Element::Polygon(_) => self.resolve::<Polygon>(element).map_or(0, |s| s.area()),
            Element::Path(_) => self.resolve::<Path>(element).map_or(0, |s| Shape::area(s)),
            Element::BoxRepetition(_) => self.resolve::<ShapeRepetition<Rect>>(element).map_or(0, |s| s.area()),
            Element::PolygonRepetition(_) => {
                self.resolve::<ShapeRepetition<Polygon>>(element).map_or(0, |s| s.area())
            }
            Element::Instance(_) | Element::Invalid => 0,
        }
    }

    /// Exact touch test: repetitions are checked member-wise, other shapes by box.
    pub fn element_intersects(&self, element: Element, region: &Rect) -> bool {
        match element {
            Element::BoxRepetition(i) => self
                .box_repetitions
                .get(i as usize)
                .is_some_and(|s| s.has_shape_intersect(region)),
            Element::PolygonRepetition(i) => self
                .polygon_repetitions
                .get(i as usize)
                .is_some_and(|s| s.has_shape_intersect(region)),
            _ => {
                let bb = self.element_bbox(element);
                !bb.is_empty() && bb.intersects(region)
            }
        }
    }

    /// Sort the offsets of every ordinary-vector repetition. Returns whether
    /// anything was reordered.
    pub fn sort_repetitions(&mut self) -> bool {
        let mut changed = false;
        for r in &mut self.box_repetitions {
            changed |= r.repetition.sort();
        }
        for r in &mut self.polygon_repetitions {
            changed |= r.repetition.sort();
        }
        changed
    }

    /// Group identical boxes and polygons into repetitions according to `level`.
    pub fn compress(&mut self, level: u32) {
        let box_algo = CompressAlgo::for_boxes(level);
        let polygon_algo = CompressAlgo::for_polygons(level);
        if box_algo == CompressAlgo::None && polygon_algo == CompressAlgo::None {
            return;
        }
        self.touch();
        if box_algo != CompressAlgo::None {
            let boxes = std::mem::take(&mut self.boxes);
            let groups = group_by_shape(boxes.into_iter().map(|b| {
                let origin = b.bottom_left;
                (origin, b.translated(-origin))
            }));
            for (shape, offsets) in groups {
                let c = Compressor::new(offsets).compress(box_algo);
                self.boxes.extend(c.leftovers.iter().map(|&v| shape.translated(v)));
                self.box_repetitions.extend(
                    c.repetitions
                        .into_iter()
                        .map(|(base, rep)| ShapeRepetition::new(shape.translated(base), rep)),
                );
            }
        }
        if polygon_algo != CompressAlgo::None {
            let polygons = std::mem::take(&mut self.polygons);
            let groups = group_by_shape(polygons.into_iter().map(|p| p.normalized()));
            for (shape, offsets) in groups {
                let c = Compressor::new(offsets).compress(polygon_algo);
                self.polygons.extend(c.leftovers.iter().map(|&v| shape.translated(v)));
                self.polygon_repetitions.extend(
                    c.repetitions
                        .into_iter()
                        .map(|(base, rep)| ShapeRepetition::new(shape.translated(base), rep)),
                );
            }
        }
        log::debug!(
            "compressed shapes: {} boxes, {} box repetitions, {} polygons, {} polygon repetitions",
            self.boxes.len(),
            self.box_repetitions.len(),
            self.polygons.len(),
            self.polygon_repetitions.len()
        );
    }

    /// Expand every repetition back into plain shapes.
    pub fn decompress(&mut self) {
        if self.box_repetitions.is_empty() && self.polygon_repetitions.is_empty() {
            return;
        }
        self.touch();
        for r in std::mem::take(&mut self.box_repetitions) {
            self.boxes.extend(r.members());
        }
        for r in std::mem::take(&mut self.polygon_repetitions) {
            self.polygons.extend(r.members());
        }
    }
}

/// Bucket `(offset, normalised shape)` pairs by shape, keeping first-seen order.
fn group_by_shape<T, I>(items: I) -> Vec<(T, Vec<Point>)>
where
    T: Eq + std::hash::Hash + Clone,
    I: IntoIterator<Item = (Point, T)>,
{
    let mut slot: HashMap<T, usize> = HashMap::new();
    let mut groups: Vec<(T, Vec<Point>)> = Vec::new();
    for (offset, shape) in items {
        match slot.get(&shape) {
            Some(&i) => groups[i].1.push(offset),
            None => {
                slot.insert(shape.clone(), groups.len());
                groups.push((shape, vec![offset]));
            }
        }
    }
    groups
}

fn retain_indices<T>(v: &mut Vec<T>, doomed: &BTreeSet<usize>) {
    let mut i = 0;
    v.retain(|_| {
        let keep = !doomed.contains(&i);
        i += 1;
        keep
    });
}

impl ElementSource for Shapes {
    fn bounding_box(&self, element: Element) -> Rect {
        self.element_bbox(element)
    }

    fn intersects(&self, element: Element, region: &Rect) -> bool {
        self.element_intersects(element, region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repetition::{ArrayInfo, RepetitionInfo};

    fn sample() -> Shapes {
        let mut s = Shapes::new();
        s.insert(Rect::new(0, 0, 10, 10));
        s.insert(Rect::new(20, 20, 30, 30));
        s.insert(Polygon::new(vec![Point::new(-5, 0), Point::new(0, 0), Point::new(0, 5)]));
        s.insert(Path::new(vec![Point::new(0, 50), Point::new(10, 50)], 2));
        s
    }

    #[test]
    fn test_insert_and_bbox_cache() {
        let mut s = sample();
        assert_eq!(s.bounding_box(), Rect::new(-5, 0, 30, 51));
        s.insert(Rect::new(100, 100, 101, 101));
        assert_eq!(s.bounding_box(), Rect::new(-5, 0, 101, 101));
        assert_eq!(s.len(true), 5);
    }

    #[test]
    fn test_len_skips_shapes_without_area() {
        let mut s = sample();
        s.insert(Rect::new(0, 0, 0, 10));
        assert_eq!(s.len(true), 5);
        assert_eq!(s.len(false), 4);
    }

    #[test]
    fn test_replace_out_of_range() {
        let mut s = sample();
        assert!(s.replace(5, Rect::new(0, 0, 1, 1)).is_err());
        s.replace(1, Rect::new(0, 0, 1, 1)).unwrap();
        assert_eq!(s.boxes()[1], Rect::new(0, 0, 1, 1));
    }

    #[test]
    fn test_delete_is_all_or_nothing() {
        let mut s = sample();
        assert!(s.delete(ShapeType::Box, &[0, 9]).is_err());
        assert_eq!(s.boxes().len(), 2);
        s.delete(ShapeType::Box, &[0, 0]).unwrap();
        assert_eq!(s.boxes(), &[Rect::new(20, 20, 30, 30)]);
    }

    #[test]
    fn test_resolve_checks_kind() {
        let s = sample();
        let e = Element::Box(1);
        assert_eq!(s.resolve::<Rect>(e), Some(&Rect::new(20, 20, 30, 30)));
        assert!(s.resolve::<Polygon>(e).is_none());
        assert!(s.resolve::<Rect>(Element::Box(7)).is_none());
    }

    #[test]
    fn test_compress_and_decompress() {
        let mut s = Shapes::new();
        for r in 0..4 {
            for c in 0..6 {
                s.insert(Rect::new(c * 10, r * 10, c * 10 + 3, r * 10 + 3));
            }
        }
        s.insert(Rect::new(500, 500, 510, 520));
        let before = s.polygon_count();
        let bbox = s.bounding_box();
        s.compress(2);
        assert_eq!(s.box_repetitions().len(), 1);
        assert_eq!(s.boxes().len(), 1);
        assert_eq!(s.polygon_count(), before);
        assert_eq!(s.bounding_box(), bbox);

        s.decompress();
        assert!(s.box_repetitions().is_empty());
        let mut boxes = s.boxes().to_vec();
        boxes.sort_by_key(|b| (b.bottom(), b.left()));
        assert_eq!(boxes.len(), 25);
        assert_eq!(boxes[7], Rect::new(10, 10, 13, 13));
    }

    #[test]
    fn test_repetition_intersects_member_wise() {
        let mut s = Shapes::new();
        let e = s.insert(ShapeRepetition::new(
            Rect::new(0, 0, 2, 2),
            ArrayInfo::new(1, 5, Point::zero(), Point::new(10, 0)).into(),
        ));
        assert_eq!(s.element_bbox(e), Rect::new(0, 0, 42, 2));
        assert!(!s.element_intersects(e, &Rect::new(4, 0, 8, 2)));
        assert!(s.element_intersects(e, &Rect::new(4, 0, 10, 2)));
        assert_eq!(s.element_area(e), 20);
        assert_eq!(s.box_repetitions()[0].repetition.size(), 5);
    }
}
