use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect, Vector};
use crate::transform::Trans;

use super::{Repetition, RepetitionInfo};

/// Indices of the monotone `coords` that fall inside `[lo, hi]`.
///
/// Works for both ascending and descending sequences.
fn monotone_range(coords: &[i32], lo: i32, hi: i32) -> Range<usize> {
    let ascending = coords.first() <= coords.last();
    let (start, end) = if ascending {
        (
            coords.partition_point(|&c| c < lo),
            coords.partition_point(|&c| c <= hi),
        )
    } else {
        (
            coords.partition_point(|&c| c > hi),
            coords.partition_point(|&c| c >= lo),
        )
    };
    start..end.max(start)
}

fn monotone_extent(coords: &[i32]) -> Option<(i32, i32)> {
    let (first, last) = (*coords.first()?, *coords.last()?);
    Some((first.min(last), first.max(last)))
}

/// Offsets along the x axis: `(coord, 0)` for each entry of a monotone list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HorizontalVectorInfo {
    pub coords: Vec<i32>,
}

/// Offsets along the y axis: `(0, coord)` for each entry of a monotone list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerticalVectorInfo {
    pub coords: Vec<i32>,
}

impl HorizontalVectorInfo {
    /// Coordinates must be sorted (ascending or descending).
    pub fn new(coords: Vec<i32>) -> Self {
        debug_assert!(coords.windows(2).all(|w| w[0] <= w[1]) || coords.windows(2).all(|w| w[0] >= w[1]));
        Self { coords }
    }
}

impl VerticalVectorInfo {
    /// Coordinates must be sorted (ascending or descending).
    pub fn new(coords: Vec<i32>) -> Self {
        debug_assert!(coords.windows(2).all(|w| w[0] <= w[1]) || coords.windows(2).all(|w| w[0] >= w[1]));
        Self { coords }
    }
}

/// Map one-axis coordinates through the linear part of `trans`, landing on
/// whichever axis the rotation sends them to.
fn transform_axis(coords: &[i32], horizontal: bool, trans: &Trans) -> Repetition {
    let unit = |c: i32| if horizontal { Point::new(c, 0) } else { Point::new(0, c) };
    let lands_horizontal = horizontal != trans.rotation().is_odd();
    let mapped = coords.iter().map(|&c| {
        let v = trans.apply_vector(unit(c));
        if lands_horizontal {
            v.x
        } else {
            v.y
        }
    });
    if lands_horizontal {
        Repetition::Horizontal(HorizontalVectorInfo::new(mapped.collect()))
    } else {
        Repetition::Vertical(VerticalVectorInfo::new(mapped.collect()))
    }
}

impl RepetitionInfo for HorizontalVectorInfo {
    fn size(&self) -> usize {
        self.coords.len()
    }

    fn offset(&self, index: usize) -> Vector {
        self.coords.get(index).map_or(Point::zero(), |&x| Point::new(x, 0))
    }

    fn bounding_box(&self) -> Rect {
        match monotone_extent(&self.coords) {
            Some((lo, hi)) => Rect::from_points(&[Point::new(lo, 0), Point::new(hi, 0)]),
            None => Rect::empty(),
        }
    }

    fn region_query(&self, region: &Rect) -> Vec<Vector> {
        if region.bottom() > 0 || region.top() < 0 {
            return Vec::new();
        }
        self.coords[monotone_range(&self.coords, region.left(), region.right())]
            .iter()
            .map(|&x| Point::new(x, 0))
            .collect()
    }

    fn has_offset_in(&self, region: &Rect) -> bool {
        region.bottom() <= 0
            && region.top() >= 0
            && !monotone_range(&self.coords, region.left(), region.right()).is_empty()
    }
}

impl HorizontalVectorInfo {
    pub fn transformed_without_translation(&self, trans: &Trans) -> Repetition {
        transform_axis(&self.coords, true, trans)
    }
}

impl RepetitionInfo for VerticalVectorInfo {
    fn size(&self) -> usize {
        self.coords.len()
    }

    fn offset(&self, index: usize) -> Vector {
        self.coords.get(index).map_or(Point::zero(), |&y| Point::new(0, y))
    }

    fn bounding_box(&self) -> Rect {
        match monotone_extent(&self.coords) {
            Some((lo, hi)) => Rect::from_points(&[Point::new(0, lo), Point::new(0, hi)]),
            None => Rect::empty(),
        }
    }

    fn region_query(&self, region: &Rect) -> Vec<Vector> {
        if region.left() > 0 || region.right() < 0 {
            return Vec::new();
        }
        self.coords[monotone_range(&self.coords, region.bottom(), region.top())]
            .iter()
            .map(|&y| Point::new(0, y))
            .collect()
    }

    fn has_offset_in(&self, region: &Rect) -> bool {
        region.left() <= 0
            && region.right() >= 0
            && !monotone_range(&self.coords, region.bottom(), region.top()).is_empty()
    }
}

impl VerticalVectorInfo {
    pub fn transformed_without_translation(&self, trans: &Trans) -> Repetition {
        transform_axis(&self.coords, false, trans)
    }
}

/// Arbitrary offsets. Once sorted by `(x, y)` region queries binary-search on x.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrdinaryVectorInfo {
    offsets: Vec<Vector>,
    sorted: bool,
    extent: Rect,
}

impl OrdinaryVectorInfo {
    pub fn new(offsets: Vec<Vector>) -> Self {
        let extent = Rect::from_points(&offsets);
        Self {
            offsets,
            sorted: false,
            extent,
        }
    }

    pub fn offsets_slice(&self) -> &[Vector] {
        &self.offsets
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Sort offsets by `(x, y)`. Changes the index order of the offsets.
    pub fn sort(&mut self) {
        if !self.sorted {
            self.offsets.sort_unstable();
            self.sorted = true;
        }
    }

    fn candidates(&self, region: &Rect) -> &[Vector] {
        if self.size() == 0
            || region.bottom() > self.extent.top()
            || region.top() < self.extent.bottom()
            || region.left() > self.extent.right()
            || region.right() < self.extent.left()
        {
            return &[];
        }
        if !self.sorted {
            return &self.offsets;
        }
        let start = self.offsets.partition_point(|p| p.x < region.left());
        let end = self.offsets.partition_point(|p| p.x <= region.right());
        &self.offsets[start..end.max(start)]
    }

    pub fn transformed_without_translation(&self, trans: &Trans) -> OrdinaryVectorInfo {
        OrdinaryVectorInfo::new(self.offsets.iter().map(|&v| trans.apply_vector(v)).collect())
    }
}

impl RepetitionInfo for OrdinaryVectorInfo {
    fn size(&self) -> usize {
        self.offsets.len()
    }

    fn offset(&self, index: usize) -> Vector {
        self.offsets.get(index).copied().unwrap_or_default()
    }

    fn bounding_box(&self) -> Rect {
        self.extent
    }

    fn region_query(&self, region: &Rect) -> Vec<Vector> {
        self.candidates(region)
            .iter()
            .filter(|p| region.contains_point(p))
            .copied()
            .collect()
    }

    fn has_offset_in(&self, region: &Rect) -> bool {
        self.candidates(region).iter().any(|p| region.contains_point(p))
    }

    fn offsets(&self) -> Vec<Vector> {
        self.offsets.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DPoint;
    use crate::transform::{FullTrans, Rotation};

    fn full(rot: Rotation, mag: f64) -> Trans {
        Trans::Full(FullTrans::new(DPoint::new(50.0, 50.0), rot, mag))
    }

    #[test]
    fn test_horizontal_region_query() {
        let h = HorizontalVectorInfo::new(vec![0, 3, 7, 12, 20]);
        assert_eq!(h.region_query(&Rect::new(3, -1, 12, 1)), vec![Point::new(3, 0), Point::new(7, 0), Point::new(12, 0)]);
        assert!(h.region_query(&Rect::new(0, 1, 100, 5)).is_empty());
        assert!(!h.has_offset_in(&Rect::new(13, -1, 19, 1)));
        let bb = h.bounding_box();
        assert_eq!((bb.bottom_left, bb.top_right), (Point::new(0, 0), Point::new(20, 0)));
    }

    #[test]
    fn test_vertical_rotates_into_horizontal() {
        let v = VerticalVectorInfo::new(vec![0, 10, 20]);
        match v.transformed_without_translation(&full(Rotation::R90, 1.0)) {
            Repetition::Horizontal(h) => assert_eq!(h.coords, vec![0, -10, -20]),
            other => panic!("unexpected {other:?}"),
        }
        match v.transformed_without_translation(&full(Rotation::R0, -2.0)) {
            Repetition::Vertical(v) => assert_eq!(v.coords, vec![0, -20, -40]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_descending_coords_query() {
        let h = HorizontalVectorInfo::new(vec![0, -10, -20, -30]);
        let got = h.region_query(&Rect::new(-25, 0, -5, 0));
        assert_eq!(got, vec![Point::new(-10, 0), Point::new(-20, 0)]);
        assert_eq!(h.offset(3), Point::new(-30, 0));
    }

    #[test]
    fn test_transform_preserves_member_order() {
        let h = HorizontalVectorInfo::new(vec![1, 4, 9]);
        let t = full(Rotation::R270, 1.0);
        let moved = h.transformed_without_translation(&t);
        for i in 0..h.size() {
            assert_eq!(moved.offset(i), t.apply_vector(h.offset(i)));
        }
    }

    #[test]
    fn test_ordinary_sorted_and_unsorted_agree() {
        let pts = vec![
            Point::new(5, 5),
            Point::new(-3, 8),
            Point::new(5, -2),
            Point::new(0, 0),
            Point::new(9, 9),
            Point::new(5, 5),
        ];
        let unsorted = OrdinaryVectorInfo::new(pts);
        let mut sorted = unsorted.clone();
        sorted.sort();
        for r in [Rect::new(0, 0, 5, 5), Rect::new(-10, -10, 10, 0), Rect::new(6, 6, 8, 8)] {
            let mut a = unsorted.region_query(&r);
            let mut b = sorted.region_query(&r);
            a.sort();
            b.sort();
            assert_eq!(a, b);
            assert_eq!(unsorted.has_offset_in(&r), !a.is_empty());
        }
        assert_eq!(sorted.region_query(&Rect::new(0, 0, 5, 5)).len(), 3);
    }
}
