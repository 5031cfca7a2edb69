use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect, Vector};
use crate::repetition::{Repetition, RepetitionInfo};
use crate::transform::{FullTrans, SimpleTrans, Trans};

/// Where (and how often) an instance places its cell.
///
/// Repeated placements apply the base transform once and then add each
/// offset of the repetition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Placement {
    SimpleSingle(SimpleTrans),
    Single(FullTrans),
    SimpleRepeated(SimpleTrans, Repetition),
    Repeated(FullTrans, Repetition),
}

impl Default for Placement {
    fn default() -> Self {
        Placement::SimpleSingle(SimpleTrans::default())
    }
}

impl Placement {
    /// Single placement with the given transform.
    pub fn single(trans: Trans) -> Self {
        match trans {
            Trans::Simple(t) => Placement::SimpleSingle(t),
            Trans::Full(t) => Placement::Single(t),
        }
    }

    /// Repeated placement with the given base transform.
    pub fn repeated(trans: Trans, repetition: Repetition) -> Self {
        match trans {
            Trans::Simple(t) => Placement::SimpleRepeated(t, repetition),
            Trans::Full(t) => Placement::Repeated(t, repetition),
        }
    }

    pub fn at(x: i32, y: i32) -> Self {
        Placement::SimpleSingle(SimpleTrans::new(Point::new(x, y)))
    }

    pub fn is_repeated(&self) -> bool {
        matches!(self, Placement::SimpleRepeated(..) | Placement::Repeated(..))
    }

    pub fn base_trans(&self) -> Trans {
        match self {
            Placement::SimpleSingle(t) | Placement::SimpleRepeated(t, _) => Trans::Simple(*t),
            Placement::Single(t) | Placement::Repeated(t, _) => Trans::Full(*t),
        }
    }

    pub fn repetition(&self) -> Option<&Repetition> {
        match self {
            Placement::SimpleRepeated(_, r) | Placement::Repeated(_, r) => Some(r),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        self.repetition().map_or(1, |r| r.size())
    }

    /// Transform of the `index`-th placement, identity when out of range.
    pub fn trans(&self, index: usize) -> Trans {
        if index >= self.size() {
            return Trans::identity();
        }
        match self.repetition() {
            Some(rep) => self.base_trans().offset_by(rep.offset(index)),
            None => self.base_trans(),
        }
    }

    /// Box covering every placement of a child with box `child`.
    ///
    /// The child box is transformed once; the repetition extent is added to its corners.
    pub fn bounding_box(&self, child: &Rect) -> Rect {
        if child.is_empty() || self.size() == 0 {
            return Rect::empty();
        }
        let placed = self.base_trans().apply_rect(child);
        match self.repetition() {
            Some(rep) => {
                let extent = rep.bounding_box();
                Rect {
                    bottom_left: placed.bottom_left + extent.bottom_left,
                    top_right: placed.top_right + extent.top_right,
                }
            }
            None => placed,
        }
    }

    /// Offsets whose placement of `child` touches `region`. Single placements
    /// report the zero offset when they hit.
    pub fn offsets_touching(&self, child: &Rect, region: &Rect) -> Vec<Vector> {
        if child.is_empty() {
            return Vec::new();
        }
        let placed = self.base_trans().apply_rect(child);
        match self.repetition() {
            Some(rep) => rep.region_query(&offset_window(&placed, region)),
            None if placed.intersects(region) => vec![Point::zero()],
            None => Vec::new(),
        }
    }

    /// Whether any placement of `child` touches `region`.
    pub fn touches(&self, child: &Rect, region: &Rect) -> bool {
        if child.is_empty() {
            return false;
        }
        let placed = self.base_trans().apply_rect(child);
        match self.repetition() {
            Some(rep) => rep.has_offset_in(&offset_window(&placed, region)),
            None => placed.intersects(region),
        }
    }

    /// Push this placement through `trans`: compose the base transform and
    /// rotate/mirror/scale the repetition.
    pub fn transform(&mut self, trans: &Trans) {
        let base = trans.compose(&self.base_trans());
        *self = match self.repetition() {
            Some(rep) => Placement::repeated(base, rep.transformed_without_translation(trans)),
            None => Placement::single(base),
        };
    }

    pub fn transformed(&self, trans: &Trans) -> Placement {
        let mut p = self.clone();
        p.transform(trans);
        p
    }
}

/// Offsets `v` for which `placed + v` intersects `region`.
pub(crate) fn offset_window(placed: &Rect, region: &Rect) -> Rect {
    Rect {
        bottom_left: region.bottom_left - placed.top_right,
        top_right: region.top_right - placed.bottom_left,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DPoint;
    use crate::repetition::{ArrayInfo, OrdinaryVectorInfo};
    use crate::transform::Rotation;

    #[test]
    fn test_array_placement_bbox() {
        let rep = ArrayInfo::new(3, 3, Point::new(0, 10), Point::new(10, 0));
        let p = Placement::repeated(Trans::identity(), rep.into());
        let child = Rect::new(0, 0, 5, 5);
        assert_eq!(p.size(), 9);
        assert_eq!(p.bounding_box(&child), Rect::new(0, 0, 25, 25));

        let mut expected = Rect::empty();
        for i in 0..p.size() {
            expected = expected.union(&p.trans(i).apply_rect(&child));
        }
        assert_eq!(p.bounding_box(&child), expected);
    }

    #[test]
    fn test_empty_child_has_empty_bbox() {
        let p = Placement::at(10, 10);
        assert!(p.bounding_box(&Rect::empty()).is_empty());
    }

    #[test]
    fn test_trans_out_of_range_is_identity() {
        let p = Placement::repeated(Trans::translate(3, 3), OrdinaryVectorInfo::new(vec![Point::new(1, 1)]).into());
        assert_eq!(p.trans(0).apply(Point::zero()), Point::new(4, 4));
        assert!(p.trans(1).is_identity());
        assert!(Placement::at(1, 2).trans(5).is_identity());
    }

    #[test]
    fn test_transform_keeps_member_positions() {
        let rep = ArrayInfo::new(2, 3, Point::new(0, 7), Point::new(4, 1));
        let p = Placement::repeated(Trans::translate(5, -2), rep.into());
        let outer = Trans::Full(FullTrans::new(DPoint::new(10.0, 20.0), Rotation::R90, -1.0));
        let q = p.transformed(&outer);
        assert!(matches!(q, Placement::Repeated(..)));
        let probe = Point::new(3, 8);
        for i in 0..p.size() {
            assert_eq!(q.trans(i).apply(probe), outer.apply(p.trans(i).apply(probe)));
        }
    }

    #[test]
    fn test_offsets_touching() {
        let rep = ArrayInfo::new(1, 10, Point::zero(), Point::new(10, 0));
        let p = Placement::repeated(Trans::identity(), rep.into());
        let child = Rect::new(0, 0, 5, 5);
        let mut hits = p.offsets_touching(&child, &Rect::new(12, 0, 31, 2));
        hits.sort();
        assert_eq!(hits, vec![Point::new(10, 0), Point::new(20, 0), Point::new(30, 0)]);
    }
}
