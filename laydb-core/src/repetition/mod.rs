//! Compact descriptions of many offsets: regular arrays and offset lists.

mod array;
mod vector;

pub use array::ArrayInfo;
pub use vector::{HorizontalVectorInfo, OrdinaryVectorInfo, VerticalVectorInfo};

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect, Vector};
use crate::transform::Trans;

/// Operations every repetition kind supports.
pub trait RepetitionInfo {
    /// Number of offsets.
    fn size(&self) -> usize;

    /// The `index`-th offset, or `(0, 0)` when out of range.
    fn offset(&self, index: usize) -> Vector;

    /// Extent of all offsets. The box may be degenerate (zero width or height)
    /// so callers read its corners rather than testing it for emptiness.
    fn bounding_box(&self) -> Rect;

    /// Every offset lying inside `region`, edges included.
    fn region_query(&self, region: &Rect) -> Vec<Vector>;

    fn has_offset_in(&self, region: &Rect) -> bool;

    fn offsets(&self) -> Vec<Vector> {
        (0..self.size()).map(|i| self.offset(i)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Repetition {
    Array(ArrayInfo),
    Ordinary(OrdinaryVectorInfo),
    Horizontal(HorizontalVectorInfo),
    Vertical(VerticalVectorInfo),
}

impl Repetition {
    fn info(&self) -> &dyn RepetitionInfo {
        match self {
            Repetition::Array(a) => a,
            Repetition::Ordinary(o) => o,
            Repetition::Horizontal(h) => h,
            Repetition::Vertical(v) => v,
        }
    }

    /// Apply the rotation, mirroring and scaling of `trans` to every offset.
    /// The translation is left to the owner of the repetition.
    pub fn transformed_without_translation(&self, trans: &Trans) -> Repetition {
        if trans.is_simple() {
            return self.clone();
        }
        match self {
            Repetition::Array(a) => Repetition::Array(a.transformed_without_translation(trans)),
            Repetition::Ordinary(o) => Repetition::Ordinary(o.transformed_without_translation(trans)),
            Repetition::Horizontal(h) => h.transformed_without_translation(trans),
            Repetition::Vertical(v) => v.transformed_without_translation(trans),
        }
    }

    pub fn transform_without_translation(&mut self, trans: &Trans) {
        if !trans.is_simple() {
            *self = self.transformed_without_translation(trans);
        }
    }

    /// Sort an ordinary offset list so region queries can binary-search it.
    /// Returns whether the index order of the offsets changed.
    pub fn sort(&mut self) -> bool {
        match self {
            Repetition::Ordinary(o) if !o.is_sorted() => {
                o.sort();
                true
            }
            _ => false,
        }
    }

    /// Whether the repetition is a single offset at the origin.
    pub fn is_trivial(&self) -> bool {
        self.size() == 1 && self.offset(0) == Point::zero()
    }
}

impl RepetitionInfo for Repetition {
    fn size(&self) -> usize {
        self.info().size()
    }

    fn offset(&self, index: usize) -> Vector {
        self.info().offset(index)
    }

    fn bounding_box(&self) -> Rect {
        self.info().bounding_box()
    }

    fn region_query(&self, region: &Rect) -> Vec<Vector> {
        self.info().region_query(region)
    }

    fn has_offset_in(&self, region: &Rect) -> bool {
        self.info().has_offset_in(region)
    }

    fn offsets(&self) -> Vec<Vector> {
        self.info().offsets()
    }
}

impl From<ArrayInfo> for Repetition {
    fn from(a: ArrayInfo) -> Self {
        Repetition::Array(a)
    }
}

impl From<OrdinaryVectorInfo> for Repetition {
    fn from(o: OrdinaryVectorInfo) -> Self {
        Repetition::Ordinary(o)
    }
}

impl From<HorizontalVectorInfo> for Repetition {
    fn from(h: HorizontalVectorInfo) -> Self {
        Repetition::Horizontal(h)
    }
}

impl From<VerticalVectorInfo> for Repetition {
    fn from(v: VerticalVectorInfo) -> Self {
        Repetition::Vertical(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DPoint;
    use crate::transform::{FullTrans, Rotation};

    #[test]
    fn test_every_variant_transforms_each_offset() {
        let reps: Vec<Repetition> = vec![
            ArrayInfo::new(3, 2, Point::new(1, 7), Point::new(4, 0)).into(),
            OrdinaryVectorInfo::new(vec![Point::new(2, 3), Point::new(-8, 1)]).into(),
            HorizontalVectorInfo::new(vec![0, 5, 6]).into(),
            VerticalVectorInfo::new(vec![-4, 0, 9]).into(),
        ];
        let t = Trans::Full(FullTrans::new(DPoint::new(3.0, 3.0), Rotation::R270, -1.0));
        for rep in &reps {
            let moved = rep.transformed_without_translation(&t);
            assert_eq!(moved.size(), rep.size());
            for i in 0..rep.size() {
                assert_eq!(moved.offset(i), t.apply_vector(rep.offset(i)), "{rep:?}");
            }
        }
    }

    #[test]
    fn test_simple_trans_leaves_offsets() {
        let rep: Repetition = ArrayInfo::new(2, 2, Point::new(0, 5), Point::new(5, 0)).into();
        assert_eq!(rep.transformed_without_translation(&Trans::translate(9, 9)), rep);
    }

    #[test]
    fn test_out_of_range_offset_is_zero() {
        let rep: Repetition = VerticalVectorInfo::new(vec![1, 2]).into();
        assert_eq!(rep.offset(2), Point::zero());
        assert!(!rep.is_trivial());
        assert!(Repetition::from(OrdinaryVectorInfo::new(vec![Point::zero()])).is_trivial());
    }
}
