use serde::{Deserialize, Serialize};

use crate::geometry::{Rect, Vector};
use crate::placement::offset_window;
use crate::repetition::{Repetition, RepetitionInfo};
use crate::shapes::Shape;
use crate::transform::Trans;

/// One shape stamped at every offset of a repetition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeRepetition<T> {
    pub shape: T,
    pub repetition: Repetition,
}

impl<T: Shape> ShapeRepetition<T> {
    pub fn new(shape: T, repetition: Repetition) -> Self {
        Self { shape, repetition }
    }

    pub fn size(&self) -> usize {
        self.repetition.size()
    }

    pub fn bounding_box(&self) -> Rect {
        let shape = self.shape.bbox();
        if shape.is_empty() || self.size() == 0 {
            return Rect::empty();
        }
        let extent = self.repetition.bounding_box();
        Rect {
            bottom_left: shape.bottom_left + extent.bottom_left,
            top_right: shape.top_right + extent.top_right,
        }
    }

    /// Box of the `index`-th member.
    pub fn bounding_box_at(&self, index: usize) -> Rect {
        self.shape.bbox().translated(self.repetition.offset(index))
    }

    /// The `index`-th member as a standalone shape.
    pub fn shape_at(&self, index: usize) -> T {
        self.shape.translated(self.repetition.offset(index))
    }

    /// Whether some member's box touches `region`, answered from the repetition
    /// without enumerating members.
    pub fn has_shape_intersect(&self, region: &Rect) -> bool {
        let shape = self.shape.bbox();
        if shape.is_empty() {
            return false;
        }
        self.repetition.has_offset_in(&offset_window(&shape, region))
    }

    /// Offsets of the members whose box touches `region`.
    pub fn offsets_touching(&self, region: &Rect) -> Vec<Vector> {
        let shape = self.shape.bbox();
        if shape.is_empty() {
            return Vec::new();
        }
        self.repetition.region_query(&offset_window(&shape, region))
    }

    /// First member at or after `start` whose box touches `region`, or `size()`.
    pub fn find_intersected(&self, region: &Rect, start: usize) -> usize {
        let shape = self.shape.bbox();
        (start..self.size())
            .find(|&i| shape.translated(self.repetition.offset(i)).intersects(region))
            .unwrap_or_else(|| self.size())
    }

    pub fn members(&self) -> Vec<T> {
        (0..self.size()).map(|i| self.shape_at(i)).collect()
    }

    pub fn area(&self) -> i64 {
        self.shape.area().saturating_mul(self.size() as i64)
    }

    /// Transform the base shape fully and the offsets without translation, so
    /// member `i` of the result is member `i` of `self` under `trans`.
    pub fn transformed(&self, trans: &Trans) -> Self {
        Self {
            shape: self.shape.transformed(trans),
            repetition: self.repetition.transformed_without_translation(trans),
        }
    }

    pub fn transform(&mut self, trans: &Trans) {
        *self = self.transformed(trans);
    }
}
