use serde::{Deserialize, Serialize};

use crate::geometry::Rect;
use crate::shapes::ShapeType;

/// Handle to one shape or instance of a cell.
///
/// The payload is an index into the owning container: the per-kind vectors of
/// a `Shapes` or the instance list of a `Cell`. Handles stay valid until that
/// container removes or reorders entries. Equality and hashing are by
/// (kind, index), which makes handles usable as deduplication keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Element {
    Box(u32),
    Polygon(u32),
    Path(u32),
    BoxRepetition(u32),
    PolygonRepetition(u32),
    Instance(u32),
    #[default]
    Invalid,
}

impl Element {
    pub fn shape(ty: ShapeType, index: usize) -> Element {
        let i = index as u32;
        match ty {
            ShapeType::Box => Element::Box(i),
            ShapeType::Polygon => Element::Polygon(i),
            ShapeType::Path => Element::Path(i),
            ShapeType::BoxRepetition => Element::BoxRepetition(i),
            ShapeType::PolygonRepetition => Element::PolygonRepetition(i),
        }
    }

    pub fn instance(index: usize) -> Element {
        Element::Instance(index as u32)
    }

    pub fn shape_type(&self) -> Option<ShapeType> {
        match self {
            Element::Box(_) => Some(ShapeType::Box),
            Element::Polygon(_) => Some(ShapeType::Polygon),
            Element::Path(_) => Some(ShapeType::Path),
            Element::BoxRepetition(_) => Some(ShapeType::BoxRepetition),
            Element::PolygonRepetition(_) => Some(ShapeType::PolygonRepetition),
            Element::Instance(_) | Element::Invalid => None,
        }
    }

    /// Position inside the owning container. `Invalid` reports `usize::MAX`.
    pub fn index(&self) -> usize {
        match *self {
            Element::Box(i)
            | Element::Polygon(i)
            | Element::Path(i)
            | Element::BoxRepetition(i)
            | Element::PolygonRepetition(i)
            | Element::Instance(i) => i as usize,
            Element::Invalid => usize::MAX,
        }
    }

    pub fn is_instance(&self) -> bool {
        matches!(self, Element::Instance(_))
    }

    pub fn is_shape(&self) -> bool {
        self.shape_type().is_some()
    }

    pub fn is_repetition(&self) -> bool {
        matches!(self, Element::BoxRepetition(_) | Element::PolygonRepetition(_))
    }

    /// The "no element" sentinel.
    pub fn is_empty(&self) -> bool {
        matches!(self, Element::Invalid)
    }
}

/// Resolves element handles to geometry.
pub trait ElementSource {
    fn bounding_box(&self, element: Element) -> Rect;

    /// Whether the element touches `region`, edges included.
    fn intersects(&self, element: Element, region: &Rect) -> bool {
        let bb = self.bounding_box(element);
        !bb.is_empty() && bb.intersects(region)
    }

    /// Whether the element is scattered over its box, so covering a region
    /// with the box does not mean touching it.
    fn is_sparse(&self, element: Element) -> bool {
        element.is_repetition()
    }
}

impl<S: ElementSource + ?Sized> ElementSource for &S {
    fn bounding_box(&self, element: Element) -> Rect {
        (**self).bounding_box(element)
    }

    fn intersects(&self, element: Element, region: &Rect) -> bool {
        (**self).intersects(element, region)
    }

    fn is_sparse(&self, element: Element) -> bool {
        (**self).is_sparse(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_includes_kind() {
        let mut set = HashSet::new();
        set.insert(Element::Box(3));
        set.insert(Element::Polygon(3));
        set.insert(Element::Box(3));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_kind_queries() {
        assert_eq!(Element::shape(ShapeType::Path, 4), Element::Path(4));
        assert!(Element::instance(0).is_instance());
        assert!(!Element::Instance(0).is_shape());
        assert!(Element::BoxRepetition(1).is_repetition());
        assert!(Element::default().is_empty());
        assert_eq!(Element::Invalid.index(), usize::MAX);
    }
}
