//! # LayDB Core
//!
//! Hierarchical layout geometry engine: cells holding shapes and instances
//! of other cells, compact repetitions, memoised per-layer bounding boxes
//! and grid spatial indexes, and region-filtered iteration over the whole
//! hierarchy.
//!
//! All mutation goes through [`Layout`], which keeps the caches of every
//! ancestor of an edited cell consistent. Queries take `&Layout` and fill
//! caches lazily, so they can run from several threads.

pub mod cell;
pub mod compress;
pub mod element;
pub mod error;
pub mod geometry;
pub mod iter;
pub mod layer;
pub mod layout;
pub mod options;
pub mod placement;
pub mod repetition;
pub mod shape_repetition;
pub mod shapes;
pub mod spatial;
pub mod transform;

pub use cell::{Cell, CellKey, DirtyFlag, Instance};
pub use compress::{CompressAlgo, Compressor};
pub use element::{Element, ElementSource};
pub use error::{LayoutError, LayoutResult};
pub use geometry::{DPoint, Path, Point, Polygon, Rect, Vector};
pub use iter::{CellElementIterator, ElementIterator, ElementIteratorOption, PolygonData};
pub use layer::{Layer, LayerId, LayerNames};
pub use layout::{CellLayerView, DeleteMode, Layout};
pub use options::{LayoutOptions, SpatialIndexOption, UpdateOption};
pub use placement::Placement;
pub use repetition::{
    ArrayInfo, HorizontalVectorInfo, OrdinaryVectorInfo, Repetition, RepetitionInfo, VerticalVectorInfo,
};
pub use shape_repetition::ShapeRepetition;
pub use shapes::{Shape, ShapeKind, ShapeType, Shapes};
pub use spatial::{QueryElementType, SpatialIndex, SpatialIterator, SpatialQueryMode};
pub use transform::{FullTrans, Rotation, SimpleTrans, Trans};
