use serde::{Deserialize, Serialize};

use crate::error::LayoutResult;
use crate::geometry::Rect;
use crate::layer::Layer;

// ── Tuning constants ─────────────────────────────────────────────────

/// Minimum element count of a one-dimensional array produced by compression.
pub const MIN_ARRAY_REPETITION_SIZE: usize = 5;
/// Minimum member count of a line turned into a horizontal/vertical vector.
pub const MIN_LINE_REPETITION_SIZE: usize = 16;
pub const DEFAULT_THREAD_NUM: usize = 16;
pub const DEFAULT_WINDOW_STEP: u32 = 500_000;

/// Target number of elements per grid cell when no window step is given.
pub const NODE_CAPACITY: usize = 2000;
pub const GRID_ROWS_MIN: u32 = 1;
pub const GRID_ROWS_MAX: u32 = 100;

/// Above these counts a cell iterator switches from a linear scan to the spatial index.
pub const SHAPES_INDEX_THRESHOLD: usize = 100;
pub const INSTANCES_INDEX_THRESHOLD: usize = 100;

// ── Update flags ─────────────────────────────────────────────────────

pub const UPDATE_BOUNDING_BOX: u16 = 1;
pub const UPDATE_SPATIAL_INDEX: u16 = 1 << 1;
pub const UPDATE_LAYER: u16 = 1 << 2;
pub const UPDATE_TOP_CELL: u16 = 1 << 3;
pub const UPDATE_ALL: u16 = UPDATE_BOUNDING_BOX | UPDATE_SPATIAL_INDEX | UPDATE_LAYER | UPDATE_TOP_CELL;

/// Grid parameters for building one spatial index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialIndexOption {
    /// Side length of a grid cell. Zero sizes the grid to about
    /// [`NODE_CAPACITY`] elements per cell.
    pub window_step: u32,
    /// Area covered by the grid. Empty means the union of the element boxes.
    pub region: Rect,
}

impl Default for SpatialIndexOption {
    fn default() -> Self {
        Self {
            window_step: 0,
            region: Rect::empty(),
        }
    }
}

impl SpatialIndexOption {
    pub fn with_window_step(window_step: u32) -> Self {
        Self {
            window_step,
            ..Default::default()
        }
    }
}

/// Parameters of a bulk cache rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateOption {
    /// Worker threads used for per-cell rebuilds.
    pub thread_num: usize,
    pub window_step: u32,
    /// Restrict the rebuild to these layers. Empty means every layer.
    pub layers: Vec<Layer>,
}

impl Default for UpdateOption {
    fn default() -> Self {
        Self {
            thread_num: DEFAULT_THREAD_NUM,
            window_step: DEFAULT_WINDOW_STEP,
            layers: Vec::new(),
        }
    }
}

impl UpdateOption {
    pub fn spatial_index_option(&self) -> SpatialIndexOption {
        SpatialIndexOption::with_window_step(self.window_step)
    }

    pub fn wants_layer(&self, layer: Layer) -> bool {
        self.layers.is_empty() || self.layers.contains(&layer)
    }
}

/// Layout-wide settings, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    pub thread_num: usize,
    pub window_step: u32,
    /// Level passed to shape compression when none is given explicitly.
    pub compress_level: u32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            thread_num: DEFAULT_THREAD_NUM,
            window_step: DEFAULT_WINDOW_STEP,
            compress_level: 0,
        }
    }
}

impl LayoutOptions {
    pub fn from_json(json: &str) -> LayoutResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> LayoutResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn update_option(&self) -> UpdateOption {
        UpdateOption {
            thread_num: self.thread_num,
            window_step: self.window_step,
            layers: Vec::new(),
        }
    }
}
