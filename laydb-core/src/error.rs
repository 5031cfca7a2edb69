use thiserror::Error;

use crate::layer::Layer;

// ── Errors ────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Layer {0} already exists")]
    LayerExists(Layer),

    #[error("Layer {0} does not exist")]
    LayerNotFound(Layer),

    #[error("Top cell is not set")]
    TopCellNotSet,

    #[error("Cell '{0}' not found")]
    CellNotFound(String),

    #[error("Cell '{0}' already exists")]
    CellExists(String),

    #[error("Cell key does not refer to a live cell")]
    StaleCell,

    #[error("{kind} index {index} out of range (len {len})")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Instancing '{child}' inside '{parent}' would create a cycle")]
    CyclicReference { parent: String, child: String },

    #[error("Invalid options: {0}")]
    Options(#[from] serde_json::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type LayoutResult<T> = Result<T, LayoutError>;
