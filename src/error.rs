// ============================================================================
// ERROR TAXONOMY: engine rejections, codec failures, non-fatal warnings
// ============================================================================

use thiserror::Error;

use crate::layers::LayerId;

/// A declined or aborted engine operation.  The document is unchanged
/// whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("layer {index} is locked")]
    LayerLocked { index: usize },

    #[error("cannot remove the last remaining layer")]
    LastLayer,

    #[error("layer index {index} out of range (len={len})")]
    LayerOutOfRange { index: usize, len: usize },

    #[error("source and target layer are the same")]
    SameLayer,

    #[error("grid size mismatch: expected {}x{}, found {}x{}", expected.0, expected.1, found.0, found.1)]
    SizeMismatch { expected: (u32, u32), found: (u32, u32) },

    #[error("history record touches ({x}, {y}) outside the grid")]
    CoordinateOutOfRange { x: i32, y: i32 },

    #[error("history record targets missing layer {0}")]
    LayerMissing(LayerId),

    #[error("an operation is already being recorded")]
    OperationInProgress,

    #[error("no operation is being recorded")]
    NoOperationInProgress,

    #[error("region id {0} already exists")]
    DuplicateRegionId(i32),

    #[error("unknown region id {0}")]
    UnknownRegion(i32),

    #[error("no free region id left")]
    RegionIdsExhausted,

    #[error("invalid canvas dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Failure while reading or writing an external map representation.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary encoding error: {0}")]
    Binary(#[from] Box<bincode::ErrorKind>),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("unknown magic '{0}'")]
    BadMagic(String),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("expected {expected} cells, found {found}")]
    CellCountMismatch { expected: usize, found: usize },

    #[error("line {line}: coordinate ({x}, {y}) outside the map")]
    CoordinateOutOfRange { line: usize, x: i64, y: i64 },

    #[error("invalid map dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Something was recovered locally but the operator must be told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineWarning {
    /// Flood fill stopped at its cell cap; the fill is partial.
    FillTruncated { cap: usize, filled: usize },
    /// The oldest history entries were dropped to respect the depth bound.
    HistoryEvicted { dropped: usize },
}

impl std::fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineWarning::FillTruncated { cap, filled } => {
                write!(f, "fill stopped after {} cells (cap {}); result is partial", filled, cap)
            }
            EngineWarning::HistoryEvicted { dropped } => {
                write!(f, "dropped {} oldest history step(s)", dropped)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
