use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid FITS file {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("Dimension mismatch: {context} is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        context: String,
        expected_width: usize,
        expected_height: usize,
        actual_width: usize,
        actual_height: usize,
    },

    #[error("No stars detected in frame {id}")]
    NoStars { id: usize },

    #[error("Alignment failed for frame {id}: residual {residual_px:.2} px over {match_count} matches")]
    AlignmentFailed {
        id: usize,
        residual_px: f32,
        match_count: usize,
    },

    #[error("No usable reference frame: no input frame has detectable stars")]
    NoReference,

    #[error("Memory budget of {budget_mib} MiB cannot hold a single {width}x{height} frame working set; raise the budget")]
    MemoryBudget {
        budget_mib: usize,
        width: usize,
        height: usize,
    },

    #[error("All frames were dropped; nothing left to stack")]
    StackEmpty,

    #[error("Numerically degenerate input: {0}")]
    NumericDegenerate(String),

    #[error("Missing exposure time in frame {id}, required for exposure-weighted stacking")]
    MissingExposure { id: usize },
}

pub type Result<T> = std::result::Result<T, StackError>;
