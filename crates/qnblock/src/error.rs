//! Error types for symmetric block-sparse operations.

use std::fmt;

use qnblock_dense::DenseError;
use thiserror::Error;

use crate::kernel::KernelFailure;

/// Error type for symmetric array operations.
///
/// Every variant except [`QnError::KernelFailures`] and
/// [`QnError::ResourceExhaustion`] signals a broken caller contract and
/// aborts the operation that raised it.
#[derive(Debug, Error)]
pub enum QnError {
    /// A quantum shape has duplicate labels or an empty sector.
    #[error("Malformed quantum shape: {0}")]
    MalformedShape(String),

    /// A block coordinate does not satisfy the conservation rule.
    #[error("Block {coords:?} violates the conservation rule (composite {composite}, target {target})")]
    NonConservingBlock {
        coords: Vec<usize>,
        composite: String,
        target: String,
    },

    /// A block coordinate is outside the sector grid.
    #[error("Block {coords:?} out of range for sector grid {grid:?}")]
    BlockOutOfRange { coords: Vec<usize>, grid: Vec<usize> },

    /// Operand extents are incompatible with a linear-algebra routine.
    #[error("{routine}: dimension {dimension} mismatch ({left} vs {right})")]
    ExtentMismatch {
        routine: &'static str,
        dimension: &'static str,
        left: usize,
        right: usize,
    },

    /// Two operands have different numbers of legs.
    #[error("Rank mismatch: expected {expected}, got {actual}")]
    RankMismatch { expected: usize, actual: usize },

    /// Contraction or permutation axes are invalid.
    #[error("Invalid axes: {0}")]
    InvalidAxes(String),

    /// Legs paired by an operation have incompatible shapes or signs.
    #[error("Leg mismatch on axis pair ({left}, {right}): {reason}")]
    LegMismatch {
        left: usize,
        right: usize,
        reason: String,
    },

    /// Operands of an elementwise operation have different target labels.
    #[error("Target mismatch: {left} vs {right}")]
    TargetMismatch { left: String, right: String },

    /// Decomposition split point is outside `1..rank`.
    #[error("Invalid split {split} for rank {rank}")]
    InvalidSplit { split: usize, rank: usize },

    /// A merged array does not match the merge maps it is split with.
    #[error("Merge map mismatch: {0}")]
    MergeMismatch(String),

    /// A new block could not be allocated; the target is unchanged.
    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(DenseError),

    /// One or more kernel calls reported failure.
    #[error("{} kernel call(s) failed: {}", .0.len(), FailureList(.0))]
    KernelFailures(Vec<KernelFailure>),

    /// Error from the dense storage layer.
    #[error(transparent)]
    Dense(DenseError),
}

impl From<DenseError> for QnError {
    fn from(err: DenseError) -> Self {
        match err {
            DenseError::AllocationFailed { .. } => QnError::ResourceExhaustion(err),
            other => QnError::Dense(other),
        }
    }
}

struct FailureList<'a>(&'a [KernelFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Result type for symmetric array operations.
pub type Result<T> = std::result::Result<T, QnError>;
