//! Error types for dense block storage.

use thiserror::Error;

/// Error type for dense block and block-grid operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DenseError {
    /// Extents of two operands do not agree.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Rank of an index or operand does not match the container.
    #[error("Rank mismatch: expected {expected}, got {actual}")]
    RankMismatch { expected: usize, actual: usize },

    /// Element or block index is outside the container.
    #[error("Index {index:?} out of bounds for extents {extents:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        extents: Vec<usize>,
    },

    /// Permutation is not a bijection of `0..rank`.
    #[error("Invalid permutation {perm:?} for rank {rank}")]
    InvalidPermutation { perm: Vec<usize>, rank: usize },

    /// Buffer length does not equal the product of the extents.
    #[error("Buffer of length {len} does not fit extents {extents:?}")]
    LengthMismatch { len: usize, extents: Vec<usize> },

    /// The allocator refused a new block buffer.
    #[error("Failed to allocate a block of {elements} elements")]
    AllocationFailed { elements: usize },
}

/// Result type for dense operations.
pub type Result<T> = std::result::Result<T, DenseError>;
