//! Dense block storage for block-sparse tensors.
//!
//! This crate is the storage substrate underneath the symmetric tensors of
//! `qnblock`: a runtime-rank coordinate iterator, dense row-major blocks with
//! shared copy-on-write buffers, and a sparse grid of such blocks.
//!
//! # Core Types
//!
//! - [`IndexedLoop`]: iterator over all coordinates of a shape
//! - [`LegPartition`]: how one leg is divided into blocks
//! - [`DenseBlock`]: one contiguous block (generic over [`Scalar`])
//! - [`DenseArray`]: N-dimensional grid of optionally stored blocks
//!
//! # Example
//!
//! ```
//! use qnblock_dense::{DenseArray, LegPartition};
//!
//! let parts = vec![LegPartition::new(vec![2, 3]), LegPartition::new(vec![2, 3])];
//! let mut a = DenseArray::<f64>::new(parts);
//! a.get_or_try_insert_zeros(&[1, 1]).unwrap().fill(1.0);
//!
//! assert_eq!(a.shape().as_slice(), &[5, 5]);
//! assert_eq!(a.num_stored(), 1);
//! ```

mod array;
mod block;
mod error;
pub mod extents;
mod indexed_loop;
mod partition;
mod scalar;

pub use array::DenseArray;
pub use block::DenseBlock;
pub use error::{DenseError, Result};
pub use extents::Extents;
pub use indexed_loop::{IndexedLoop, LoopOrder};
pub use partition::LegPartition;
pub use scalar::Scalar;
