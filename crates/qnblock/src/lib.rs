//! Quantum-number symmetric block-sparse tensors.
//!
//! A [`SymmetricArray`] stores only the dense blocks allowed by an abelian
//! conservation law: the block at sector coordinate `(i1, .., iN)` may exist
//! iff the signed labels of its sectors compose to the array's target label.
//! Operations reduce to fixed-signature linear-algebra calls by merging
//! groups of legs into single composite legs ([`MergeInfo`]), packing
//! operands into an [`ArgList`] and handing it to a [`LinalgKernel`].
//!
//! # Core Types
//!
//! - [`QuantumLabel`]: conserved quantity (a commutative group); shipped
//!   implementations are [`U1`], [`Zn`], [`ParticleSpin`], [`Trivial`] and
//!   [`Product`]
//! - [`QuantumShape`] / [`Leg`]: sector layout of one leg plus its sign
//! - [`SymmetricArray`]: block-sparse array over a list of legs
//! - [`MergeInfo`]: bijection between sector combinations and a merged leg
//! - [`ArgList`]: one fully built call to a routine family
//! - [`FaerKernel`]: default [`LinalgKernel`] backed by faer
//!
//! # Example
//!
//! ```
//! use qnblock::{contract, shape_of, ContractOptions, FaerKernel, Leg, SymmetricArray, U1};
//!
//! let s = shape_of([(U1(0), 2), (U1(1), 3)]).unwrap();
//! let a = SymmetricArray::<f64, U1>::zeros(vec![Leg::plus(s.clone()), Leg::minus(s.clone())], U1(0)).unwrap();
//! assert_eq!(a.num_blocks(), 2);
//!
//! let b = a.conj().unwrap();
//! let c = contract(1.0, &a, &[1], &b, &[1], &FaerKernel, &ContractOptions::default())
//!     .unwrap()
//!     .into_result()
//!     .unwrap();
//! // Products of zero blocks are pruned.
//! assert_eq!(c.num_blocks(), 0);
//! assert_eq!(c.rank(), 2);
//! ```

pub mod arglist;
pub mod config;
mod contract;
mod decompose;
mod error;
pub mod kernel;
mod merge;
pub mod ops;
mod qshape;
mod quantum;
mod sym_array;

pub use arglist::{ArgList, Layout, Op, RankSignature, Request, Routine, SolveKind};
pub use config::{
    default_svd_rtol, defaults, set_default_svd_rtol, ConfigError, ContractOptions, EngineDefaults, SvdOptions,
    TruncationParams,
};
pub use contract::{contract, contract_indexed, contract_into, contract_with_cache};
pub use decompose::{
    decompose, eigh, solve, svd, EigFactors, Eigenvalues, Factorization, SingularValues, Spectrum, SvdFactors,
};
pub use error::{QnError, Result};
pub use kernel::{FaerKernel, KernelFailure, KernelResult, KernelStatus, LinalgKernel, Outcome};
pub use merge::{expand, merge_matrix, split_matrix, MergeCache, MergeEntry, MergeInfo};
pub use qshape::{composite, Leg, QuantumShape, Sector};
pub use quantum::{ParticleSpin, Product, QuantumLabel, Sign, Trivial, Zn, U1};
pub use sym_array::{shape_of, SymmetricArray};

pub use num_complex::Complex64;
pub use qnblock_dense::{DenseArray, DenseBlock, Extents, IndexedLoop, LegPartition, LoopOrder, Scalar};
