//! Scalar trait for generic block operations.
//!
//! This module defines the `Scalar` trait that abstracts over f64 and Complex64
//! for dense block storage and the kernels that act on it.

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

use faer_traits::ComplexField;
use num_complex::{Complex64, ComplexFloat};
use num_traits::{MulAdd, One, Zero};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Trait for scalar element types stored in blocks.
///
/// Provides the minimal interface needed by block storage and by the
/// faer-backed kernels (matrix products and SVD). The real type is always
/// `f64`, which is what the SVD backend requires of its element type.
pub trait Scalar:
    Clone
    + Copy
    + Debug
    + Default
    + PartialEq
    + Zero
    + One
    + Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + ComplexFloat<Real = f64>
    + From<f64>
    + ComplexField
    + MulAdd<Output = Self>
    + Send
    + Sync
    + 'static
{
    /// Create a scalar from f64.
    fn from_f64(val: f64) -> Self;

    /// Get the real part as f64.
    fn real_f64(&self) -> f64;

    /// Absolute value as f64.
    fn modulus(&self) -> f64;

    /// Complex conjugate (identity for real types).
    fn conjugate(&self) -> Self;

    /// Check if this type is complex.
    fn is_complex_type() -> bool;

    /// Draw a standard-normal sample (real and imaginary parts independent).
    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self;
}

impl Scalar for f64 {
    fn from_f64(val: f64) -> Self {
        val
    }

    fn real_f64(&self) -> f64 {
        *self
    }

    fn modulus(&self) -> f64 {
        self.abs()
    }

    fn conjugate(&self) -> Self {
        *self
    }

    fn is_complex_type() -> bool {
        false
    }

    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self {
        StandardNormal.sample(rng)
    }
}

impl Scalar for Complex64 {
    fn from_f64(val: f64) -> Self {
        Complex64::new(val, 0.0)
    }

    fn real_f64(&self) -> f64 {
        self.re
    }

    fn modulus(&self) -> f64 {
        self.norm()
    }

    fn conjugate(&self) -> Self {
        self.conj()
    }

    fn is_complex_type() -> bool {
        true
    }

    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let re: f64 = StandardNormal.sample(rng);
        let im: f64 = StandardNormal.sample(rng);
        Complex64::new(re, im)
    }
}
