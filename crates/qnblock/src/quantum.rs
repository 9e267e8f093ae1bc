//! Conserved quantum labels.
//!
//! A [`QuantumLabel`] is an element of an abelian group: labels compose
//! associatively and commutatively, have an identity and an inverse, and
//! carry a total order consistent with equality. The order keeps quantum
//! shapes canonically sorted so sectors can be found by binary search.
//!
//! The crate does not prescribe a conservation law. Callers pick one of the
//! label types below or implement the trait for their own type.

use std::fmt::{self, Debug, Display};
use std::hash::Hash;

/// Capability bound for conserved quantum numbers.
pub trait QuantumLabel: Clone + Debug + Display + Ord + Hash + Send + Sync + 'static {
    /// Group identity.
    fn identity() -> Self;

    /// Group operation.
    fn compose(&self, other: &Self) -> Self;

    /// Group inverse.
    fn invert(&self) -> Self;

    fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Compose a sequence of labels (identity for an empty sequence).
    fn compose_all<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        labels
            .into_iter()
            .fold(Self::identity(), |acc, q| acc.compose(q))
    }
}

/// Covariance sign of a leg.
///
/// A `Plus` leg contributes its sector label to the conservation rule, a
/// `Minus` leg contributes the inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Sign {
    #[default]
    Plus,
    Minus,
}

impl Sign {
    /// Label as seen by the conservation rule.
    pub fn apply<Q: QuantumLabel>(self, label: &Q) -> Q {
        match self {
            Sign::Plus => label.clone(),
            Sign::Minus => label.invert(),
        }
    }

    #[must_use]
    pub fn flip(self) -> Self {
        match self {
            Sign::Plus => Sign::Minus,
            Sign::Minus => Sign::Plus,
        }
    }
}

impl Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Plus => write!(f, "+"),
            Sign::Minus => write!(f, "-"),
        }
    }
}

/// No symmetry: every block conserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Trivial;

impl QuantumLabel for Trivial {
    fn identity() -> Self {
        Trivial
    }

    fn compose(&self, _other: &Self) -> Self {
        Trivial
    }

    fn invert(&self) -> Self {
        Trivial
    }
}

impl Display for Trivial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0")
    }
}

/// U(1) charge such as particle number or twice the Sz projection.
///
/// Arithmetic wraps at the `i32` range, so labels form the group Z_{2^32};
/// charges that physically exceed that range are outside the supported domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct U1(pub i32);

impl QuantumLabel for U1 {
    fn identity() -> Self {
        U1(0)
    }

    fn compose(&self, other: &Self) -> Self {
        U1(self.0.wrapping_add(other.0))
    }

    fn invert(&self) -> Self {
        U1(self.0.wrapping_neg())
    }
}

impl Display for U1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cyclic group Z_N; `Zn<2>` is fermion parity.
///
/// `Zn<0>` fails to compile wherever a label is constructed or composed.
///
/// ```compile_fail
/// let _ = qnblock::Zn::<0>::new(1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Zn<const N: u32>(u32);

impl<const N: u32> Zn<N> {
    const ORDER: u32 = {
        assert!(N > 0, "Zn<N> needs N > 0");
        N
    };

    /// Label `value mod N`.
    pub fn new(value: u32) -> Self {
        Self(value % Self::ORDER)
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl<const N: u32> QuantumLabel for Zn<N> {
    fn identity() -> Self {
        Zn::new(0)
    }

    fn compose(&self, other: &Self) -> Self {
        let sum = u64::from(self.0) + u64::from(other.0);
        Zn((sum % u64::from(Self::ORDER)) as u32)
    }

    fn invert(&self) -> Self {
        Zn((Self::ORDER - self.0) % Self::ORDER)
    }
}

impl<const N: u32> Display for Zn<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mod {}", self.0, N)
    }
}

/// Particle number together with twice the Sz projection.
///
/// Ordered lexicographically by `(particles, spin)`. Both components wrap
/// like [`U1`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ParticleSpin {
    pub particles: i32,
    pub spin: i32,
}

impl ParticleSpin {
    pub fn new(particles: i32, spin: i32) -> Self {
        Self { particles, spin }
    }

    /// Fermionic parity: true for an odd particle number.
    pub fn parity(&self) -> bool {
        self.particles.rem_euclid(2) == 1
    }
}

impl QuantumLabel for ParticleSpin {
    fn identity() -> Self {
        Self::default()
    }

    fn compose(&self, other: &Self) -> Self {
        Self::new(
            self.particles.wrapping_add(other.particles),
            self.spin.wrapping_add(other.spin),
        )
    }

    fn invert(&self) -> Self {
        Self::new(self.particles.wrapping_neg(), self.spin.wrapping_neg())
    }
}

impl Display for ParticleSpin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(N={}, 2Sz={})", self.particles, self.spin)
    }
}

/// Direct product of two independent conservation laws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Product<A, B>(pub A, pub B);

impl<A: QuantumLabel, B: QuantumLabel> QuantumLabel for Product<A, B> {
    fn identity() -> Self {
        Product(A::identity(), B::identity())
    }

    fn compose(&self, other: &Self) -> Self {
        Product(self.0.compose(&other.0), self.1.compose(&other.1))
    }

    fn invert(&self) -> Self {
        Product(self.0.invert(), self.1.invert())
    }
}

impl<A: Display, B: Display> Display for Product<A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} x {}]", self.0, self.1)
    }
}
