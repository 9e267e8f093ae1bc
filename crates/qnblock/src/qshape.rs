//! Per-leg quantum shapes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use qnblock_dense::LegPartition;

use crate::error::{QnError, Result};
use crate::quantum::{QuantumLabel, Sign};

/// One symmetry sector of a leg: a label and the block size it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sector<Q> {
    pub label: Q,
    pub size: usize,
}

impl<Q> Sector<Q> {
    pub fn new(label: Q, size: usize) -> Self {
        Self { label, size }
    }
}

/// Ordered list of sectors on one leg.
///
/// Sectors are kept sorted by label, labels are pairwise distinct and every
/// size is positive. Shapes are immutable once built and are shared between
/// arrays through [`Arc`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuantumShape<Q: QuantumLabel> {
    sectors: Vec<Sector<Q>>,
    partition: LegPartition,
}

impl<Q: QuantumLabel> QuantumShape<Q> {
    /// Build a shape from sectors in any order.
    ///
    /// # Errors
    /// `MalformedShape` for duplicate labels or zero-sized sectors.
    pub fn new(sectors: impl IntoIterator<Item = Sector<Q>>) -> Result<Self> {
        let mut sectors: Vec<Sector<Q>> = sectors.into_iter().collect();
        if let Some(bad) = sectors.iter().find(|s| s.size == 0) {
            return Err(QnError::MalformedShape(format!(
                "sector {} has zero size",
                bad.label
            )));
        }
        sectors.sort_by(|a, b| a.label.cmp(&b.label));
        if let Some(pair) = sectors.windows(2).find(|w| w[0].label == w[1].label) {
            return Err(QnError::MalformedShape(format!(
                "duplicate label {}",
                pair[0].label
            )));
        }
        Ok(Self::from_sorted(sectors))
    }

    /// Build a shape from `(label, size)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Q, usize)>) -> Result<Self> {
        Self::new(pairs.into_iter().map(|(label, size)| Sector::new(label, size)))
    }

    /// Single identity-labelled sector, the shape of a leg without symmetry.
    pub fn trivial(size: usize) -> Result<Self> {
        Self::new([Sector::new(Q::identity(), size)])
    }

    /// Shape from a label-keyed map; keys are already sorted and distinct.
    pub(crate) fn from_size_map(map: BTreeMap<Q, usize>) -> Self {
        Self::from_sorted(
            map.into_iter()
                .map(|(label, size)| Sector::new(label, size))
                .collect(),
        )
    }

    fn from_sorted(sectors: Vec<Sector<Q>>) -> Self {
        let partition = LegPartition::new(sectors.iter().map(|s| s.size).collect());
        Self { sectors, partition }
    }

    /// Sector at `index`.
    ///
    /// # Panics
    /// If `index` is out of range.
    pub fn sector_at(&self, index: usize) -> &Sector<Q> {
        assert!(
            index < self.sectors.len(),
            "Sector index {} out of range for shape with {} sectors",
            index,
            self.sectors.len()
        );
        &self.sectors[index]
    }

    /// Label of sector `index`. Panics if out of range.
    #[inline]
    pub fn label(&self, index: usize) -> &Q {
        &self.sector_at(index).label
    }

    /// Size of sector `index`. Panics if out of range.
    #[inline]
    pub fn size(&self, index: usize) -> usize {
        self.sector_at(index).size
    }

    /// Index of the sector carrying `label` (binary search).
    pub fn position(&self, label: &Q) -> Option<usize> {
        self.sectors.binary_search_by(|s| s.label.cmp(label)).ok()
    }

    #[inline]
    pub fn num_sectors(&self) -> usize {
        self.sectors.len()
    }

    #[inline]
    pub fn total_dim(&self) -> usize {
        self.partition.total_dim()
    }

    /// Offset of sector `index` within the full leg.
    #[inline]
    pub fn offset(&self, index: usize) -> usize {
        self.partition.block_offset(index)
    }

    #[inline]
    pub fn partition(&self) -> &LegPartition {
        &self.partition
    }

    pub fn sectors(&self) -> &[Sector<Q>] {
        &self.sectors
    }

    pub fn labels(&self) -> impl Iterator<Item = &Q> + '_ {
        self.sectors.iter().map(|s| &s.label)
    }

    /// Shape with only the sectors whose index satisfies `keep`.
    pub fn restricted(&self, mut keep: impl FnMut(usize) -> bool) -> Self {
        Self::from_sorted(
            self.sectors
                .iter()
                .enumerate()
                .filter(|(i, _)| keep(*i))
                .map(|(_, s)| s.clone())
                .collect(),
        )
    }
}

impl<Q: QuantumLabel> fmt::Display for QuantumShape<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, s) in self.sectors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", s.label, s.size)?;
        }
        write!(f, "}}")
    }
}

/// A tensor leg: a shared quantum shape and its covariance sign.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Leg<Q: QuantumLabel> {
    shape: Arc<QuantumShape<Q>>,
    sign: Sign,
}

impl<Q: QuantumLabel> Leg<Q> {
    pub fn new(shape: Arc<QuantumShape<Q>>, sign: Sign) -> Self {
        Self { shape, sign }
    }

    pub fn plus(shape: Arc<QuantumShape<Q>>) -> Self {
        Self::new(shape, Sign::Plus)
    }

    pub fn minus(shape: Arc<QuantumShape<Q>>) -> Self {
        Self::new(shape, Sign::Minus)
    }

    /// Same shape with the opposite sign; contracts against `self`.
    #[must_use]
    pub fn flipped(&self) -> Self {
        Self::new(Arc::clone(&self.shape), self.sign.flip())
    }

    #[inline]
    pub fn shape(&self) -> &Arc<QuantumShape<Q>> {
        &self.shape
    }

    #[inline]
    pub fn sign(&self) -> Sign {
        self.sign
    }

    /// Label of sector `index` as seen by the conservation rule.
    #[inline]
    pub fn signed_label(&self, index: usize) -> Q {
        self.sign.apply(self.shape.label(index))
    }

    #[inline]
    pub fn size(&self, index: usize) -> usize {
        self.shape.size(index)
    }

    #[inline]
    pub fn num_sectors(&self) -> usize {
        self.shape.num_sectors()
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.shape.total_dim()
    }

    /// True when `other` can be contracted against `self`.
    pub fn is_dual_of(&self, other: &Self) -> bool {
        self.sign != other.sign && self.shape == other.shape
    }
}

/// Composite label of a block: the signed labels of `coords` composed.
pub fn composite<Q: QuantumLabel>(legs: &[Leg<Q>], coords: &[usize]) -> Q {
    legs.iter()
        .zip(coords)
        .fold(Q::identity(), |acc, (leg, &c)| acc.compose(&leg.signed_label(c)))
}
