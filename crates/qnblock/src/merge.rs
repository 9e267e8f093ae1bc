//! Leg merging: collapse a subset of legs into one composite leg.
//!
//! A [`MergeInfo`] enumerates every sector combination of the selected legs,
//! buckets the combinations by their composite label and lays each bucket
//! out contiguously. Within a bucket, combinations appear in lexicographic
//! order of their sector tuple, so offsets are reproducible across builds.
//! The merged leg always carries [`Sign::Plus`]: its sector labels already
//! include the signs of the constituent legs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use qnblock_dense::{extents, Extents, IndexedLoop, Scalar};

use crate::error::{QnError, Result};
use crate::qshape::{composite, Leg, QuantumShape};
use crate::quantum::{QuantumLabel, Sign};
use crate::sym_array::SymmetricArray;

/// Placement of one sector combination inside the merged leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeEntry {
    /// Sector index on each merged leg, in subset order.
    pub sectors: Extents,
    /// Sector of the merged leg the combination lands in.
    pub merged: usize,
    /// First position inside the merged sector.
    pub offset: usize,
    /// Number of positions (product of the constituent sector sizes).
    pub extent: usize,
}

impl MergeEntry {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.extent
    }
}

/// Bijection between sector combinations of a leg subset and contiguous
/// ranges of a merged leg.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeInfo<Q: QuantumLabel> {
    subset: Vec<usize>,
    legs: Vec<Leg<Q>>,
    merged: Arc<QuantumShape<Q>>,
    entries: Vec<MergeEntry>,
    /// `entries[sector_starts[s]..sector_starts[s + 1]]` lie in merged sector `s`.
    sector_starts: Vec<usize>,
    lookup: HashMap<Extents, usize>,
}

impl<Q: QuantumLabel> MergeInfo<Q> {
    /// Merge every sector combination of `legs[subset]`.
    pub fn build(legs: &[Leg<Q>], subset: &[usize]) -> Result<Self> {
        Self::build_filtered(legs, subset, |_| true)
    }

    /// Merge the combinations whose composite label passes `keep`.
    ///
    /// Rejected combinations are skipped and occupy no space.
    pub fn build_filtered(legs: &[Leg<Q>], subset: &[usize], mut keep: impl FnMut(&Q) -> bool) -> Result<Self> {
        check_subset(subset, legs.len())?;
        let sub_legs: Vec<Leg<Q>> = subset.iter().map(|&axis| legs[axis].clone()).collect();
        let grid: Extents = sub_legs.iter().map(Leg::num_sectors).collect();

        let mut buckets: BTreeMap<Q, Vec<(Extents, usize)>> = BTreeMap::new();
        for combo in IndexedLoop::new(&grid) {
            let label = composite(&sub_legs, &combo);
            if !keep(&label) {
                continue;
            }
            let extent = sub_legs
                .iter()
                .zip(combo.iter())
                .map(|(leg, &c)| leg.size(c))
                .product();
            buckets.entry(label).or_default().push((combo, extent));
        }

        let mut entries = Vec::new();
        let mut sector_starts = Vec::with_capacity(buckets.len() + 1);
        let mut sizes = BTreeMap::new();
        for (merged, (label, combos)) in buckets.into_iter().enumerate() {
            sector_starts.push(entries.len());
            let mut offset = 0;
            for (sectors, extent) in combos {
                entries.push(MergeEntry {
                    sectors,
                    merged,
                    offset,
                    extent,
                });
                offset += extent;
            }
            sizes.insert(label, offset);
        }
        sector_starts.push(entries.len());

        let lookup = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.sectors.clone(), i))
            .collect();
        let merged = Arc::new(QuantumShape::from_size_map(sizes));
        debug!(legs = subset.len(), sectors = merged.num_sectors(), combinations = entries.len(); "built merge map");
        Ok(Self {
            subset: subset.to_vec(),
            legs: sub_legs,
            merged,
            entries,
            sector_starts,
            lookup,
        })
    }

    /// Merge map restricted to combinations that can occur in a conserving
    /// block of an array with these legs and target.
    ///
    /// A composite `r` is kept when `r⁻¹ ∘ target` is reachable by the legs
    /// outside the subset. Merging every leg keeps exactly the conserving
    /// combinations.
    pub fn for_legs(legs: &[Leg<Q>], target: &Q, subset: &[usize]) -> Result<Self> {
        check_subset(subset, legs.len())?;
        let complement: Vec<Leg<Q>> = (0..legs.len())
            .filter(|axis| !subset.contains(axis))
            .map(|axis| legs[axis].clone())
            .collect();
        let grid: Extents = complement.iter().map(Leg::num_sectors).collect();
        let reachable: BTreeSet<Q> = IndexedLoop::new(&grid)
            .map(|combo| composite(&complement, &combo))
            .collect();
        Self::build_filtered(legs, subset, |r| reachable.contains(&r.invert().compose(target)))
    }

    /// [`for_legs`](Self::for_legs) for an existing array.
    pub fn for_array<T: Scalar>(array: &SymmetricArray<T, Q>, subset: &[usize]) -> Result<Self> {
        Self::for_legs(array.legs(), array.target(), subset)
    }

    /// Axes of the source array that were merged, in merge order.
    pub fn subset(&self) -> &[usize] {
        &self.subset
    }

    /// Merged legs, in subset order.
    pub fn legs(&self) -> &[Leg<Q>] {
        &self.legs
    }

    pub fn merged_shape(&self) -> &Arc<QuantumShape<Q>> {
        &self.merged
    }

    /// The composite leg.
    pub fn merged_leg(&self) -> Leg<Q> {
        Leg::new(Arc::clone(&self.merged), Sign::Plus)
    }

    pub fn num_sectors(&self) -> usize {
        self.merged.num_sectors()
    }

    pub fn sector_extent(&self, sector: usize) -> usize {
        self.merged.size(sector)
    }

    pub fn total_extent(&self) -> usize {
        self.merged.total_dim()
    }

    /// All entries, grouped by merged sector with increasing offsets.
    pub fn entries(&self) -> &[MergeEntry] {
        &self.entries
    }

    /// Entries lying in merged sector `sector`.
    pub fn entries_in(&self, sector: usize) -> &[MergeEntry] {
        &self.entries[self.sector_starts[sector]..self.sector_starts[sector + 1]]
    }

    /// Placement of a sector combination, or `None` if it was filtered out.
    pub fn locate(&self, sectors: &[usize]) -> Option<&MergeEntry> {
        self.lookup.get(sectors).map(|&i| &self.entries[i])
    }

    /// Inverse map: the entry covering `offset` in merged sector `sector`,
    /// together with the position local to that entry.
    pub fn split(&self, sector: usize, offset: usize) -> Option<(&MergeEntry, usize)> {
        let entries = self.entries_in(sector);
        let idx = entries.partition_point(|e| e.offset + e.extent <= offset);
        let entry = entries.get(idx)?;
        (offset >= entry.offset).then(|| (entry, offset - entry.offset))
    }

    /// Extents of the constituent block for an entry.
    pub fn block_extents(&self, entry: &MergeEntry) -> Extents {
        self.legs
            .iter()
            .zip(entry.sectors.iter())
            .map(|(leg, &c)| leg.size(c))
            .collect()
    }

    fn matches_array<T: Scalar>(&self, array: &SymmetricArray<T, Q>) -> bool {
        self.subset.iter().all(|&axis| axis < array.rank())
            && self
                .subset
                .iter()
                .zip(&self.legs)
                .all(|(&axis, leg)| array.leg(axis) == leg)
    }
}

fn check_subset(subset: &[usize], rank: usize) -> Result<()> {
    let mut seen = vec![false; rank];
    for &axis in subset {
        if axis >= rank || seen[axis] {
            return Err(QnError::InvalidAxes(format!(
                "subset {subset:?} is not a set of distinct axes below {rank}"
            )));
        }
        seen[axis] = true;
    }
    Ok(())
}

fn pick(coords: &[usize], axes: &[usize]) -> Extents {
    axes.iter().map(|&a| coords[a]).collect()
}

/// Merge `array` into a matrix with `rows` as the row leg and `cols` as the
/// column leg.
///
/// `rows.subset() ++ cols.subset()` must be a permutation of the array's axes.
/// Only merged blocks that receive a stored source block are allocated.
pub fn merge_matrix<T: Scalar, Q: QuantumLabel>(
    array: &SymmetricArray<T, Q>,
    rows: &MergeInfo<Q>,
    cols: &MergeInfo<Q>,
) -> Result<SymmetricArray<T, Q>> {
    let perm: Vec<usize> = rows.subset().iter().chain(cols.subset()).copied().collect();
    extents::check_permutation(&perm, array.rank())
        .map_err(|_| QnError::InvalidAxes(format!("merge axes {perm:?} do not cover rank {}", array.rank())))?;
    if !rows.matches_array(array) || !cols.matches_array(array) {
        return Err(QnError::MergeMismatch("merge map legs differ from array legs".into()));
    }

    let mut out = SymmetricArray::new(vec![rows.merged_leg(), cols.merged_leg()], array.target().clone());
    for (coords, block) in array.blocks() {
        let (Some(re), Some(ce)) = (rows.locate(&pick(&coords, rows.subset())), cols.locate(&pick(&coords, cols.subset())))
        else {
            return Err(QnError::MergeMismatch(format!(
                "block {:?} has no place in the merged matrix",
                coords.as_slice()
            )));
        };
        let piece = block.permute(&perm)?.reshape(&[re.extent, ce.extent])?;
        out.allocate(&[re.merged, ce.merged])?
            .insert_region(&[re.offset, ce.offset], &piece)?;
    }
    Ok(out)
}

/// Inverse of [`merge_matrix`]: the result has legs `rows.legs() ++ cols.legs()`.
///
/// Sub-blocks that are exactly zero are not stored.
pub fn split_matrix<T: Scalar, Q: QuantumLabel>(
    matrix: &SymmetricArray<T, Q>,
    rows: &MergeInfo<Q>,
    cols: &MergeInfo<Q>,
) -> Result<SymmetricArray<T, Q>> {
    split_matrix_with(matrix, rows, cols, true)
}

pub(crate) fn split_matrix_with<T: Scalar, Q: QuantumLabel>(
    matrix: &SymmetricArray<T, Q>,
    rows: &MergeInfo<Q>,
    cols: &MergeInfo<Q>,
    skip_zero: bool,
) -> Result<SymmetricArray<T, Q>> {
    if matrix.rank() != 2 {
        return Err(QnError::RankMismatch {
            expected: 2,
            actual: matrix.rank(),
        });
    }
    if matrix.leg(0).shape() != rows.merged_shape() || matrix.leg(1).shape() != cols.merged_shape() {
        return Err(QnError::MergeMismatch("matrix legs differ from merged legs".into()));
    }

    let legs = rows.legs().iter().chain(cols.legs()).cloned().collect();
    let mut out = SymmetricArray::new(legs, matrix.target().clone());
    for (coords, block) in matrix.blocks() {
        for re in rows.entries_in(coords[0]) {
            for ce in cols.entries_in(coords[1]) {
                let piece = block.extract_region(&[re.offset, ce.offset], &[re.extent, ce.extent])?;
                if skip_zero && piece.is_zero() {
                    continue;
                }
                let target: Extents = rows
                    .block_extents(re)
                    .into_iter()
                    .chain(cols.block_extents(ce))
                    .collect();
                let sectors: Extents = re.sectors.iter().chain(ce.sectors.iter()).copied().collect();
                out.insert_block(&sectors, piece.reshape(&target)?)?;
            }
        }
    }
    Ok(out)
}

/// Undo the merge of one leg: leg `axis` of `array` must be the merged leg
/// of `info`, and is replaced by the legs `info` was built from.
///
/// The other legs are left as they are, so a matrix from [`merge_matrix`]
/// can be expanded one side at a time. Zero pieces are not stored.
pub fn expand<T: Scalar, Q: QuantumLabel>(
    array: &SymmetricArray<T, Q>,
    axis: usize,
    info: &MergeInfo<Q>,
) -> Result<SymmetricArray<T, Q>> {
    if axis >= array.rank() {
        return Err(QnError::InvalidAxes(format!(
            "axis {axis} out of range for rank {}",
            array.rank()
        )));
    }
    if array.leg(axis) != &info.merged_leg() {
        return Err(QnError::MergeMismatch(format!("leg {axis} is not the merged leg of this map")));
    }

    let legs = array.legs()[..axis]
        .iter()
        .chain(info.legs())
        .chain(&array.legs()[axis + 1..])
        .cloned()
        .collect();
    let mut out = SymmetricArray::new(legs, array.target().clone());
    for (coords, block) in array.blocks() {
        for entry in info.entries_in(coords[axis]) {
            let mut offsets = Extents::from_elem(0, block.rank());
            offsets[axis] = entry.offset;
            let mut region = Extents::from_slice(block.extents());
            region[axis] = entry.extent;
            let piece = block.extract_region(&offsets, &region)?;
            if piece.is_zero() {
                continue;
            }
            let before = &block.extents()[..axis];
            let after = &block.extents()[axis + 1..];
            let target: Extents = before
                .iter()
                .copied()
                .chain(info.block_extents(entry))
                .chain(after.iter().copied())
                .collect();
            let sectors: Extents = coords[..axis]
                .iter()
                .chain(&entry.sectors)
                .chain(&coords[axis + 1..])
                .copied()
                .collect();
            out.insert_block(&sectors, piece.reshape(&target)?)?;
        }
    }
    Ok(out)
}

type CacheKey<Q> = (Vec<Leg<Q>>, Option<Q>, Vec<usize>);

/// Memoised merge maps.
///
/// Keys hold the full legs (shapes and signs), the target used for
/// filtering and the subset, so a changed shape can never hit a stale map.
#[derive(Debug)]
pub struct MergeCache<Q: QuantumLabel> {
    maps: Mutex<HashMap<CacheKey<Q>, Arc<MergeInfo<Q>>>>,
}

impl<Q: QuantumLabel> Default for MergeCache<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: QuantumLabel> MergeCache<Q> {
    pub fn new() -> Self {
        Self {
            maps: Mutex::new(HashMap::new()),
        }
    }

    /// Cached [`MergeInfo::build`].
    pub fn unfiltered(&self, legs: &[Leg<Q>], subset: &[usize]) -> Result<Arc<MergeInfo<Q>>> {
        self.get_or_build((legs.to_vec(), None, subset.to_vec()), || MergeInfo::build(legs, subset))
    }

    /// Cached [`MergeInfo::for_legs`].
    pub fn for_legs(&self, legs: &[Leg<Q>], target: &Q, subset: &[usize]) -> Result<Arc<MergeInfo<Q>>> {
        self.get_or_build((legs.to_vec(), Some(target.clone()), subset.to_vec()), || {
            MergeInfo::for_legs(legs, target, subset)
        })
    }

    pub fn len(&self) -> usize {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn get_or_build(
        &self,
        key: CacheKey<Q>,
        build: impl FnOnce() -> Result<MergeInfo<Q>>,
    ) -> Result<Arc<MergeInfo<Q>>> {
        if let Some(info) = self.maps.lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return Ok(Arc::clone(info));
        }
        let info = Arc::new(build()?);
        let mut maps = self.maps.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(maps.entry(key).or_insert(info)))
    }
}
