//! Process-wide defaults and per-call options.
//!
//! [`defaults()`] holds the engine-wide settings. Option structs left at
//! their defaults read from it when they are built or evaluated, so a
//! changed setting reaches every later call that does not override it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("invalid rtol {0}: must be finite and non-negative")]
    InvalidRtol(f64),
    #[error("max rank must be at least 1")]
    ZeroMaxRank,
}

const INITIAL_SVD_RTOL: f64 = 1e-12;
const UNLIMITED: usize = 0;

/// Engine-wide settings with atomic access.
///
/// ```
/// use qnblock::config::{defaults, ContractOptions};
///
/// let before = defaults().parallel();
/// defaults().set_parallel(false);
/// assert!(!ContractOptions::default().parallel);
/// defaults().set_parallel(before);
/// ```
#[derive(Debug)]
pub struct EngineDefaults {
    svd_rtol: AtomicU64,
    svd_max_rank: AtomicUsize,
    parallel: AtomicBool,
    prune_zeros: AtomicBool,
}

impl EngineDefaults {
    /// Settings as shipped: rtol `1e-12`, unlimited rank, parallel
    /// contraction with zero pruning.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            svd_rtol: AtomicU64::new(INITIAL_SVD_RTOL.to_bits()),
            svd_max_rank: AtomicUsize::new(UNLIMITED),
            parallel: AtomicBool::new(true),
            prune_zeros: AtomicBool::new(true),
        }
    }

    pub fn svd_rtol(&self) -> f64 {
        f64::from_bits(self.svd_rtol.load(Ordering::Relaxed))
    }

    /// # Errors
    /// [`ConfigError::InvalidRtol`] for a negative or non-finite value; the
    /// stored value is left unchanged.
    pub fn set_svd_rtol(&self, rtol: f64) -> Result<(), ConfigError> {
        if !rtol.is_finite() || rtol < 0.0 {
            return Err(ConfigError::InvalidRtol(rtol));
        }
        self.svd_rtol.store(rtol.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Rank cap applied when a call sets none; `None` is unlimited.
    pub fn svd_max_rank(&self) -> Option<usize> {
        match self.svd_max_rank.load(Ordering::Relaxed) {
            UNLIMITED => None,
            rank => Some(rank),
        }
    }

    pub fn set_svd_max_rank(&self, max_rank: Option<usize>) -> Result<(), ConfigError> {
        let stored = match max_rank {
            Some(0) => return Err(ConfigError::ZeroMaxRank),
            Some(rank) => rank,
            None => UNLIMITED,
        };
        self.svd_max_rank.store(stored, Ordering::Relaxed);
        Ok(())
    }

    pub fn parallel(&self) -> bool {
        self.parallel.load(Ordering::Relaxed)
    }

    pub fn set_parallel(&self, parallel: bool) {
        self.parallel.store(parallel, Ordering::Relaxed);
    }

    pub fn prune_zeros(&self) -> bool {
        self.prune_zeros.load(Ordering::Relaxed)
    }

    pub fn set_prune_zeros(&self, prune: bool) {
        self.prune_zeros.store(prune, Ordering::Relaxed);
    }

    /// Contraction options built from the current settings.
    pub fn contract_options(&self) -> ContractOptions {
        ContractOptions {
            parallel: self.parallel(),
            prune_zeros: self.prune_zeros(),
            compact_sectors: false,
        }
    }

    /// Resolve `params` against the current settings.
    pub fn resolve(&self, params: &TruncationParams) -> (f64, usize) {
        let rtol = params.rtol.unwrap_or_else(|| self.svd_rtol());
        let max_rank = params.max_rank.or_else(|| self.svd_max_rank()).unwrap_or(usize::MAX);
        (rtol, max_rank)
    }

    /// Restore the shipped settings.
    pub fn reset(&self) {
        self.svd_rtol.store(INITIAL_SVD_RTOL.to_bits(), Ordering::Relaxed);
        self.svd_max_rank.store(UNLIMITED, Ordering::Relaxed);
        self.set_parallel(true);
        self.set_prune_zeros(true);
    }
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULTS: EngineDefaults = EngineDefaults::new();

/// The process-wide settings.
pub fn defaults() -> &'static EngineDefaults {
    &DEFAULTS
}

/// Current default relative tolerance for SVD truncation (initially 1e-12).
pub fn default_svd_rtol() -> f64 {
    DEFAULTS.svd_rtol()
}

/// Set the default SVD truncation tolerance.
pub fn set_default_svd_rtol(rtol: f64) -> Result<(), ConfigError> {
    DEFAULTS.set_svd_rtol(rtol)
}

/// Rank truncation parameters.
///
/// With `rtol`, the smallest singular values are discarded while
/// `sum_{discarded} σ² <= rtol² * sum_{all} σ²`. The criterion is applied to
/// the singular values of every symmetry sector together.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TruncationParams {
    /// Relative Frobenius tolerance; `None` uses [`EngineDefaults::svd_rtol`].
    pub rtol: Option<f64>,
    /// Upper bound on the total kept rank across sectors; `None` uses
    /// [`EngineDefaults::svd_max_rank`].
    pub max_rank: Option<usize>,
}

impl TruncationParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = Some(rtol);
        self
    }

    #[must_use]
    pub fn with_max_rank(mut self, max_rank: usize) -> Self {
        self.max_rank = Some(max_rank);
        self
    }

    /// `(rtol, max_rank)` after falling back to [`defaults()`].
    #[must_use]
    pub fn effective(&self) -> (f64, usize) {
        DEFAULTS.resolve(self)
    }
}

/// Options for symmetric SVD.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SvdOptions {
    pub truncation: TruncationParams,
}

impl SvdOptions {
    pub fn with_rtol(rtol: f64) -> Self {
        Self {
            truncation: TruncationParams::new().with_rtol(rtol),
        }
    }

    pub fn with_max_rank(max_rank: usize) -> Self {
        Self {
            truncation: TruncationParams::new().with_max_rank(max_rank),
        }
    }

    /// Keep every nonzero singular value.
    pub fn exact() -> Self {
        Self::with_rtol(0.0)
    }
}

/// Options for block-sparse contraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractOptions {
    /// Run block-pair products on the rayon pool.
    pub parallel: bool,
    /// Remove output blocks that end up exactly zero.
    pub prune_zeros: bool,
    /// Drop output sectors that carry no block. Compacted outputs get fresh
    /// shapes and no longer contract against legs built from the inputs.
    pub compact_sectors: bool,
}

impl Default for ContractOptions {
    /// Current engine settings, see [`EngineDefaults::contract_options`].
    fn default() -> Self {
        DEFAULTS.contract_options()
    }
}

impl ContractOptions {
    /// Single-threaded execution.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    #[must_use]
    pub fn with_prune_zeros(mut self, prune: bool) -> Self {
        self.prune_zeros = prune;
        self
    }

    #[must_use]
    pub fn with_compact_sectors(mut self, compact: bool) -> Self {
        self.compact_sectors = compact;
        self
    }
}

/// Rank kept by the relative Frobenius criterion (at least 1 when any value
/// is present). `values` must be sorted in descending order.
pub(crate) fn retained_rank(values: &[f64], rtol: f64) -> usize {
    if values.is_empty() {
        return 0;
    }
    let total: f64 = values.iter().map(|s| s * s).sum();
    if total == 0.0 {
        return 1;
    }
    let threshold = rtol * rtol * total;
    let mut discarded = 0.0;
    let mut r = values.len();
    for i in (0..values.len()).rev() {
        let sq = values[i] * values[i];
        if discarded + sq <= threshold {
            discarded += sq;
            r = i;
        } else {
            break;
        }
    }
    r.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults_validate() {
        let d = EngineDefaults::new();
        assert_eq!(d.svd_rtol(), 1e-12);
        d.set_svd_rtol(1e-8).unwrap();
        assert_eq!(d.svd_rtol(), 1e-8);
        assert!(matches!(d.set_svd_rtol(f64::NAN), Err(ConfigError::InvalidRtol(v)) if v.is_nan()));
        assert!(d.set_svd_rtol(-1.0).is_err());
        assert_eq!(d.svd_rtol(), 1e-8);
        assert_eq!(d.set_svd_max_rank(Some(0)), Err(ConfigError::ZeroMaxRank));
        assert_eq!(d.svd_max_rank(), None);
        d.reset();
        assert_eq!(d.svd_rtol(), 1e-12);
    }

    #[test]
    fn test_truncation_resolves_against_settings() {
        let d = EngineDefaults::new();
        d.set_svd_rtol(0.5).unwrap();
        d.set_svd_max_rank(Some(7)).unwrap();
        assert_eq!(d.resolve(&TruncationParams::new()), (0.5, 7));
        let p = TruncationParams::new().with_rtol(1e-6).with_max_rank(4);
        assert_eq!(d.resolve(&p), (1e-6, 4));
        d.set_svd_max_rank(None).unwrap();
        assert_eq!(d.resolve(&TruncationParams::new().with_rtol(0.0)), (0.0, usize::MAX));
    }

    #[test]
    fn test_contract_options_follow_settings() {
        let d = EngineDefaults::new();
        d.set_parallel(false);
        d.set_prune_zeros(false);
        let o = d.contract_options();
        assert!(!o.parallel && !o.prune_zeros && !o.compact_sectors);
        d.reset();
        assert_eq!(d.contract_options(), EngineDefaults::new().contract_options());
    }

    #[test]
    fn test_retained_rank() {
        let s = [10.0, 1.0, 0.1, 0.01];
        assert_eq!(retained_rank(&s, 0.0), 4);
        assert_eq!(retained_rank(&s, 0.02), 2);
        assert_eq!(retained_rank(&s, 1.0), 1);
        assert_eq!(retained_rank(&[0.0, 0.0], 0.1), 1);
        assert_eq!(retained_rank(&[], 0.1), 0);
    }

    #[test]
    fn test_contract_options() {
        let o = EngineDefaults::new().contract_options();
        assert!(o.parallel && o.prune_zeros && !o.compact_sectors);
        let s = ContractOptions::sequential().with_compact_sectors(true);
        assert!(!s.parallel && s.compact_sectors);
    }
}
