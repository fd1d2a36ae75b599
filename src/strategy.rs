//! Cache strategies for batched lookups.
//!
//! Every `find` runs under one of four strategies:
//!
//! ```
//! use cache_table::strategy::CacheStrategy;
//!
//! // 1. Fresh - cache only
//! let _s = CacheStrategy::Fresh;
//!
//! // 2. Refresh - cache first, one relational fetch for the misses (default)
//! let _s = CacheStrategy::Refresh;
//!
//! // 3. Invalidate - drop the keys, refetch and repopulate
//! let _s = CacheStrategy::Invalidate;
//!
//! // 4. Bypass - skip the cache read, refetch and repopulate
//! let _s = CacheStrategy::Bypass;
//! ```
//!
//! | Strategy | Cache read | Relational fetch | Repopulate | Not-found warning |
//! |----------|-----------|------------------|------------|-------------------|
//! | **Fresh** | yes | never | no | no |
//! | **Refresh** | yes | misses only | misses | yes |
//! | **Invalidate** | keys deleted first | all values | all found | yes |
//! | **Bypass** | no | all values | all found | yes |

/// Strategy controlling how a batched lookup uses the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// **Fresh**: cache only, no relational fallback.
    ///
    /// Misses come back as absent slots without a warning.
    Fresh,

    /// **Refresh**: read-through.
    ///
    /// Flow:
    /// 1. One multi-get for every distinct lookup value
    /// 2. One relational fetch for the misses
    /// 3. One multi-set for the rows found
    #[default]
    Refresh,

    /// **Invalidate**: delete the keys, then behave like `Bypass`.
    ///
    /// Typical use: after out-of-band writes to the relational store.
    Invalidate,

    /// **Bypass**: ignore cached entries, fetch every value and repopulate.
    Bypass,
}

impl CacheStrategy {
    /// Whether cached entries are read.
    pub fn reads_cache(&self) -> bool {
        matches!(self, CacheStrategy::Fresh | CacheStrategy::Refresh)
    }

    /// Whether misses fall back to the relational store.
    pub fn falls_back(&self) -> bool {
        !matches!(self, CacheStrategy::Fresh)
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStrategy::Fresh => write!(f, "Fresh"),
            CacheStrategy::Refresh => write!(f, "Refresh"),
            CacheStrategy::Invalidate => write!(f, "Invalidate"),
            CacheStrategy::Bypass => write!(f, "Bypass"),
        }
    }
}
