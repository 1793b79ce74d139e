//! Memoization of aggregation results.
//!
//! Entries have no TTL; they live until invalidated. Each key owns a slot
//! guarded by its own lock, so at most one computation runs per key while
//! different keys proceed independently. Invalidation detaches slots from
//! the map, so callers arriving afterwards always start from an empty slot.
//!
//! A computation already running when its key is invalidated finishes into
//! the detached slot. Its caller still receives that result, but it is never
//! served to later callers: they compute again from the current data, even
//! while the detached computation is still in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::selector::TaskFilter;
use crate::types::AggregationResult;
use crate::window::{TimePeriod, TimeWindow};

/// Identifies one cached aggregation.
///
/// Keys for explicit windows carry the window bounds. Keys for rolling
/// periods carry only the period label: the window is resolved when the
/// entry is computed and stays fixed until the entry is invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Period or report label.
    pub label: String,
    /// Window bounds, or `None` for a rolling period.
    pub window: Option<TimeWindow>,
    /// Scope filters.
    pub filter: TaskFilter,
}

impl CacheKey {
    /// Creates a key for an explicit window.
    #[must_use]
    pub fn new(label: impl Into<String>, window: TimeWindow, filter: TaskFilter) -> Self {
        Self {
            label: label.into(),
            window: Some(window),
            filter,
        }
    }

    /// Creates a key for a rolling period ending at computation time.
    #[must_use]
    pub fn for_period(period: TimePeriod, filter: TaskFilter) -> Self {
        Self {
            label: period.as_str().to_string(),
            window: None,
            filter,
        }
    }

    /// Returns true for rolling period keys.
    #[must_use]
    pub const fn is_rolling(&self) -> bool {
        self.window.is_none()
    }
}

/// A cached result and when it was computed.
#[derive(Debug, Clone)]
pub struct CachedAggregation {
    /// The shared result.
    pub result: Arc<AggregationResult>,
    /// When the result was computed.
    pub computed_at: DateTime<Utc>,
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that ran a computation.
    pub misses: u64,
    /// Keys currently present.
    pub entries: usize,
}

type Slot = Arc<Mutex<Option<CachedAggregation>>>;

/// Single-flight cache of aggregation results.
#[derive(Debug)]
pub struct StatisticsCache {
    enabled: bool,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for StatisticsCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StatisticsCache {
    /// Creates a cache. A disabled cache computes on every call.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            slots: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Uses `clock` for `computed_at` timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns true if results are stored.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the cached result for `key`, computing it if absent.
    ///
    /// Concurrent callers for the same key wait for the running computation.
    /// A failed computation is not stored; the next caller computes again.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `compute`.
    pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> Result<CachedAggregation>
    where
        F: FnOnce() -> Result<AggregationResult>,
    {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(self.wrap(compute()?));
        }

        let slot = Arc::clone(self.slots.lock().entry(key.clone()).or_default());
        let mut guard = slot.lock();

        if let Some(cached) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(label = %key.label, window = ?key.window, "statistics cache hit");
            return Ok(cached.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(label = %key.label, window = ?key.window, "statistics cache miss");
        let cached = self.wrap(compute()?);
        *guard = Some(cached.clone());
        Ok(cached)
    }

    /// Returns the cached result for `key` without computing or waiting.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CachedAggregation> {
        let slot = self.slots.lock().get(key).cloned()?;
        let guard = slot.try_lock()?;
        guard.clone()
    }

    /// Drops the entry for `key`.
    ///
    /// An in-flight computation for `key` is not awaited and its result is
    /// not stored.
    pub fn invalidate(&self, key: &CacheKey) {
        if self.slots.lock().remove(key).is_some() {
            debug!(label = %key.label, window = ?key.window, "invalidated statistics cache entry");
        }
    }

    /// Drops every entry.
    pub fn invalidate_all(&self) {
        let dropped = {
            let mut slots = self.slots.lock();
            let n = slots.len();
            slots.clear();
            n
        };
        info!(entries = dropped, "statistics cache cleared");
    }

    /// Returns the number of keys with a slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns true if no key has a slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Returns hit and miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn wrap(&self, result: AggregationResult) -> CachedAggregation {
        CachedAggregation {
            result: Arc::new(result),
            computed_at: self.clock.now(),
        }
    }
}
