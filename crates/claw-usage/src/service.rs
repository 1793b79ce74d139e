//! Statistics service tying a record source, the cache and the engine together.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::aggregate::{AggregationContext, AggregationEngine};
use crate::cache::{CacheKey, CachedAggregation, StatisticsCache};
use crate::clock::Clock;
use crate::error::{Result, UsageError};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::selector::TaskFilter;
use crate::source::TaskSource;
use crate::types::{AggregationResult, TaskRecord};
use crate::window::{LogicalDay, TimePeriod, TimeWindow};

/// Immutable settings for a [`UsageService`].
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSettings {
    /// Logical day definition.
    pub logical_day: LogicalDay,
    /// Drop non-zero ranks of multi-device jobs.
    pub filter_multi_gpu: bool,
    /// Store results in the cache.
    pub cache_enabled: bool,
    /// Retry policy for source queries.
    pub retry: RetryPolicy,
    /// Upper bound for a single source query; `None` waits indefinitely.
    pub source_timeout: Option<Duration>,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            logical_day: LogicalDay::default(),
            filter_multi_gpu: true,
            cache_enabled: true,
            retry: RetryPolicy::default(),
            source_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Computes and caches usage statistics.
pub struct UsageService {
    source: Arc<dyn TaskSource>,
    cache: StatisticsCache,
    clock: Arc<dyn Clock>,
    settings: UsageSettings,
}

impl std::fmt::Debug for UsageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageService")
            .field("source", &self.source.name())
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl UsageService {
    /// Creates a service.
    #[must_use]
    pub fn new(source: Arc<dyn TaskSource>, clock: Arc<dyn Clock>, settings: UsageSettings) -> Self {
        let cache = StatisticsCache::new(settings.cache_enabled).with_clock(Arc::clone(&clock));
        Self {
            source,
            cache,
            clock,
            settings,
        }
    }

    /// Returns the service settings.
    #[must_use]
    pub const fn settings(&self) -> &UsageSettings {
        &self.settings
    }

    /// Returns the result cache.
    #[must_use]
    pub const fn cache(&self) -> &StatisticsCache {
        &self.cache
    }

    /// Returns the service clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns cached statistics for a named period ending now.
    ///
    /// The entry is keyed by period and filter. Its window is resolved when
    /// it is computed, so repeated calls hit the cache until it is
    /// invalidated.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::SourceUnavailable` or `UsageError::SourceTimeout`
    /// once retries are exhausted.
    pub fn statistics(&self, period: TimePeriod, filter: TaskFilter) -> Result<CachedAggregation> {
        let key = CacheKey::for_period(period, filter);
        self.cache.get_or_compute(&key, || {
            let window = TimeWindow::for_period(period, self.clock.now());
            self.compute(&window, &key.filter)
        })
    }

    /// Returns cached statistics for an explicit window.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::SourceUnavailable` once retries are exhausted.
    pub fn statistics_for_window(
        &self,
        label: &str,
        window: TimeWindow,
        filter: TaskFilter,
    ) -> Result<CachedAggregation> {
        let key = CacheKey::new(label, window, filter);
        self.cache.get_or_compute(&key, || self.compute(&window, &key.filter))
    }

    /// Aggregates a window without consulting the cache.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::SourceUnavailable` once retries are exhausted.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub fn compute(&self, window: &TimeWindow, filter: &TaskFilter) -> Result<AggregationResult> {
        let now = self.clock.now();
        let records = retry_with_backoff(&self.settings.retry, UsageError::is_retryable, || {
            self.query_source(window, filter, now)
        })?;

        let context = AggregationContext::new(now)
            .with_logical_day(self.settings.logical_day)
            .with_multi_gpu_filter(self.settings.filter_multi_gpu);
        let result = AggregationEngine::new(context).aggregate(&records, *window);

        info!(
            window = %window,
            records = records.len(),
            tasks = result.task_count,
            data_quality_errors = result.data_quality_errors,
            "computed usage statistics"
        );
        Ok(result)
    }

    /// Drops every cached result.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Runs one source query, bounded by `source_timeout`.
    ///
    /// The query runs on a worker thread. On timeout the worker is left to
    /// finish on its own and its result is discarded.
    fn query_source(&self, window: &TimeWindow, filter: &TaskFilter, now: DateTime<Utc>) -> Result<Vec<TaskRecord>> {
        let Some(timeout) = self.settings.source_timeout else {
            return self.source.query(window, filter, now);
        };

        let (tx, rx) = mpsc::channel();
        let source = Arc::clone(&self.source);
        let window = *window;
        let filter = filter.clone();
        thread::Builder::new()
            .name("usage-source-query".to_string())
            .spawn(move || {
                // The receiver is gone once the caller timed out.
                let _ = tx.send(source.query(&window, &filter, now));
            })
            .map_err(|e| UsageError::SourceUnavailable {
                reason: format!("failed to start query worker: {e}"),
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(source = self.source.name(), timeout_ms, "source query timed out");
                Err(UsageError::SourceTimeout { timeout_ms })
            }
            Err(RecvTimeoutError::Disconnected) => Err(UsageError::SourceUnavailable {
                reason: "query worker exited without a result".to_string(),
            }),
        }
    }
}
