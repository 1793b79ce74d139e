//! Report scheduling with catch-up delivery.
//!
//! The scheduler owns the per-kind run markers. For every kind it pushes each
//! boundary after the marker, oldest first, and advances the marker only
//! after the channel confirms delivery. Pushes of one kind are serialized, so
//! the timer, on-demand pushes and catch-up never deliver a boundary twice.
//!
//! Timer and catch-up pushes wait for each kind's delivery hour: a boundary
//! becomes due once its delivery delay has elapsed. On-demand pushes ignore
//! the delay.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use claw_usage::{retry_with_backoff, RetryPolicy, TaskFilter, UsageService};

use crate::channels::{DeliveryResult, ReportChannel};
use crate::config::ReportingConfig;
use crate::error::{ReportError, Result};
use crate::kind::ReportKind;
use crate::markers::RunMarkerStore;
use crate::report::Report;

/// Whether a kind is currently being pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A push is in flight.
    Running,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Outcome of one push attempt for a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// These boundaries were delivered, oldest first.
    Delivered {
        /// Delivered boundaries.
        boundaries: Vec<DateTime<Utc>>,
    },
    /// Nothing was due; `boundary` is the current marker.
    UpToDate {
        /// The latest delivered boundary.
        boundary: DateTime<Utc>,
    },
    /// The kind is not enabled for scheduled pushes.
    Disabled,
}

impl PushOutcome {
    /// Returns the number of delivered reports.
    #[must_use]
    pub fn delivered(&self) -> usize {
        match self {
            Self::Delivered { boundaries } => boundaries.len(),
            Self::UpToDate { .. } | Self::Disabled => 0,
        }
    }
}

/// Per-kind outcomes of a catch-up pass.
#[derive(Debug, Default)]
pub struct CatchUpReport {
    /// Outcome per kind, shortest kind first.
    pub outcomes: Vec<(ReportKind, Result<PushOutcome>)>,
}

impl CatchUpReport {
    /// Returns the total number of delivered reports.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| outcome.as_ref().ok())
            .map(PushOutcome::delivered)
            .sum()
    }

    /// Returns the kinds whose catch-up stopped on an error.
    #[must_use]
    pub fn failed_kinds(&self) -> Vec<ReportKind> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_err())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Returns true if no kind failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_ok())
    }
}

/// Immutable scheduler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Offset in which boundaries are aligned.
    pub offset: FixedOffset,
    /// Kinds pushed by the timer and catch-up.
    pub enabled_kinds: Vec<ReportKind>,
    /// Retry policy for deliveries.
    pub delivery_retry: RetryPolicy,
    /// Time after a boundary before its report is due, indexed by kind.
    pub delivery_delays: [Duration; 4],
    /// Local hour of the daily missing-report check; `None` disables it.
    pub missing_check_hour: Option<u32>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
            enabled_kinds: ReportKind::ALL.to_vec(),
            delivery_retry: RetryPolicy::default(),
            delivery_delays: ReportKind::ALL.map(|kind| Duration::hours(i64::from(kind.default_delivery_hour()))),
            missing_check_hour: Some(5),
        }
    }
}

impl SchedulerSettings {
    /// Derives scheduler settings from the reporting configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured offset is out of range.
    pub fn from_config(config: &ReportingConfig) -> Result<Self> {
        Ok(Self {
            offset: config.offset()?,
            enabled_kinds: config.enabled_kinds.clone(),
            delivery_retry: config.retry.clone(),
            delivery_delays: ReportKind::ALL.map(|kind| Duration::hours(i64::from(config.delivery_hours.hour(kind)))),
            missing_check_hour: Some(config.missing_check_hour),
        })
    }

    /// Returns how long after a boundary the report of `kind` is due.
    #[must_use]
    pub const fn delivery_delay(&self, kind: ReportKind) -> Duration {
        self.delivery_delays[kind.index()]
    }

    /// Sets the boundary offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the enabled kinds.
    #[must_use]
    pub fn with_enabled_kinds(mut self, kinds: impl IntoIterator<Item = ReportKind>) -> Self {
        self.enabled_kinds = kinds.into_iter().collect();
        self
    }

    /// Sets the delivery retry policy.
    #[must_use]
    pub fn with_delivery_retry(mut self, policy: RetryPolicy) -> Self {
        self.delivery_retry = policy;
        self
    }

    /// Sets the delivery delay of `kind`.
    #[must_use]
    pub const fn with_delivery_delay(mut self, kind: ReportKind, delay: Duration) -> Self {
        self.delivery_delays[kind.index()] = delay;
        self
    }

    /// Sets the local hour of the daily missing-report check.
    #[must_use]
    pub const fn with_missing_check_hour(mut self, hour: Option<u32>) -> Self {
        self.missing_check_hour = hour;
        self
    }
}

/// Pushes periodic reports and catches up on missed ones.
#[derive(Debug)]
pub struct ReportScheduler {
    usage: Arc<UsageService>,
    channel: Arc<dyn ReportChannel>,
    markers: Arc<dyn RunMarkerStore>,
    settings: SchedulerSettings,
    locks: [Mutex<()>; 4],
    states: RwLock<HashMap<ReportKind, RunState>>,
    last_missing_check: Mutex<Option<NaiveDate>>,
}

impl ReportScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        usage: Arc<UsageService>,
        channel: Arc<dyn ReportChannel>,
        markers: Arc<dyn RunMarkerStore>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            usage,
            channel,
            markers,
            settings,
            locks: Default::default(),
            states: RwLock::new(HashMap::new()),
            last_missing_check: Mutex::new(None),
        }
    }

    /// Returns the scheduler settings.
    #[must_use]
    pub const fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Returns the statistics service.
    #[must_use]
    pub fn usage(&self) -> &Arc<UsageService> {
        &self.usage
    }

    /// Returns true if `kind` is pushed by the timer and catch-up.
    #[must_use]
    pub fn is_enabled(&self, kind: ReportKind) -> bool {
        self.settings.enabled_kinds.contains(&kind)
    }

    /// Returns the current run state of `kind`.
    #[must_use]
    pub fn state(&self, kind: ReportKind) -> RunState {
        self.states.read().get(&kind).copied().unwrap_or_default()
    }

    /// Returns the next boundary of `kind` after now.
    #[must_use]
    pub fn next_boundary(&self, kind: ReportKind) -> DateTime<Utc> {
        kind.next_boundary(self.usage.clock().now(), self.settings.offset)
    }

    /// Pushes every passed boundary of `kind` now, enabled or not, without
    /// waiting for its delivery hour.
    ///
    /// Calling this again before the next boundary returns
    /// [`PushOutcome::UpToDate`].
    ///
    /// # Errors
    ///
    /// Returns the first error that stopped delivery. Boundaries delivered
    /// before it keep their markers.
    pub fn push_now(&self, kind: ReportKind) -> Result<PushOutcome> {
        info!(kind = %kind, "pushing report on demand");
        self.push_pending(kind, Duration::zero())
    }

    /// Timer entry point: pushes due boundaries of an enabled kind.
    ///
    /// # Errors
    ///
    /// Returns the first error that stopped delivery.
    pub fn run_scheduled(&self, kind: ReportKind) -> Result<PushOutcome> {
        if !self.is_enabled(kind) {
            debug!(kind = %kind, "report kind disabled, skipping");
            return Ok(PushOutcome::Disabled);
        }
        self.push_pending(kind, self.settings.delivery_delay(kind))
    }

    /// Runs [`Self::check_and_push_missing_reports`] once per local day, on
    /// the first call at or after the missing-check hour.
    ///
    /// Returns `None` when the check is not due.
    pub fn run_missing_check_if_due(&self) -> Option<CatchUpReport> {
        let hour = self.settings.missing_check_hour?;
        let local = self.usage.clock().now().with_timezone(&self.settings.offset);
        if local.hour() < hour {
            return None;
        }
        {
            let mut last = self.last_missing_check.lock();
            if *last == Some(local.date_naive()) {
                return None;
            }
            *last = Some(local.date_naive());
        }
        info!(date = %local.date_naive(), "running daily missing-report check");
        Some(self.check_and_push_missing_reports())
    }

    /// Pushes every due boundary of every enabled kind.
    ///
    /// A failing kind does not stop the others.
    pub fn check_and_push_missing_reports(&self) -> CatchUpReport {
        let mut report = CatchUpReport::default();
        for kind in ReportKind::ALL {
            if !self.is_enabled(kind) {
                info!(kind = %kind, "report kind disabled, skipping catch-up");
                report.outcomes.push((kind, Ok(PushOutcome::Disabled)));
                continue;
            }
            let outcome = self.push_pending(kind, self.settings.delivery_delay(kind));
            report.outcomes.push((kind, outcome));
        }
        info!(
            delivered = report.delivered(),
            failed = report.failed_kinds().len(),
            "catch-up finished"
        );
        report
    }

    /// Drops all cached statistics so the next report recomputes them.
    pub fn update_statistics_cache(&self) {
        self.usage.invalidate_all();
    }

    /// Pushes boundaries after the marker that are at least `delay` old.
    fn push_pending(&self, kind: ReportKind, delay: Duration) -> Result<PushOutcome> {
        let _lock = self.locks[kind.index()].lock();
        let _running = RunningGuard::enter(&self.states, kind);

        let offset = self.settings.offset;
        let due_by = self.usage.clock().now() - delay;
        let marker = match self.markers.load(kind)? {
            Some(marker) => marker,
            None => {
                let start = kind.previous_boundary(kind.floor_boundary(due_by, offset), offset);
                info!(kind = %kind, from = %start, "no marker found, starting at latest due boundary");
                start
            }
        };

        let pending = kind.boundaries_between(marker, due_by, offset);
        if pending.is_empty() {
            debug!(kind = %kind, marker = %marker, "report up to date");
            return Ok(PushOutcome::UpToDate { boundary: marker });
        }

        let mut delivered = Vec::with_capacity(pending.len());
        for boundary in pending {
            if let Err(e) = self.push_boundary(kind, boundary) {
                error!(kind = %kind, boundary = %boundary, error = %e, "report push failed, marker not advanced");
                return Err(e);
            }
            self.markers.save(kind, boundary)?;
            delivered.push(boundary);
        }
        Ok(PushOutcome::Delivered { boundaries: delivered })
    }

    fn push_boundary(&self, kind: ReportKind, boundary: DateTime<Utc>) -> Result<DeliveryResult> {
        let offset = self.settings.offset;
        let window = kind.window_for(boundary, offset);
        let stats = self
            .usage
            .statistics_for_window(kind.as_str(), window, TaskFilter::all())?;
        let report = Report::new(kind, boundary, stats.result, self.usage.clock().now(), offset);

        let result = retry_with_backoff(&self.settings.delivery_retry, ReportError::is_retryable, || {
            self.channel.deliver(&report)?.into_result()
        })?;

        info!(
            kind = %kind,
            boundary = %boundary,
            channel = %result.channel,
            tasks = report.result.task_count,
            "report delivered"
        );
        Ok(result)
    }
}

struct RunningGuard<'a> {
    states: &'a RwLock<HashMap<ReportKind, RunState>>,
    kind: ReportKind,
}

impl<'a> RunningGuard<'a> {
    fn enter(states: &'a RwLock<HashMap<ReportKind, RunState>>, kind: ReportKind) -> Self {
        states.write().insert(kind, RunState::Running);
        Self { states, kind }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.states.write().insert(self.kind, RunState::Idle);
    }
}
