//! Generated reports.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use claw_usage::{AggregationResult, TimeWindow};

use crate::kind::ReportKind;

/// A report ready for delivery.
#[derive(Debug, Clone)]
pub struct Report {
    /// Unique report id.
    pub id: Uuid,
    /// Report kind.
    pub kind: ReportKind,
    /// Boundary that closed the window.
    pub boundary: DateTime<Utc>,
    /// The window covered.
    pub window: TimeWindow,
    /// Statistics for the window.
    pub result: Arc<AggregationResult>,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Offset used when rendering local times.
    pub offset: FixedOffset,
}

impl Report {
    /// Creates a report for the window closed by `boundary`.
    #[must_use]
    pub fn new(
        kind: ReportKind,
        boundary: DateTime<Utc>,
        result: Arc<AggregationResult>,
        generated_at: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            boundary,
            window: kind.window_for(boundary, offset),
            result,
            generated_at,
            offset,
        }
    }

    /// Returns a serializable digest of this report.
    #[must_use]
    pub fn summary(&self) -> ReportSummary {
        let top = self.kind.top_n();
        let result = &self.result;
        ReportSummary {
            id: self.id.to_string(),
            kind: self.kind,
            window_start: self.window.start,
            window_end: self.window.end,
            total_tasks: result.task_count,
            total_run_secs: result.total_use_secs(),
            active_users: result.persons.len(),
            top_users: result
                .persons
                .iter()
                .take(top.users)
                .map(|p| RankedEntry {
                    name: p.person.clone(),
                    run_secs: p.cumulative_use_secs,
                    tasks: p.task_count(),
                })
                .collect(),
            top_gpus: result
                .gpu_model_list
                .iter()
                .take(top.gpus)
                .map(|g| RankedEntry {
                    name: g.key.clone(),
                    run_secs: g.cumulative_use_secs,
                    tasks: 0,
                })
                .collect(),
            top_projects: result
                .projects
                .iter()
                .take(top.projects)
                .map(|p| RankedEntry {
                    name: p.name.clone(),
                    run_secs: p.total_run_secs(),
                    tasks: p.tasks.len(),
                })
                .collect(),
            daily_sleep_late_champion: result.daily_sleep_late_champion.clone(),
            generated_at: self.generated_at,
        }
    }
}

/// One line of a ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// User, GPU model or project name.
    pub name: String,
    /// Accumulated run time in seconds.
    pub run_secs: u64,
    /// Number of tasks, where meaningful.
    pub tasks: usize,
}

/// Serializable digest of a [`Report`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Report id.
    pub id: String,
    /// Report kind.
    pub kind: ReportKind,
    /// Window start.
    pub window_start: DateTime<Utc>,
    /// Window end.
    pub window_end: DateTime<Utc>,
    /// Distinct tasks.
    pub total_tasks: usize,
    /// Total run time in seconds.
    pub total_run_secs: u64,
    /// Users with at least one task.
    pub active_users: usize,
    /// Top users by run time.
    pub top_users: Vec<RankedEntry>,
    /// Top GPU models by run time.
    pub top_gpus: Vec<RankedEntry>,
    /// Top projects by run time.
    pub top_projects: Vec<RankedEntry>,
    /// Person with the latest start today.
    pub daily_sleep_late_champion: Option<String>,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
}
