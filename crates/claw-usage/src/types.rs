//! Core types for usage aggregation.
//!
//! This module provides the record and summary types used throughout the crate:
//! - [`TaskRecord`]: a raw GPU task lifecycle record as read from the source
//! - [`TaskSummary`]: the immutable projection of a record used by aggregation
//! - [`GpuSummary`], [`ProjectSummary`], [`PersonSummary`]: per-key summaries
//! - [`AggregationResult`]: the snapshot produced by one aggregation pass

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UsageError};
use crate::sleep::SleepAnalysis;
use crate::window::TimeWindow;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The task is still running.
    #[default]
    Running,
    /// The task has finished.
    Finished,
}

/// A raw GPU task record reported by a cluster machine.
///
/// Records are read-only input. Identity is `task_id`; the same task may be
/// reported more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identity.
    pub task_id: String,
    /// Owner of the task.
    pub user: String,
    /// Machine the task ran on.
    #[serde(default)]
    pub machine: String,
    /// GPU model name.
    #[serde(default)]
    pub gpu_model: String,
    /// Project the task belongs to.
    #[serde(default)]
    pub project: String,
    /// Start instant. A record without one cannot be placed in time.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Finish instant, unset while running.
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
    /// Reported lifecycle state.
    #[serde(default)]
    pub status: TaskStatus,
    /// GPU utilization in percent.
    #[serde(default)]
    pub gpu_usage_percent: f64,
    /// GPU memory utilization in percent.
    #[serde(default)]
    pub gpu_memory_percent: f64,
    /// GPU memory used, in GiB.
    #[serde(default)]
    pub gpu_memory_gb: f64,
    /// Number of devices the job spans.
    #[serde(default = "default_gpu_count")]
    pub gpu_count: u32,
    /// Rank of the reporting process within a multi-device job.
    #[serde(default)]
    pub local_rank: u32,
}

const fn default_gpu_count() -> u32 {
    1
}

impl TaskRecord {
    /// Creates a running record with the given identity and owner.
    #[must_use]
    pub fn new(task_id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            user: user.into(),
            machine: String::new(),
            gpu_model: String::new(),
            project: String::new(),
            start_time: None,
            finish_time: None,
            status: TaskStatus::Running,
            gpu_usage_percent: 0.0,
            gpu_memory_percent: 0.0,
            gpu_memory_gb: 0.0,
            gpu_count: 1,
            local_rank: 0,
        }
    }

    /// Sets the machine.
    #[must_use]
    pub fn with_machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = machine.into();
        self
    }

    /// Sets the GPU model.
    #[must_use]
    pub fn with_gpu_model(mut self, gpu_model: impl Into<String>) -> Self {
        self.gpu_model = gpu_model.into();
        self
    }

    /// Sets the project.
    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Sets the start instant.
    #[must_use]
    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    /// Sets the finish instant and marks the task finished.
    #[must_use]
    pub fn with_finish(mut self, finish: DateTime<Utc>) -> Self {
        self.finish_time = Some(finish);
        self.status = TaskStatus::Finished;
        self
    }

    /// Sets the device count and this record's rank.
    #[must_use]
    pub fn with_gpus(mut self, gpu_count: u32, local_rank: u32) -> Self {
        self.gpu_count = gpu_count;
        self.local_rank = local_rank;
        self
    }

    /// Sets the utilization figures.
    #[must_use]
    pub fn with_usage(mut self, usage_percent: f64, memory_percent: f64, memory_gb: f64) -> Self {
        self.gpu_usage_percent = usage_percent;
        self.gpu_memory_percent = memory_percent;
        self.gpu_memory_gb = memory_gb;
        self
    }

    /// Returns true once a finish instant is known.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finish_time.is_some()
    }

    /// Returns the finish instant, or `now` for a running task.
    #[must_use]
    pub fn effective_finish(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.finish_time.unwrap_or(now)
    }

    /// Returns true if this record is a secondary rank of a multi-device job.
    #[must_use]
    pub const fn is_secondary_rank(&self) -> bool {
        self.gpu_count > 1 && self.local_rank != 0
    }
}

/// Immutable projection of a [`TaskRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task identity.
    pub task_id: String,
    /// Owner.
    pub user: String,
    /// Project name.
    pub project: String,
    /// GPU model name.
    pub gpu_model: String,
    /// Machine name.
    pub machine: String,
    /// Start instant.
    pub start_time: DateTime<Utc>,
    /// Run time in seconds.
    pub run_time_secs: u64,
    /// Number of devices.
    pub gpu_count: u32,
}

impl TaskSummary {
    /// Projects a record, measuring unfinished tasks up to `now`.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::DataQuality` if the task id, GPU model or start
    /// time is missing.
    pub fn from_record(record: &TaskRecord, now: DateTime<Utc>) -> Result<Self> {
        let malformed = |reason: &str| UsageError::DataQuality {
            task_id: record.task_id.clone(),
            reason: reason.to_string(),
        };

        if record.task_id.trim().is_empty() {
            return Err(malformed("missing task id"));
        }
        if record.gpu_model.trim().is_empty() {
            return Err(malformed("missing gpu model"));
        }
        let start_time = record.start_time.ok_or_else(|| malformed("missing start time"))?;

        let elapsed = (record.effective_finish(now) - start_time).num_seconds();

        Ok(Self {
            task_id: record.task_id.clone(),
            user: record.user.clone(),
            project: record.project.clone(),
            gpu_model: record.gpu_model.clone(),
            machine: record.machine.clone(),
            start_time,
            run_time_secs: u64::try_from(elapsed).unwrap_or(0),
            gpu_count: record.gpu_count.max(1),
        })
    }
}

/// Cumulative use time for one key (a machine or a GPU model).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSummary {
    /// Machine name or GPU model name.
    pub key: String,
    /// Accumulated run time in seconds.
    pub cumulative_use_secs: u64,
}

impl GpuSummary {
    /// Creates an empty summary.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            cumulative_use_secs: 0,
        }
    }
}

/// The tasks of one project, in the order they were added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    /// Project name.
    pub name: String,
    /// Tasks belonging to the project.
    pub tasks: Vec<TaskSummary>,
}

impl ProjectSummary {
    /// Creates an empty project.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    /// Adds a task if it belongs to this project and is not present yet.
    ///
    /// Returns true if the task was added.
    pub fn add_task(&mut self, task: &TaskSummary) -> bool {
        if task.project != self.name || self.contains(&task.task_id) {
            return false;
        }
        self.tasks.push(task.clone());
        true
    }

    /// Returns true if a task with this id is present.
    #[must_use]
    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.iter().any(|t| t.task_id == task_id)
    }

    /// Returns the sum of task run times in seconds.
    #[must_use]
    pub fn total_run_secs(&self) -> u64 {
        self.tasks.iter().map(|t| t.run_time_secs).sum()
    }
}

/// Usage summary for one person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonSummary {
    /// Person name.
    pub person: String,
    /// Accumulated run time in seconds.
    pub cumulative_use_secs: u64,
    /// Run time per GPU model.
    pub gpu_model_use: Vec<GpuSummary>,
    /// Projects this person worked on.
    pub projects: Vec<ProjectSummary>,
    /// Task with the latest start within one logical day.
    pub latest_start_task: Option<TaskSummary>,
    /// Task using the most devices.
    pub most_gpu_task: Option<TaskSummary>,
    /// Task with the longest run time.
    pub longest_gpu_task: Option<TaskSummary>,
}

impl PersonSummary {
    /// Creates an empty summary.
    #[must_use]
    pub fn new(person: impl Into<String>) -> Self {
        Self {
            person: person.into(),
            cumulative_use_secs: 0,
            gpu_model_use: Vec::new(),
            projects: Vec::new(),
            latest_start_task: None,
            most_gpu_task: None,
            longest_gpu_task: None,
        }
    }

    /// Returns the number of distinct tasks across this person's projects.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.projects.iter().map(|p| p.tasks.len()).sum()
    }

    /// Looks up one of this person's projects.
    #[must_use]
    pub fn project(&self, name: &str) -> Option<&ProjectSummary> {
        self.projects.iter().find(|p| p.name == name)
    }
}

/// Immutable snapshot produced by one aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    /// The window that was aggregated.
    pub window: TimeWindow,
    /// Use time per machine.
    pub gpu_list: Vec<GpuSummary>,
    /// Use time per GPU model.
    pub gpu_model_list: Vec<GpuSummary>,
    /// Cluster-wide projects.
    pub projects: Vec<ProjectSummary>,
    /// Per-person summaries.
    pub persons: Vec<PersonSummary>,
    /// Person whose latest start today is the latest.
    pub daily_sleep_late_champion: Option<String>,
    /// Late-night and early-morning activity.
    pub sleep: SleepAnalysis,
    /// Distinct tasks aggregated.
    pub task_count: usize,
    /// Records skipped because they were malformed.
    pub data_quality_errors: usize,
    /// Records skipped because their task id was already seen.
    pub duplicates_skipped: usize,
}

impl AggregationResult {
    /// Creates an empty result for a window.
    #[must_use]
    pub fn empty(window: TimeWindow) -> Self {
        Self {
            window,
            gpu_list: Vec::new(),
            gpu_model_list: Vec::new(),
            projects: Vec::new(),
            persons: Vec::new(),
            daily_sleep_late_champion: None,
            sleep: SleepAnalysis::default(),
            task_count: 0,
            data_quality_errors: 0,
            duplicates_skipped: 0,
        }
    }

    /// Returns the total run time across all persons, in seconds.
    #[must_use]
    pub fn total_use_secs(&self) -> u64 {
        self.persons.iter().map(|p| p.cumulative_use_secs).sum()
    }

    /// Looks up a person by name.
    #[must_use]
    pub fn person(&self, name: &str) -> Option<&PersonSummary> {
        self.persons.iter().find(|p| p.person == name)
    }

    /// Looks up a cluster-wide project by name.
    #[must_use]
    pub fn project(&self, name: &str) -> Option<&ProjectSummary> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Returns true if no task was aggregated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.task_count == 0
    }
}
