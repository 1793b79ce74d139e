//! Aggregation of selected task records into usage summaries.
//!
//! One pass folds records into per-machine, per-GPU-model, per-project and
//! per-person summaries:
//!
//! 1. Secondary ranks of multi-device jobs are dropped (when enabled).
//! 2. Each record is projected into a [`TaskSummary`]; malformed records are
//!    counted and skipped.
//! 3. Records whose task id was already seen are counted and skipped.
//! 4. The summary is folded into every per-key aggregate.
//!
//! Record slots on [`PersonSummary`] are updated through [`SlotPolicy`], a
//! comparator plus a strictness flag. All built-in policies are strict, so
//! on ties the task seen first is kept.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::sleep::SleepAnalysis;
use crate::types::{AggregationResult, GpuSummary, PersonSummary, ProjectSummary, TaskRecord, TaskSummary};
use crate::window::{LogicalDay, TimeWindow};

/// Settings for one aggregation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationContext {
    /// Instant running tasks are measured up to.
    pub now: DateTime<Utc>,
    /// Logical day definition used for latest-start comparisons.
    pub logical_day: LogicalDay,
    /// Drop non-zero ranks of multi-device jobs.
    pub filter_multi_gpu: bool,
}

impl AggregationContext {
    /// Creates a context with the default logical day and rank filtering on.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            logical_day: LogicalDay::default(),
            filter_multi_gpu: true,
        }
    }

    /// Sets the logical day definition.
    #[must_use]
    pub const fn with_logical_day(mut self, logical_day: LogicalDay) -> Self {
        self.logical_day = logical_day;
        self
    }

    /// Enables or disables multi-device rank filtering.
    #[must_use]
    pub const fn with_multi_gpu_filter(mut self, enabled: bool) -> Self {
        self.filter_multi_gpu = enabled;
        self
    }
}

/// Compares a candidate with the current slot holder.
///
/// Returns `None` when the two are not comparable, which never replaces.
pub type SlotComparator = fn(&TaskSummary, &TaskSummary, &LogicalDay) -> Option<Ordering>;

/// Replacement policy for a single-task record slot.
#[derive(Debug, Clone, Copy)]
pub struct SlotPolicy {
    compare: SlotComparator,
    strict: bool,
}

impl SlotPolicy {
    /// Latest start, compared only within one logical day.
    pub const LATEST_START: Self = Self {
        compare: |candidate, current, day| {
            day.same_day(candidate.start_time, current.start_time)
                .then(|| candidate.start_time.cmp(&current.start_time))
        },
        strict: true,
    };

    /// Most devices.
    pub const MOST_GPUS: Self = Self {
        compare: |candidate, current, _| Some(candidate.gpu_count.cmp(&current.gpu_count)),
        strict: true,
    };

    /// Longest run time.
    pub const LONGEST_RUN: Self = Self {
        compare: |candidate, current, _| Some(candidate.run_time_secs.cmp(&current.run_time_secs)),
        strict: true,
    };

    /// Creates a custom policy.
    #[must_use]
    pub const fn new(compare: SlotComparator, strict: bool) -> Self {
        Self { compare, strict }
    }

    /// Offers a candidate to a slot. Returns true if the slot was replaced.
    pub fn offer(&self, slot: &mut Option<TaskSummary>, candidate: &TaskSummary, day: &LogicalDay) -> bool {
        let replace = match slot.as_ref() {
            None => true,
            Some(current) => match (self.compare)(candidate, current, day) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => !self.strict,
                Some(Ordering::Less) | None => false,
            },
        };
        if replace {
            *slot = Some(candidate.clone());
        }
        replace
    }
}

/// Folds selected records into an [`AggregationResult`].
#[derive(Debug, Clone, Copy)]
pub struct AggregationEngine {
    context: AggregationContext,
}

impl AggregationEngine {
    /// Creates an engine for one context.
    #[must_use]
    pub const fn new(context: AggregationContext) -> Self {
        Self { context }
    }

    /// Returns the engine's context.
    #[must_use]
    pub const fn context(&self) -> &AggregationContext {
        &self.context
    }

    /// Aggregates records selected for `window`.
    #[must_use]
    pub fn aggregate<'a, I>(&self, records: I, window: TimeWindow) -> AggregationResult
    where
        I: IntoIterator<Item = &'a TaskRecord>,
    {
        let mut acc = Accumulator::default();
        for record in records {
            acc.push(record, &self.context);
        }
        let result = acc.finish(window, &self.context);

        debug!(
            window = %window,
            tasks = result.task_count,
            persons = result.persons.len(),
            data_quality_errors = result.data_quality_errors,
            duplicates = result.duplicates_skipped,
            "aggregation pass complete"
        );
        result
    }
}

/// Aggregates records with a one-off engine.
#[must_use]
pub fn aggregate(records: &[TaskRecord], window: TimeWindow, context: &AggregationContext) -> AggregationResult {
    AggregationEngine::new(*context).aggregate(records, window)
}

/// Cumulative use time per key, in first-seen order.
#[derive(Debug, Default)]
struct Tally {
    entries: Vec<GpuSummary>,
    index: HashMap<String, usize>,
}

impl Tally {
    fn add(&mut self, key: &str, secs: u64) {
        let idx = match self.index.get(key) {
            Some(&idx) => idx,
            None => {
                self.entries.push(GpuSummary::new(key));
                self.index.insert(key.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        self.entries[idx].cumulative_use_secs += secs;
    }

    fn into_sorted(self) -> Vec<GpuSummary> {
        let mut entries = self.entries;
        sort_by_use(&mut entries);
        entries
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    seen: HashSet<String>,
    tasks: Vec<TaskSummary>,
    machines: Tally,
    models: Tally,
    projects: Vec<ProjectSummary>,
    project_index: HashMap<String, usize>,
    persons: Vec<PersonSummary>,
    person_index: HashMap<String, usize>,
    data_quality_errors: usize,
    duplicates_skipped: usize,
}

impl Accumulator {
    fn push(&mut self, record: &TaskRecord, ctx: &AggregationContext) {
        if ctx.filter_multi_gpu && record.is_secondary_rank() {
            trace!(task_id = %record.task_id, rank = record.local_rank, "skipping secondary rank");
            return;
        }

        let task = match TaskSummary::from_record(record, ctx.now) {
            Ok(task) => task,
            Err(err) => {
                debug!(error = %err, "skipping malformed task record");
                self.data_quality_errors += 1;
                return;
            }
        };

        if !self.seen.insert(task.task_id.clone()) {
            trace!(task_id = %task.task_id, "skipping duplicate task record");
            self.duplicates_skipped += 1;
            return;
        }

        self.machines.add(&task.machine, task.run_time_secs);
        self.models.add(&task.gpu_model, task.run_time_secs);
        self.add_to_project(&task);
        self.add_to_person(&task, &ctx.logical_day);
        self.tasks.push(task);
    }

    fn add_to_project(&mut self, task: &TaskSummary) {
        let idx = match self.project_index.get(&task.project) {
            Some(&idx) => idx,
            None => {
                self.projects.push(ProjectSummary::new(task.project.clone()));
                self.project_index.insert(task.project.clone(), self.projects.len() - 1);
                self.projects.len() - 1
            }
        };
        self.projects[idx].add_task(task);
    }

    fn add_to_person(&mut self, task: &TaskSummary, day: &LogicalDay) {
        let idx = match self.person_index.get(&task.user) {
            Some(&idx) => idx,
            None => {
                self.persons.push(PersonSummary::new(task.user.clone()));
                self.person_index.insert(task.user.clone(), self.persons.len() - 1);
                self.persons.len() - 1
            }
        };
        let person = &mut self.persons[idx];

        person.cumulative_use_secs += task.run_time_secs;

        match person.gpu_model_use.iter_mut().find(|g| g.key == task.gpu_model) {
            Some(entry) => entry.cumulative_use_secs += task.run_time_secs,
            None => person.gpu_model_use.push(GpuSummary {
                key: task.gpu_model.clone(),
                cumulative_use_secs: task.run_time_secs,
            }),
        }

        match person.projects.iter_mut().find(|p| p.name == task.project) {
            Some(project) => {
                project.add_task(task);
            }
            None => {
                let mut project = ProjectSummary::new(task.project.clone());
                project.add_task(task);
                person.projects.push(project);
            }
        }

        SlotPolicy::LATEST_START.offer(&mut person.latest_start_task, task, day);
        SlotPolicy::MOST_GPUS.offer(&mut person.most_gpu_task, task, day);
        SlotPolicy::LONGEST_RUN.offer(&mut person.longest_gpu_task, task, day);
    }

    /// Person whose same-day latest start is the latest. First seen wins ties.
    fn daily_champion(&self, ctx: &AggregationContext) -> Option<String> {
        let mut champion: Option<(&str, DateTime<Utc>)> = None;
        for person in &self.persons {
            let Some(latest) = person.latest_start_task.as_ref() else {
                continue;
            };
            if !ctx.logical_day.same_day(latest.start_time, ctx.now) {
                continue;
            }
            if champion.is_none_or(|(_, best)| latest.start_time > best) {
                champion = Some((person.person.as_str(), latest.start_time));
            }
        }
        champion.map(|(name, _)| name.to_string())
    }

    fn finish(self, window: TimeWindow, ctx: &AggregationContext) -> AggregationResult {
        let daily_sleep_late_champion = self.daily_champion(ctx);
        let sleep = SleepAnalysis::analyze(&self.tasks, &window, &ctx.logical_day);

        let mut persons = self.persons;
        for person in &mut persons {
            sort_by_use(&mut person.gpu_model_use);
            sort_projects(&mut person.projects);
        }
        persons.sort_by(|a, b| {
            b.cumulative_use_secs
                .cmp(&a.cumulative_use_secs)
                .then_with(|| a.person.cmp(&b.person))
        });

        let mut projects = self.projects;
        sort_projects(&mut projects);

        AggregationResult {
            window,
            gpu_list: self.machines.into_sorted(),
            gpu_model_list: self.models.into_sorted(),
            projects,
            persons,
            daily_sleep_late_champion,
            sleep,
            task_count: self.tasks.len(),
            data_quality_errors: self.data_quality_errors,
            duplicates_skipped: self.duplicates_skipped,
        }
    }
}

fn sort_by_use(entries: &mut [GpuSummary]) {
    entries.sort_by(|a, b| {
        b.cumulative_use_secs
            .cmp(&a.cumulative_use_secs)
            .then_with(|| a.key.cmp(&b.key))
    });
}

fn sort_projects(projects: &mut [ProjectSummary]) {
    projects.sort_by_cached_key(|p| (std::cmp::Reverse(p.total_run_secs()), p.name.clone()));
}
