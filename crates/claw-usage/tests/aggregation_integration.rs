//! Integration tests for selection and aggregation.

use chrono::{DateTime, Duration, TimeZone, Utc};
use claw_usage::{
    aggregate, select, AggregationContext, InMemoryTaskSource, LogicalDay, TaskFilter, TaskRecord, TaskSource,
    TimeWindow,
};
use proptest::prelude::*;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap()
}

fn context(now: DateTime<Utc>) -> AggregationContext {
    AggregationContext::new(now).with_logical_day(LogicalDay::with_reset_hour(4).unwrap())
}

#[test]
fn test_two_record_scenario() {
    let w = TimeWindow::new(base(), base() + Duration::days(1)).unwrap();
    let source = InMemoryTaskSource::with_records(vec![
        TaskRecord::new("r1", "alice")
            .with_machine("node-1")
            .with_gpu_model("A100")
            .with_project("p1")
            .with_start(base() + Duration::hours(1))
            .with_finish(base() + Duration::hours(2)),
        TaskRecord::new("r2", "alice")
            .with_machine("node-1")
            .with_gpu_model("A100")
            .with_project("p1")
            .with_start(base() - Duration::minutes(30))
            .with_finish(base() + Duration::minutes(30)),
    ]);

    let now = base() + Duration::hours(12);
    let selected = source.query(&w, &TaskFilter::all(), now).unwrap();
    assert_eq!(selected.len(), 2);

    let result = aggregate(&selected, w, &context(now));
    let alice = result.person("alice").unwrap();
    assert_eq!(alice.project("p1").unwrap().tasks.len(), 2);
    assert_eq!(alice.cumulative_use_secs, 7200);
    assert_eq!(alice.gpu_model_use[0].cumulative_use_secs, 7200);
}

#[test]
fn test_hour_window_counts_full_runs_of_overlapping_tasks() {
    // Window [t0, t0+1h); r1 runs [t0, t0+1h], r2 runs [t0+30m, t0+90m].
    let t0 = base() + Duration::hours(10);
    let w = TimeWindow::new(t0, t0 + Duration::hours(1)).unwrap();
    let records = vec![
        TaskRecord::new("r1", "alice")
            .with_machine("node-1")
            .with_gpu_model("A100")
            .with_project("p1")
            .with_start(t0)
            .with_finish(t0 + Duration::hours(1)),
        TaskRecord::new("r2", "alice")
            .with_machine("node-1")
            .with_gpu_model("A100")
            .with_project("p1")
            .with_start(t0 + Duration::minutes(30))
            .with_finish(t0 + Duration::minutes(90)),
    ];

    let now = t0 + Duration::hours(3);
    let selected = select(&records, &w, &TaskFilter::all(), now);
    assert_eq!(selected.len(), 2);

    let result = aggregate(&selected, w, &context(now));
    let alice = result.person("alice").unwrap();
    assert_eq!(alice.project("p1").unwrap().tasks.len(), 2);
    assert_eq!(alice.cumulative_use_secs, 7200);
    assert_eq!(result.total_use_secs(), 7200);
}

#[test]
fn test_logical_day_bounds_latest_start() {
    // 23:50 on day D and 00:10 on D+1 share a logical day with reset hour 4,
    // while 04:10 on D+1 starts a new one.
    let late = base() + Duration::hours(23) + Duration::minutes(50);
    let after_midnight = late + Duration::minutes(20);
    let after_reset = late + Duration::hours(4) + Duration::minutes(20);
    let rec = |id: &str, start: DateTime<Utc>| {
        TaskRecord::new(id, "alice")
            .with_gpu_model("A100")
            .with_start(start)
            .with_finish(start + Duration::minutes(5))
    };
    let w = TimeWindow::new(base(), base() + Duration::days(3)).unwrap();

    let same_day = aggregate(
        &[rec("late", late), rec("after-midnight", after_midnight)],
        w,
        &context(base() + Duration::days(2)),
    );
    assert_eq!(
        same_day.person("alice").unwrap().latest_start_task.as_ref().unwrap().task_id,
        "after-midnight"
    );

    let next_day = aggregate(
        &[rec("late", late), rec("after-reset", after_reset)],
        w,
        &context(base() + Duration::days(2)),
    );
    assert_eq!(
        next_day.person("alice").unwrap().latest_start_task.as_ref().unwrap().task_id,
        "late"
    );
}

#[test]
fn test_filters_scope_selection() {
    let w = TimeWindow::new(base(), base() + Duration::days(1)).unwrap();
    let records: Vec<_> = ["alice", "bob", "alice"]
        .iter()
        .enumerate()
        .map(|(i, user)| {
            TaskRecord::new(format!("t{i}"), *user)
                .with_machine(format!("node-{i}"))
                .with_gpu_model("H100")
                .with_start(base() + Duration::hours(1))
        })
        .collect();

    let now = base() + Duration::hours(2);
    let alice = select(&records, &w, &TaskFilter::all().user("alice"), now);
    assert_eq!(alice.len(), 2);
    let running_excluded = select(&records, &w, &TaskFilter::all().finished_only(), now);
    assert!(running_excluded.is_empty());
}

fn arb_record() -> impl Strategy<Value = TaskRecord> {
    (
        0..20u32,
        prop::sample::select(vec!["alice", "bob", "carol", "dave"]),
        prop::sample::select(vec!["node-1", "node-2", "node-3"]),
        prop::sample::select(vec!["A100", "H100", "RTX4090"]),
        prop::sample::select(vec!["llm", "vision", "rl"]),
        0..(72 * 60i64),
        0..(12 * 60i64),
        1..9u32,
    )
        .prop_map(|(id, user, machine, model, project, start_min, run_min, gpus)| {
            let start = base() + Duration::minutes(start_min);
            TaskRecord::new(format!("task-{id}"), user)
                .with_machine(machine)
                .with_gpu_model(model)
                .with_project(project)
                .with_start(start)
                .with_finish(start + Duration::minutes(run_min))
                .with_gpus(gpus, 0)
        })
}

proptest! {
    #[test]
    fn conservation_of_use_time(records in prop::collection::vec(arb_record(), 0..60)) {
        let w = TimeWindow::new(base(), base() + Duration::days(4)).unwrap();
        let result = aggregate(&records, w, &context(base() + Duration::days(4)));

        let by_person: u64 = result.persons.iter().map(|p| p.cumulative_use_secs).sum();
        let by_machine: u64 = result.gpu_list.iter().map(|g| g.cumulative_use_secs).sum();
        let by_model: u64 = result.gpu_model_list.iter().map(|g| g.cumulative_use_secs).sum();
        let by_project: u64 = result.projects.iter().map(|p| p.total_run_secs()).sum();

        prop_assert_eq!(by_person, by_machine);
        prop_assert_eq!(by_person, by_model);
        prop_assert_eq!(by_person, by_project);
        prop_assert_eq!(result.task_count + result.duplicates_skipped, records.len());
    }

    #[test]
    fn duplicates_do_not_change_result(records in prop::collection::vec(arb_record(), 0..40)) {
        let w = TimeWindow::new(base(), base() + Duration::days(4)).unwrap();
        let ctx = context(base() + Duration::days(4));
        let once = aggregate(&records, w, &ctx);

        let mut doubled = records.clone();
        doubled.extend(records.iter().cloned());
        let twice = aggregate(&doubled, w, &ctx);

        prop_assert_eq!(once.total_use_secs(), twice.total_use_secs());
        prop_assert_eq!(once.task_count, twice.task_count);
        prop_assert_eq!(&once.persons, &twice.persons);
        prop_assert_eq!(once.daily_sleep_late_champion, twice.daily_sleep_late_champion);
    }

    #[test]
    fn person_task_counts_match_total(records in prop::collection::vec(arb_record(), 0..60)) {
        let w = TimeWindow::new(base(), base() + Duration::days(4)).unwrap();
        let result = aggregate(&records, w, &context(base() + Duration::days(4)));
        let per_person: usize = result.persons.iter().map(|p| p.task_count()).sum();
        prop_assert_eq!(per_person, result.task_count);
    }
}
