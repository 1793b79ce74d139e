//! Integration tests for report scheduling and catch-up.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use claw_reports::{
    DeliveryResult, JsonMarkerStore, MemoryMarkerStore, PushOutcome, Report, ReportChannel, ReportError, ReportKind,
    ReportScheduler, Result, RunMarkerStore, SchedulerSettings, WebhookChannel, WebhookConfig,
};
use claw_usage::{FixedClock, InMemoryTaskSource, RetryPolicy, TaskRecord, UsageService, UsageSettings};
use parking_lot::Mutex;

fn utc(m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, m, d, h, 0, 0).unwrap()
}

#[derive(Debug, Default)]
struct Recorder {
    reports: Mutex<Vec<Report>>,
    down: AtomicBool,
}

impl ReportChannel for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn deliver(&self, report: &Report) -> Result<DeliveryResult> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ReportError::DeliveryFailed {
                channel: self.name().to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.reports.lock().push(report.clone());
        Ok(DeliveryResult::success(self.name()))
    }
}

impl Recorder {
    fn boundaries(&self, kind: ReportKind) -> Vec<DateTime<Utc>> {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.boundary)
            .collect()
    }
}

fn records() -> Vec<TaskRecord> {
    (1..=9)
        .map(|d| {
            let start = utc(6, d, 10);
            TaskRecord::new(format!("job-{d}"), if d % 2 == 0 { "alice" } else { "bob" })
                .with_machine("node-1")
                .with_gpu_model("A100")
                .with_project("llm")
                .with_start(start)
                .with_finish(start + Duration::hours(1))
        })
        .collect()
}

fn scheduler(
    clock: &Arc<FixedClock>,
    channel: &Arc<Recorder>,
    markers: Arc<dyn RunMarkerStore>,
    kinds: &[ReportKind],
) -> ReportScheduler {
    let usage = Arc::new(UsageService::new(
        Arc::new(InMemoryTaskSource::with_records(records())),
        clock.clone(),
        UsageSettings::default(),
    ));
    let settings = SchedulerSettings::default()
        .with_offset(FixedOffset::east_opt(0).unwrap())
        .with_enabled_kinds(kinds.iter().copied())
        .with_delivery_retry(RetryPolicy::immediate(2));
    ReportScheduler::new(usage, channel.clone(), markers, settings)
}

#[test]
fn test_catch_up_delivers_missed_boundaries_in_order() {
    let clock = Arc::new(FixedClock::new(utc(6, 10, 12)));
    let channel = Arc::new(Recorder::default());
    let markers = Arc::new(MemoryMarkerStore::new());
    markers.save(ReportKind::Daily, utc(6, 7, 0)).unwrap();
    let scheduler = scheduler(&clock, &channel, markers.clone(), &[ReportKind::Daily]);

    let report = scheduler.check_and_push_missing_reports();

    assert!(report.is_success());
    assert_eq!(report.delivered(), 3);
    assert_eq!(
        channel.boundaries(ReportKind::Daily),
        vec![utc(6, 8, 0), utc(6, 9, 0), utc(6, 10, 0)]
    );
    assert_eq!(markers.load(ReportKind::Daily).unwrap(), Some(utc(6, 10, 0)));

    // Each report covers exactly its own day.
    let reports = channel.reports.lock();
    assert_eq!(reports[0].result.task_count, 1);
    assert_eq!(reports[0].window.start, utc(6, 7, 0));
    assert!(reports[2].result.person("alice").is_none());
    assert_eq!(reports[2].result.person("bob").unwrap().cumulative_use_secs, 3600);
}

#[test]
fn test_failed_delivery_does_not_skip_boundaries() {
    let clock = Arc::new(FixedClock::new(utc(6, 10, 12)));
    let channel = Arc::new(Recorder::default());
    let markers = Arc::new(MemoryMarkerStore::new());
    markers.save(ReportKind::Daily, utc(6, 8, 0)).unwrap();
    let scheduler = scheduler(&clock, &channel, markers.clone(), &[ReportKind::Daily]);

    channel.down.store(true, Ordering::SeqCst);
    let report = scheduler.check_and_push_missing_reports();
    assert_eq!(report.failed_kinds(), vec![ReportKind::Daily]);
    assert_eq!(markers.load(ReportKind::Daily).unwrap(), Some(utc(6, 8, 0)));

    // The next day the channel recovers; both missed days go out.
    channel.down.store(false, Ordering::SeqCst);
    clock.advance(Duration::days(1));
    let report = scheduler.check_and_push_missing_reports();
    assert!(report.is_success());
    assert_eq!(
        channel.boundaries(ReportKind::Daily),
        vec![utc(6, 9, 0), utc(6, 10, 0), utc(6, 11, 0)]
    );
}

#[test]
fn test_failing_kind_does_not_block_others() {
    let clock = Arc::new(FixedClock::new(utc(6, 10, 12)));
    let channel = Arc::new(Recorder::default());
    let markers = Arc::new(MemoryMarkerStore::new());
    let scheduler = scheduler(&clock, &channel, markers.clone(), &ReportKind::ALL);

    channel.down.store(true, Ordering::SeqCst);
    let report = scheduler.check_and_push_missing_reports();
    assert_eq!(report.failed_kinds().len(), 4);
    assert!(markers.load_all().unwrap().is_empty());
}

#[test]
fn test_markers_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(FixedClock::new(utc(6, 10, 12)));
    let channel = Arc::new(Recorder::default());

    let first = scheduler(&clock, &channel, Arc::new(JsonMarkerStore::in_dir(dir.path())), &[ReportKind::Weekly]);
    assert_eq!(first.run_scheduled(ReportKind::Weekly).unwrap().delivered(), 1);
    drop(first);

    // 2024-06-10 is a Monday; a week later the restarted daemon pushes one more.
    clock.advance(Duration::days(7));
    let second = scheduler(&clock, &channel, Arc::new(JsonMarkerStore::in_dir(dir.path())), &[ReportKind::Weekly]);
    assert_eq!(
        second.run_scheduled(ReportKind::Weekly).unwrap(),
        PushOutcome::Delivered {
            boundaries: vec![utc(6, 17, 0)]
        }
    );
    assert_eq!(channel.boundaries(ReportKind::Weekly), vec![utc(6, 10, 0), utc(6, 17, 0)]);
}

#[test]
fn test_concurrent_pushes_deliver_once() {
    let clock = Arc::new(FixedClock::new(utc(6, 10, 12)));
    let channel = Arc::new(Recorder::default());
    let markers = Arc::new(MemoryMarkerStore::new());
    markers.save(ReportKind::Daily, utc(6, 5, 0)).unwrap();
    let scheduler = Arc::new(scheduler(&clock, &channel, markers, &[ReportKind::Daily]));

    let barrier = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let scheduler = Arc::clone(&scheduler);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                if i % 2 == 0 {
                    scheduler.push_now(ReportKind::Daily).unwrap().delivered()
                } else {
                    scheduler.run_scheduled(ReportKind::Daily).unwrap().delivered()
                }
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 5);
    assert_eq!(
        channel.boundaries(ReportKind::Daily),
        vec![utc(6, 6, 0), utc(6, 7, 0), utc(6, 8, 0), utc(6, 9, 0), utc(6, 10, 0)]
    );
}

#[test]
fn test_failed_delivery_keeps_cache_entry() {
    let clock = Arc::new(FixedClock::new(utc(6, 10, 12)));
    let channel = Arc::new(Recorder::default());
    let scheduler = scheduler(&clock, &channel, Arc::new(MemoryMarkerStore::new()), &[ReportKind::Daily]);

    channel.down.store(true, Ordering::SeqCst);
    assert!(scheduler.push_now(ReportKind::Daily).is_err());
    assert_eq!(scheduler.usage().cache().len(), 1);

    channel.down.store(false, Ordering::SeqCst);
    scheduler.push_now(ReportKind::Daily).unwrap();
    assert_eq!(scheduler.usage().cache().stats().hits, 1);
}

#[test]
fn test_unreachable_webhook_fails_push_and_keeps_marker() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/hook", listener.local_addr().unwrap());
    drop(listener);

    let clock = Arc::new(FixedClock::new(utc(6, 10, 12)));
    let usage = Arc::new(UsageService::new(
        Arc::new(InMemoryTaskSource::with_records(records())),
        clock,
        UsageSettings::default(),
    ));
    let markers = Arc::new(MemoryMarkerStore::new());
    let channel = WebhookChannel::new(WebhookConfig::new("hook", url).unwrap().with_timeout_secs(2));
    let settings = SchedulerSettings::default()
        .with_offset(FixedOffset::east_opt(0).unwrap())
        .with_delivery_retry(RetryPolicy::immediate(2));
    let scheduler = ReportScheduler::new(usage, Arc::new(channel), markers.clone(), settings);

    let err = scheduler.push_now(ReportKind::Daily).unwrap_err();

    assert!(matches!(err, ReportError::DeliveryFailed { ref channel, .. } if channel == "hook"));
    assert_eq!(markers.load(ReportKind::Daily).unwrap(), None);
}

#[test]
fn test_reports_wait_for_their_delivery_hour() {
    // 2024-07-01 is a Monday and the first of the month.
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 7, 30, 0).unwrap()));
    let channel = Arc::new(Recorder::default());
    let markers = Arc::new(MemoryMarkerStore::new());
    markers.save(ReportKind::Daily, utc(6, 30, 0)).unwrap();
    markers.save(ReportKind::Weekly, utc(6, 24, 0)).unwrap();
    markers.save(ReportKind::Monthly, utc(6, 1, 0)).unwrap();
    let scheduler = scheduler(&clock, &channel, markers, &[ReportKind::Daily, ReportKind::Weekly, ReportKind::Monthly]);

    let mut delivered = Vec::new();
    for hour in [8, 9, 10] {
        assert_eq!(scheduler.check_and_push_missing_reports().delivered(), 0);
        clock.set(Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0).unwrap());
        let report = scheduler.check_and_push_missing_reports();
        assert_eq!(report.delivered(), 1);
        delivered.extend(channel.reports.lock().last().map(|r| r.kind));
    }

    assert_eq!(delivered, vec![ReportKind::Daily, ReportKind::Weekly, ReportKind::Monthly]);
}
