//! Plain-text rendering of reports.

use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, Utc};

use claw_usage::SleepAnalysis;

use crate::report::Report;

const RULE: &str = "====================";

/// Formats seconds as `{hours}h{minutes}m`.
#[must_use]
pub fn format_duration(secs: u64) -> String {
    format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
}

fn local(instant: DateTime<Utc>, offset: FixedOffset, pattern: &str) -> String {
    instant.with_timezone(&offset).format(pattern).to_string()
}

/// Renders a report as text.
#[must_use]
pub fn render(report: &Report) -> String {
    let result = &report.result;
    let summary = report.summary();
    let mut out = String::new();

    let _ = writeln!(out, "{}", report.kind.title());
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(
        out,
        "Window: {} - {}",
        local(report.window.start, report.offset, "%Y-%m-%d %H:%M"),
        local(report.window.end, report.offset, "%Y-%m-%d %H:%M"),
    );
    let _ = writeln!(out, "Total tasks: {}", summary.total_tasks);
    let _ = writeln!(out, "Total run time: {}", format_duration(summary.total_run_secs));
    let _ = writeln!(out, "Active users: {}", summary.active_users);

    if !summary.top_users.is_empty() {
        let _ = writeln!(out, "\nTop users:");
        for entry in &summary.top_users {
            let _ = writeln!(
                out,
                "• {}: {} ({} tasks)",
                entry.name,
                format_duration(entry.run_secs),
                entry.tasks
            );
        }
    }

    if !summary.top_gpus.is_empty() {
        let _ = writeln!(out, "\nTop GPUs:");
        for entry in &summary.top_gpus {
            let _ = writeln!(out, "• {}: {}", entry.name, format_duration(entry.run_secs));
        }
    }

    if !summary.top_projects.is_empty() {
        let _ = writeln!(out, "\nTop projects:");
        for entry in &summary.top_projects {
            let _ = writeln!(
                out,
                "• {}: {} ({} tasks)",
                entry.name,
                format_duration(entry.run_secs),
                entry.tasks
            );
        }
    }

    render_sleep(&mut out, &result.sleep, report.offset);

    if let Some(champion) = &result.daily_sleep_late_champion {
        let _ = writeln!(out, "Latest start today: {champion}");
    }
    let _ = writeln!(out, "{RULE}");
    out
}

fn render_sleep(out: &mut String, sleep: &SleepAnalysis, offset: FixedOffset) {
    let _ = writeln!(out, "\nSleep schedule:");
    let _ = writeln!(out, "Late-night tasks: {}", sleep.late_night_tasks);
    let _ = writeln!(out, "Early-morning tasks: {}", sleep.early_morning_tasks);
    let _ = writeln!(out, "Late-night users: {}", sleep.late_night_users.len());
    let _ = writeln!(out, "Early-morning users: {}", sleep.early_morning_users.len());
    if let Some(task) = &sleep.late_night_champion {
        let _ = writeln!(
            out,
            "Late-night champion: {} ({})",
            task.user,
            local(task.start_time, offset, "%H:%M")
        );
    }
    if let Some(task) = &sleep.early_morning_champion {
        let _ = writeln!(
            out,
            "Early-morning champion: {} ({})",
            task.user,
            local(task.start_time, offset, "%H:%M")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::ReportKind;
    use chrono::{Duration, TimeZone};
    use claw_usage::{aggregate, AggregationContext, AggregationResult, LogicalDay, TaskRecord};
    use std::sync::Arc;
    use test_case::test_case;

    #[test_case(0, "0h0m" ; "zero")]
    #[test_case(59, "0h0m" ; "under a minute")]
    #[test_case(3_660, "1h1m" ; "hour and minute")]
    #[test_case(90_000, "25h0m" ; "over a day")]
    fn duration_format(secs: u64, expected: &str) {
        assert_eq!(format_duration(secs), expected);
    }

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn weekly_report() -> Report {
        // Monday 2024-05-13 00:00 at +08:00.
        let boundary = Utc.with_ymd_and_hms(2024, 5, 12, 16, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 5, 10, 18, 30, 0).unwrap(); // 02:30 local
        let early = Utc.with_ymd_and_hms(2024, 5, 10, 21, 15, 0).unwrap(); // 05:15 local
        let records = vec![
            TaskRecord::new("a", "alice")
                .with_gpu_model("A100")
                .with_project("llm")
                .with_start(late)
                .with_finish(late + Duration::hours(2)),
            TaskRecord::new("b", "bob")
                .with_gpu_model("H100")
                .with_project("vision")
                .with_start(early)
                .with_finish(early + Duration::hours(1)),
        ];
        let window = ReportKind::Weekly.window_for(boundary, offset());
        let context = AggregationContext::new(boundary).with_logical_day(LogicalDay::new(4, offset()).unwrap());
        let result = aggregate(&records, window, &context);
        Report::new(ReportKind::Weekly, boundary, Arc::new(result), boundary, offset())
    }

    #[test]
    fn render_weekly_report() {
        let text = render(&weekly_report());
        assert!(text.starts_with("GPU Usage Weekly Report\n"));
        assert!(text.contains("Window: 2024-05-06 00:00 - 2024-05-13 00:00"));
        assert!(text.contains("Total tasks: 2"));
        assert!(text.contains("Total run time: 3h0m"));
        assert!(text.contains("• alice: 2h0m (1 tasks)"));
        assert!(text.contains("Top projects:"));
        assert!(text.contains("Late-night champion: alice (02:30)"));
        assert!(text.contains("Early-morning champion: bob (05:15)"));
    }

    #[test]
    fn render_empty_report() {
        let boundary = Utc.with_ymd_and_hms(2024, 5, 12, 16, 0, 0).unwrap();
        let window = ReportKind::Daily.window_for(boundary, offset());
        let report = Report::new(
            ReportKind::Daily,
            boundary,
            Arc::new(AggregationResult::empty(window)),
            boundary,
            offset(),
        );
        let text = render(&report);
        assert!(text.contains("Total tasks: 0"));
        assert!(!text.contains("Top users:"));
        assert!(!text.contains("champion"));
    }
}
