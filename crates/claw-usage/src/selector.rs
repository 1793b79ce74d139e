//! Overlap-based task selection.
//!
//! A record is selected for a window when its run interval touches the
//! window: it starts inside it, finishes inside it, or spans it entirely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TaskRecord;
use crate::window::TimeWindow;

/// Scope filters applied during selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Only records owned by this user.
    pub user: Option<String>,
    /// Only records from this machine.
    pub machine: Option<String>,
    /// Exclude records that have not finished.
    pub only_finished: bool,
}

impl TaskFilter {
    /// A filter that matches everything, including running tasks.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to one user.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Restricts to one machine.
    #[must_use]
    pub fn machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = Some(machine.into());
        self
    }

    /// Excludes running tasks.
    #[must_use]
    pub const fn finished_only(mut self) -> Self {
        self.only_finished = true;
        self
    }

    /// Returns true if the record passes the user and machine filters.
    #[must_use]
    pub fn matches_scope(&self, record: &TaskRecord) -> bool {
        self.user.as_deref().is_none_or(|u| u == record.user)
            && self.machine.as_deref().is_none_or(|m| m == record.machine)
    }
}

/// Returns true if the record's run interval intersects the window.
///
/// Running records are measured up to `now`, or excluded entirely when
/// `only_finished` is set. Records without a start time never overlap.
#[must_use]
pub fn overlaps(
    record: &TaskRecord,
    window: &TimeWindow,
    now: DateTime<Utc>,
    only_finished: bool,
) -> bool {
    let Some(start) = record.start_time else {
        return false;
    };
    if only_finished && !record.is_finished() {
        return false;
    }
    let finish = record.effective_finish(now);

    window.contains(start)
        || window.contains(finish)
        || (start <= window.start && finish >= window.end)
}

/// Selects records that overlap the window and match the filter.
///
/// Records without a start time are passed through when they match the
/// scope, so that aggregation can count them as malformed.
#[must_use]
pub fn select<'a, I>(records: I, window: &TimeWindow, filter: &TaskFilter, now: DateTime<Utc>) -> Vec<TaskRecord>
where
    I: IntoIterator<Item = &'a TaskRecord>,
{
    records
        .into_iter()
        .filter(|r| filter.matches_scope(r))
        .filter(|r| r.start_time.is_none() || overlaps(r, window, now, filter.only_finished))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use test_case::test_case;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::new(base(), base() + Duration::hours(10)).unwrap()
    }

    fn task(start_h: i64, finish_h: Option<i64>) -> TaskRecord {
        let r = TaskRecord::new("t", "alice")
            .with_gpu_model("A100")
            .with_start(base() + Duration::hours(start_h));
        match finish_h {
            Some(f) => r.with_finish(base() + Duration::hours(f)),
            None => r,
        }
    }

    mod overlap_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(2, Some(4), true ; "fully inside")]
        #[test_case(-2, Some(4), true ; "finish inside")]
        #[test_case(8, Some(14), true ; "start inside")]
        #[test_case(-5, Some(15), true ; "spans window")]
        #[test_case(-5, Some(-1), false ; "entirely before")]
        #[test_case(11, Some(12), false ; "entirely after")]
        #[test_case(10, Some(12), false ; "starts at exclusive end")]
        #[test_case(-3, Some(0), true ; "finishes at inclusive start")]
        fn finished_tasks(start: i64, finish: Option<i64>, expected: bool) {
            let now = base() + Duration::hours(20);
            assert_eq!(overlaps(&task(start, finish), &window(), now, false), expected);
        }

        #[test]
        fn running_task_uses_now() {
            let now = base() + Duration::hours(20);
            assert!(overlaps(&task(-5, None), &window(), now, false));
        }

        #[test]
        fn running_task_before_window_end_with_early_now() {
            // Started before the window, now is before the window start.
            let now = base() - Duration::hours(1);
            assert!(!overlaps(&task(-5, None), &window(), now, false));
        }

        #[test]
        fn running_task_excluded_when_only_finished() {
            let now = base() + Duration::hours(20);
            assert!(!overlaps(&task(2, None), &window(), now, true));
            assert!(overlaps(&task(2, Some(3)), &window(), now, true));
        }

        #[test]
        fn missing_start_never_overlaps() {
            let r = TaskRecord::new("t", "alice");
            assert!(!overlaps(&r, &window(), base(), false));
        }
    }

    mod select_tests {
        use super::*;

        #[test]
        fn filters_by_user_and_machine() {
            let now = base() + Duration::hours(20);
            let records = vec![
                task(1, Some(2)).with_machine("n1"),
                {
                    let mut r = task(1, Some(2)).with_machine("n2");
                    r.user = "bob".to_string();
                    r
                },
                task(1, Some(2)).with_machine("n2"),
            ];

            let by_user = select(&records, &window(), &TaskFilter::all().user("alice"), now);
            assert_eq!(by_user.len(), 2);

            let by_both = select(
                &records,
                &window(),
                &TaskFilter::all().user("alice").machine("n2"),
                now,
            );
            assert_eq!(by_both.len(), 1);
            assert_eq!(by_both[0].machine, "n2");
        }

        #[test]
        fn unknown_user_yields_empty() {
            let records = vec![task(1, Some(2))];
            let out = select(&records, &window(), &TaskFilter::all().user("nobody"), base());
            assert!(out.is_empty());
        }

        #[test]
        fn passes_through_records_without_start() {
            let records = vec![TaskRecord::new("bad", "alice"), task(20, Some(21))];
            let out = select(&records, &window(), &TaskFilter::all(), base());
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].task_id, "bad");
        }

        #[test]
        fn selection_is_idempotent() {
            let now = base() + Duration::hours(20);
            let records = vec![task(1, Some(2)), task(-4, None), task(30, Some(31))];
            let once = select(&records, &window(), &TaskFilter::all(), now);
            let twice = select(&once, &window(), &TaskFilter::all(), now);
            assert_eq!(once, twice);
        }
    }
}
