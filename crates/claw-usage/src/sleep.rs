//! Late-night and early-morning activity analysis.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::TaskSummary;
use crate::window::{LogicalDay, TimeWindow};

/// Late-night hours are `[0, 4)` local time.
pub const LATE_NIGHT_HOURS: std::ops::Range<u32> = 0..4;

/// Early-morning hours are `[4, 10)` local time.
pub const EARLY_MORNING_HOURS: std::ops::Range<u32> = 4..10;

/// Part of the day a task was started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartPeriod {
    /// Between midnight and 04:00.
    LateNight,
    /// Between 04:00 and 10:00.
    EarlyMorning,
    /// Any other hour.
    Normal,
}

impl StartPeriod {
    /// Classifies a local wall-clock hour.
    #[must_use]
    pub fn from_hour(hour: u32) -> Self {
        if LATE_NIGHT_HOURS.contains(&hour) {
            Self::LateNight
        } else if EARLY_MORNING_HOURS.contains(&hour) {
            Self::EarlyMorning
        } else {
            Self::Normal
        }
    }
}

/// Counts and champions for tasks started at unusual hours.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepAnalysis {
    /// Tasks started late at night.
    pub late_night_tasks: usize,
    /// Distinct users with a late-night start, sorted.
    pub late_night_users: Vec<String>,
    /// The latest late-night start.
    pub late_night_champion: Option<TaskSummary>,
    /// Tasks started early in the morning.
    pub early_morning_tasks: usize,
    /// Distinct users with an early-morning start, sorted.
    pub early_morning_users: Vec<String>,
    /// The earliest early-morning start.
    pub early_morning_champion: Option<TaskSummary>,
}

impl SleepAnalysis {
    /// Analyzes tasks whose start falls inside `window`.
    ///
    /// Hours are read in the logical day's UTC offset. On equal start times
    /// the task seen first stays champion.
    #[must_use]
    pub fn analyze<'a, I>(tasks: I, window: &TimeWindow, day: &LogicalDay) -> Self
    where
        I: IntoIterator<Item = &'a TaskSummary>,
    {
        let mut out = Self::default();
        let mut late_users = BTreeSet::new();
        let mut early_users = BTreeSet::new();

        for task in tasks.into_iter().filter(|t| window.contains(t.start_time)) {
            match StartPeriod::from_hour(day.local_hour(task.start_time)) {
                StartPeriod::LateNight => {
                    out.late_night_tasks += 1;
                    late_users.insert(task.user.clone());
                    let replace = out
                        .late_night_champion
                        .as_ref()
                        .is_none_or(|c| task.start_time > c.start_time);
                    if replace {
                        out.late_night_champion = Some(task.clone());
                    }
                }
                StartPeriod::EarlyMorning => {
                    out.early_morning_tasks += 1;
                    early_users.insert(task.user.clone());
                    let replace = out
                        .early_morning_champion
                        .as_ref()
                        .is_none_or(|c| task.start_time < c.start_time);
                    if replace {
                        out.early_morning_champion = Some(task.clone());
                    }
                }
                StartPeriod::Normal => {}
            }
        }

        out.late_night_users = late_users.into_iter().collect();
        out.early_morning_users = early_users.into_iter().collect();
        out
    }

    /// Returns true if no task started at an unusual hour.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.late_night_tasks == 0 && self.early_morning_tasks == 0
    }
}
