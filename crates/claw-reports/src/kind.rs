//! Report kinds and their calendar boundaries.
//!
//! Boundaries are midnights in a fixed UTC offset:
//!
//! | kind    | boundary             | window                     |
//! |---------|----------------------|----------------------------|
//! | daily   | every midnight       | the previous day           |
//! | weekly  | Monday midnight      | the previous Monday–Sunday |
//! | monthly | 1st of the month     | the previous month         |
//! | yearly  | January 1st          | the previous year          |

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use claw_usage::TimeWindow;

use crate::error::{ReportError, Result};

/// A periodic report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// Covers one day.
    Daily,
    /// Covers one Monday-to-Sunday week.
    Weekly,
    /// Covers one calendar month.
    Monthly,
    /// Covers one calendar year.
    Yearly,
}

/// Audience a report is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportRoute {
    /// Daily and weekly reports.
    ShortTerm,
    /// Monthly and yearly reports.
    LongTerm,
}

/// How many entries each ranking in a rendered report shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopN {
    /// Users shown.
    pub users: usize,
    /// GPU models shown.
    pub gpus: usize,
    /// Projects shown.
    pub projects: usize,
}

impl ReportKind {
    /// All kinds, shortest first.
    pub const ALL: [Self; 4] = [Self::Daily, Self::Weekly, Self::Monthly, Self::Yearly];

    /// Returns the kind as a stable identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Returns the report title.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::Daily => "GPU Usage Daily Report",
            Self::Weekly => "GPU Usage Weekly Report",
            Self::Monthly => "GPU Usage Monthly Report",
            Self::Yearly => "GPU Usage Yearly Report",
        }
    }

    /// Returns a position usable as an array index.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Daily => 0,
            Self::Weekly => 1,
            Self::Monthly => 2,
            Self::Yearly => 3,
        }
    }

    /// Returns the audience for this kind.
    #[must_use]
    pub const fn route(&self) -> ReportRoute {
        match self {
            Self::Daily | Self::Weekly => ReportRoute::ShortTerm,
            Self::Monthly | Self::Yearly => ReportRoute::LongTerm,
        }
    }

    /// Returns the ranking sizes for this kind.
    #[must_use]
    pub const fn top_n(&self) -> TopN {
        match self {
            Self::Daily => TopN { users: 3, gpus: 3, projects: 0 },
            Self::Weekly => TopN { users: 5, gpus: 3, projects: 3 },
            Self::Monthly => TopN { users: 10, gpus: 5, projects: 5 },
            Self::Yearly => TopN { users: 15, gpus: 8, projects: 10 },
        }
    }

    /// Returns the default local hour, after its boundary, at which a report
    /// of this kind is delivered.
    #[must_use]
    pub const fn default_delivery_hour(&self) -> u32 {
        match self {
            Self::Daily => 8,
            Self::Weekly => 9,
            Self::Monthly => 10,
            Self::Yearly => 11,
        }
    }

    /// A span that always reaches past the next boundary but not the one after.
    fn span(self) -> Duration {
        match self {
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::days(7),
            Self::Monthly => Duration::days(32),
            Self::Yearly => Duration::days(366),
        }
    }

    /// Returns the latest boundary at or before `instant`.
    #[must_use]
    pub fn floor_boundary(&self, instant: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        let date = instant.with_timezone(&offset).date_naive();
        let start = match self {
            Self::Daily => date,
            Self::Weekly => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
            Self::Monthly => date - Duration::days(i64::from(date.day0())),
            Self::Yearly => date - Duration::days(i64::from(date.ordinal0())),
        };
        let local_midnight = start.and_time(NaiveTime::MIN);
        (local_midnight - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
    }

    /// Returns the first boundary strictly after `instant`.
    #[must_use]
    pub fn next_boundary(&self, instant: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        self.floor_boundary(self.floor_boundary(instant, offset) + self.span(), offset)
    }

    /// Returns the last boundary strictly before `instant`.
    #[must_use]
    pub fn previous_boundary(&self, instant: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
        self.floor_boundary(instant - Duration::nanoseconds(1), offset)
    }

    /// Returns the report window that closes at `boundary`.
    #[must_use]
    pub fn window_for(&self, boundary: DateTime<Utc>, offset: FixedOffset) -> TimeWindow {
        TimeWindow {
            start: self.previous_boundary(boundary, offset),
            end: boundary,
        }
    }

    /// Returns every boundary in `(after, upto]`, oldest first.
    #[must_use]
    pub fn boundaries_between(
        &self,
        after: DateTime<Utc>,
        upto: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Vec<DateTime<Utc>> {
        let mut out = Vec::new();
        let mut boundary = self.floor_boundary(upto, offset);
        while boundary > after {
            out.push(boundary);
            boundary = self.previous_boundary(boundary, offset);
        }
        out.reverse();
        out
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| ReportError::UnknownKind { name: s.to_string() })
    }
}
