//! Time windows, named periods and logical days.
//!
//! - [`TimeWindow`]: a half-open `[start, end)` interval
//! - [`TimePeriod`]: a named look-back period resolved against "now"
//! - [`LogicalDay`]: a calendar day shifted by a daily reset hour

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, Months, NaiveDate, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UsageError};

/// A half-open time window. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window from explicit bounds.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::InvalidWindow` if `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(UsageError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Resolves a named period ending at `now`.
    #[must_use]
    pub fn for_period(period: TimePeriod, now: DateTime<Utc>) -> Self {
        Self {
            start: period.start_before(now),
            end: now,
        }
    }

    /// Returns true if `instant` falls inside `[start, end)`.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Returns the length of the window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Returns true if the window has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Named look-back periods used by statistics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
    /// The last 24 hours.
    OneDay,
    /// The last 7 days.
    OneWeek,
    /// The last calendar month.
    OneMonth,
    /// The last six calendar months.
    SixMonth,
    /// The last calendar year.
    OneYear,
    /// The last three calendar years.
    ThreeYear,
    /// Everything since the Unix epoch.
    All,
}

impl TimePeriod {
    /// All periods, shortest first.
    pub const ALL_PERIODS: [Self; 7] = [
        Self::OneDay,
        Self::OneWeek,
        Self::OneMonth,
        Self::SixMonth,
        Self::OneYear,
        Self::ThreeYear,
        Self::All,
    ];

    /// Returns the period as a stable identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneDay => "one_day",
            Self::OneWeek => "one_week",
            Self::OneMonth => "one_month",
            Self::SixMonth => "six_month",
            Self::OneYear => "one_year",
            Self::ThreeYear => "three_year",
            Self::All => "all",
        }
    }

    /// Returns a human-readable name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::OneDay => "One Day",
            Self::OneWeek => "One Week",
            Self::OneMonth => "One Month",
            Self::SixMonth => "Six Months",
            Self::OneYear => "One Year",
            Self::ThreeYear => "Three Years",
            Self::All => "All Time",
        }
    }

    /// Returns the start of this period when it ends at `now`.
    ///
    /// Month and year periods use calendar arithmetic, so a month before
    /// March 31st is the last day of February.
    #[must_use]
    pub fn start_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            Self::OneDay => return now - Duration::days(1),
            Self::OneWeek => return now - Duration::weeks(1),
            Self::All => return DateTime::UNIX_EPOCH,
            Self::OneMonth => 1,
            Self::SixMonth => 6,
            Self::OneYear => 12,
            Self::ThreeYear => 36,
        };
        now.checked_sub_months(Months::new(months))
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimePeriod {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL_PERIODS
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| UsageError::UnknownPeriod {
                name: s.to_string(),
            })
    }
}

/// A calendar day that starts at `reset_hour` instead of midnight.
///
/// Dates are taken in a fixed UTC offset so that the boundary does not move
/// with the host's time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalDay {
    reset_hour: u32,
    offset: FixedOffset,
}

impl LogicalDay {
    /// Default reset hour.
    pub const DEFAULT_RESET_HOUR: u32 = 4;

    /// Creates a logical day definition.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::InvalidConfig` if `reset_hour >= 24`.
    pub fn new(reset_hour: u32, offset: FixedOffset) -> Result<Self> {
        if reset_hour >= 24 {
            return Err(UsageError::InvalidConfig {
                reason: format!("reset hour must be below 24, got {reset_hour}"),
            });
        }
        Ok(Self { reset_hour, offset })
    }

    /// Creates a logical day in UTC with the given reset hour.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::InvalidConfig` if `reset_hour >= 24`.
    pub fn with_reset_hour(reset_hour: u32) -> Result<Self> {
        Self::new(reset_hour, utc_offset())
    }

    /// Returns the reset hour.
    #[must_use]
    pub const fn reset_hour(&self) -> u32 {
        self.reset_hour
    }

    /// Returns the UTC offset dates are taken in.
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Returns the logical date an instant belongs to.
    #[must_use]
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        let local = instant.with_timezone(&self.offset);
        (local - Duration::hours(i64::from(self.reset_hour))).date_naive()
    }

    /// Returns true if both instants fall on the same logical day.
    #[must_use]
    pub fn same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.date_of(a) == self.date_of(b)
    }

    /// Returns the wall-clock hour of an instant in this day's offset.
    #[must_use]
    pub fn local_hour(&self, instant: DateTime<Utc>) -> u32 {
        instant.with_timezone(&self.offset).hour()
    }
}

impl Default for LogicalDay {
    fn default() -> Self {
        Self {
            reset_hour: Self::DEFAULT_RESET_HOUR,
            offset: utc_offset(),
        }
    }
}

/// Returns true if `a` and `b` share a logical day in UTC under `reset_hour`.
///
/// Reset hours of 24 or more are reduced modulo 24.
#[must_use]
pub fn same_logical_day(a: DateTime<Utc>, b: DateTime<Utc>, reset_hour: u32) -> bool {
    let shift = Duration::hours(i64::from(reset_hour % 24));
    (a - shift).date_naive() == (b - shift).date_naive()
}

/// Builds a fixed offset from whole hours east of UTC.
///
/// # Errors
///
/// Returns `UsageError::InvalidConfig` if the offset is outside ±14 hours.
pub fn offset_from_hours(hours: i32) -> Result<FixedOffset> {
    if !(-14..=14).contains(&hours) {
        return Err(UsageError::InvalidConfig {
            reason: format!("utc offset must be within ±14 hours, got {hours}"),
        });
    }
    FixedOffset::east_opt(hours * 3600).ok_or_else(|| UsageError::InvalidConfig {
        reason: format!("invalid utc offset: {hours}"),
    })
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}
