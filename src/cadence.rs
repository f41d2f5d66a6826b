//! Reporting cadences and their calendar rules

use chrono::{DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AnalyticsError, ErrorCode};

/// A named reporting period with its own schedule and snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Realtime,
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub const ALL: [Cadence; 4] = [Self::Realtime, Self::Daily, Self::Weekly, Self::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Next fire time strictly after `now`.
    ///
    /// Calendar cadences align to local midnight in `offset`: daily fires at the
    /// next midnight, weekly at the next Sunday midnight, monthly on the first of
    /// the next month. Realtime simply adds `realtime_interval`.
    pub fn next_fire(
        &self,
        now: DateTime<Utc>,
        offset: FixedOffset,
        realtime_interval: Duration,
    ) -> DateTime<Utc> {
        let today = now.with_timezone(&offset).date_naive();
        match self {
            Self::Realtime => {
                now + ChronoDuration::from_std(realtime_interval)
                    .unwrap_or_else(|_| ChronoDuration::seconds(60))
            }
            Self::Daily => local_midnight(today + ChronoDuration::days(1), offset),
            Self::Weekly => {
                let days_until_sunday = 7 - i64::from(today.weekday().num_days_from_sunday());
                local_midnight(today + ChronoDuration::days(days_until_sunday), offset)
            }
            Self::Monthly => local_midnight(first_of_next_month(today), offset),
        }
    }

    /// The report window that closes when this cadence fires at `fired_at`.
    ///
    /// Realtime covers the trailing `realtime_window`. Daily and weekly cover
    /// the previous full day / seven days, monthly the previous calendar month.
    pub fn window_ending(
        &self,
        fired_at: DateTime<Utc>,
        offset: FixedOffset,
        realtime_window: Duration,
    ) -> crate::storage::TimeWindow {
        let today = fired_at.with_timezone(&offset).date_naive();
        let day_start = local_midnight(today, offset);
        let (start, end) = match self {
            Self::Realtime => {
                let span = ChronoDuration::from_std(realtime_window)
                    .unwrap_or_else(|_| ChronoDuration::hours(1));
                (fired_at - span, fired_at)
            }
            Self::Daily => (day_start - ChronoDuration::days(1), day_start),
            Self::Weekly => (day_start - ChronoDuration::days(7), day_start),
            Self::Monthly => {
                let this_month = today.with_day(1).unwrap_or(today);
                let previous = first_of_previous_month(this_month);
                (local_midnight(previous, offset), local_midnight(this_month, offset))
            }
        };
        crate::storage::TimeWindow::new(start, end)
    }
}

fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    // Fixed offsets have no gaps or folds, so the mapping is always unique.
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

fn first_of_previous_month(first_of_month: NaiveDate) -> NaiveDate {
    let (year, month) = if first_of_month.month() == 1 {
        (first_of_month.year() - 1, 12)
    } else {
        (first_of_month.year(), first_of_month.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(first_of_month)
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" | "real-time" => Ok(Self::Realtime),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(AnalyticsError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("unknown cadence '{}'", other),
                Some("cadence".to_string()),
            )),
        }
    }
}
