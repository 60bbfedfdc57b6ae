//! Timestamp reduction: absolute instants to "elapsed within the week", naive
//! timestamps to "elapsed since day zero", and per-point times for trips that
//! only know their start and end.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::error::{Error, Result};

const MINUTES_PER_DAY: u32 = 24 * 60;
const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Format of the naive timestamps in point dumps, e.g. `2008-02-02 15:36:08`.
pub const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    #[default]
    Minutes,
    Seconds,
}

/// Maps instants onto a week that starts Monday 00:00 local time. Days are
/// numbered 0 (Monday) to 6 (Sunday); days before `weekend_start` are
/// weekdays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekClock {
    pub tz: Tz,
    pub unit: TimeUnit,
    pub weekend_start: u32,
}

impl Default for WeekClock {
    fn default() -> Self {
        Self {
            tz: chrono_tz::America::Los_Angeles,
            unit: TimeUnit::Minutes,
            weekend_start: 5,
        }
    }
}

impl WeekClock {
    /// Clock in the named IANA zone, e.g. `America/Los_Angeles`.
    pub fn new(tz_name: &str) -> Result<Self> {
        let tz = tz_name
            .parse::<Tz>()
            .map_err(|_| Error::UnknownTimeZone(tz_name.to_owned()))?;
        Ok(Self {
            tz,
            ..Self::default()
        })
    }

    pub fn with_unit(mut self, unit: TimeUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_weekend_start(mut self, day: u32) -> Self {
        self.weekend_start = day.min(7);
        self
    }

    pub fn units_per_day(&self) -> u32 {
        match self.unit {
            TimeUnit::Minutes => MINUTES_PER_DAY,
            TimeUnit::Seconds => SECONDS_PER_DAY,
        }
    }

    pub fn elapsed_in_week<Z: TimeZone>(&self, instant: &DateTime<Z>) -> u32 {
        let local = instant.with_timezone(&self.tz);
        let day = local.weekday().num_days_from_monday();
        let minutes = day * MINUTES_PER_DAY + local.hour() * 60 + local.minute();
        match self.unit {
            TimeUnit::Minutes => minutes,
            TimeUnit::Seconds => minutes * 60 + local.second(),
        }
    }

    pub fn from_unix_seconds(&self, seconds: i64) -> Result<u32> {
        let instant = DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
            Error::invalid_value("timestamp", format!("{seconds}s is out of range"))
        })?;
        Ok(self.elapsed_in_week(&instant))
    }

    pub fn from_unix_millis(&self, millis: i64) -> Result<u32> {
        let instant = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            Error::invalid_value("timestamp", format!("{millis}ms is out of range"))
        })?;
        Ok(self.elapsed_in_week(&instant))
    }

    #[inline]
    pub fn day_of_week(&self, elapsed: u32) -> u32 {
        elapsed / self.units_per_day()
    }

    #[inline]
    pub fn time_of_day(&self, elapsed: u32) -> u32 {
        elapsed % self.units_per_day()
    }

    #[inline]
    pub fn is_weekday(&self, elapsed: u32) -> bool {
        self.day_of_week(elapsed) < self.weekend_start
    }
}

/// Seconds elapsed since midnight of a fixed first day, for data sets that
/// cover a known week and carry naive local timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayZero(pub NaiveDate);

impl DayZero {
    pub fn elapsed_seconds(&self, timestamp: NaiveDateTime) -> i64 {
        let days = (timestamp.date() - self.0).num_days();
        days * SECONDS_PER_DAY as i64 + timestamp.num_seconds_from_midnight() as i64
    }

    pub fn parse_elapsed(&self, text: &str) -> std::result::Result<i64, chrono::ParseError> {
        let timestamp = NaiveDateTime::parse_from_str(text.trim(), NAIVE_TIMESTAMP_FORMAT)?;
        Ok(self.elapsed_seconds(timestamp))
    }
}

/// Estimated visit time of each of `count` path points, spread linearly by
/// index between `start_ms` and `end_ms`. Point `i` gets
/// `start + duration * i / count`, truncated to whole milliseconds, so the
/// last point lands just before `end_ms`.
pub fn interpolate_millis(start_ms: i64, end_ms: i64, count: usize) -> Vec<i64> {
    let duration = end_ms - start_ms;
    let count = count as i64;
    (0..count).map(|i| start_ms + duration * i / count).collect()
}
