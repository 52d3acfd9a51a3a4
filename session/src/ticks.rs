use std::{
    fmt,
    ops::{Add, Sub},
    time::Duration,
};

use chrono::{NaiveTime, Timelike};
use serde::Deserialize;

pub const TICKS_PER_SECOND: i64 = 10_000_000;
pub const TICKS_PER_MILLI: i64 = TICKS_PER_SECOND / 1000;
pub const TICKS_PER_MINUTE: i64 = 60 * TICKS_PER_SECOND;
pub const MINUTES_PER_DAY: u32 = 24 * 60;

const NANOS_PER_TICK: i64 = 100;

/// Server time unit, 10,000,000 per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(transparent)]
pub struct Ticks(i64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    pub const fn new(ticks: i64) -> Self {
        Self(ticks)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn from_seconds(seconds: i64) -> Self {
        Self(seconds.saturating_mul(TICKS_PER_SECOND))
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(TICKS_PER_MILLI))
    }

    /// Whole seconds, truncated towards zero.
    pub const fn seconds(self) -> i64 {
        self.0 / TICKS_PER_SECOND
    }

    pub const fn millis(self) -> i64 {
        self.0 / TICKS_PER_MILLI
    }

    pub const fn abs_diff(self, other: Ticks) -> u64 {
        self.0.abs_diff(other.0)
    }

    /// `None` unless `minute` is a valid minute of the day (0..=1439).
    pub fn from_minute_of_day(minute: u32) -> Option<Self> {
        (minute < MINUTES_PER_DAY).then(|| Self(minute as i64 * TICKS_PER_MINUTE))
    }

    /// Inverse of [`Ticks::from_minute_of_day`], truncating any sub-minute part.
    pub fn minute_of_day(self) -> Option<u32> {
        if self.0 < 0 {
            return None;
        }
        u32::try_from(self.0 / TICKS_PER_MINUTE)
            .ok()
            .filter(|m| *m < MINUTES_PER_DAY)
    }

    pub fn from_time_of_day(time: NaiveTime) -> Self {
        let seconds = time.num_seconds_from_midnight() as i64;
        let nanos = time.nanosecond() as i64;
        Self(seconds * TICKS_PER_SECOND + nanos / NANOS_PER_TICK)
    }

    pub fn time_of_day(self) -> Option<NaiveTime> {
        if self.0 < 0 {
            return None;
        }
        let seconds = u32::try_from(self.seconds()).ok()?;
        let nanos = (self.0 % TICKS_PER_SECOND) * NANOS_PER_TICK;
        NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos as u32)
    }

    pub fn from_duration(duration: Duration) -> Self {
        let ticks = duration.as_nanos() / NANOS_PER_TICK as u128;
        Self(i64::try_from(ticks).unwrap_or(i64::MAX))
    }

    /// Negative values saturate to zero.
    pub fn as_duration(self) -> Duration {
        let ticks = self.0.max(0) as u64;
        Duration::from_nanos(ticks.saturating_mul(NANOS_PER_TICK as u64))
    }
}

impl Add for Ticks {
    type Output = Ticks;

    fn add(self, rhs: Ticks) -> Ticks {
        Ticks(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Ticks {
    type Output = Ticks;

    fn sub(self, rhs: Ticks) -> Ticks {
        Ticks(self.0.saturating_sub(rhs.0))
    }
}

impl From<i64> for Ticks {
    fn from(ticks: i64) -> Self {
        Self(ticks)
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.seconds();
        let sign = if total < 0 { "-" } else { "" };
        let total = total.abs();
        let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
        if h > 0 {
            write!(f, "{sign}{h}:{m:02}:{s:02}")
        } else {
            write!(f, "{sign}{m:02}:{s:02}")
        }
    }
}
