use std::fmt;
use std::str::FromStr;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Wall-clock time of day at minute resolution, written as `HH:MM`.
///
/// Ordering matches lexicographic ordering of the zero-padded string form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn from_time<T: Timelike>(t: &T) -> Self {
        Self {
            hour: t.hour() as u8,
            minute: t.minute() as u8,
        }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn minutes_of_day(&self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }

    /// Adds whole hours, wrapping past midnight.
    pub fn add_hours_wrapping(&self, hours: u32) -> Self {
        let total = (self.minutes_of_day() + (hours % 24) * 60) % MINUTES_PER_DAY;
        Self {
            hour: (total / 60) as u8,
            minute: (total % 60) as u8,
        }
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ClockTime {
    type Err = SchedulerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || SchedulerError::InvalidSchedule(format!("invalid time of day: {raw:?}"));

        let (h, m) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if h.is_empty() || h.len() > 2 || m.len() != 2 || !digits(h) || !digits(m) {
            return Err(invalid());
        }
        let hour = h.parse::<u8>().map_err(|_| invalid())?;
        let minute = m.parse::<u8>().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = SchedulerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

/// Daily window during which no prompts go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl QuietHours {
    pub fn contains(&self, now: ClockTime) -> bool {
        is_quiet_hour(now, self.start, self.end)
    }
}

/// Both ends are inclusive. When `start >= end` the window wraps midnight.
pub fn is_quiet_hour(now: ClockTime, start: ClockTime, end: ClockTime) -> bool {
    if start < end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    Morning,
    Afternoon,
    Evening,
    Night,
}

pub fn time_bucket(now: ClockTime) -> TimeBucket {
    match now.hour() {
        5..=11 => TimeBucket::Morning,
        12..=16 => TimeBucket::Afternoon,
        17..=20 => TimeBucket::Evening,
        _ => TimeBucket::Night,
    }
}
