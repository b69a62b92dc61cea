use std::collections::BTreeSet;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

use super::interval_planner::Frequency;
use super::quiz_content::DifficultyPolicy;
use super::time_window::{ClockTime, QuietHours};

/// Values a new schedule starts from when the caller leaves them out.
#[derive(Debug, Clone)]
pub struct ScheduleDefaults {
    pub timezone: String,
    pub frequency: Frequency,
    pub quiet_hours: QuietHours,
    pub max_daily_questions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSchedule {
    pub user_id: String,
    pub preferred_times: Vec<ClockTime>,
    pub timezone: String,
    pub frequency: Frequency,
    pub categories: BTreeSet<String>,
    pub difficulty: DifficultyPolicy,
    pub quiet_hours: QuietHours,
    pub max_daily_questions: usize,
    #[serde(default)]
    pub paused: bool,
}

/// Caller-supplied fields for starting or updating a schedule. Absent fields
/// keep their current (or default) value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOverrides {
    #[serde(default)]
    pub preferred_times: Option<Vec<ClockTime>>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub categories: Option<BTreeSet<String>>,
    #[serde(default)]
    pub difficulty: Option<DifficultyPolicy>,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub max_daily_questions: Option<usize>,
}

impl LearningSchedule {
    pub fn new(user_id: &str, defaults: &ScheduleDefaults) -> Self {
        Self {
            user_id: user_id.to_string(),
            preferred_times: Vec::new(),
            timezone: defaults.timezone.clone(),
            frequency: defaults.frequency,
            categories: BTreeSet::new(),
            difficulty: DifficultyPolicy::default(),
            quiet_hours: defaults.quiet_hours,
            max_daily_questions: defaults.max_daily_questions,
            paused: false,
        }
    }

    pub fn from_overrides(
        user_id: &str,
        defaults: &ScheduleDefaults,
        overrides: ScheduleOverrides,
    ) -> Result<Self, SchedulerError> {
        if user_id.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule("user id is empty".into()));
        }
        let mut schedule = Self::new(user_id, defaults);
        schedule.apply(overrides)?;
        Ok(schedule)
    }

    /// Merges `patch` into this schedule. Nothing changes when validation fails.
    pub fn apply(&mut self, patch: ScheduleOverrides) -> Result<(), SchedulerError> {
        if let Some(ref timezone) = patch.timezone {
            parse_timezone(timezone)?;
        }

        if let Some(times) = patch.preferred_times {
            self.preferred_times = times;
        }
        if let Some(timezone) = patch.timezone {
            self.timezone = timezone;
        }
        if let Some(frequency) = patch.frequency {
            self.frequency = frequency;
        }
        if let Some(categories) = patch.categories {
            self.categories = categories
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }
        if let Some(difficulty) = patch.difficulty {
            self.difficulty = difficulty;
        }
        if let Some(quiet_hours) = patch.quiet_hours {
            self.quiet_hours = quiet_hours;
        }
        if let Some(max) = patch.max_daily_questions {
            self.max_daily_questions = max;
        }
        Ok(())
    }

    pub fn tz(&self) -> Tz {
        parse_timezone(&self.timezone).unwrap_or(Tz::UTC)
    }
}

pub fn parse_timezone(raw: &str) -> Result<Tz, SchedulerError> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("unknown timezone: {raw:?}")))
}
