use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::time_window::ClockTime;

const SYNTHESIS_SPAN_HOURS: usize = 12;
const UNRECOGNIZED_TIER_COUNT: usize = 3;

/// How many prompts a user receives per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Frequency {
    Low,
    Medium,
    High,
    /// Any tier name the table does not know about.
    Standard,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Standard => "standard",
        }
    }

    pub fn daily_count(&self) -> usize {
        match self {
            Self::Low => 2,
            Self::Medium => 4,
            Self::High => 6,
            Self::Standard => UNRECOGNIZED_TIER_COUNT,
        }
    }

    pub fn increased(&self) -> Self {
        match self {
            Self::Low | Self::Standard => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }

    pub fn decreased(&self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium | Self::Low | Self::Standard => Self::Low,
        }
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Standard,
        })
    }
}

impl From<String> for Frequency {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(tier) => tier,
            Err(never) => match never {},
        }
    }
}

impl From<Frequency> for String {
    fn from(value: Frequency) -> Self {
        value.as_str().to_string()
    }
}

/// Concrete daily trigger times for `desired_count` prompts.
///
/// Preferred times win in input order. Missing slots are synthesized from the
/// preferred times used as anchors, offset by `floor(12 / missing) * k` hours
/// for the k-th synthesized slot. The offset is a spreading heuristic and is
/// uneven when `missing` does not divide 12. An empty preference list uses
/// `fallback_anchor` as the single preferred time.
pub fn plan_times(
    preferred: &[ClockTime],
    desired_count: usize,
    fallback_anchor: ClockTime,
) -> Vec<ClockTime> {
    if desired_count == 0 {
        return Vec::new();
    }

    let fallback = [fallback_anchor];
    let anchors: &[ClockTime] = if preferred.is_empty() {
        &fallback
    } else {
        preferred
    };

    if anchors.len() >= desired_count {
        return anchors[..desired_count].to_vec();
    }

    let missing = desired_count - anchors.len();
    let step = (SYNTHESIS_SPAN_HOURS / missing) as u32;

    let mut planned = anchors.to_vec();
    planned.extend((1..=missing).map(|k| {
        let anchor = anchors[(k - 1) % anchors.len()];
        anchor.add_hours_wrapping(step * k as u32)
    }));
    planned
}

pub fn plan_for_frequency(
    preferred: &[ClockTime],
    frequency: Frequency,
    fallback_anchor: ClockTime,
) -> Vec<ClockTime> {
    plan_times(preferred, frequency.daily_count(), fallback_anchor)
}
