use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use crate::services::adaptive_delay::DEFAULT_BASE_DELAY_MINUTES;
use crate::services::interval_planner::Frequency;
use crate::services::schedule::{parse_timezone, ScheduleDefaults};
use crate::services::time_window::{ClockTime, QuietHours};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            host,
            port,
            log_level,
            scheduler: SchedulerConfig::from_env(),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub quiet_hours: QuietHours,
    pub max_daily_questions: usize,
    pub base_delay_minutes: u32,
    pub response_window_minutes: u32,
    pub default_timezone: String,
    pub default_frequency: Frequency,
    pub default_anchor: ClockTime,
    pub expiry_sweep_schedule: String,
    pub enable_expiry_worker: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quiet_hours: QuietHours {
                start: ClockTime::new(22, 0).unwrap_or_default(),
                end: ClockTime::new(8, 0).unwrap_or_default(),
            },
            max_daily_questions: 10,
            base_delay_minutes: DEFAULT_BASE_DELAY_MINUTES,
            response_window_minutes: 60,
            default_timezone: "UTC".to_string(),
            default_frequency: Frequency::Medium,
            default_anchor: ClockTime::new(9, 0).unwrap_or_default(),
            expiry_sweep_schedule: "0 */5 * * * *".to_string(),
            enable_expiry_worker: true,
        }
    }
}

impl SchedulerConfig {
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let default_timezone = std::env::var("DEFAULT_TIMEZONE")
            .ok()
            .filter(|tz| parse_timezone(tz).is_ok())
            .unwrap_or(defaults.default_timezone);

        let expiry_sweep_schedule = std::env::var("EXPIRY_SWEEP_SCHEDULE")
            .ok()
            .filter(|v| is_valid_cron(v))
            .unwrap_or(defaults.expiry_sweep_schedule);

        Self {
            quiet_hours: QuietHours {
                start: env_parse("QUIET_HOURS_START").unwrap_or(defaults.quiet_hours.start),
                end: env_parse("QUIET_HOURS_END").unwrap_or(defaults.quiet_hours.end),
            },
            max_daily_questions: env_parse("MAX_DAILY_QUESTIONS").unwrap_or(defaults.max_daily_questions),
            base_delay_minutes: env_parse::<u32>("BASE_DELAY_MINUTES")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.base_delay_minutes),
            response_window_minutes: env_parse::<u32>("RESPONSE_WINDOW_MINUTES")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.response_window_minutes),
            default_timezone,
            default_frequency: std::env::var("DEFAULT_FREQUENCY")
                .ok()
                .map(Frequency::from)
                .unwrap_or(defaults.default_frequency),
            default_anchor: env_parse("DEFAULT_ANCHOR_TIME").unwrap_or(defaults.default_anchor),
            expiry_sweep_schedule,
            enable_expiry_worker: std::env::var("ENABLE_EXPIRY_WORKER")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.enable_expiry_worker),
        }
    }

    pub fn schedule_defaults(&self) -> ScheduleDefaults {
        ScheduleDefaults {
            timezone: self.default_timezone.clone(),
            frequency: self.default_frequency,
            quiet_hours: self.quiet_hours,
            max_daily_questions: self.max_daily_questions,
        }
    }
}

/// Six-field expression with a leading seconds column.
pub fn is_valid_cron(expr: &str) -> bool {
    cron::Schedule::from_str(expr.trim()).is_ok()
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
