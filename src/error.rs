use thiserror::Error;

use crate::services::push_provider::PushError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("notification not found: {0}")]
    NotificationNotFound(String),
    #[error("no learning schedule for user: {0}")]
    ScheduleNotFound(String),
    #[error("notification {0} has already been resolved")]
    AlreadyResponded(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("notification {0} has not been dispatched yet")]
    NotDispatched(String),
    #[error("answer index {index} out of range for {options} options")]
    InvalidAnswer { index: usize, options: usize },
    #[error("transport error: {0}")]
    Transport(#[from] PushError),
    #[error("quiz content error: {0}")]
    Content(String),
    #[error("trigger error: {0}")]
    Trigger(#[from] tokio_cron_scheduler::JobSchedulerError),
}
