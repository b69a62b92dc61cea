use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;

use super::notification::{NotificationManager, NotificationRecord, NotificationStatus};
use super::push_provider::PushTransport;
use super::quiz_content::QuizContent;
use super::response_handler::{NextPromptHint, QuizResponse, ResponseHandler, ResponseOutcome};
use super::schedule::{LearningSchedule, ScheduleDefaults, ScheduleOverrides};
use super::scheduler::{FireOutcome, QuizScheduler};
use super::time_window::ClockTime;
use super::wrong_answers::WrongAnswerSink;

pub const DEFAULT_HISTORY_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyAction {
    Increase,
    Decrease,
    Pause,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    pub schedule: LearningSchedule,
    pub planned_times: Vec<ClockTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_prompt: Option<NextPromptHint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPerformance {
    pub category: String,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningHistory {
    pub total_notifications: usize,
    pub responded: usize,
    pub accuracy: f64,
    pub average_response_time_seconds: f64,
    pub category_performance: Vec<CategoryPerformance>,
}

impl LearningHistory {
    fn from_records(records: &[NotificationRecord]) -> Self {
        let mut responded = 0usize;
        let mut correct = 0usize;
        let mut latency_ms_total = 0i64;
        // category -> (responded, correct)
        let mut by_category: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

        for record in records {
            if record.status != NotificationStatus::Responded {
                continue;
            }
            let was_correct = record.is_correct.unwrap_or(false);
            responded += 1;
            latency_ms_total += record.response_latency_ms().unwrap_or(0);
            if was_correct {
                correct += 1;
            }
            let entry = by_category.entry(record.quiz.category.as_str()).or_default();
            entry.0 += 1;
            if was_correct {
                entry.1 += 1;
            }
        }

        Self {
            total_notifications: records.len(),
            responded,
            accuracy: ratio(correct, responded),
            average_response_time_seconds: if responded == 0 {
                0.0
            } else {
                latency_ms_total as f64 / responded as f64 / 1000.0
            },
            category_performance: by_category
                .into_iter()
                .map(|(category, (answered, right))| CategoryPerformance {
                    category: category.to_string(),
                    accuracy: ratio(right, answered),
                })
                .collect(),
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Entry point for everything a client can do with its learning schedule.
pub struct LearningService {
    defaults: ScheduleDefaults,
    response_window: Duration,
    notifications: Arc<NotificationManager>,
    scheduler: QuizScheduler,
    responses: ResponseHandler,
}

impl LearningService {
    pub async fn new(
        config: &SchedulerConfig,
        transport: Arc<dyn PushTransport>,
        content: Arc<dyn QuizContent>,
        wrong_answers: Arc<dyn WrongAnswerSink>,
    ) -> Result<Self, SchedulerError> {
        let notifications = Arc::new(NotificationManager::new(transport));
        let scheduler = QuizScheduler::new(
            Arc::clone(&notifications),
            Arc::clone(&content),
            config.default_anchor,
        )
        .await?;
        let responses = ResponseHandler::new(
            Arc::clone(&notifications),
            wrong_answers,
            content,
            config.base_delay_minutes,
        );

        Ok(Self {
            defaults: config.schedule_defaults(),
            response_window: Duration::minutes(config.response_window_minutes as i64),
            notifications,
            scheduler,
            responses,
        })
    }

    /// Starts the trigger runtime. Schedules installed before this call are
    /// armed but do not fire until it runs.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler.start().await
    }

    pub async fn start_learning(
        &self,
        user_id: &str,
        overrides: ScheduleOverrides,
    ) -> Result<ScheduleStatus, SchedulerError> {
        let schedule = LearningSchedule::from_overrides(user_id, &self.defaults, overrides)?;
        let planned_times = self.scheduler.schedule_quizzes(schedule.clone()).await?;
        info!(
            user_id = %user_id,
            frequency = %schedule.frequency,
            timezone = %schedule.timezone,
            "learning started"
        );
        Ok(self.status(schedule, planned_times))
    }

    pub async fn stop_learning(&self, user_id: &str) -> Result<(), SchedulerError> {
        self.scheduler
            .remove_schedule(user_id)
            .await
            .ok_or_else(|| SchedulerError::ScheduleNotFound(user_id.to_string()))?;
        self.responses.forget_user(user_id);
        info!(user_id = %user_id, "learning stopped");
        Ok(())
    }

    pub async fn update_schedule(
        &self,
        user_id: &str,
        patch: ScheduleOverrides,
    ) -> Result<ScheduleStatus, SchedulerError> {
        let (schedule, planned_times) = self
            .scheduler
            .update_schedule(user_id, |schedule| schedule.apply(patch))
            .await?;
        info!(user_id = %user_id, "learning schedule updated");
        Ok(self.status(schedule, planned_times))
    }

    pub async fn adjust_frequency(
        &self,
        user_id: &str,
        action: FrequencyAction,
    ) -> Result<ScheduleStatus, SchedulerError> {
        let mut previous = None;
        let (schedule, planned_times) = self
            .scheduler
            .update_schedule(user_id, |schedule| {
                previous = Some(schedule.frequency);
                match action {
                    FrequencyAction::Increase => {
                        schedule.frequency = schedule.frequency.increased();
                        schedule.paused = false;
                    }
                    FrequencyAction::Decrease => {
                        schedule.frequency = schedule.frequency.decreased();
                        schedule.paused = false;
                    }
                    FrequencyAction::Pause => schedule.paused = true,
                }
                Ok(())
            })
            .await?;

        info!(
            user_id = %user_id,
            action = ?action,
            from = %previous.unwrap_or(schedule.frequency),
            to = %schedule.frequency,
            paused = schedule.paused,
            "learning frequency adjusted"
        );
        Ok(self.status(schedule, planned_times))
    }

    pub async fn respond_to_notification(
        &self,
        response: QuizResponse,
    ) -> Result<ResponseOutcome, SchedulerError> {
        self.responses.respond(response).await
    }

    /// Stats over prompts scheduled within the last `days` days. A span
    /// reaching past the representable range covers all history.
    pub fn get_history(&self, user_id: &str, days: i64) -> LearningHistory {
        let since = Duration::try_days(days.max(0))
            .and_then(|span| Utc::now().checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let records = self.notifications.records_for_user(user_id, since);
        LearningHistory::from_records(&records)
    }

    pub async fn get_schedule(&self, user_id: &str) -> Result<ScheduleStatus, SchedulerError> {
        let (schedule, planned_times) = self
            .scheduler
            .snapshot(user_id)
            .await
            .ok_or_else(|| SchedulerError::ScheduleNotFound(user_id.to_string()))?;
        Ok(self.status(schedule, planned_times))
    }

    pub fn get_notification(&self, id: &str) -> Result<NotificationRecord, SchedulerError> {
        self.notifications
            .get_notification(id)
            .ok_or_else(|| SchedulerError::NotificationNotFound(id.to_string()))
    }

    pub async fn fire_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome, SchedulerError> {
        self.scheduler.fire_at(user_id, now).await
    }

    pub async fn fire(&self, user_id: &str) -> Result<FireOutcome, SchedulerError> {
        self.scheduler.fire(user_id).await
    }

    pub fn expire_stale(&self, now: DateTime<Utc>) -> usize {
        self.notifications.expire_stale(now, self.response_window)
    }

    pub async fn active_users(&self) -> usize {
        self.scheduler.active_users().await
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    fn status(&self, schedule: LearningSchedule, planned_times: Vec<ClockTime>) -> ScheduleStatus {
        let next_prompt = self.responses.next_prompt_hint(&schedule.user_id);
        ScheduleStatus {
            schedule,
            planned_times,
            next_prompt,
        }
    }
}
