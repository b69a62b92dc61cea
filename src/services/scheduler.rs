use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex as SyncMutex, RwLock};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SchedulerError;

use super::interval_planner::plan_for_frequency;
use super::notification::NotificationManager;
use super::quiz_content::QuizContent;
use super::schedule::LearningSchedule;
use super::time_window::{time_bucket, ClockTime, TimeBucket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    Paused,
    QuietHours,
    DailyQuota,
    Disarmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum FireOutcome {
    Sent { notification_id: String },
    Skipped { reason: SkipReason },
}

/// Shared between every trigger of one schedule install. Disarming happens
/// under the lock, so once `disarm` returns no trigger of that install can
/// dispatch.
#[derive(Clone)]
struct ArmedFlag(Arc<SyncMutex<bool>>);

impl ArmedFlag {
    fn armed() -> Self {
        Self(Arc::new(SyncMutex::new(true)))
    }

    fn disarm(&self) {
        *self.0.lock() = false;
    }

    fn is_armed(&self) -> bool {
        *self.0.lock()
    }

    fn run_if_armed<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let guard = self.0.lock();
        if *guard {
            Some(f())
        } else {
            None
        }
    }
}

struct UserTriggers {
    armed: ArmedFlag,
    job_ids: Vec<Uuid>,
    times: Vec<ClockTime>,
}

/// Quiet hours, quota, quiz generation and dispatch for one trigger fire.
struct FirePipeline {
    schedules: RwLock<HashMap<String, LearningSchedule>>,
    notifications: Arc<NotificationManager>,
    content: Arc<dyn QuizContent>,
}

impl FirePipeline {
    async fn fire(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        armed: Option<&ArmedFlag>,
    ) -> Result<FireOutcome, SchedulerError> {
        let schedule = self
            .schedules
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| SchedulerError::ScheduleNotFound(user_id.to_string()))?;

        if schedule.paused {
            return Ok(skipped(user_id, SkipReason::Paused));
        }

        let tz = schedule.tz();
        let local = now.with_timezone(&tz);
        let clock = ClockTime::from_time(&local);
        let today = local.date_naive();

        if schedule.quiet_hours.contains(clock) {
            return Ok(skipped(user_id, SkipReason::QuietHours));
        }

        let quota = schedule.max_daily_questions;
        if self.notifications.sent_on_day(user_id, &tz, today) >= quota {
            return Ok(skipped(user_id, SkipReason::DailyQuota));
        }

        let quiz = self
            .content
            .generate_quiz(user_id, &schedule.categories, schedule.difficulty)
            .await?;
        let title = prompt_title(time_bucket(clock));

        let dispatch = || {
            // Re-checked here because two triggers of one user may pass the
            // first check before either dispatches.
            if self.notifications.sent_on_day(user_id, &tz, today) >= quota {
                return None;
            }
            Some(self.notifications.dispatch_at(quiz, user_id, &title, now))
        };

        let sent = match armed {
            Some(flag) => match flag.run_if_armed(dispatch) {
                Some(sent) => sent,
                None => return Ok(skipped(user_id, SkipReason::Disarmed)),
            },
            None => dispatch(),
        };

        Ok(match sent {
            Some(notification_id) => FireOutcome::Sent { notification_id },
            None => skipped(user_id, SkipReason::DailyQuota),
        })
    }
}

fn skipped(user_id: &str, reason: SkipReason) -> FireOutcome {
    debug!(user_id = %user_id, reason = ?reason, "trigger fire skipped");
    FireOutcome::Skipped { reason }
}

fn prompt_title(bucket: TimeBucket) -> String {
    let label = match bucket {
        TimeBucket::Morning => "Morning",
        TimeBucket::Afternoon => "Afternoon",
        TimeBucket::Evening => "Evening",
        TimeBucket::Night => "Late-night",
    };
    format!("{label} quiz")
}

fn daily_cron(time: ClockTime) -> String {
    format!("0 {} {} * * *", time.minute(), time.hour())
}

/// Owns the schedules and their daily triggers.
pub struct QuizScheduler {
    cron: Mutex<JobScheduler>,
    triggers: Mutex<HashMap<String, UserTriggers>>,
    pipeline: Arc<FirePipeline>,
    default_anchor: ClockTime,
}

impl QuizScheduler {
    pub async fn new(
        notifications: Arc<NotificationManager>,
        content: Arc<dyn QuizContent>,
        default_anchor: ClockTime,
    ) -> Result<Self, SchedulerError> {
        let cron = JobScheduler::new().await?;
        Ok(Self {
            cron: Mutex::new(cron),
            triggers: Mutex::new(HashMap::new()),
            pipeline: Arc::new(FirePipeline {
                schedules: RwLock::new(HashMap::new()),
                notifications,
                content,
            }),
            default_anchor,
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.cron.lock().await.start().await?;
        info!("quiz scheduler started");
        Ok(())
    }

    /// Installs `schedule` for its user, replacing and disarming any previous
    /// install before new triggers are armed. Paused schedules are stored
    /// without triggers. Returns the armed daily times.
    pub async fn schedule_quizzes(
        &self,
        schedule: LearningSchedule,
    ) -> Result<Vec<ClockTime>, SchedulerError> {
        let mut triggers = self.triggers.lock().await;
        self.install(&mut triggers, schedule).await
    }

    /// Applies `change` to the stored schedule of `user_id` and reinstalls it,
    /// all under the trigger registry lock. Fails with `ScheduleNotFound` when
    /// the user has no schedule, and leaves everything untouched when `change`
    /// fails.
    pub async fn update_schedule<F>(
        &self,
        user_id: &str,
        change: F,
    ) -> Result<(LearningSchedule, Vec<ClockTime>), SchedulerError>
    where
        F: FnOnce(&mut LearningSchedule) -> Result<(), SchedulerError>,
    {
        let mut triggers = self.triggers.lock().await;
        let mut schedule = self
            .schedule(user_id)
            .ok_or_else(|| SchedulerError::ScheduleNotFound(user_id.to_string()))?;
        change(&mut schedule)?;
        let times = self.install(&mut triggers, schedule.clone()).await?;
        Ok((schedule, times))
    }

    async fn install(
        &self,
        triggers: &mut HashMap<String, UserTriggers>,
        schedule: LearningSchedule,
    ) -> Result<Vec<ClockTime>, SchedulerError> {
        let user_id = schedule.user_id.clone();

        if let Some(previous) = triggers.remove(&user_id) {
            self.disarm(&user_id, previous).await;
        }

        let paused = schedule.paused;
        let tz = schedule.tz();
        let times = plan_for_frequency(
            &schedule.preferred_times,
            schedule.frequency,
            self.default_anchor,
        );
        self.pipeline
            .schedules
            .write()
            .insert(user_id.clone(), schedule);

        if paused {
            debug!(user_id = %user_id, "schedule stored paused, no triggers armed");
            return Ok(Vec::new());
        }

        let armed = ArmedFlag::armed();
        let mut job_ids = Vec::with_capacity(times.len());
        let cron = self.cron.lock().await;

        for time in &times {
            let pipeline = Arc::clone(&self.pipeline);
            let flag = armed.clone();
            let user = user_id.clone();
            let expr = daily_cron(*time);

            let job = Job::new_async_tz(expr.as_str(), tz, move |_uuid, _lock| {
                let pipeline = Arc::clone(&pipeline);
                let flag = flag.clone();
                let user = user.clone();
                Box::pin(async move {
                    if !flag.is_armed() {
                        return;
                    }
                    match pipeline.fire(&user, Utc::now(), Some(&flag)).await {
                        Ok(FireOutcome::Sent { notification_id }) => {
                            info!(user_id = %user, notification_id = %notification_id, "scheduled quiz sent");
                        }
                        Ok(FireOutcome::Skipped { .. }) => {}
                        Err(e) => {
                            warn!(user_id = %user, error = %e, "scheduled quiz fire failed");
                        }
                    }
                })
            });

            let added = match job {
                Ok(job) => cron.add(job).await,
                Err(e) => Err(e),
            };

            match added {
                Ok(id) => job_ids.push(id),
                Err(e) => {
                    armed.disarm();
                    for id in &job_ids {
                        let _ = cron.remove(id).await;
                    }
                    return Err(e.into());
                }
            }
        }
        drop(cron);

        info!(user_id = %user_id, triggers = job_ids.len(), tz = %tz, "quiz triggers armed");
        triggers.insert(
            user_id,
            UserTriggers {
                armed,
                job_ids,
                times: times.clone(),
            },
        );
        Ok(times)
    }

    /// Disarms and discards every trigger of `user_id`. The schedule itself
    /// is kept. Safe to call repeatedly.
    pub async fn clear_user_schedules(&self, user_id: &str) {
        let mut triggers = self.triggers.lock().await;
        if let Some(previous) = triggers.remove(user_id) {
            self.disarm(user_id, previous).await;
        }
    }

    /// Clears the triggers and forgets the schedule.
    pub async fn remove_schedule(&self, user_id: &str) -> Option<LearningSchedule> {
        let mut triggers = self.triggers.lock().await;
        if let Some(previous) = triggers.remove(user_id) {
            self.disarm(user_id, previous).await;
        }
        self.pipeline.schedules.write().remove(user_id)
    }

    pub async fn stop_all_schedules(&self) {
        let mut triggers = self.triggers.lock().await;
        let users: Vec<String> = triggers.keys().cloned().collect();
        for user_id in users {
            if let Some(previous) = triggers.remove(&user_id) {
                self.disarm(&user_id, previous).await;
            }
        }
        info!("all quiz triggers stopped");
    }

    pub async fn shutdown(&self) {
        self.stop_all_schedules().await;
        let mut cron = self.cron.lock().await;
        if let Err(e) = cron.shutdown().await {
            warn!(error = %e, "error shutting down quiz scheduler");
        }
    }

    async fn disarm(&self, user_id: &str, previous: UserTriggers) {
        previous.armed.disarm();
        let cron = self.cron.lock().await;
        for id in &previous.job_ids {
            if let Err(e) = cron.remove(id).await {
                warn!(user_id = %user_id, job_id = %id, error = %e, "failed to remove quiz trigger");
            }
        }
        debug!(user_id = %user_id, removed = previous.job_ids.len(), "quiz triggers cleared");
    }

    /// Runs the fire pipeline once for `user_id` right now.
    pub async fn fire(&self, user_id: &str) -> Result<FireOutcome, SchedulerError> {
        self.fire_at(user_id, Utc::now()).await
    }

    pub async fn fire_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome, SchedulerError> {
        self.pipeline.fire(user_id, now, None).await
    }

    pub fn schedule(&self, user_id: &str) -> Option<LearningSchedule> {
        self.pipeline.schedules.read().get(user_id).cloned()
    }

    /// The stored schedule with its armed times, read as one consistent pair.
    pub async fn snapshot(&self, user_id: &str) -> Option<(LearningSchedule, Vec<ClockTime>)> {
        let triggers = self.triggers.lock().await;
        let schedule = self.schedule(user_id)?;
        let times = triggers.get(user_id).map(|t| t.times.clone()).unwrap_or_default();
        Some((schedule, times))
    }

    pub async fn trigger_count(&self, user_id: &str) -> usize {
        self.triggers
            .lock()
            .await
            .get(user_id)
            .map(|t| t.job_ids.len())
            .unwrap_or(0)
    }

    pub async fn active_users(&self) -> usize {
        self.triggers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::services::interval_planner::Frequency;
    use crate::services::notification::test_support::*;
    use crate::services::quiz_content::{DifficultyPolicy, Quiz};
    use crate::services::schedule::{ScheduleDefaults, ScheduleOverrides};
    use crate::services::time_window::QuietHours;

    struct FixedContent {
        fail: bool,
    }

    #[async_trait]
    impl QuizContent for FixedContent {
        async fn generate_quiz(
            &self,
            _user_id: &str,
            _categories: &BTreeSet<String>,
            _policy: DifficultyPolicy,
        ) -> Result<Quiz, SchedulerError> {
            if self.fail {
                return Err(SchedulerError::Content("bank offline".into()));
            }
            Ok(sample_quiz())
        }
    }

    fn t(raw: &str) -> ClockTime {
        raw.parse().unwrap()
    }

    fn defaults() -> ScheduleDefaults {
        ScheduleDefaults {
            timezone: "UTC".into(),
            frequency: Frequency::Medium,
            quiet_hours: QuietHours {
                start: t("22:00"),
                end: t("08:00"),
            },
            max_daily_questions: 2,
        }
    }

    fn schedule(user_id: &str, overrides: ScheduleOverrides) -> LearningSchedule {
        LearningSchedule::from_overrides(user_id, &defaults(), overrides).unwrap()
    }

    async fn scheduler_with(fail: bool) -> (QuizScheduler, Arc<NotificationManager>) {
        let notifications = Arc::new(NotificationManager::new(Arc::new(RecordingTransport::default())));
        let scheduler = QuizScheduler::new(
            notifications.clone(),
            Arc::new(FixedContent { fail }),
            t("09:00"),
        )
        .await
        .unwrap();
        (scheduler, notifications)
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_schedule_arms_one_trigger_per_planned_time() {
        let (scheduler, _) = scheduler_with(false).await;
        let times = scheduler
            .schedule_quizzes(schedule(
                "u1",
                ScheduleOverrides {
                    preferred_times: Some(vec![t("09:00"), t("14:00")]),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        assert_eq!(times.len(), 4);
        assert_eq!(times[0], t("09:00"));
        assert_eq!(times[1], t("14:00"));
        assert_eq!(scheduler.trigger_count("u1").await, 4);
        let (stored, armed) = scheduler.snapshot("u1").await.unwrap();
        assert_eq!(stored.user_id, "u1");
        assert_eq!(armed, times);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reschedule_replaces_previous_triggers() {
        let (scheduler, _) = scheduler_with(false).await;
        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();
        assert_eq!(scheduler.trigger_count("u1").await, 4);

        scheduler
            .schedule_quizzes(schedule(
                "u1",
                ScheduleOverrides {
                    frequency: Some(Frequency::Low),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        assert_eq!(scheduler.trigger_count("u1").await, 2);
        assert_eq!(scheduler.active_users().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_is_idempotent() {
        let (scheduler, _) = scheduler_with(false).await;
        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();

        scheduler.clear_user_schedules("u1").await;
        scheduler.clear_user_schedules("u1").await;
        scheduler.clear_user_schedules("never-scheduled").await;

        assert_eq!(scheduler.trigger_count("u1").await, 0);
        // the schedule survives a clear
        assert!(scheduler.schedule("u1").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_all() {
        let (scheduler, _) = scheduler_with(false).await;
        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();
        scheduler.schedule_quizzes(schedule("u2", Default::default())).await.unwrap();

        scheduler.stop_all_schedules().await;
        assert_eq!(scheduler.active_users().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fire_sends_outside_quiet_hours() {
        let (scheduler, notifications) = scheduler_with(false).await;
        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();

        let outcome = scheduler.fire_at("u1", noon()).await.unwrap();
        let FireOutcome::Sent { notification_id } = outcome else {
            panic!("expected a sent prompt, got {outcome:?}");
        };
        let record = notifications.get_notification(&notification_id).unwrap();
        assert_eq!(record.user_id, "u1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fire_skips_quiet_hours_boundary() {
        let (scheduler, notifications) = scheduler_with(false).await;
        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();

        let at_start = Utc.with_ymd_and_hms(2024, 5, 6, 22, 0, 0).unwrap();
        let at_end = Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap();
        for now in [at_start, at_end] {
            assert_eq!(
                scheduler.fire_at("u1", now).await.unwrap(),
                FireOutcome::Skipped { reason: SkipReason::QuietHours }
            );
        }
        assert!(notifications.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_quiet_hours_use_schedule_timezone() {
        let (scheduler, _) = scheduler_with(false).await;
        scheduler
            .schedule_quizzes(schedule(
                "u1",
                ScheduleOverrides {
                    timezone: Some("Asia/Tokyo".into()),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        // 14:00 UTC is 23:00 in Tokyo
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 14, 0, 0).unwrap();
        assert_eq!(
            scheduler.fire_at("u1", now).await.unwrap(),
            FireOutcome::Skipped { reason: SkipReason::QuietHours }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_daily_quota() {
        let (scheduler, notifications) = scheduler_with(false).await;
        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();

        assert!(matches!(scheduler.fire_at("u1", noon()).await.unwrap(), FireOutcome::Sent { .. }));
        assert!(matches!(scheduler.fire_at("u1", noon()).await.unwrap(), FireOutcome::Sent { .. }));
        assert_eq!(
            scheduler.fire_at("u1", noon()).await.unwrap(),
            FireOutcome::Skipped { reason: SkipReason::DailyQuota }
        );
        assert_eq!(notifications.len(), 2);

        // the quota resets on the next local day
        let tomorrow = noon() + chrono::Duration::days(1);
        assert!(matches!(scheduler.fire_at("u1", tomorrow).await.unwrap(), FireOutcome::Sent { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fire_title_follows_time_bucket() {
        let transport = Arc::new(RecordingTransport::default());
        let notifications = Arc::new(NotificationManager::new(transport.clone()));
        let scheduler = QuizScheduler::new(notifications, Arc::new(FixedContent { fail: false }), t("09:00"))
            .await
            .unwrap();
        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();

        let morning = Utc.with_ymd_and_hms(2024, 5, 6, 9, 30, 0).unwrap();
        scheduler.fire_at("u1", morning).await.unwrap();

        let sent = transport.wait_for(1).await;
        assert_eq!(sent[0].title, "Morning quiz");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_paused_schedule_has_no_triggers_and_skips() {
        let (scheduler, _) = scheduler_with(false).await;
        let mut paused = schedule("u1", Default::default());
        paused.paused = true;

        let times = scheduler.schedule_quizzes(paused).await.unwrap();
        assert!(times.is_empty());
        assert_eq!(scheduler.trigger_count("u1").await, 0);
        assert_eq!(
            scheduler.fire_at("u1", noon()).await.unwrap(),
            FireOutcome::Skipped { reason: SkipReason::Paused }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_content_failure_is_isolated() {
        let (scheduler, notifications) = scheduler_with(true).await;
        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();

        let err = scheduler.fire_at("u1", noon()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Content(_)));
        assert!(notifications.is_empty());
        assert_eq!(scheduler.trigger_count("u1").await, 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_user() {
        let (scheduler, _) = scheduler_with(false).await;
        assert!(matches!(
            scheduler.fire_at("ghost", noon()).await,
            Err(SchedulerError::ScheduleNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_in_flight_fire_after_clear_is_dropped() {
        let (scheduler, notifications) = scheduler_with(false).await;
        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();

        // the flag a running trigger closure holds
        let flag = scheduler.triggers.lock().await.get("u1").unwrap().armed.clone();

        let live = scheduler.pipeline.fire("u1", noon(), Some(&flag)).await.unwrap();
        assert!(matches!(live, FireOutcome::Sent { .. }));

        scheduler.clear_user_schedules("u1").await;
        assert_eq!(
            scheduler.pipeline.fire("u1", noon(), Some(&flag)).await.unwrap(),
            FireOutcome::Skipped { reason: SkipReason::Disarmed }
        );
        assert_eq!(notifications.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replaced_install_flag_is_disarmed() {
        let (scheduler, notifications) = scheduler_with(false).await;
        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();
        let old_flag = scheduler.triggers.lock().await.get("u1").unwrap().armed.clone();

        scheduler
            .update_schedule("u1", |s| {
                s.frequency = Frequency::High;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            scheduler.pipeline.fire("u1", noon(), Some(&old_flag)).await.unwrap(),
            FireOutcome::Skipped { reason: SkipReason::Disarmed }
        );
        assert!(notifications.is_empty());
        assert_eq!(scheduler.trigger_count("u1").await, 6);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_missing_or_rejected() {
        let (scheduler, _) = scheduler_with(false).await;
        assert!(matches!(
            scheduler.update_schedule("ghost", |_| Ok(())).await,
            Err(SchedulerError::ScheduleNotFound(_))
        ));

        scheduler.schedule_quizzes(schedule("u1", Default::default())).await.unwrap();
        let rejected = scheduler
            .update_schedule("u1", |s| {
                s.frequency = Frequency::Low;
                Err(SchedulerError::InvalidSchedule("nope".into()))
            })
            .await;
        assert!(matches!(rejected, Err(SchedulerError::InvalidSchedule(_))));
        assert_eq!(scheduler.schedule("u1").unwrap().frequency, Frequency::Medium);
        assert_eq!(scheduler.trigger_count("u1").await, 4);
    }

    #[test]
    fn test_disarmed_flag_blocks_dispatch() {
        let flag = ArmedFlag::armed();
        assert_eq!(flag.run_if_armed(|| 1), Some(1));
        flag.disarm();
        assert_eq!(flag.run_if_armed(|| 1), None);
        assert!(!flag.is_armed());
    }

    #[test]
    fn test_daily_cron_expression() {
        assert_eq!(daily_cron(t("09:05")), "0 5 9 * * *");
        assert_eq!(daily_cron(t("00:00")), "0 0 0 * * *");
    }
}
