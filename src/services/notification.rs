use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SchedulerError;

use super::push_provider::{PushPayload, PushTransport, QuickAction, MAX_QUICK_ACTIONS};
use super::quiz_content::Quiz;

pub const DEFAULT_TITLE: &str = "Quick quiz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Scheduled,
    Sent,
    Responded,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub quiz: Quiz,
    pub scheduled_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_answer: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    pub status: NotificationStatus,
}

impl NotificationRecord {
    fn scheduled(id: String, user_id: &str, quiz: Quiz, at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: user_id.to_string(),
            quiz,
            scheduled_time: at,
            sent_time: None,
            responded_time: None,
            user_answer: None,
            is_correct: None,
            status: NotificationStatus::Scheduled,
        }
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_time.unwrap_or(self.scheduled_time)
    }

    /// Milliseconds between dispatch and response, never negative.
    pub fn response_latency_ms(&self) -> Option<i64> {
        self.responded_time
            .map(|at| (at - self.sent_at()).num_milliseconds().max(0))
    }

    fn mark_sent(&mut self, at: DateTime<Utc>) {
        if self.status == NotificationStatus::Scheduled {
            self.sent_time = Some(at);
            self.status = NotificationStatus::Sent;
        }
    }

    fn resolve(&mut self, answer_index: usize, at: DateTime<Utc>) -> Result<bool, SchedulerError> {
        match self.status {
            NotificationStatus::Scheduled => return Err(SchedulerError::NotDispatched(self.id.clone())),
            NotificationStatus::Responded | NotificationStatus::Expired => {
                return Err(SchedulerError::AlreadyResponded(self.id.clone()))
            }
            NotificationStatus::Sent => {}
        }

        if answer_index >= self.quiz.options.len() {
            return Err(SchedulerError::InvalidAnswer {
                index: answer_index,
                options: self.quiz.options.len(),
            });
        }

        let correct = answer_index == self.quiz.correct_answer;
        self.responded_time = Some(at);
        self.user_answer = Some(answer_index);
        self.is_correct = Some(correct);
        self.status = NotificationStatus::Responded;
        Ok(correct)
    }
}

#[derive(Default)]
struct NotificationStore {
    records: HashMap<String, NotificationRecord>,
    by_user: HashMap<String, Vec<String>>,
}

/// Creates, dispatches and tracks quiz prompts.
pub struct NotificationManager {
    store: RwLock<NotificationStore>,
    transport: Arc<dyn PushTransport>,
}

impl NotificationManager {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self {
            store: RwLock::new(NotificationStore::default()),
            transport,
        }
    }

    pub fn send_quiz_notification(&self, quiz: Quiz, user_id: &str) -> String {
        self.send_titled_quiz_notification(quiz, user_id, DEFAULT_TITLE)
    }

    pub fn send_titled_quiz_notification(&self, quiz: Quiz, user_id: &str, title: &str) -> String {
        self.dispatch_at(quiz, user_id, title, Utc::now())
    }

    /// The record is stored and marked `sent` at `now` before this returns.
    /// Transport delivery runs in the background and is never retried.
    pub fn dispatch_at(&self, quiz: Quiz, user_id: &str, title: &str, now: DateTime<Utc>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut record = NotificationRecord::scheduled(id.clone(), user_id, quiz, now);
        let payload = build_payload(&record, title);
        record.mark_sent(now);

        {
            let mut store = self.store.write();
            store
                .by_user
                .entry(user_id.to_string())
                .or_default()
                .push(id.clone());
            store.records.insert(id.clone(), record);
        }

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(err) = transport.send(&payload).await {
                let err = SchedulerError::from(err);
                warn!(
                    notification_id = %payload.notification_id,
                    user_id = %payload.user_id,
                    error = %err,
                    "quiz notification dispatch failed"
                );
            }
        });

        debug!(notification_id = %id, user_id = %user_id, "quiz notification sent");
        id
    }

    pub fn get_notification(&self, id: &str) -> Option<NotificationRecord> {
        self.store.read().records.get(id).cloned()
    }

    /// Moves a `sent` record to `responded`. The first caller wins; later
    /// callers get `AlreadyResponded`.
    pub fn resolve_response(
        &self,
        id: &str,
        answer_index: usize,
        responded_at: DateTime<Utc>,
    ) -> Result<NotificationRecord, SchedulerError> {
        let mut store = self.store.write();
        let record = store
            .records
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotificationNotFound(id.to_string()))?;
        record.resolve(answer_index, responded_at)?;
        Ok(record.clone())
    }

    /// Marks every `sent` record older than `window` as `expired`.
    pub fn expire_stale(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut store = self.store.write();
        let mut expired = 0;
        for record in store.records.values_mut() {
            if record.status == NotificationStatus::Sent && record.sent_at() + window <= now {
                record.status = NotificationStatus::Expired;
                expired += 1;
            }
        }
        expired
    }

    pub fn records_for_user(&self, user_id: &str, since: DateTime<Utc>) -> Vec<NotificationRecord> {
        let store = self.store.read();
        store
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| store.records.get(id))
                    .filter(|r| r.scheduled_time >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Prompts dispatched to `user_id` on the calendar day `day` in `tz`.
    pub fn sent_on_day<Tz: TimeZone>(&self, user_id: &str, tz: &Tz, day: NaiveDate) -> usize {
        let store = self.store.read();
        store
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| store.records.get(id))
                    .filter_map(|r| r.sent_time)
                    .filter(|sent| sent.with_timezone(tz).date_naive() == day)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.store.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn insert_record(&self, record: NotificationRecord) {
        let mut store = self.store.write();
        store
            .by_user
            .entry(record.user_id.clone())
            .or_default()
            .push(record.id.clone());
        store.records.insert(record.id.clone(), record);
    }
}

fn build_payload(record: &NotificationRecord, title: &str) -> PushPayload {
    let quick_actions = record
        .quiz
        .options
        .iter()
        .take(MAX_QUICK_ACTIONS)
        .enumerate()
        .map(|(index, label)| QuickAction {
            label: label.clone(),
            action_id: format!("answer_{index}"),
        })
        .collect();

    PushPayload {
        user_id: record.user_id.clone(),
        notification_id: record.id.clone(),
        title: title.to_string(),
        body: record.quiz.question.clone(),
        quick_actions,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn manager() -> (NotificationManager, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        (NotificationManager::new(transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_send_creates_sent_record() {
        let (manager, _) = manager();
        let id = manager.send_quiz_notification(sample_quiz(), "u1");

        let record = manager.get_notification(&id).unwrap();
        assert_eq!(record.status, NotificationStatus::Sent);
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.sent_time, Some(record.scheduled_time));
        assert!(record.responded_time.is_none());
    }

    #[tokio::test]
    async fn test_payload_has_two_quick_actions() {
        let (manager, transport) = manager();
        let id = manager.send_quiz_notification(sample_quiz(), "u1");

        let sent = transport.wait_for(1).await;
        assert_eq!(sent.len(), 1);
        let payload = &sent[0];
        assert_eq!(payload.notification_id, id);
        assert_eq!(payload.body, "What is the capital of France?");
        assert_eq!(payload.quick_actions.len(), 2);
        assert_eq!(payload.quick_actions[0].label, "Berlin");
        assert_eq!(payload.quick_actions[1].action_id, "answer_1");
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_record() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let manager = NotificationManager::new(transport.clone());
        let id = manager.send_quiz_notification(sample_quiz(), "u1");

        transport.wait_for(1).await;
        let record = manager.get_notification(&id).unwrap();
        assert_eq!(record.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (manager, _) = manager();
        let a = manager.send_quiz_notification(sample_quiz(), "u1");
        let b = manager.send_quiz_notification(sample_quiz(), "u1");
        assert_ne!(a, b);
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatched_records_are_never_seen_unsent() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let (manager, _) = manager();
        let manager = Arc::new(manager);
        let done = Arc::new(AtomicBool::new(false));

        let watcher = {
            let manager = Arc::clone(&manager);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut answered = 0;
                while !done.load(Ordering::Acquire) {
                    for record in manager.records_for_user("u1", DateTime::<Utc>::MIN_UTC) {
                        assert_ne!(record.status, NotificationStatus::Scheduled);
                        if record.status == NotificationStatus::Sent {
                            match manager.resolve_response(&record.id, 1, Utc::now()) {
                                Ok(_) => answered += 1,
                                Err(SchedulerError::AlreadyResponded(_)) => {}
                                Err(other) => panic!("unexpected error: {other}"),
                            }
                        }
                    }
                    tokio::task::yield_now().await;
                }
                answered
            })
        };

        let sender = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                for _ in 0..200 {
                    manager.send_quiz_notification(sample_quiz(), "u1");
                    tokio::task::yield_now().await;
                }
            })
        };

        sender.await.unwrap();
        done.store(true, Ordering::Release);
        let answered = watcher.await.unwrap();
        assert!(answered <= 200);
        assert_eq!(manager.len(), 200);
    }

    #[test]
    fn test_unknown_id() {
        let (manager, _) = manager();
        assert!(manager.get_notification("missing").is_none());
        assert!(matches!(
            manager.resolve_response("missing", 0, Utc::now()),
            Err(SchedulerError::NotificationNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_once() {
        let (manager, _) = manager();
        let now = Utc::now();
        manager.insert_record(record("n1", "u1", now, NotificationStatus::Sent, None, 0));

        let resolved = manager.resolve_response("n1", 1, now + Duration::seconds(3)).unwrap();
        assert_eq!(resolved.status, NotificationStatus::Responded);
        assert_eq!(resolved.is_correct, Some(true));
        assert_eq!(resolved.response_latency_ms(), Some(3000));

        assert!(matches!(
            manager.resolve_response("n1", 0, now),
            Err(SchedulerError::AlreadyResponded(_))
        ));
        // the first outcome is untouched
        assert_eq!(manager.get_notification("n1").unwrap().user_answer, Some(1));
    }

    #[test]
    fn test_out_of_range_answer_does_not_consume() {
        let (manager, _) = manager();
        let now = Utc::now();
        manager.insert_record(record("n1", "u1", now, NotificationStatus::Sent, None, 0));

        assert!(matches!(
            manager.resolve_response("n1", 9, now),
            Err(SchedulerError::InvalidAnswer { index: 9, options: 4 })
        ));
        assert_eq!(manager.get_notification("n1").unwrap().status, NotificationStatus::Sent);
    }

    #[test]
    fn test_scheduled_record_cannot_be_answered() {
        let (manager, _) = manager();
        let now = Utc::now();
        let mut pending = record("n1", "u1", now, NotificationStatus::Scheduled, None, 0);
        pending.sent_time = None;
        manager.insert_record(pending);

        assert!(matches!(
            manager.resolve_response("n1", 1, now),
            Err(SchedulerError::NotDispatched(_))
        ));
    }

    #[test]
    fn test_expire_stale() {
        let (manager, _) = manager();
        let now = Utc::now();
        manager.insert_record(record("old", "u1", now - Duration::minutes(90), NotificationStatus::Sent, None, 0));
        manager.insert_record(record("fresh", "u1", now - Duration::minutes(10), NotificationStatus::Sent, None, 0));
        manager.insert_record(record(
            "done",
            "u1",
            now - Duration::minutes(120),
            NotificationStatus::Responded,
            Some(true),
            5,
        ));

        assert_eq!(manager.expire_stale(now, Duration::minutes(60)), 1);
        assert_eq!(manager.get_notification("old").unwrap().status, NotificationStatus::Expired);
        assert_eq!(manager.get_notification("fresh").unwrap().status, NotificationStatus::Sent);
        assert_eq!(manager.get_notification("done").unwrap().status, NotificationStatus::Responded);

        assert!(matches!(
            manager.resolve_response("old", 1, now),
            Err(SchedulerError::AlreadyResponded(_))
        ));
        assert_eq!(manager.expire_stale(now, Duration::minutes(60)), 0);
    }

    #[test]
    fn test_sent_on_day_uses_timezone() {
        let (manager, _) = manager();
        let sent = Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();
        manager.insert_record(record("n1", "u1", sent, NotificationStatus::Sent, None, 0));

        let utc_day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let tokyo_day = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        assert_eq!(manager.sent_on_day("u1", &Utc, utc_day), 1);
        assert_eq!(manager.sent_on_day("u1", &chrono_tz::Asia::Tokyo, tokyo_day), 1);
        assert_eq!(manager.sent_on_day("u1", &chrono_tz::Asia::Tokyo, utc_day), 0);
        assert_eq!(manager.sent_on_day("u2", &Utc, utc_day), 0);
    }

    #[test]
    fn test_records_for_user_window() {
        let (manager, _) = manager();
        let now = Utc::now();
        manager.insert_record(record("recent", "u1", now - Duration::days(1), NotificationStatus::Sent, None, 0));
        manager.insert_record(record("old", "u1", now - Duration::days(10), NotificationStatus::Sent, None, 0));

        let records = manager.records_for_user("u1", now - Duration::days(7));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "recent");
    }
}
