use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SchedulerError;

use super::adaptive_delay::compute_next_delay;
use super::notification::NotificationManager;
use super::quiz_content::QuizContent;
use super::wrong_answers::{WrongAnswerRecord, WrongAnswerSink};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResponse {
    pub notification_id: String,
    pub answer_index: usize,
    #[serde(default)]
    pub response_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseOutcome {
    pub correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub next_delay_minutes: u32,
}

/// Suggested earliest time for the user's next prompt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextPromptHint {
    pub delay_minutes: u32,
    pub not_before: DateTime<Utc>,
}

pub struct ResponseHandler {
    notifications: Arc<NotificationManager>,
    wrong_answers: Arc<dyn WrongAnswerSink>,
    content: Arc<dyn QuizContent>,
    base_delay_minutes: u32,
    hints: RwLock<HashMap<String, NextPromptHint>>,
}

impl ResponseHandler {
    pub fn new(
        notifications: Arc<NotificationManager>,
        wrong_answers: Arc<dyn WrongAnswerSink>,
        content: Arc<dyn QuizContent>,
        base_delay_minutes: u32,
    ) -> Self {
        Self {
            notifications,
            wrong_answers,
            content,
            base_delay_minutes,
            hints: RwLock::new(HashMap::new()),
        }
    }

    pub async fn respond(&self, response: QuizResponse) -> Result<ResponseOutcome, SchedulerError> {
        let responded_at = response.response_timestamp.unwrap_or_else(Utc::now);
        let record = self.notifications.resolve_response(
            &response.notification_id,
            response.answer_index,
            responded_at,
        )?;

        let correct = record.is_correct.unwrap_or(false);
        let quiz = &record.quiz;

        if !correct {
            self.wrong_answers
                .record_wrong_answer(WrongAnswerRecord {
                    user_id: record.user_id.clone(),
                    question_id: quiz.id.clone(),
                    question: quiz.question.clone(),
                    correct_answer: quiz.correct_option_text().to_string(),
                    user_answer: quiz
                        .option_text(response.answer_index)
                        .unwrap_or_default()
                        .to_string(),
                    category: quiz.category.clone(),
                    difficulty: quiz.difficulty,
                    timestamp: responded_at,
                })
                .await;
        }

        self.content
            .record_outcome(&record.user_id, &quiz.category, correct)
            .await;

        let latency_ms = record.response_latency_ms().unwrap_or(0);
        let next_delay_minutes = compute_next_delay(self.base_delay_minutes, correct, latency_ms);

        self.hints.write().insert(
            record.user_id.clone(),
            NextPromptHint {
                delay_minutes: next_delay_minutes,
                not_before: responded_at
                    .checked_add_signed(Duration::minutes(next_delay_minutes as i64))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        );

        debug!(
            notification_id = %record.id,
            user_id = %record.user_id,
            correct,
            latency_ms,
            next_delay_minutes,
            "quiz response resolved"
        );

        Ok(ResponseOutcome {
            correct,
            explanation: quiz.explanation.clone(),
            next_delay_minutes,
        })
    }

    pub fn next_prompt_hint(&self, user_id: &str) -> Option<NextPromptHint> {
        self.hints.read().get(user_id).copied()
    }

    pub fn forget_user(&self, user_id: &str) {
        self.hints.write().remove(user_id);
    }
}
