use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::quiz_content::Difficulty;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrongAnswerRecord {
    pub user_id: String,
    pub question_id: String,
    pub question: String,
    pub correct_answer: String,
    pub user_answer: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait WrongAnswerSink: Send + Sync {
    async fn record_wrong_answer(&self, record: WrongAnswerRecord);
}

/// In-memory wrong-answer notebook, newest entries last.
#[derive(Default)]
pub struct WrongAnswerBook {
    entries: RwLock<HashMap<String, Vec<WrongAnswerRecord>>>,
}

impl WrongAnswerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_user(&self, user_id: &str) -> Vec<WrongAnswerRecord> {
        self.entries
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl WrongAnswerSink for WrongAnswerBook {
    async fn record_wrong_answer(&self, record: WrongAnswerRecord) {
        tracing::debug!(
            user_id = %record.user_id,
            question_id = %record.question_id,
            "wrong answer recorded"
        );
        self.entries
            .write()
            .entry(record.user_id.clone())
            .or_default()
            .push(record);
    }
}
