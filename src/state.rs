use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::services::learning::LearningService;
use crate::services::wrong_answers::WrongAnswerBook;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    learning: Arc<LearningService>,
    wrong_answers: Arc<WrongAnswerBook>,
}

impl AppState {
    pub fn new(learning: Arc<LearningService>, wrong_answers: Arc<WrongAnswerBook>) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            learning,
            wrong_answers,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn learning(&self) -> &Arc<LearningService> {
        &self.learning
    }

    pub fn wrong_answers(&self) -> &Arc<WrongAnswerBook> {
        &self.wrong_answers
    }
}
