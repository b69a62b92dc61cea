use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

const INITIAL_DIFFICULTY: f64 = 0.5;
const MIN_DIFFICULTY: f64 = 0.1;
const MAX_DIFFICULTY: f64 = 1.0;
const DIFFICULTY_STEP: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn from_level(level: f64) -> Self {
        if level < 0.4 {
            Self::Easy
        } else if level < 0.7 {
            Self::Medium
        } else {
            Self::Hard
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyPolicy {
    #[default]
    Adaptive,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
    pub category: String,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Quiz {
    pub fn option_text(&self, index: usize) -> Option<&str> {
        self.options.get(index).map(String::as_str)
    }

    pub fn correct_option_text(&self) -> &str {
        self.option_text(self.correct_answer).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        if self.options.is_empty() {
            return Err(SchedulerError::Content(format!("quiz {} has no options", self.id)));
        }
        if self.correct_answer >= self.options.len() {
            return Err(SchedulerError::Content(format!(
                "quiz {} correct answer {} out of range",
                self.id, self.correct_answer
            )));
        }
        Ok(())
    }
}

/// Source of quiz prompts. Owns any per-user difficulty state.
#[async_trait]
pub trait QuizContent: Send + Sync {
    async fn generate_quiz(
        &self,
        user_id: &str,
        categories: &BTreeSet<String>,
        policy: DifficultyPolicy,
    ) -> Result<Quiz, SchedulerError>;

    /// Aggregate performance signal from a resolved prompt.
    async fn record_outcome(&self, _user_id: &str, _category: &str, _correct: bool) {}
}

pub struct QuizBank {
    quizzes: Vec<Quiz>,
    levels: RwLock<HashMap<String, f64>>,
}

impl QuizBank {
    pub fn from_quizzes(quizzes: Vec<Quiz>) -> Result<Self, SchedulerError> {
        if quizzes.is_empty() {
            return Err(SchedulerError::Content("quiz bank is empty".into()));
        }
        for quiz in &quizzes {
            quiz.validate()?;
        }
        Ok(Self {
            quizzes,
            levels: RwLock::new(HashMap::new()),
        })
    }

    pub fn load(path: &Path) -> Result<Self, SchedulerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::Content(format!("read {}: {e}", path.display())))?;
        let quizzes: Vec<Quiz> = serde_json::from_str(&raw)
            .map_err(|e| SchedulerError::Content(format!("parse {}: {e}", path.display())))?;
        Self::from_quizzes(quizzes)
    }

    pub fn from_env() -> Self {
        if let Some(path) = std::env::var("QUIZ_BANK_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            match Self::load(Path::new(&path)) {
                Ok(bank) => {
                    tracing::info!(path = %path, quizzes = bank.len(), "quiz bank loaded");
                    return bank;
                }
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "quiz bank load failed, using built-in set");
                }
            }
        }
        Self::builtin()
    }

    pub fn builtin() -> Self {
        Self {
            quizzes: builtin_quizzes(),
            levels: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.quizzes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quizzes.is_empty()
    }

    pub fn difficulty_level(&self, user_id: &str) -> f64 {
        self.levels
            .read()
            .get(user_id)
            .copied()
            .unwrap_or(INITIAL_DIFFICULTY)
    }
}

#[async_trait]
impl QuizContent for QuizBank {
    async fn generate_quiz(
        &self,
        user_id: &str,
        categories: &BTreeSet<String>,
        policy: DifficultyPolicy,
    ) -> Result<Quiz, SchedulerError> {
        let pool: Vec<&Quiz> = self
            .quizzes
            .iter()
            .filter(|q| categories.is_empty() || categories.contains(&q.category))
            .collect();

        if pool.is_empty() {
            return Err(SchedulerError::Content(format!(
                "no quizzes for categories {categories:?}"
            )));
        }

        let targeted: Vec<&Quiz> = match policy {
            DifficultyPolicy::Adaptive => {
                let target = Difficulty::from_level(self.difficulty_level(user_id));
                pool.iter().copied().filter(|q| q.difficulty == target).collect()
            }
            DifficultyPolicy::Fixed => Vec::new(),
        };
        let candidates = if targeted.is_empty() { &pool } else { &targeted };

        let mut rng = rand::rng();
        candidates
            .choose(&mut rng)
            .map(|q| (*q).clone())
            .ok_or_else(|| SchedulerError::Content("quiz selection failed".into()))
    }

    async fn record_outcome(&self, user_id: &str, _category: &str, correct: bool) {
        let mut levels = self.levels.write();
        let level = levels.entry(user_id.to_string()).or_insert(INITIAL_DIFFICULTY);
        let delta = if correct { DIFFICULTY_STEP } else { -DIFFICULTY_STEP };
        *level = (*level + delta).clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
    }
}

fn quiz(
    id: &str,
    category: &str,
    difficulty: Difficulty,
    question: &str,
    options: &[&str],
    correct_answer: usize,
    explanation: &str,
) -> Quiz {
    Quiz {
        id: id.to_string(),
        question: question.to_string(),
        options: options.iter().map(|o| o.to_string()).collect(),
        correct_answer,
        category: category.to_string(),
        difficulty,
        explanation: Some(explanation.to_string()),
    }
}

fn builtin_quizzes() -> Vec<Quiz> {
    vec![
        quiz(
            "vocab-001",
            "vocabulary",
            Difficulty::Easy,
            "What does \"abundant\" mean?",
            &["Plentiful", "Scarce", "Hidden", "Fragile"],
            0,
            "\"Abundant\" means existing in large quantities.",
        ),
        quiz(
            "vocab-002",
            "vocabulary",
            Difficulty::Medium,
            "Pick the synonym of \"ephemeral\".",
            &["Eternal", "Fleeting", "Heavy", "Brilliant"],
            1,
            "\"Ephemeral\" describes something that lasts a very short time.",
        ),
        quiz(
            "vocab-003",
            "vocabulary",
            Difficulty::Hard,
            "Which word means \"to make less severe\"?",
            &["Exacerbate", "Mitigate", "Obfuscate", "Proliferate"],
            1,
            "To mitigate is to make something less severe or painful.",
        ),
        quiz(
            "grammar-001",
            "grammar",
            Difficulty::Easy,
            "Choose the correct form: \"She ___ to school every day.\"",
            &["go", "goes", "going", "gone"],
            1,
            "Third person singular in the present simple takes -s.",
        ),
        quiz(
            "grammar-002",
            "grammar",
            Difficulty::Medium,
            "Which sentence uses the present perfect?",
            &["I ate lunch.", "I have eaten lunch.", "I will eat lunch.", "I am eating lunch."],
            1,
            "Present perfect is formed with have/has plus the past participle.",
        ),
        quiz(
            "science-001",
            "science",
            Difficulty::Easy,
            "What gas do plants absorb for photosynthesis?",
            &["Oxygen", "Nitrogen", "Carbon dioxide", "Helium"],
            2,
            "Plants take in carbon dioxide and release oxygen.",
        ),
        quiz(
            "science-002",
            "science",
            Difficulty::Hard,
            "Which particle carries no electric charge?",
            &["Proton", "Electron", "Neutron", "Positron"],
            2,
            "Neutrons are electrically neutral.",
        ),
        quiz(
            "history-001",
            "history",
            Difficulty::Medium,
            "In which year did the Berlin Wall fall?",
            &["1985", "1989", "1991", "1993"],
            1,
            "The Berlin Wall fell on 9 November 1989.",
        ),
    ]
}
