pub mod config;
pub mod error;
pub mod logging;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;
pub mod workers;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::services::learning::LearningService;
use crate::services::push_provider::PushTransport;
use crate::services::quiz_content::QuizContent;
use crate::services::wrong_answers::WrongAnswerBook;
use crate::state::AppState;

/// Wires the learning service around the given collaborators.
pub async fn build_state(
    config: &SchedulerConfig,
    transport: Arc<dyn PushTransport>,
    content: Arc<dyn QuizContent>,
) -> Result<AppState, SchedulerError> {
    let wrong_answers = Arc::new(WrongAnswerBook::new());
    let learning = LearningService::new(config, transport, content, wrong_answers.clone()).await?;
    Ok(AppState::new(Arc::new(learning), wrong_answers))
}

pub fn build_router(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
