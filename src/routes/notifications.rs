use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::response::AppError;
use crate::services::response_handler::QuizResponse;
use crate::state::AppState;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/respond", post(respond))
        .route("/:id", get(get_notification))
}

async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.learning().get_notification(&id)?;
    Ok(Json(SuccessResponse {
        success: true,
        data: record,
    }))
}

async fn respond(
    State(state): State<AppState>,
    payload: Result<Json<QuizResponse>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(response) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    let outcome = state.learning().respond_to_notification(response).await?;
    Ok(Json(SuccessResponse {
        success: true,
        data: outcome,
    }))
}
