use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::response::AppError;
use crate::services::learning::{FrequencyAction, DEFAULT_HISTORY_DAYS};
use crate::services::schedule::ScheduleOverrides;
use crate::state::AppState;

const MAX_HISTORY_DAYS: i64 = 365;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl<T> SuccessResponse<T> {
    fn data(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            message: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FrequencyRequest {
    action: FrequencyAction,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    days: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:user_id/start", post(start_learning))
        .route("/:user_id/stop", post(stop_learning))
        .route("/:user_id/schedule", get(get_schedule).patch(update_schedule))
        .route("/:user_id/frequency", post(adjust_frequency))
        .route("/:user_id/history", get(get_history))
        .route("/:user_id/wrong-answers", get(get_wrong_answers))
}

async fn start_learning(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    // An empty body starts from the defaults; anything else must be valid JSON.
    let overrides = if body.iter().all(u8::is_ascii_whitespace) {
        ScheduleOverrides::default()
    } else {
        let Json(overrides) = Json::<ScheduleOverrides>::from_bytes(&body)
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        overrides
    };
    let status = state.learning().start_learning(&user_id, overrides).await?;
    Ok(SuccessResponse::data(status))
}

async fn stop_learning(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.learning().stop_learning(&user_id).await?;
    Ok(Json(SuccessResponse {
        success: true,
        data: (),
        message: Some("learning stopped".to_string()),
    }))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let status = state.learning().get_schedule(&user_id).await?;
    Ok(SuccessResponse::data(status))
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    payload: Result<Json<ScheduleOverrides>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(patch) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    let status = state.learning().update_schedule(&user_id, patch).await?;
    Ok(SuccessResponse::data(status))
}

async fn adjust_frequency(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    payload: Result<Json<FrequencyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    let status = state
        .learning()
        .adjust_frequency(&user_id, request.action)
        .await?;
    Ok(SuccessResponse::data(status))
}

async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let days = query.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    if !(1..=MAX_HISTORY_DAYS).contains(&days) {
        return Err(AppError::validation(format!(
            "days must be between 1 and {MAX_HISTORY_DAYS}"
        )));
    }
    Ok(SuccessResponse::data(state.learning().get_history(&user_id, days)))
}

async fn get_wrong_answers(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(SuccessResponse::data(state.wrong_answers().for_user(&user_id)))
}
