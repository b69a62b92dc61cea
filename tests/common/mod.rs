#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use chrono::{Timelike, Utc};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

use microquiz_backend::config::SchedulerConfig;
use microquiz_backend::services::push_provider::{PushError, PushPayload, PushTransport};
use microquiz_backend::services::quiz_content::QuizBank;
use microquiz_backend::state::AppState;
use microquiz_backend::{build_router, build_state};

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<PushPayload>>,
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send(&self, payload: &PushPayload) -> Result<(), PushError> {
        self.sent.lock().push(payload.clone());
        Ok(())
    }
}

impl RecordingTransport {
    pub async fn wait_for(&self, count: usize) -> Vec<PushPayload> {
        for _ in 0..100 {
            if self.sent.lock().len() >= count {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.sent.lock().clone()
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub transport: Arc<RecordingTransport>,
}

pub async fn create_test_app() -> TestApp {
    let transport = Arc::new(RecordingTransport::default());
    let state = build_state(
        &SchedulerConfig::default(),
        transport.clone(),
        Arc::new(QuizBank::builtin()),
    )
    .await
    .unwrap();

    TestApp {
        router: build_router(state.clone()),
        state,
        transport,
    }
}

/// A one-hour UTC quiet window that does not contain the current time.
pub fn quiet_hours_away_from_now() -> Value {
    let hour = Utc::now().hour();
    json!({
        "start": format!("{:02}:00", (hour + 2) % 24),
        "end": format!("{:02}:00", (hour + 3) % 24),
    })
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
