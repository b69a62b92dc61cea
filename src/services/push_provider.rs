use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Compact notification UIs fit at most this many action buttons.
pub const MAX_QUICK_ACTIONS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickAction {
    pub label: String,
    pub action_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub user_id: String,
    pub notification_id: String,
    pub title: String,
    pub body: String,
    pub quick_actions: Vec<QuickAction>,
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Best-effort delivery of a prompt to the user's device.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, payload: &PushPayload) -> Result<(), PushError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushProviderType {
    Webhook,
    Log,
    None,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub provider: PushProviderType,
    pub webhook_url: Option<String>,
}

#[derive(Clone)]
pub struct PushService {
    config: PushConfig,
    client: reqwest::Client,
}

impl PushService {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        let provider = match env_string("PUSH_PROVIDER").as_deref() {
            Some("webhook") => PushProviderType::Webhook,
            Some("none") => PushProviderType::None,
            _ => PushProviderType::Log,
        };

        Self::new(PushConfig {
            provider,
            webhook_url: env_string("PUSH_WEBHOOK_URL"),
        })
    }

    pub fn is_available(&self) -> bool {
        match self.config.provider {
            PushProviderType::Webhook => self.config.webhook_url.is_some(),
            PushProviderType::Log => true,
            PushProviderType::None => false,
        }
    }

    pub fn provider_type(&self) -> &PushProviderType {
        &self.config.provider
    }

    async fn send_via_webhook(&self, payload: &PushPayload) -> Result<(), PushError> {
        let url = self
            .config
            .webhook_url
            .as_deref()
            .ok_or(PushError::NotConfigured("PUSH_WEBHOOK_URL"))?;

        let resp = self.client.post(url).json(payload).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PushError::HttpStatus { status, body });
        }

        Ok(())
    }
}

#[async_trait]
impl PushTransport for PushService {
    async fn send(&self, payload: &PushPayload) -> Result<(), PushError> {
        match self.config.provider {
            PushProviderType::Webhook => self.send_via_webhook(payload).await,
            PushProviderType::Log => {
                tracing::info!(
                    user_id = %payload.user_id,
                    notification_id = %payload.notification_id,
                    title = %payload.title,
                    body = %payload.body,
                    actions = payload.quick_actions.len(),
                    "push notification"
                );
                Ok(())
            }
            PushProviderType::None => Err(PushError::NotConfigured("PUSH_PROVIDER")),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
