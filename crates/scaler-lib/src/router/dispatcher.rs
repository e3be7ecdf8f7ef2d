//! Remote prediction-service dispatch

use crate::models::{EventKind, InboundEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default timeout for one prediction call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned while routing or dispatching an event
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unsupported data type: {0}")]
    UnsupportedType(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Prediction service timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to reach prediction service: {0}")]
    Transport(String),

    #[error("Prediction service returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl DispatchError {
    /// HTTP status used when the error is returned to a caller
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::UnsupportedType(_) | DispatchError::InvalidPayload(_) => 400,
            DispatchError::Timeout(_) => 504,
            DispatchError::Transport(_) | DispatchError::Status { .. } => 502,
        }
    }
}

/// Structured error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl From<&DispatchError> for ErrorResponse {
    fn from(err: &DispatchError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

/// Forwards an event to the prediction service for its kind
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, event: &InboundEvent) -> Result<serde_json::Value, DispatchError>;
}

/// Prediction endpoint per event kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub numeric: Url,
    pub classification: Url,
    pub image: Url,
}

impl Endpoints {
    pub fn new(numeric: &str, classification: &str, image: &str) -> Result<Self> {
        Ok(Self {
            numeric: Url::parse(numeric).context("Invalid numeric endpoint")?,
            classification: Url::parse(classification)
                .context("Invalid classification endpoint")?,
            image: Url::parse(image).context("Invalid image endpoint")?,
        })
    }

    pub fn for_kind(&self, kind: EventKind) -> &Url {
        match kind {
            EventKind::Numeric => &self.numeric,
            EventKind::Classification => &self.classification,
            EventKind::Image => &self.image,
        }
    }
}

/// JSON-over-HTTP dispatcher
pub struct HttpDispatcher {
    client: Client,
    endpoints: Endpoints,
    timeout: Duration,
}

impl HttpDispatcher {
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoints,
            timeout,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, event: &InboundEvent) -> Result<serde_json::Value, DispatchError> {
        let url = self.endpoints.for_kind(event.kind()).clone();

        let response = self
            .client
            .post(url)
            .json(&event.payload())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(self.timeout)
                } else {
                    DispatchError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Status { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| DispatchError::Transport(format!("Invalid response body: {}", e)))
    }
}
