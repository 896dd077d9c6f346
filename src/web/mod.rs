//! HTTP surface of the gateway.
//!
//! Success bodies are `{"data": ...}`, failures `{"error": "..."}`.

mod routes;

pub use routes::build_router;

use crate::core::{GatewayError, Instance};
use crate::queue::WebhookQueue;
use crate::ratelimit::RateLimiter;
use crate::session::{InMemoryInstanceRepository, WatchdogSupervisor};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

pub fn data<T: Serialize>(status: StatusCode, payload: T) -> Response {
    (status, Json(DataResponse { data: payload })).into_response()
}

#[derive(Debug)]
pub enum WebError {
    Gateway(GatewayError),
    Input(String),
}

impl From<GatewayError> for WebError {
    fn from(err: GatewayError) -> Self {
        WebError::Gateway(err)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            WebError::Gateway(GatewayError::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, format!("{} not found", msg))
            }
            WebError::Gateway(GatewayError::InvalidInput(msg)) | WebError::Input(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg)
            }
            WebError::Gateway(err @ GatewayError::Backend(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            WebError::Gateway(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub instances: Arc<InMemoryInstanceRepository>,
    pub queue: WebhookQueue,
    pub watchdogs: Arc<WatchdogSupervisor>,
    pub ip_limiter: Arc<RateLimiter>,
    pub token_limiter: Arc<RateLimiter>,
}

/// Instance as returned by the API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    #[serde(flatten)]
    pub instance: Instance,
    pub connected: bool,
    pub watched: bool,
}
