//! HTTP error envelope
//!
//! Every failure leaves the gateway as
//! `{"error": {"code", "message", "error_id", "details"}}` with a matching
//! status code. `error_id` is the request id when one is known, so a client
//! report can be matched to the gateway log.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mordomo_core::AgentError;
use serde_json::{Value, json};
use tracing::{error, warn};

pub const AGENT_NOT_FOUND: &str = "AGENT_NOT_FOUND";
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const AGENT_PROCESSING_ERROR: &str = "AGENT_PROCESSING_ERROR";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub error_id: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            error_id: uuid::Uuid::new_v4().to_string(),
            details: None,
        }
    }

    pub fn agent_not_found(agent_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            AGENT_NOT_FOUND,
            format!("Agent '{}' not found", agent_id),
        )
        .with_details(json!({ "requested_agent": agent_id }))
    }

    /// 422 naming the offending field
    pub fn validation(field: &str, message: impl Into<String>, reason: &str) -> Self {
        let mut field_errors = serde_json::Map::new();
        field_errors.insert(field.to_string(), Value::from(reason));
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, VALIDATION_ERROR, message)
            .with_details(json!({ "field_errors": field_errors }))
    }

    pub fn processing(agent: &str, message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            AGENT_PROCESSING_ERROR,
            message,
        )
        .with_details(json!({ "agent": agent }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_error_id(mut self, error_id: impl Into<String>) -> Self {
        self.error_id = error_id.into();
        self
    }

    pub fn body(&self) -> Value {
        json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "error_id": self.error_id,
                "details": self.details,
            }
        })
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::AgentNotFound(id) => Self::agent_not_found(&id),
            AgentError::Processing { agent, message } => Self::processing(
                &agent,
                format!("Agent failed to process request: {}", message),
            ),
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(
                "{} ({}): {} [error_id={}]",
                self.status, self.code, self.message, self.error_id
            );
        } else {
            warn!(
                "{} ({}): {} [error_id={}]",
                self.status, self.code, self.message, self.error_id
            );
        }
        let body = Json(self.body());
        (self.status, body).into_response()
    }
}
