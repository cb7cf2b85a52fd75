//! WebSocket protocol: JSON requests and responses plus broadcast events

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → gateway request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Echoed back in the matching response
    #[serde(default)]
    pub id: Option<String>,
}

impl GatewayRequest {
    /// String parameter, if present
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Gateway → client response to one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GatewayError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayError {
    pub code: i32,
    pub message: String,
}

/// Gateway → client event, sent to every connected client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    pub data: Value,
}

pub mod methods {
    pub const MESSAGE_SEND: &str = "message.send";
    pub const SESSION_NEW: &str = "session.new";
    pub const SESSION_LIST: &str = "session.list";
    pub const SESSION_HISTORY: &str = "session.history";
    pub const SESSION_CLEAR: &str = "session.clear";
    pub const STATUS_GET: &str = "status.get";
}

pub mod events {
    pub const TYPING_START: &str = "typing.start";
    pub const TYPING_STOP: &str = "typing.stop";
    pub const MESSAGE_RECEIVED: &str = "message.received";
    pub const SESSION_CREATED: &str = "session.created";
}

pub const ERR_INVALID_METHOD: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;

impl GatewayResponse {
    pub fn ok(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(GatewayError {
                code,
                message: message.into(),
            }),
        }
    }
}

impl GatewayEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}
