//! Error types for the routing core

use thiserror::Error;

/// Errors surfaced by the agent registry and the orchestrator
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent '{0}' not found")]
    AgentNotFound(String),

    #[error("Agent '{0}' is already registered")]
    DuplicateAgent(String),

    #[error("Agent '{agent}' failed to process request: {message}")]
    Processing { agent: String, message: String },

    /// Never escapes the router; kept so the classifier seam can report why it gave up.
    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    pub fn processing(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processing {
            agent: agent.into(),
            message: message.into(),
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
