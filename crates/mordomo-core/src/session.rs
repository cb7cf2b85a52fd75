//! Session-scoped conversation state
//!
//! A [`Session`] owns everything that changes while answering queries: the
//! shared context (history, derived profile facts, free-form session data)
//! and each agent's private context map. The agent registry itself is shared
//! and read-only, so one orchestrator can serve many sessions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Conversation history plus derived facts. History is append-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    conversation_history: Vec<Turn>,
    pub user_profile: Map<String, Value>,
    pub session_data: Map<String, Value>,
}

impl SharedContext {
    pub fn history(&self) -> &[Turn] {
        &self.conversation_history
    }

    pub fn push_user(&mut self, content: &str) {
        self.push(Role::User, content, None);
    }

    pub fn push_assistant(&mut self, content: &str, agent: &str) {
        self.push(Role::Assistant, content, Some(agent.to_string()));
    }

    fn push(&mut self, role: Role, content: &str, agent: Option<String>) {
        self.conversation_history.push(Turn {
            role,
            content: content.to_string(),
            agent,
            timestamp: Utc::now(),
        });
    }
}

/// State for one conversation
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub shared: SharedContext,
    agent_memory: HashMap<String, Map<String, Value>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[Turn] {
        self.shared.history()
    }

    /// Private context an agent has accumulated in this session
    pub fn agent_memory(&self, agent_id: &str) -> Option<&Map<String, Value>> {
        self.agent_memory.get(agent_id)
    }

    pub(crate) fn agent_memory_mut(&mut self, agent_id: &str) -> &mut Map<String, Value> {
        self.agent_memory.entry(agent_id.to_string()).or_default()
    }

    /// Reset the shared context and every agent's private context
    pub fn clear(&mut self) {
        self.shared = SharedContext::default();
        self.agent_memory.clear();
    }
}
