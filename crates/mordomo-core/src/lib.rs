//! mordomo-core - routing core of the Mordomo energy assistant
//!
//! This crate provides:
//! - Domain agents (billing, EV charging, solar, technical support) behind one `Agent` trait
//! - Typed inter-agent messages with broadcast context updates
//! - Semantic routing through a language model with a keyword fallback
//! - The orchestrator: agent selection, collaboration and per-session context
//! - An OpenAI-compatible client for classification and response enhancement

pub mod agents;
pub mod enhance;
pub mod error;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod router;
pub mod session;

// Re-export main types for convenience
pub use agents::{Agent, AgentInfo, AgentOutcome, AgentResponse, Domain, QueryContext};
pub use enhance::{Enhancer, enhance_or_fallback};
pub use error::{AgentError, AgentResult};
pub use llm::{LlmClient, LlmConfig};
pub use message::{AgentReply, AgentRequest, Message, MessageKind, Payload, Recipient};
pub use orchestrator::{AgentRegistry, Orchestrator, OrchestratorConfig, RoutedQuery};
pub use router::{Classification, Router, RouterConfig, SemanticClassifier};
pub use session::{Role, Session, SharedContext, Turn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _ = std::mem::size_of::<Session>();
        let _ = std::mem::size_of::<LlmConfig>();
        let _ = std::mem::size_of::<OrchestratorConfig>();
        assert_eq!(AgentRegistry::standard().len(), Domain::ALL.len());
    }
}
