//! Domain agents: the capability-scoped handlers the orchestrator routes to
//!
//! Every agent scores its own relevance to a query, answers with a structured
//! [`AgentResponse`], and serves typed data requests from its peers. Agents are
//! stateless: the private context they accumulate from peer broadcasts lives
//! in the caller's session and is handed in on every delivery.

pub mod billing;
pub mod ev;
pub mod solar;
pub mod support;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::AgentResult;
use crate::message::{AgentReply, AgentRequest, Message, Payload};

pub use billing::BillingAgent;
pub use ev::EvAgent;
pub use solar::SolarAgent;
pub use support::SupportAgent;

/// Floor applied once a query hits at least one domain keyword
pub const KEYWORD_MATCH_FLOOR: f64 = 0.4;
/// Floor applied when the caller names one of the agent's canonical intents
pub const CANONICAL_INTENT_FLOOR: f64 = 0.9;

/// Data key an agent sets to ask the orchestrator for peer data
pub const NEEDS_COLLABORATION: &str = "needs_collaboration";
/// Data key listing the peer requests, as `[{agent, request_type}]`
pub const COLLABORATION_REQUESTS: &str = "collaboration_requests";

/// Per-query context map. Always carries the raw query under `query`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryContext(Map<String, Value>);

impl QueryContext {
    pub fn new(query: &str) -> Self {
        Self::with_values(query, Map::new())
    }

    /// Wrap caller-supplied values, overwriting any `query` key with the raw query
    pub fn with_values(query: &str, mut values: Map<String, Value>) -> Self {
        values.insert("query".to_string(), Value::String(query.to_string()));
        Self(values)
    }

    pub fn query(&self) -> &str {
        self.get_str("query").unwrap_or_default()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Canonical handler return contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub message: String,
    #[serde(default)]
    pub follow_up: Vec<String>,
}

impl AgentResponse {
    /// Successful response; `data` is expected to be a JSON object
    pub fn ok(data: Value, message: impl Into<String>, follow_up: &[&str]) -> Self {
        Self {
            success: true,
            data: into_map(data),
            message: message.into(),
            follow_up: follow_up.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Flag the response as needing peer data before it is final
    pub fn with_collaboration(mut self, requests: Vec<CollaborationRequest>) -> Self {
        if requests.is_empty() {
            return self;
        }
        self.data
            .insert(NEEDS_COLLABORATION.to_string(), Value::Bool(true));
        self.data.insert(
            COLLABORATION_REQUESTS.to_string(),
            serde_json::to_value(&requests).unwrap_or_default(),
        );
        self
    }

    pub fn needs_collaboration(&self) -> bool {
        self.data
            .get(NEEDS_COLLABORATION)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Peer requests listed in the data; malformed entries are skipped
    pub fn collaboration_requests(&self) -> Vec<CollaborationRequest> {
        let Some(Value::Array(entries)) = self.data.get(COLLABORATION_REQUESTS) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| match serde_json::from_value(entry.clone()) {
                Ok(req) => Some(req),
                Err(e) => {
                    debug!("Skipping malformed collaboration request {}: {}", entry, e);
                    None
                }
            })
            .collect()
    }
}

/// One peer-data request issued through [`AgentResponse::with_collaboration`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationRequest {
    pub agent: String,
    #[serde(flatten)]
    pub request: AgentRequest,
}

impl CollaborationRequest {
    pub fn new(agent: impl Into<String>, request: AgentRequest) -> Self {
        Self {
            agent: agent.into(),
            request,
        }
    }
}

/// What `process` hands back: the answer plus context updates for the orchestrator to deliver
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub response: AgentResponse,
    pub broadcasts: Vec<Message>,
}

impl AgentOutcome {
    pub fn with_broadcast(mut self, message: Message) -> Self {
        self.broadcasts.push(message);
        self
    }
}

impl From<AgentResponse> for AgentOutcome {
    fn from(response: AgentResponse) -> Self {
        Self {
            response,
            broadcasts: Vec::new(),
        }
    }
}

/// Static metadata snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub status: String,
}

/// Shared interface every domain agent implements
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// One-line domain summary shown to the semantic classifier
    fn routing_description(&self) -> &str;

    fn capabilities(&self) -> &[&'static str];

    /// Confidence in [0.0, 1.0] that this agent should answer `context.query()`
    fn can_handle(&self, intent: &str, context: &QueryContext) -> f64;

    fn process(&self, query: &str, context: &QueryContext) -> AgentResult<AgentOutcome>;

    /// Answer a typed peer request
    fn handle_request(&self, request: &AgentRequest) -> AgentReply {
        debug!(
            "{}: no handler for request '{}'",
            self.id(),
            request.request_type()
        );
        AgentReply::not_implemented()
    }

    /// Deliver a message. Requests produce a response; context updates are
    /// merged last-write-wins into `memory` (this agent's private context).
    fn receive_message(&self, message: &Message, memory: &mut Map<String, Value>) -> Option<Message> {
        match message.payload() {
            Payload::Request(request) => {
                debug!(
                    "{}: handling '{}' from {}",
                    self.id(),
                    request.request_type(),
                    message.sender()
                );
                let reply = self.handle_request(request);
                Some(Message::response(self.id(), message.sender(), reply))
            }
            Payload::ContextUpdate(update) => {
                for (key, value) in update {
                    memory.insert(key.clone(), value.clone());
                }
                None
            }
            Payload::Response(_) | Payload::Notification(_) => None,
        }
    }

    fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id().to_string(),
            description: self.description().to_string(),
            capabilities: self.capabilities().iter().map(|c| c.to_string()).collect(),
            status: "active".to_string(),
        }
    }
}

/// The closed set of built-in domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Billing,
    Ev,
    Solar,
    Support,
}

impl Domain {
    pub const ALL: [Domain; 4] = [Domain::Billing, Domain::Ev, Domain::Solar, Domain::Support];

    pub fn id(self) -> &'static str {
        match self {
            Self::Billing => billing::AGENT_ID,
            Self::Ev => ev::AGENT_ID,
            Self::Solar => solar::AGENT_ID,
            Self::Support => support::AGENT_ID,
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.id() == id)
    }

    pub fn build(self) -> Arc<dyn Agent> {
        match self {
            Self::Billing => Arc::new(BillingAgent::new()),
            Self::Ev => Arc::new(EvAgent::new()),
            Self::Solar => Arc::new(SolarAgent::new()),
            Self::Support => Arc::new(SupportAgent::new()),
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Count keyword hits in an already lower-cased query.
/// Confidence is `min(hits / 2, 1.0)`, floored at [`KEYWORD_MATCH_FLOOR`] on any hit.
pub fn keyword_confidence(query_lower: &str, keywords: &[&str]) -> (usize, f64) {
    let hits = keywords.iter().filter(|kw| query_lower.contains(*kw)).count();
    let mut confidence = (hits as f64 / 2.0).min(1.0);
    if hits > 0 {
        confidence = confidence.max(KEYWORD_MATCH_FLOOR);
    }
    (hits, confidence)
}

/// Uniform `can_handle` policy shared by every domain agent
pub(crate) fn score_query(
    agent_id: &str,
    intent: &str,
    context: &QueryContext,
    keywords: &[&str],
    canonical_intents: &[&str],
) -> f64 {
    let query = context.query().to_lowercase();
    let (hits, mut confidence) = keyword_confidence(&query, keywords);
    if canonical_intents.contains(&intent) {
        confidence = confidence.max(CANONICAL_INTENT_FLOOR);
    }
    debug!(
        "{}: can_handle hits={} confidence={:.2}",
        agent_id, hits, confidence
    );
    confidence
}

/// First group with a substring hit wins; groups are checked in slice order.
pub(crate) fn first_match<T: Copy>(query_lower: &str, groups: &[(&[&str], T)]) -> Option<T> {
    groups
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|kw| query_lower.contains(kw)))
        .map(|(_, action)| *action)
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
