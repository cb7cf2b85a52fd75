//! Inter-agent message envelope
//!
//! Messages are immutable once built. Request and response payloads are typed
//! per `request_type`; notifications and context updates stay opaque maps that
//! only the sender and the receiver interpret.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AgentResult;

/// Wire value of the broadcast recipient
pub const BROADCAST: &str = "*";

/// Who a message is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    Agent(String),
    Broadcast,
}

impl From<String> for Recipient {
    fn from(s: String) -> Self {
        if s == BROADCAST {
            Self::Broadcast
        } else {
            Self::Agent(s)
        }
    }
}

impl From<&str> for Recipient {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<Recipient> for String {
    fn from(r: Recipient) -> Self {
        match r {
            Recipient::Agent(id) => id,
            Recipient::Broadcast => BROADCAST.to_string(),
        }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{}", id),
            Self::Broadcast => write!(f, "{}", BROADCAST),
        }
    }
}

/// Kind of a message, derived from its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    ContextUpdate,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
            Self::Notification => write!(f, "notification"),
            Self::ContextUpdate => write!(f, "context_update"),
        }
    }
}

/// Data one agent can ask another for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request_type", rename_all = "snake_case")]
pub enum AgentRequest {
    GetCustomerValue,
    GetConsumptionPattern,
    GetEvImpactOnBill,
    GetSolarContribution,
    GetTechnicianAvailability,
    /// Any request type no agent knows about
    #[serde(other)]
    Unsupported,
}

impl AgentRequest {
    pub fn request_type(&self) -> &'static str {
        match self {
            Self::GetCustomerValue => "get_customer_value",
            Self::GetConsumptionPattern => "get_consumption_pattern",
            Self::GetEvImpactOnBill => "get_ev_impact_on_bill",
            Self::GetSolarContribution => "get_solar_contribution",
            Self::GetTechnicianAvailability => "get_technician_availability",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Answer to an [`AgentRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply_type", rename_all = "snake_case")]
pub enum AgentReply {
    CustomerValue {
        annual_value: f64,
        segment: String,
    },
    ConsumptionPattern {
        peak_hours: Vec<String>,
        off_peak_usage: f64,
        monthly_trend: String,
    },
    EvImpact {
        monthly_consumption_kwh: f64,
        monthly_cost: f64,
        peak_hour_usage: f64,
    },
    SolarContribution {
        monthly_production: f64,
        autoconsume_rate: f64,
        grid_injection: f64,
        bill_reduction_percent: f64,
    },
    TechnicianAvailability {
        next_available_slot: String,
        technicians_on_duty: u32,
    },
    NotImplemented {
        status: String,
    },
}

impl AgentReply {
    pub fn not_implemented() -> Self {
        Self::NotImplemented {
            status: "not_implemented".to_string(),
        }
    }
}

/// Payload of a message; the variant determines the message kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Payload {
    Request(AgentRequest),
    Response(AgentReply),
    Notification(Map<String, Value>),
    ContextUpdate(Map<String, Value>),
}

/// Envelope exchanged between agents through the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    from: String,
    to: Recipient,
    #[serde(flatten)]
    payload: Payload,
    /// Creation time; envelopes arriving without one are stamped on receipt
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a message stamped with the current time
    pub fn new(from: impl Into<String>, to: impl Into<Recipient>, payload: Payload) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn request(from: impl Into<String>, to: impl Into<String>, request: AgentRequest) -> Self {
        Self::new(from, Recipient::Agent(to.into()), Payload::Request(request))
    }

    pub fn response(from: impl Into<String>, to: impl Into<String>, reply: AgentReply) -> Self {
        Self::new(from, Recipient::Agent(to.into()), Payload::Response(reply))
    }

    /// Context update addressed to every agent but the sender
    pub fn context_update(from: impl Into<String>, update: Map<String, Value>) -> Self {
        Self::new(from, Recipient::Broadcast, Payload::ContextUpdate(update))
    }

    pub fn notification(
        from: impl Into<String>,
        to: impl Into<Recipient>,
        body: Map<String, Value>,
    ) -> Self {
        Self::new(from, to, Payload::Notification(body))
    }

    /// Replace the creation timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn sender(&self) -> &str {
        &self.from
    }

    pub fn recipient(&self) -> &Recipient {
        &self.to
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> MessageKind {
        match self.payload {
            Payload::Request(_) => MessageKind::Request,
            Payload::Response(_) => MessageKind::Response,
            Payload::Notification(_) => MessageKind::Notification,
            Payload::ContextUpdate(_) => MessageKind::ContextUpdate,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == Recipient::Broadcast
    }

    /// Serialize to a JSON map
    pub fn to_value(&self) -> AgentResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild a message from [`Message::to_value`] output
    pub fn from_value(value: Value) -> AgentResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_defaults_timestamp() {
        let before = Utc::now();
        let msg = Message::request("ev_agent", "billing_agent", AgentRequest::GetCustomerValue);
        assert!(msg.timestamp() >= before);
        assert_eq!(msg.kind(), MessageKind::Request);
        assert_eq!(msg.sender(), "ev_agent");
        assert_eq!(msg.recipient(), &Recipient::Agent("billing_agent".to_string()));
    }

    #[test]
    fn test_envelope_without_timestamp_is_stamped() {
        let before = Utc::now();
        let msg = Message::from_value(json!({
            "from": "billing_agent",
            "to": "*",
            "kind": "context_update",
            "payload": {"a": 1}
        }))
        .unwrap();
        assert!(msg.is_broadcast());
        assert_eq!(msg.kind(), MessageKind::ContextUpdate);
        assert!(msg.timestamp() >= before);
        assert!(msg.timestamp() <= Utc::now());
    }

    #[test]
    fn test_message_round_trip_keeps_timestamp() {
        let mut update = Map::new();
        update.insert("last_invoice_amount".to_string(), json!(127.5));
        let msg = Message::context_update("billing_agent", update);

        let value = msg.to_value().unwrap();
        assert_eq!(value["from"], "billing_agent");
        assert_eq!(value["to"], "*");
        assert_eq!(value["kind"], "context_update");
        assert_eq!(value["payload"]["last_invoice_amount"], 127.5);

        let back = Message::from_value(value).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.timestamp(), msg.timestamp());
        assert!(back.is_broadcast());
    }

    #[test]
    fn test_request_wire_shape() {
        let msg = Message::request("solar_agent", "billing_agent", AgentRequest::GetConsumptionPattern);
        let value = msg.to_value().unwrap();
        assert_eq!(value["kind"], "request");
        assert_eq!(value["payload"]["request_type"], "get_consumption_pattern");
    }

    #[test]
    fn test_unknown_request_type_is_unsupported() {
        let req: AgentRequest =
            serde_json::from_value(json!({"request_type": "launch_rocket"})).unwrap();
        assert_eq!(req, AgentRequest::Unsupported);
    }

    #[test]
    fn test_response_round_trip() {
        let msg = Message::response(
            "ev_agent",
            "billing_agent",
            AgentReply::EvImpact {
                monthly_consumption_kwh: 280.0,
                monthly_cost: 85.5,
                peak_hour_usage: 0.15,
            },
        );
        let back = Message::from_value(msg.to_value().unwrap()).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.kind(), MessageKind::Response);
    }

    #[test]
    fn test_not_implemented_reply_shape() {
        let value = serde_json::to_value(AgentReply::not_implemented()).unwrap();
        assert_eq!(value["status"], "not_implemented");
    }

    #[test]
    fn test_recipient_conversions() {
        assert_eq!(Recipient::from("*"), Recipient::Broadcast);
        assert_eq!(Recipient::from("ev_agent").to_string(), "ev_agent");
        assert_eq!(String::from(Recipient::Broadcast), "*");
    }
}
