//! Event bus fanning gateway events out to every WebSocket client

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::debug;

use crate::protocol::{GatewayEvent, events};

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<GatewayEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Each WebSocket connection holds its own receiver
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Publish to all current subscribers. Dropped silently when nobody listens.
    pub fn publish(&self, event: GatewayEvent) {
        let receivers = self.sender.receiver_count();
        if receivers == 0 {
            return;
        }
        debug!("Publishing '{}' to {} receivers", event.event, receivers);
        let _ = self.sender.send(event);
    }

    pub fn typing(&self, session_id: &str, active: bool) {
        let name = if active {
            events::TYPING_START
        } else {
            events::TYPING_STOP
        };
        self.publish(GatewayEvent::new(name, json!({ "session_id": session_id })));
    }

    /// Announce an assistant reply produced for `session_id`
    pub fn message_received(&self, session_id: &str, agent: &str, content: &str) {
        self.publish(GatewayEvent::new(
            events::MESSAGE_RECEIVED,
            json!({
                "session_id": session_id,
                "agent": agent,
                "content": content,
                "role": "assistant",
            }),
        ));
    }

    pub fn session_created(&self, session: Value) {
        self.publish(GatewayEvent::new(events::SESSION_CREATED, session));
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
