//! mordomo-gateway - HTTP and WebSocket front door for the Mordomo assistant
//!
//! Exposes the orchestrator over REST (`/chat`, `/agents`, `/context`, `/mcp`)
//! and a WebSocket control channel with per-session conversation state.

pub mod error;
pub mod events;
pub mod protocol;
pub mod server;
pub mod session;

pub use error::ApiError;
pub use server::{GatewayServer, GatewayState};
pub use session::SessionManager;
