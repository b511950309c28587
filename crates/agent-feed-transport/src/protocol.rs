//! Wire protocol for gateway communication.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame from client to gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving events for an agent.
    SubscribeAgent { agent_id: String },
    /// Stop receiving events for an agent (best-effort).
    UnsubscribeAgent { agent_id: String },
    /// Keepalive.
    Ping,
}

/// Frame from gateway to client.
///
/// The gateway holds no subscription state across connection loss, so a
/// fresh handshake carries no resumable session token; these frames are
/// everything the protocol has.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Status change for a single agent.
    AgentStatus {
        agent_id: String,
        #[serde(default)]
        payload: Value,
    },
    /// Progress update for a task an agent is working on.
    TaskUpdate {
        agent_id: String,
        #[serde(default)]
        payload: Value,
    },
    /// System-wide notification.
    SystemEvent {
        #[serde(default)]
        payload: Value,
    },
    /// Subscription acknowledgment.
    Subscribed { agent_id: String },
    /// Keepalive response.
    Pong,
}
