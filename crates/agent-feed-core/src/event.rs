//! Typed event records for the agent feed.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Agent identifier.
///
/// Agent ids on the wire are free-form strings such as `diagnostic_agent`.
pub type AgentId = String;

/// Classification of a feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Status change for a single agent.
    AgentStatus,
    /// Progress update for a task an agent is working on.
    TaskUpdate,
    /// System-wide notification, not tied to one agent.
    SystemEvent,
    /// Remote acknowledgment of a subscription request.
    SubscriptionAck,
}

/// Immutable event record.
///
/// Constructed once when a raw frame is routed, never mutated afterwards.
/// `seq` is assigned per log in receipt order; `received_at` is the local
/// monotonic receipt time, not a trusted source timestamp.
#[derive(Debug, Clone)]
pub struct Event {
    /// What kind of event this is.
    pub kind: EventKind,
    /// Target agent, present for `AgentStatus`, `TaskUpdate` and
    /// `SubscriptionAck`.
    pub agent_id: Option<AgentId>,
    /// Opaque structured payload from the remote side.
    pub payload: Value,
    /// Receipt sequence number within the owning log.
    pub seq: u64,
    /// Monotonic receipt time.
    pub received_at: Instant,
}

impl Event {
    /// Whether this event targets the given agent.
    #[must_use]
    pub fn is_for(&self, agent_id: &str) -> bool {
        self.agent_id.as_deref() == Some(agent_id)
    }

    /// Whether this event is broadcast to every consumer regardless of
    /// subscriptions.
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SystemEvent | EventKind::SubscriptionAck
        )
    }
}
