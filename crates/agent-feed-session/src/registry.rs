//! Active subscription set.

use std::{collections::HashSet, sync::RwLock};

use agent_feed_core::AgentId;
use agent_feed_transport::{ClientFrame, SubscriptionReplay};

/// Tracks which agents the local consumer currently cares about.
///
/// Membership is all that matters: insertion order is irrelevant and a
/// double subscribe is a no-op. The gateway holds no subscription state
/// across connection loss, so the transport replays this set after every
/// reconnect.
#[derive(Default)]
pub struct SubscriptionRegistry {
    active: RwLock<HashSet<AgentId>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent to the active set.
    ///
    /// Returns `true` if membership changed.
    pub fn insert(&self, agent_id: impl Into<AgentId>) -> bool {
        self.active.write().unwrap().insert(agent_id.into())
    }

    /// Remove an agent from the active set.
    ///
    /// Returns `true` if membership changed.
    pub fn remove(&self, agent_id: &str) -> bool {
        self.active.write().unwrap().remove(agent_id)
    }

    /// Whether the agent is currently subscribed.
    #[must_use]
    pub fn contains(&self, agent_id: &str) -> bool {
        self.active.read().unwrap().contains(agent_id)
    }

    /// Snapshot of the active set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.active.read().unwrap().iter().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.read().unwrap().len()
    }

    /// Whether no subscriptions are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.read().unwrap().is_empty()
    }
}

impl SubscriptionReplay for SubscriptionRegistry {
    fn frames(&self) -> Vec<ClientFrame> {
        self.snapshot()
            .into_iter()
            .map(|agent_id| ClientFrame::SubscribeAgent { agent_id })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_semantics() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.insert("alpha"));
        assert!(registry.insert("beta"));
        assert!(registry.insert("gamma"));
        assert!(registry.remove("beta"));

        assert_eq!(registry.snapshot(), vec!["alpha", "gamma"]);
        assert!(registry.contains("alpha"));
        assert!(!registry.contains("beta"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_idempotence() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.insert("alpha"));
        assert!(!registry.insert("alpha"));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove("alpha"));
        assert!(!registry.remove("alpha"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_replay_frames_cover_active_set() {
        let registry = SubscriptionRegistry::new();
        registry.insert("beta");
        registry.insert("alpha");

        let frames = registry.frames();
        assert_eq!(frames.len(), 2);
        let ids: Vec<&str> = frames
            .iter()
            .map(|f| match f {
                ClientFrame::SubscribeAgent { agent_id } => agent_id.as_str(),
                other => panic!("unexpected frame: {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }
}
