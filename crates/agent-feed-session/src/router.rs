//! Classifies inbound frames and filters them into the event log.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use agent_feed_core::{AgentId, EventKind, EventLog};
use agent_feed_transport::ServerFrame;
use serde_json::Value;

use crate::registry::SubscriptionRegistry;

/// Routes raw inbound frames into the session's event log.
///
/// Per-agent events are delivered only if the agent is subscribed at
/// delivery time; late subscribers do not retroactively receive earlier
/// events. System events and subscription acks are broadcast to every
/// consumer of the log.
pub struct EventRouter {
    registry: Arc<SubscriptionRegistry>,
    log: Arc<EventLog>,
    dropped: AtomicU64,
}

impl EventRouter {
    /// Create a router over the given registry and log.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, log: Arc<EventLog>) -> Self {
        Self {
            registry,
            log,
            dropped: AtomicU64::new(0),
        }
    }

    /// Route one raw frame.
    ///
    /// Malformed frames and unrecognized kinds are dropped and counted,
    /// never treated as fatal.
    pub fn route(&self, raw: &str) {
        match serde_json::from_str::<ServerFrame>(raw) {
            Ok(frame) => self.dispatch(frame),
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "dropping unrecognized frame");
            }
        }
    }

    fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::AgentStatus { agent_id, payload } => {
                self.deliver(EventKind::AgentStatus, agent_id, payload);
            }
            ServerFrame::TaskUpdate { agent_id, payload } => {
                self.deliver(EventKind::TaskUpdate, agent_id, payload);
            }
            ServerFrame::SystemEvent { payload } => {
                self.log.append(EventKind::SystemEvent, None, payload);
            }
            ServerFrame::Subscribed { agent_id } => {
                tracing::debug!(%agent_id, "subscription acknowledged");
                self.log
                    .append(EventKind::SubscriptionAck, Some(agent_id), Value::Null);
            }
            ServerFrame::Pong => {}
        }
    }

    fn deliver(&self, kind: EventKind, agent_id: AgentId, payload: Value) {
        if self.registry.contains(&agent_id) {
            self.log.append(kind, Some(agent_id), payload);
        } else {
            tracing::debug!(%agent_id, "event for unsubscribed agent ignored");
        }
    }

    /// Number of frames dropped as malformed or unrecognized.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Arc<SubscriptionRegistry>, Arc<EventLog>, EventRouter) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let log = Arc::new(EventLog::new());
        let router = EventRouter::new(Arc::clone(&registry), Arc::clone(&log));
        (registry, log, router)
    }

    fn status_frame(agent_id: &str, n: u64) -> String {
        format!(r#"{{"type":"agent_status","agent_id":"{agent_id}","payload":{{"n":{n}}}}}"#)
    }

    #[test]
    fn test_filters_by_subscription_at_delivery_time() {
        let (registry, log, router) = fixture();

        router.route(&status_frame("alpha", 0));
        assert!(log.is_empty(), "late subscribers get nothing retroactively");

        registry.insert("alpha");
        router.route(&status_frame("alpha", 1));
        router.route(&status_frame("beta", 2));

        let history = log.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_for("alpha"));
        assert_eq!(history[0].payload["n"], 1);
    }

    #[test]
    fn test_broadcast_kinds_ignore_subscriptions() {
        let (_registry, log, router) = fixture();

        router.route(r#"{"type":"system_event","payload":{"note":"deploy"}}"#);
        router.route(r#"{"type":"subscribed","agent_id":"alpha"}"#);

        let history = log.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, EventKind::SystemEvent);
        assert_eq!(history[1].kind, EventKind::SubscriptionAck);
        assert!(history[1].is_for("alpha"));
    }

    #[test]
    fn test_unrecognized_frames_are_counted_not_fatal() {
        let (registry, log, router) = fixture();
        registry.insert("alpha");

        router.route("not json at all");
        router.route(r#"{"type":"telemetry_burst","agent_id":"alpha"}"#);
        assert_eq!(router.dropped_frames(), 2);
        assert!(log.is_empty());

        // Routing keeps working afterwards.
        router.route(&status_frame("alpha", 3));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_pong_routes_nowhere() {
        let (_registry, log, router) = fixture();
        router.route(r#"{"type":"pong"}"#);
        assert!(log.is_empty());
        assert_eq!(router.dropped_frames(), 0);
    }

    #[test]
    fn test_per_entity_order_preserved_under_interleaving() {
        let (registry, log, router) = fixture();
        registry.insert("alpha");
        registry.insert("beta");

        for n in 0..4 {
            router.route(&status_frame("alpha", n));
            router.route(&status_frame("beta", 10 + n));
        }

        let alpha: Vec<u64> = log
            .history()
            .iter()
            .filter(|e| e.is_for("alpha"))
            .map(|e| e.payload["n"].as_u64().unwrap())
            .collect();
        assert_eq!(alpha, vec![0, 1, 2, 3]);

        let beta: Vec<u64> = log
            .history()
            .iter()
            .filter(|e| e.is_for("beta"))
            .map(|e| e.payload["n"].as_u64().unwrap())
            .collect();
        assert_eq!(beta, vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let (registry, log, router) = fixture();
        registry.insert("alpha");

        router.route(&status_frame("alpha", 0));
        registry.remove("alpha");
        router.route(&status_frame("alpha", 1));

        assert_eq!(log.len(), 1);
        assert_eq!(log.history()[0].payload["n"], 0);
    }
}
