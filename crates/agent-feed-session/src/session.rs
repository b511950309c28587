//! Consumer-facing feed session.

use std::{collections::HashMap, sync::Arc, time::Duration};

use agent_feed_core::{AgentId, Event, EventLog};
use agent_feed_exec::{ExecApi, ExecutionCoordinator, ExecutionOutcome};
use agent_feed_transport::{
    ClientFrame, ConnectionState, EventSocket, SubscriptionReplay, TransportConfig,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::{registry::SubscriptionRegistry, router::EventRouter};

/// Feed session configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Gateway WebSocket URL.
    pub ws_url: String,
    /// Gateway REST base URL.
    pub api_url: String,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// Bound on a single execution request.
    pub execute_timeout: Duration,
    /// Event log history capacity (entries).
    pub log_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8504/ws".to_string(),
            api_url: "http://127.0.0.1:8504".to_string(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            execute_timeout: Duration::from_secs(30),
            log_capacity: 1024,
        }
    }
}

/// One consumer's view of the agent feed.
///
/// Owns exactly one transport connection, the subscription registry, the
/// event log and the execution coordinator; created and torn down as a
/// unit, never shared across unrelated sessions.
pub struct FeedSession {
    socket: EventSocket,
    registry: Arc<SubscriptionRegistry>,
    router: Arc<EventRouter>,
    log: Arc<EventLog>,
    coordinator: ExecutionCoordinator,
    router_task: tokio::task::JoinHandle<()>,
}

impl FeedSession {
    /// Spawn a session. The transport stays down until `connect` is called.
    #[must_use]
    pub fn spawn(config: FeedConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let log = Arc::new(EventLog::with_capacity(config.log_capacity));
        let router = Arc::new(EventRouter::new(Arc::clone(&registry), Arc::clone(&log)));

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<String>();
        let socket = EventSocket::spawn(
            TransportConfig {
                url: config.ws_url,
                reconnect_delay: config.reconnect_delay,
                max_reconnect_attempts: config.max_reconnect_attempts,
            },
            Arc::clone(&registry) as Arc<dyn SubscriptionReplay>,
            inbound_tx,
        );

        let router_task = tokio::spawn({
            let router = Arc::clone(&router);
            async move {
                while let Some(raw) = inbound_rx.recv().await {
                    router.route(&raw);
                }
            }
        });

        let coordinator =
            ExecutionCoordinator::new(Arc::new(ExecApi::new(config.api_url)), Arc::clone(&log))
                .with_timeout(config.execute_timeout);

        Self {
            socket,
            registry,
            router,
            log,
            coordinator,
            router_task,
        }
    }

    /// Request a connection. Idempotent; reconnection is automatic from
    /// here until `close` or retry-budget exhaustion.
    pub fn connect(&self) {
        self.socket.connect();
    }

    /// Subscribe to an agent's events.
    ///
    /// The registry is updated regardless of connection state; if the
    /// frame cannot be sent right now it is held and covered by the
    /// replay on the next successful connect.
    pub async fn subscribe(&self, agent_id: impl Into<AgentId>) {
        let agent_id = agent_id.into();
        if !self.registry.insert(agent_id.clone()) {
            return;
        }
        let frame = ClientFrame::SubscribeAgent {
            agent_id: agent_id.clone(),
        };
        if let Err(e) = self.socket.send(frame).await {
            tracing::debug!(%agent_id, error = %e, "subscribe frame held until next connect");
        }
    }

    /// Unsubscribe from an agent's events.
    ///
    /// The unsubscribe frame is best-effort; the registry update alone
    /// already stops local delivery.
    pub async fn unsubscribe(&self, agent_id: &str) {
        if !self.registry.remove(agent_id) {
            return;
        }
        let frame = ClientFrame::UnsubscribeAgent {
            agent_id: agent_id.to_string(),
        };
        if let Err(e) = self.socket.send(frame).await {
            tracing::debug!(agent_id, error = %e, "unsubscribe frame not sent");
        }
    }

    /// Snapshot of the active subscription set.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<AgentId> {
        self.registry.snapshot()
    }

    /// Trigger an execution and await its outcome.
    ///
    /// Runs concurrently with event delivery; neither blocks the other.
    pub async fn execute(
        &self,
        agent_id: impl Into<AgentId>,
        goal: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionOutcome {
        self.coordinator.execute(agent_id, goal, parameters).await
    }

    /// The execution coordinator, for progress streams and pre-built
    /// requests.
    #[must_use]
    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    /// Stream of history plus live events.
    #[must_use]
    pub fn events(&self) -> futures::stream::BoxStream<'static, Event> {
        self.log.history_plus_stream()
    }

    /// Stream of history plus live events for one agent.
    #[must_use]
    pub fn events_for(&self, agent_id: &str) -> futures::stream::BoxStream<'static, Event> {
        self.log.entity_stream(agent_id)
    }

    /// Snapshot of the retained event history.
    #[must_use]
    pub fn history(&self) -> Vec<Event> {
        self.log.history()
    }

    /// Clear the retained event history.
    pub fn clear_history(&self) {
        self.log.clear();
    }

    /// Whether the transport is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.socket.state()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.socket.watch()
    }

    /// Number of inbound frames dropped as malformed or unrecognized.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.router.dropped_frames()
    }

    /// Close the session: stop reconnection, release the transport and
    /// end event routing. In-flight `execute` calls resolve through their
    /// own timeout rather than hanging.
    pub async fn close(self) {
        let Self {
            socket,
            router_task,
            ..
        } = self;
        socket.disconnect();
        drop(socket);
        let _ = router_task.await;
        tracing::info!("feed session closed");
    }
}
