//! Correlates execution requests with the event feed.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use agent_feed_core::{AgentId, Event, EventKind, EventLog};
use async_trait::async_trait;
use futures::{StreamExt, future};
use serde_json::Value;
use uuid::Uuid;

/// Default bound on a single execution request.
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Correlation record for one triggered execution.
///
/// A correlation key, not shared mutable state: nothing mutates it after
/// creation, and a new execution always gets a new request.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Unique request identifier.
    pub id: Uuid,
    /// Agent the execution targets.
    pub agent_id: AgentId,
    /// Free-form instruction text.
    pub goal: String,
    /// Additional execution parameters.
    pub parameters: HashMap<String, Value>,
    /// When the request was issued.
    pub issued_at: Instant,
}

impl ExecutionRequest {
    /// Create a new request.
    #[must_use]
    pub fn new(
        agent_id: impl Into<AgentId>,
        goal: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            goal: goal.into(),
            parameters,
            issued_at: Instant::now(),
        }
    }
}

/// Execution request error.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Execution rejected ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Terminal result of one execution request. Produced exactly once.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The direct response reported success.
    Succeeded { payload: Value },
    /// The request failed; the cause is carried, never swallowed.
    Failed { error: ExecError },
    /// No terminal response within the configured bound.
    TimedOut,
}

impl ExecutionOutcome {
    /// Whether the execution succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Success payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        match self {
            Self::Succeeded { payload } => Some(payload),
            _ => None,
        }
    }
}

/// Request/response boundary for triggering an execution.
///
/// Implemented by `ExecApi` for the real gateway; implement it yourself
/// to plug in a different backend or a test double.
#[async_trait]
pub trait ExecuteBackend: Send + Sync {
    /// Issue the execution request and return the direct response payload.
    async fn execute(&self, request: &ExecutionRequest) -> Result<Value, ExecError>;
}

/// Ties a fire-and-forget execution request to the event feed.
///
/// The direct response is authoritative for the call's outcome; streamed
/// events are supplementary progress narration, never a second source of
/// truth for the final result. Failures are surfaced to the caller and
/// never retried here; retries are a caller decision.
pub struct ExecutionCoordinator {
    backend: Arc<dyn ExecuteBackend>,
    log: Arc<EventLog>,
    timeout: Duration,
}

impl ExecutionCoordinator {
    /// Create a coordinator with the default request timeout.
    #[must_use]
    pub fn new(backend: Arc<dyn ExecuteBackend>, log: Arc<EventLog>) -> Self {
        Self {
            backend,
            log,
            timeout: EXECUTE_TIMEOUT,
        }
    }

    /// Override the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Trigger an execution and await its outcome.
    ///
    /// Suspends only the calling task; event delivery runs independently.
    pub async fn execute(
        &self,
        agent_id: impl Into<AgentId>,
        goal: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionOutcome {
        self.submit(ExecutionRequest::new(agent_id, goal, parameters))
            .await
    }

    /// Submit a pre-built request and await its outcome.
    pub async fn submit(&self, request: ExecutionRequest) -> ExecutionOutcome {
        tracing::info!(
            request_id = %request.id,
            agent_id = %request.agent_id,
            "execution requested"
        );

        match tokio::time::timeout(self.timeout, self.backend.execute(&request)).await {
            Ok(Ok(payload)) => {
                tracing::info!(request_id = %request.id, "execution succeeded");
                ExecutionOutcome::Succeeded { payload }
            }
            Ok(Err(error)) => {
                tracing::warn!(request_id = %request.id, error = %error, "execution failed");
                ExecutionOutcome::Failed { error }
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %request.id,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "execution timed out"
                );
                ExecutionOutcome::TimedOut
            }
        }
    }

    /// Live progress narration for an agent.
    ///
    /// Yields `AgentStatus` and `TaskUpdate` events from the feed as they
    /// arrive; independent of any in-flight request.
    #[must_use]
    pub fn progress(&self, agent_id: &str) -> futures::stream::BoxStream<'static, Event> {
        let agent_id = agent_id.to_string();
        self.log
            .live_stream()
            .filter(move |event| {
                future::ready(
                    event.is_for(&agent_id)
                        && matches!(event.kind, EventKind::AgentStatus | EventKind::TaskUpdate),
                )
            })
            .boxed()
    }
}
