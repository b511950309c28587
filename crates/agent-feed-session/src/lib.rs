//! Consumer-facing session for the agent event feed.
//!
//! Provides:
//! - `SubscriptionRegistry` - Active entity set, replayed on reconnect
//! - `EventRouter` - Classifies and filters inbound frames
//! - `FeedSession` - One transport, log and coordinator per consumer

pub mod registry;
pub mod router;
pub mod session;

pub use registry::SubscriptionRegistry;
pub use router::EventRouter;
pub use session::{FeedConfig, FeedSession};

// Re-export the types a session consumer handles directly.
pub use agent_feed_core::{AgentId, Event, EventKind};
pub use agent_feed_exec::{ExecError, ExecutionOutcome, ExecutionRequest};
pub use agent_feed_transport::ConnectionState;
