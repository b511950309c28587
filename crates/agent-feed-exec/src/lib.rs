//! Execution request coordination against the agent gateway.
//!
//! Provides:
//! - `ExecutionCoordinator` - Ties a fire-and-forget execution request to
//!   the event feed narrating its progress
//! - `ExecuteBackend` - Trait seam for the request/response boundary
//! - `ExecApi` - HTTP client implementation of that boundary

pub mod api;
pub mod coordinator;

pub use api::ExecApi;
pub use coordinator::{
    ExecError, ExecuteBackend, ExecutionCoordinator, ExecutionOutcome, ExecutionRequest,
};
