//! Core abstractions for subscription-filtered agent event feeds.
//!
//! This crate provides the fundamental building blocks:
//! - `Event` / `EventKind` - Typed, immutable event records
//! - `EventLog` - Broadcast + bounded history for any number of observers
//! - `AgentId` - Entity identifier alias

pub mod event;
pub mod event_log;

pub use event::{AgentId, Event, EventKind};
pub use event_log::EventLog;
