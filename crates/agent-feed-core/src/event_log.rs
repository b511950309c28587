//! Broadcast + bounded history event log.

use std::{
    collections::VecDeque,
    sync::RwLock,
    time::Instant,
};

use futures::{StreamExt, future};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::event::{AgentId, Event, EventKind};

/// Default history size limit (entries).
const HISTORY_ENTRIES: usize = 1024;

struct Inner {
    history: VecDeque<Event>,
    next_seq: u64,
}

/// Append-only event log with broadcast and history support.
///
/// Any number of observers can read the log without affecting delivery to
/// others: new observers receive history first, then seamlessly switch to
/// live updates.
pub struct EventLog {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<Event>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a new event log with the default history capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_ENTRIES)
    }

    /// Create a new event log retaining at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                next_seq: 0,
            }),
            sender,
            capacity: capacity.max(1),
        }
    }

    /// Append an event, assigning its sequence number and receipt time.
    ///
    /// The oldest entry is evicted once the history capacity is reached.
    /// Appends are mutually exclusive; the broadcast send happens under the
    /// same lock so live observers see events in sequence order.
    pub fn append(&self, kind: EventKind, agent_id: Option<AgentId>, payload: Value) -> Event {
        let mut inner = self.inner.write().unwrap();
        let event = Event {
            kind,
            agent_id,
            payload,
            seq: inner.next_seq,
            received_at: Instant::now(),
        };
        inner.next_seq += 1;
        while inner.history.len() >= self.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(event.clone());
        let _ = self.sender.send(event.clone()); // live observers
        event
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<Event> {
        self.inner.read().unwrap().history.iter().cloned().collect()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().history.len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().history.is_empty()
    }

    /// Clear the retained history.
    ///
    /// Sequence numbers keep counting; live observers are unaffected.
    pub fn clear(&self) {
        self.inner.write().unwrap().history.clear();
    }

    /// Get a receiver for live updates only.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Stream of live updates only.
    #[must_use]
    pub fn live_stream(&self) -> futures::stream::BoxStream<'static, Event> {
        BroadcastStream::new(self.get_receiver())
            .filter_map(|res| future::ready(res.ok()))
            .boxed()
    }

    /// Stream that yields history first, then live updates.
    ///
    /// Each event is yielded exactly once: the live tail is filtered by
    /// sequence number against the history snapshot.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, Event> {
        // Subscribe before snapshotting so nothing falls between the two.
        let rx = self.sender.subscribe();
        let (history, next_seq) = {
            let inner = self.inner.read().unwrap();
            (
                inner.history.iter().cloned().collect::<Vec<_>>(),
                inner.next_seq,
            )
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx)
            .filter_map(|res| future::ready(res.ok()))
            .filter(move |event| future::ready(event.seq >= next_seq));

        Box::pin(hist.chain(live))
    }

    /// Stream of history plus live updates for a single agent.
    #[must_use]
    pub fn entity_stream(&self, agent_id: &str) -> futures::stream::BoxStream<'static, Event> {
        let agent_id = agent_id.to_string();
        self.history_plus_stream()
            .filter(move |event| future::ready(event.is_for(&agent_id)))
            .boxed()
    }
}
