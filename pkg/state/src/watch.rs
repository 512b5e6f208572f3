use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// Type of event in the watch stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
}

/// A single watch event representing a state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

/// Live feed of state mutations, stamped with monotonic sequence numbers.
/// Clients subscribe and filter by key prefix.
#[derive(Clone)]
pub struct EventLog {
    seq: Arc<Mutex<u64>>,
    sender: broadcast::Sender<WatchEvent>,
}

impl EventLog {
    /// Create a log whose live channel buffers up to `channel_capacity`
    /// unread events per subscriber.
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity);
        Self {
            seq: Arc::new(Mutex::new(0)),
            sender,
        }
    }

    /// Record a new event. Called by StateStore on put/delete.
    pub async fn emit(&self, event_type: EventType, key: String, value: Option<Vec<u8>>) {
        // Held across the send so subscribers see sequence numbers in order
        let mut seq = self.seq.lock().await;
        *seq += 1;
        let event = WatchEvent {
            seq: *seq,
            event_type,
            key,
            value,
        };
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive new events as they are emitted.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }

    /// Live events whose key starts with any of `prefixes`.
    ///
    /// Events dropped because the subscriber lagged are skipped; a periodic
    /// resync is expected to cover them.
    pub fn watch_prefixes(&self, prefixes: Vec<String>) -> impl Stream<Item = WatchEvent> + use<> {
        BroadcastStream::new(self.subscribe()).filter_map(move |result| match result {
            Ok(event) if prefixes.iter().any(|p| event.key.starts_with(p.as_str())) => {
                Some(event)
            }
            _ => None,
        })
    }
}
