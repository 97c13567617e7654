use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::traits::{SentinelError, SentinelResult};

/// Default maximum subscribers to prevent DoS
const DEFAULT_MAX_SUBSCRIBERS: usize = 1_000;

/// Default outbound queue depth per subscriber
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Serialized message shared by every subscriber queue
pub type Payload = Arc<str>;

/// Opaque identity of a registered subscriber
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberHandle {
    id: Uuid,
    connected_at: DateTime<Utc>,
}

impl SubscriberHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

/// A registered subscriber and the queue it drains
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriberHandle,
    pub receiver: mpsc::Receiver<Payload>,
}

/// Per-call delivery outcome
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscriber queue was full, message dropped for that subscriber only
    pub dropped: usize,
    /// Subscriber channel was closed, subscriber removed
    pub removed: usize,
}

struct SubscriberSlot {
    sender: mpsc::Sender<Payload>,
}

/// Live set of monitor subscribers
#[derive(Clone)]
pub struct BroadcastHub {
    subscribers: Arc<RwLock<HashMap<Uuid, SubscriberSlot>>>,
    max_subscribers: usize,
    channel_capacity: usize,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SUBSCRIBERS, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create hub with custom subscriber limit and per-subscriber queue depth
    pub fn with_capacity(max_subscribers: usize, channel_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            max_subscribers,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Register a subscriber whose transport handshake has already completed
    pub fn connect(&self) -> SentinelResult<Subscription> {
        let mut subscribers = self.subscribers.write();
        if subscribers.len() >= self.max_subscribers {
            warn!("Broadcast hub at capacity, rejecting subscriber");
            return Err(SentinelError::HubAtCapacity(self.max_subscribers));
        }

        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        let handle = SubscriberHandle {
            id: Uuid::new_v4(),
            connected_at: Utc::now(),
        };
        subscribers.insert(handle.id, SubscriberSlot { sender });
        info!("Subscriber {} connected ({} live)", handle.id, subscribers.len());

        Ok(Subscription { handle, receiver })
    }

    /// Remove a subscriber; returns false if it was already gone
    pub fn disconnect(&self, handle: &SubscriberHandle) -> bool {
        let removed = self.subscribers.write().remove(&handle.id).is_some();
        if removed {
            info!("Subscriber {} disconnected", handle.id);
        }
        removed
    }

    pub fn is_connected(&self, handle: &SubscriberHandle) -> bool {
        self.subscribers.read().contains_key(&handle.id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Serialize once and offer the message to every live subscriber.
    ///
    /// Never fails: closed subscribers are removed, full ones skip this message.
    pub fn broadcast<T: Serialize>(&self, message: &T) -> BroadcastReport {
        let payload: Payload = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                error!("Failed to serialize broadcast message: {}", e);
                return BroadcastReport::default();
            }
        };
        self.broadcast_payload(payload)
    }

    pub fn broadcast_payload(&self, payload: Payload) -> BroadcastReport {
        // Deliver against a stable copy so connect/disconnect can proceed meanwhile
        let targets: Vec<(Uuid, mpsc::Sender<Payload>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, slot)| (*id, slot.sender.clone()))
            .collect();

        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        for (id, sender) in targets {
            match sender.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Subscriber {} lagging, dropping message", id);
                    report.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                if subscribers.remove(&id).is_some() {
                    warn!("Removed subscriber {} after failed delivery", id);
                    report.removed += 1;
                }
            }
        }

        report
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
