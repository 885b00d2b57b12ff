//! Named, payload-free events pushed by the worker backend.
//!
//! Delivery is best effort: an event published while nobody is subscribed is
//! dropped, and a slow subscriber may lose events it lagged behind on. Callers
//! must treat an event as a hint, never as proof of state.

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Pushed once the display service inside the worker has bound its port.
pub const VNC_READY: &str = "vnc-ready";

const DEFAULT_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEvent {
    pub name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("event name must not be empty")]
    EmptyName,
    #[error("no subscribers for event {0}")]
    NoSubscribers(String),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait EventBus: Send + Sync {
    fn subscribe(&self, name: &str) -> Subscription;
    /// Returns the number of subscribers the event was handed to.
    fn publish(&self, name: &str) -> BusResult<usize>;
}

/// Receiving half of a named event stream.
#[derive(Debug)]
pub struct Subscription {
    name: String,
    receiver: broadcast::Receiver<BackendEvent>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the next event. Lagged notifications are collapsed into a
    /// single delivery since events carry no payload. Returns `None` once the
    /// bus is gone.
    pub async fn next(&mut self) -> Option<BackendEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(
                        target = "readiness.bus",
                        event = %self.name,
                        skipped,
                        "subscriber lagged; coalescing events"
                    );
                    return Some(BackendEvent {
                        name: self.name.clone(),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process bus. The desktop shell and the ingress endpoint share one of
/// these with the controller.
#[derive(Debug)]
pub struct LocalEventBus {
    capacity: usize,
    channels: parking_lot::RwLock<std::collections::HashMap<String, broadcast::Sender<BackendEvent>>>,
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: parking_lot::RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Receivers are created under the map lock so a concurrent sweep never
    /// removes a channel someone is joining.
    fn receiver_for(&self, name: &str) -> broadcast::Receiver<BackendEvent> {
        if let Some(sender) = self.channels.read().get(name) {
            return sender.subscribe();
        }
        let mut guard = self.channels.write();
        guard.retain(|_, sender| sender.receiver_count() > 0);
        guard
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drops the channel for `name` if every subscription to it is gone.
    fn prune(&self, name: &str) {
        let mut guard = self.channels.write();
        if guard
            .get(name)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            guard.remove(name);
            trace!(target = "readiness.bus", event = %name, "pruned idle event channel");
        }
    }

    /// Number of event names with a live channel.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}

impl EventBus for LocalEventBus {
    fn subscribe(&self, name: &str) -> Subscription {
        Subscription {
            name: name.to_string(),
            receiver: self.receiver_for(name),
        }
    }

    fn publish(&self, name: &str) -> BusResult<usize> {
        if name.trim().is_empty() {
            return Err(BusError::EmptyName);
        }
        // Publishing never opens a channel; names come from untrusted callers.
        let Some(sender) = self.channels.read().get(name).cloned() else {
            return Err(BusError::NoSubscribers(name.to_string()));
        };
        let event = BackendEvent {
            name: name.to_string(),
        };
        match sender.send(event) {
            Ok(delivered) => {
                debug!(target = "readiness.bus", event = %name, delivered, "published backend event");
                Ok(delivered)
            }
            Err(_) => {
                self.prune(name);
                Err(BusError::NoSubscribers(name.to_string()))
            }
        }
    }
}
