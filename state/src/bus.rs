use serde::Serialize;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

pub const RESET_EVENT: &str = "reset";
pub const SYNCHRONIZE_EVENT: &str = "synchronize";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateEvent {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

impl From<&str> for ListenerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ListenerError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

pub type Listener = Arc<dyn Fn(&StateEvent) -> Result<(), ListenerError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Outcome of one publish; failures are already logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

/// In-process publish/subscribe for aggregate-state changes.
///
/// Listeners run synchronously, in subscription order, on the publishing
/// task. A listener that returns an error or panics is logged and skipped;
/// the rest still run and the publisher never sees the failure.
#[derive(Default)]
pub struct StateChangeBus {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl StateChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push((id, Arc::new(listener)));
        tracing::debug!(listener = id.0, "state listener subscribed");
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() < before;
        if !removed {
            tracing::warn!(listener = id.0, "unsubscribe for unknown state listener");
        }
        removed
    }

    /// Forwards every event into a broadcast channel, for async observers
    /// such as a websocket fan-out. Lagging receivers lose events.
    pub fn subscribe_channel(&self, capacity: usize) -> (ListenerId, broadcast::Receiver<StateEvent>) {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        let id = self.subscribe(move |event| {
            // No live receivers is not a failure; there is just nobody to tell.
            let _ = sender.send(event.clone());
            Ok(())
        });
        (id, receiver)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn publish(&self, key: &str, value: Value) -> PublishReport {
        // Snapshot so listeners may (un)subscribe without deadlocking.
        let listeners: Vec<(ListenerId, Listener)> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        tracing::debug!(key, listeners = listeners.len(), "publishing state change");

        let event = StateEvent {
            key: key.to_string(),
            value,
        };
        let mut report = PublishReport::default();

        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    tracing::warn!(listener = id.0, key, error = %err, "state listener failed");
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::error!(listener = id.0, key, "state listener panicked");
                }
            }
        }

        report
    }
}
