//! Cooperative cancellation shared between the coordinator and its executors.
//!
//! A [`ShutdownTrigger`] flips a watch channel once; every [`ShutdownSignal`]
//! subscribed to it observes the change. Signals can be linked so an executor
//! stops either when its owner shuts the whole session down or when the
//! executor itself is disposed.

use futures::future::select_all;
use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected trigger / signal pair
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let trigger = ShutdownTrigger::new();
    let signal = trigger.signal();
    (trigger, signal)
}

/// Owning side of a shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Create a trigger that has not fired yet
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the trigger. Firing more than once has no further effect.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Check if the trigger has fired
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe a new signal to this trigger
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receivers: vec![self.tx.subscribe()],
        }
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Observing side of one or more shutdown triggers
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receivers: Vec<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self {
            receivers: Vec::new(),
        }
    }

    /// Combine two signals; the result fires when either fires
    pub fn linked_with(&self, other: &ShutdownSignal) -> ShutdownSignal {
        let mut receivers = self.receivers.clone();
        receivers.extend(other.receivers.iter().cloned());
        Self { receivers }
    }

    /// Check if any linked trigger has fired
    pub fn is_triggered(&self) -> bool {
        self.receivers.iter().any(|rx| *rx.borrow())
    }

    /// Wait until any linked trigger fires.
    ///
    /// A trigger that is dropped without firing never completes this future.
    pub async fn triggered(&self) {
        if self.receivers.is_empty() {
            return std::future::pending().await;
        }

        let waits = self
            .receivers
            .iter()
            .cloned()
            .map(|rx| Box::pin(fired(rx)));
        select_all(waits).await;
    }
}

async fn fired(mut rx: watch::Receiver<bool>) {
    let dropped = rx.wait_for(|value| *value).await.is_err();
    if dropped {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;
