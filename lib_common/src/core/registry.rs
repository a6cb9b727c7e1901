//! # Observer Registry
//!
//! Reference-counts connected dashboard sessions. The count lives in a
//! `tokio::sync::watch` channel so the solar scheduler is woken on every
//! change and reads it atomically with respect to increments/decrements.
//!
//! Every 0 → 1 transition also bumps an activation epoch. A scheduler that
//! was busy while observers left and came back still sees the epoch move and
//! can issue its catch-up poll.

use std::sync::Arc;

use tokio::sync::watch;

/// Observer count as published to watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObserverCount {
    /// Currently connected sessions.
    pub clients: usize,
    /// Number of 0 → 1 transitions since startup.
    pub activations: u64,
}

/// Tracks connected observers.
#[derive(Debug)]
pub struct ObserverRegistry {
    count: watch::Sender<ObserverCount>,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverRegistry {
    /// Creates a registry with no observers.
    pub fn new() -> Self {
        let (count, _) = watch::channel(ObserverCount::default());
        Self { count }
    }

    /// Registers one observer. The returned guard unregisters it when dropped.
    pub fn register(self: &Arc<Self>) -> ObserverGuard {
        let mut first = false;
        self.count.send_modify(|count| {
            count.clients += 1;
            if count.clients == 1 {
                count.activations += 1;
                first = true;
            }
        });
        let clients = self.clients();
        if first {
            tracing::info!(clients, "First observer connected");
        } else {
            tracing::debug!(clients, "Observer connected");
        }
        ObserverGuard { registry: Arc::clone(self) }
    }

    fn unregister(&self) {
        self.count.send_modify(|count| {
            count.clients = count.clients.saturating_sub(1);
        });
        let clients = self.clients();
        if clients == 0 {
            tracing::info!("Last observer disconnected");
        } else {
            tracing::debug!(clients, "Observer disconnected");
        }
    }

    /// Current number of observers.
    pub fn clients(&self) -> usize {
        self.count.borrow().clients
    }

    /// Receiver that is notified on every count change.
    pub fn watch(&self) -> watch::Receiver<ObserverCount> {
        self.count.subscribe()
    }
}

/// Proof of one registered observer. Dropping it decrements the count exactly once.
#[derive(Debug)]
pub struct ObserverGuard {
    registry: Arc<ObserverRegistry>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.registry.unregister();
    }
}
