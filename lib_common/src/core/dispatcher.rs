//! # Sample Dispatcher
//!
//! The single consumer of the ingestor channel. Samples are applied in the
//! order they arrive: first folded into `SharedState`, then handed to the
//! persister. Because exactly one task does this, a persisted record always
//! follows the state write of its own sample.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::model::PowerSample;
use crate::core::persister::Persister;
use crate::core::shared_state::SharedState;

/// Drains parsed power samples into the shared state and the persister.
pub struct Dispatcher {
    shared: SharedState,
    persister: Option<Arc<Persister>>,
}

impl Dispatcher {
    /// `persister` is `None` when persistence is not configured.
    pub fn new(shared: SharedState, persister: Option<Arc<Persister>>) -> Self {
        Self { shared, persister }
    }

    /// Applies one sample.
    pub async fn dispatch(&self, sample: PowerSample) {
        self.shared.set_power(sample);
        if let Some(persister) = &self.persister {
            persister.on_power_update(&sample).await;
        }
    }

    /// Runs until the channel closes or `token` is cancelled.
    pub async fn run(self, mut rx: mpsc::Receiver<PowerSample>, token: CancellationToken) {
        tracing::info!(persistence = self.persister.is_some(), "Sample dispatcher started");
        let mut dispatched: u64 = 0;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(sample) => {
                        self.dispatch(sample).await;
                        dispatched += 1;
                    }
                    None => {
                        tracing::info!("Sample channel closed");
                        break;
                    }
                },
            }
        }

        tracing::info!(dispatched, "Sample dispatcher stopped");
    }
}
