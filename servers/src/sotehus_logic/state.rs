use std::sync::Arc;
use std::time::Duration;

use lib_common::core::{Region, SchedulerState};
use lib_common::{ObserverRegistry, SharedState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Everything the HTTP handlers need. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub registry: Arc<ObserverRegistry>,
    pub region: Region,
    pub tick: Duration,
    // Parent of every dashboard session; cancelled on shutdown.
    pub token: CancellationToken,
    pub scheduler_status: Option<watch::Receiver<SchedulerState>>,
}

impl AppState {
    pub fn new(shared: SharedState, registry: Arc<ObserverRegistry>, region: Region, tick: Duration, token: CancellationToken) -> Self {
        Self { shared, registry, region, tick, token, scheduler_status: None }
    }

    pub fn with_scheduler_status(mut self, status: watch::Receiver<SchedulerState>) -> Self {
        self.scheduler_status = Some(status);
        self
    }

    pub fn scheduler(&self) -> Option<SchedulerState> {
        self.scheduler_status.as_ref().map(|rx| rx.borrow().clone())
    }
}
