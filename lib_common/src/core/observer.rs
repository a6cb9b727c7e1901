//! # Observer Loop
//!
//! One loop per connected dashboard session. It reads a snapshot on every
//! tick and forwards the formatted view to the session's outbound channel.
//! The loop owns the session's `ObserverGuard`, so the observer count drops
//! exactly once when the loop ends, however it ends.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::model::{ConnectionState, PowerSample, PriceSnapshot, Region, SolarSnapshot};
use crate::core::registry::ObserverGuard;
use crate::core::shared_state::{AggregateState, SharedState};

/// What one dashboard frame shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    /// Latest grid power.
    pub power: Option<PowerSample>,
    /// Price for the configured region.
    pub price: Option<PriceSnapshot>,
    /// Solar section; `None` when solar is not configured.
    pub solar: Option<SolarSnapshot>,
    /// Power feed transport status.
    pub connection: ConnectionState,
    /// State version the view was built from.
    pub version: u64,
    /// Time of the last state write.
    pub updated_at: Option<DateTime<Utc>>,
}

impl DashboardView {
    /// Formats `state` for `region`.
    pub fn from_state(state: AggregateState, region: Region) -> Self {
        let price = state.price_for(region).cloned();
        let solar = state.features.solar_enabled.then_some(state.solar);
        Self {
            power: state.power,
            price,
            solar,
            connection: state.connection,
            version: state.version,
            updated_at: state.updated_at,
        }
    }
}

/// Per-session snapshot loop.
pub struct ObserverLoop {
    shared: SharedState,
    region: Region,
    tick: Duration,
}

impl ObserverLoop {
    /// A loop reading `shared` every `tick`.
    pub fn new(shared: SharedState, region: Region, tick: Duration) -> Self {
        Self { shared, region, tick }
    }

    /// Forwards one view per tick (the first immediately) until `token` is
    /// cancelled or the receiving side of `tx` is gone.
    pub async fn run(self, guard: ObserverGuard, tx: mpsc::Sender<DashboardView>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let view = DashboardView::from_state(self.shared.snapshot(), self.region);
                    // A stalled session must not hold off cancellation.
                    tokio::select! {
                        _ = token.cancelled() => break,
                        sent = tx.send(view) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{FeatureFlags, SolarStatus};
    use crate::core::registry::ObserverRegistry;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_view_is_immediate_then_every_tick() {
        let registry = Arc::new(ObserverRegistry::new());
        let shared = SharedState::new();
        shared.set_power(PowerSample { watts: 750.0, observed_at: Utc::now() });
        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();

        let observer = ObserverLoop::new(shared.clone(), Region::SE4, Duration::from_secs(3));
        let handle = tokio::spawn(observer.run(registry.register(), tx, token.clone()));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.power.unwrap().watts, 750.0);

        shared.set_power(PowerSample { watts: 800.0, observed_at: Utc::now() });
        let second = rx.recv().await.unwrap();
        assert_eq!(second.power.unwrap().watts, 800.0);
        assert!(second.version > first.version);

        token.cancel();
        handle.await.unwrap();
        assert_eq!(registry.clients(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_reads_and_releases_guard_once() {
        let registry = Arc::new(ObserverRegistry::new());
        let _other = registry.register();
        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();

        let observer = ObserverLoop::new(SharedState::new(), Region::SE4, Duration::from_secs(3));
        let handle = tokio::spawn(observer.run(registry.register(), tx, token.clone()));
        rx.recv().await.unwrap();
        assert_eq!(registry.clients(), 2);

        token.cancel();
        handle.await.unwrap();
        assert_eq!(registry.clients(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_session_ends_loop() {
        let registry = Arc::new(ObserverRegistry::new());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let observer = ObserverLoop::new(SharedState::new(), Region::SE4, Duration::from_secs(3));
        observer.run(registry.register(), tx, CancellationToken::new()).await;
        assert_eq!(registry.clients(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_session_channel_full() {
        let registry = Arc::new(ObserverRegistry::new());
        let (tx, _rx) = mpsc::channel(1);
        let token = CancellationToken::new();

        let observer = ObserverLoop::new(SharedState::new(), Region::SE4, Duration::from_secs(3));
        let handle = tokio::spawn(observer.run(registry.register(), tx, token.clone()));

        // First view fills the channel, the second tick blocks on send.
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(registry.clients(), 1);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(60), handle).await.expect("loop stopped").unwrap();
        assert_eq!(registry.clients(), 0);
    }

    #[test]
    fn test_solar_section_hidden_unless_enabled() {
        let shared = SharedState::new();
        shared.set_solar(SolarSnapshot { watts: 100.0, status: SolarStatus::Producing, fetched_at: None });

        assert_eq!(DashboardView::from_state(shared.snapshot(), Region::SE4).solar, None);

        shared.set_features(FeatureFlags { solar_enabled: true, ..Default::default() });
        let view = DashboardView::from_state(shared.snapshot(), Region::SE4);
        assert_eq!(view.solar.unwrap().watts, 100.0);
    }
}
