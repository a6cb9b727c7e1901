//! # Persister
//!
//! Turns every power sample into one time-series record, tagged with the
//! freshest known price and solar reading, and writes it best-effort.
//!
//! There is no retry queue. A failed or timed-out write marks the sink
//! disconnected; records arriving during the following backoff window are
//! dropped without touching the sink. The first record after the window is the
//! reconnect attempt. The backoff doubles on every consecutive failure up to a
//! cap and resets on the first success. Rejected credentials stop all writes
//! for the life of the process.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::model::{PowerSample, Region};
use crate::core::ports::{SinkError, TimeSeriesSink};
use crate::core::shared_state::SharedState;

/// The record handed to the time-series sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerRecord {
    /// Observation time of the power sample.
    pub timestamp: DateTime<Utc>,
    /// Region tag.
    pub region: Region,
    /// Grid power in watts.
    pub grid_power: f64,
    /// Spot price in SEK/kWh for the region, if one is known.
    pub spot_price: Option<f64>,
    /// Solar production in watts, absent until the first successful poll.
    pub solar_power: Option<f64>,
}

/// Tuning for the persister.
#[derive(Debug, Clone, Copy)]
pub struct PersisterSettings {
    /// Region whose price is attached to each record.
    pub region: Region,
    /// Upper bound for a single sink write.
    pub write_timeout: Duration,
    /// First reconnect delay after a failure.
    pub initial_backoff: Duration,
    /// Reconnect delay cap.
    pub max_backoff: Duration,
}

impl Default for PersisterSettings {
    fn default() -> Self {
        Self {
            region: Region::SE4,
            write_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct SinkHealth {
    connected: bool,
    retry_at: Option<Instant>,
    backoff: Duration,
    rejected: Option<String>,
}

/// Best-effort writer of power records.
pub struct Persister {
    shared: SharedState,
    sink: Arc<dyn TimeSeriesSink>,
    settings: PersisterSettings,
    health: Mutex<SinkHealth>,
}

impl Persister {
    /// Creates a persister writing to `sink`.
    pub fn new(shared: SharedState, sink: Arc<dyn TimeSeriesSink>, settings: PersisterSettings) -> Self {
        Self {
            shared,
            sink,
            health: Mutex::new(SinkHealth {
                connected: true,
                retry_at: None,
                backoff: settings.initial_backoff,
                rejected: None,
            }),
            settings,
        }
    }

    /// Builds the record for `sample` from the current aggregate.
    pub fn compose(&self, sample: &PowerSample) -> PowerRecord {
        let snapshot = self.shared.snapshot();
        PowerRecord {
            timestamp: sample.observed_at,
            region: self.settings.region,
            grid_power: sample.watts,
            spot_price: snapshot.price_for(self.settings.region).map(|p| p.sek_per_kwh),
            solar_power: snapshot.solar.known_watts(),
        }
    }

    /// Composes and writes one record. Failures are logged and the record dropped.
    pub async fn on_power_update(&self, sample: &PowerSample) {
        match self.persist(sample).await {
            Ok(record) => {
                tracing::debug!(ts = %record.timestamp, grid_power = record.grid_power, "Record persisted");
            }
            Err(SinkError::Backoff(ms)) => {
                tracing::debug!(retry_in_ms = ms as u64, "Sink unavailable, record dropped");
            }
            Err(SinkError::Auth(_)) => {
                tracing::debug!("Persistence disabled, record dropped");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist power record, dropped");
            }
        }
    }

    /// Like [`Persister::on_power_update`] but hands the outcome back.
    pub async fn persist(&self, sample: &PowerSample) -> Result<PowerRecord, SinkError> {
        self.check_backoff()?;

        let record = self.compose(sample);
        let outcome = match tokio::time::timeout(self.settings.write_timeout, self.sink.write(&record)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(self.settings.write_timeout.as_millis())),
        };

        match outcome {
            Ok(()) => {
                self.mark_connected();
                Ok(record)
            }
            Err(SinkError::Auth(msg)) => {
                self.mark_rejected(&msg);
                Err(SinkError::Auth(msg))
            }
            Err(e) => {
                self.mark_failed();
                Err(e)
            }
        }
    }

    /// `true` unless the last write failed.
    pub fn is_connected(&self) -> bool {
        self.health.lock().unwrap_or_else(PoisonError::into_inner).connected
    }

    fn check_backoff(&self) -> Result<(), SinkError> {
        let health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(msg) = &health.rejected {
            return Err(SinkError::Auth(msg.clone()));
        }
        match health.retry_at {
            Some(at) if !health.connected => {
                let now = Instant::now();
                if now < at {
                    Err(SinkError::Backoff((at - now).as_millis()))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    fn mark_connected(&self) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        if !health.connected {
            tracing::info!("Time-series sink reachable again");
        }
        health.connected = true;
        health.retry_at = None;
        health.backoff = self.settings.initial_backoff;
    }

    fn mark_rejected(&self, msg: &str) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        health.connected = false;
        if health.rejected.is_none() {
            tracing::error!(error = %msg, "Time-series sink rejected the credentials, persistence disabled");
            health.rejected = Some(msg.to_string());
        }
    }

    fn mark_failed(&self) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        let delay = if health.connected { self.settings.initial_backoff } else { health.backoff };
        health.connected = false;
        health.retry_at = Some(Instant::now() + delay);
        health.backoff = (delay * 2).min(self.settings.max_backoff);
        tracing::warn!(retry_in_secs = delay.as_secs(), "Time-series sink marked disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{PriceSnapshot, SolarSnapshot, SolarStatus};
    use async_trait::async_trait;
    use chrono::TimeZone;

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<PowerRecord>>,
        fail: Mutex<bool>,
        hang: bool,
        deny: bool,
        attempts: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl TimeSeriesSink for MemorySink {
        async fn write(&self, record: &PowerRecord) -> Result<(), SinkError> {
            self.attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.deny {
                return Err(SinkError::Auth("HTTP 401".into()));
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            if *self.fail.lock().unwrap() {
                return Err(SinkError::Write("connection refused".into()));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    fn settings(region: Region) -> PersisterSettings {
        PersisterSettings { region, ..Default::default() }
    }

    #[tokio::test]
    async fn test_record_carries_price_and_solar() {
        let shared = SharedState::new();
        shared.set_price(PriceSnapshot {
            region: Region::SE3,
            sek_per_kwh: 0.85,
            eur_per_kwh: Some(0.074),
            interval_start: t0(),
            interval_end: t0() + chrono::Duration::minutes(15),
            fetched_at: t0(),
        });
        shared.set_solar(SolarSnapshot { watts: 2300.0, status: SolarStatus::Producing, fetched_at: Some(t0()) });

        let sink = Arc::new(MemorySink::default());
        let persister = Persister::new(shared, sink.clone(), settings(Region::SE3));
        persister.on_power_update(&PowerSample { watts: 1580.5, observed_at: t0() }).await;

        let records = sink.records.lock().unwrap();
        assert_eq!(
            *records,
            vec![PowerRecord {
                timestamp: t0(),
                region: Region::SE3,
                grid_power: 1580.5,
                spot_price: Some(0.85),
                solar_power: Some(2300.0),
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_price_and_unknown_solar_are_absent() {
        let sink = Arc::new(MemorySink::default());
        let persister = Persister::new(SharedState::new(), sink.clone(), settings(Region::SE4));

        let record = persister.persist(&PowerSample { watts: -200.0, observed_at: t0() }).await.unwrap();
        assert_eq!(record.spot_price, None);
        assert_eq!(record.solar_power, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off_and_double() {
        let sink = Arc::new(MemorySink::default());
        *sink.fail.lock().unwrap() = true;
        let persister = Persister::new(SharedState::new(), sink.clone(), settings(Region::SE4));
        let sample = PowerSample { watts: 1.0, observed_at: t0() };

        assert!(matches!(persister.persist(&sample).await, Err(SinkError::Write(_))));
        assert!(!persister.is_connected());
        // Inside the 5 s window the sink is not touched.
        assert!(matches!(persister.persist(&sample).await, Err(SinkError::Backoff(_))));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(matches!(persister.persist(&sample).await, Err(SinkError::Write(_))));

        // Second failure doubles the window to 10 s.
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(matches!(persister.persist(&sample).await, Err(SinkError::Backoff(_))));

        *sink.fail.lock().unwrap() = false;
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(persister.persist(&sample).await.is_ok());
        assert!(persister.is_connected());
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_write_times_out() {
        let sink = Arc::new(MemorySink { hang: true, ..Default::default() });
        let persister = Persister::new(SharedState::new(), sink, settings(Region::SE4));

        let result = persister.persist(&PowerSample { watts: 1.0, observed_at: t0() }).await;
        assert!(matches!(result, Err(SinkError::Timeout(5000))));
        assert!(!persister.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_credentials_stop_writes() {
        let sink = Arc::new(MemorySink { deny: true, ..Default::default() });
        let persister = Persister::new(SharedState::new(), sink.clone(), settings(Region::SE4));
        let sample = PowerSample { watts: 1.0, observed_at: t0() };

        assert!(matches!(persister.persist(&sample).await, Err(SinkError::Auth(_))));
        assert!(!persister.is_connected());

        // Long past any backoff window the sink is still left alone.
        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(matches!(persister.persist(&sample).await, Err(SinkError::Auth(_))));
        persister.on_power_update(&sample).await;
        assert_eq!(sink.attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
