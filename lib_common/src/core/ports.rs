//! # Ports
//!
//! The narrow interfaces between the core and the outside world. Concrete
//! HTTP and database adapters live in `feeds` and `connections`; tests plug
//! in in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::core::model::{Region, SolarStatus};
use crate::core::persister::PowerRecord;

/// Failure of a pull feed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Upstream temporarily unreachable, timed out, or answered with a
    /// retryable status. Retried on the normal schedule.
    #[error("transient network error: {0}")]
    Transient(String),

    /// Credentials rejected. The feature stays disabled until reconfigured.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Parse(String),

    /// The day series does not contain the requested instant.
    #[error("no price interval contains {0}")]
    NoMatchingInterval(DateTime<Utc>),
}

/// One entry of a day-ahead price series.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceInterval {
    /// Price in SEK per kWh.
    pub sek_per_kwh: f64,
    /// Price in EUR per kWh, if published.
    pub eur_per_kwh: Option<f64>,
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

/// Day-ahead price source.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetches the full series for `date` (local calendar date) and `region`.
    async fn day_series(&self, date: NaiveDate, region: Region)
        -> Result<Vec<PriceInterval>, FetchError>;
}

/// One solar production reading as returned by the provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarReading {
    /// Current PV production in watts.
    pub watts: f64,
    /// `Producing` or `Idle`; never `Unknown`.
    pub status: SolarStatus,
}

/// Rate-limited solar production source.
#[async_trait]
pub trait SolarFeed: Send + Sync {
    /// One call against the provider quota.
    async fn current_production(&self) -> Result<SolarReading, FetchError>;
}

/// Failure of a time-series sink operation.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink refused or could not receive the record.
    #[error("write failed: {0}")]
    Write(String),

    /// The sink rejected the credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// A read query failed or returned something unreadable.
    #[error("query failed: {0}")]
    Query(String),

    /// The write did not finish within the persister's deadline.
    #[error("write timed out after {0} ms")]
    Timeout(u128),

    /// The sink is marked disconnected and the reconnect delay has not elapsed.
    #[error("sink unavailable, next reconnect attempt in {0} ms")]
    Backoff(u128),
}

/// Destination for persisted power records.
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    /// Writes one record. Must not retry internally.
    async fn write(&self, record: &PowerRecord) -> Result<(), SinkError>;
}
