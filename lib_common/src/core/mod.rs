//! # Core Engine Module
//!
//! This module forms the heart of the Sotehus monitor. It aggregates the
//! components that merge data arriving from independently-timed feeds into one
//! coherent state and decide when the rate-limited solar feed may be polled.
//!
//! ## Core Components:
//!
//! - **`shared_state`**: The single mutex-guarded aggregate (power, prices,
//!   solar, connection) with copy-on-read snapshots. It has no outbound
//!   dependencies.
//!
//! - **`registry`**: Reference-counted observer registry. Each connected
//!   dashboard session holds a guard; the scheduler watches the count.
//!
//! - **`dispatcher`**: The single state-update task. It drains parsed power
//!   samples from the ingestor channel, folds them into the shared state and
//!   hands them to the persister.
//!
//! - **`price_cache`**: Per-region, per-day memoized day-ahead prices.
//!
//! - **`solar_scheduler`**: The "brain" of the solar feed. It moves between
//!   `Dark`, `Idle` and `Active` and sizes the poll cadence from the daylight
//!   window and the provider quota.
//!
//! - **`persister`**: Composes one time-series record per power sample and
//!   writes it best-effort.
//!
//! - **`observer`**: Per-session periodic snapshot loop.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Sunrise/sunset approximation and the daily polling plan.
pub mod daylight;
/// The sample channel consumer that writes power into the shared state.
pub mod dispatcher;
/// Plain data types shared by every component.
pub mod model;
/// Per-session periodic snapshot loop.
pub mod observer;
/// Best-effort time-series persistence of power samples.
pub mod persister;
/// Collaborator traits (feeds, sink) and their error types.
pub mod ports;
/// Per-region, per-day memoized day-ahead prices.
pub mod price_cache;
/// Reference-counted observer registry.
pub mod registry;
/// The mutex-guarded aggregate state.
pub mod shared_state;
/// Adaptive, quota-aware solar polling.
pub mod solar_scheduler;

// --- Public API Re-exports ---
pub use daylight::{cadence_minutes, DailyPlan, Location, QuotaSettings};
pub use dispatcher::Dispatcher;
pub use model::{
    ConnectionState, FeatureFlags, PowerSample, PriceSnapshot, Region, SolarSnapshot, SolarStatus,
};
pub use observer::{DashboardView, ObserverLoop};
pub use persister::{PowerRecord, Persister, PersisterSettings};
pub use ports::{FetchError, PriceFeed, PriceInterval, SinkError, SolarFeed, SolarReading, TimeSeriesSink};
pub use price_cache::PriceCache;
pub use registry::{ObserverCount, ObserverGuard, ObserverRegistry};
pub use shared_state::{AggregateState, SharedState};
pub use solar_scheduler::{Clock, OperationMode, SchedulerState, SolarScheduler, SystemClock};
