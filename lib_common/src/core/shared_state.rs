//! # Shared State
//!
//! The one piece of shared mutable data in the process. Every writer (the
//! power dispatcher, the price cache, the solar scheduler, the MQTT
//! subscriber) and every reader (observer loops, the persister) goes through
//! the same `SharedState` handle.
//!
//! ## Discipline:
//! - A single `std::sync::Mutex` guards a plain `AggregateState`.
//! - The lock is held only for one mutation or one `clone()`. Nothing awaits,
//!   logs or performs I/O while holding it.
//! - Readers get an owned copy (`snapshot`); nothing handed out can be mutated
//!   by a later writer.
//! - A poisoned lock is recovered: the aggregate is plain data and every
//!   mutation is a single assignment, so there is no torn invariant to protect.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::model::{
    ConnectionState, FeatureFlags, PowerSample, PriceSnapshot, Region, SolarSnapshot,
};

/// Everything the dashboard and the persister need, as plain data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    /// Latest grid power sample.
    pub power: Option<PowerSample>,
    /// Latest selected price interval, per region.
    pub prices: BTreeMap<Region, PriceSnapshot>,
    /// Latest solar reading (status `Unknown` until the first poll succeeds).
    pub solar: SolarSnapshot,
    /// Power feed transport status.
    pub connection: ConnectionState,
    /// Optional features configured at startup.
    pub features: FeatureFlags,
    /// Incremented on every write.
    pub version: u64,
    /// Wall-clock time of the last write.
    pub updated_at: Option<DateTime<Utc>>,
}

impl AggregateState {
    /// Price for `region`, if one has been selected.
    pub fn price_for(&self, region: Region) -> Option<&PriceSnapshot> {
        self.prices.get(&region)
    }
}

/// Cheap, cloneable handle to the process-wide aggregate.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<AggregateState>>,
}

impl SharedState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AggregateState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `mutator` atomically and bumps the version.
    ///
    /// The closure runs under the lock: keep it to plain field assignments.
    pub fn write<R>(&self, mutator: impl FnOnce(&mut AggregateState) -> R) -> R {
        let now = Utc::now();
        let mut guard = self.lock();
        let result = mutator(&mut guard);
        guard.version = guard.version.wrapping_add(1);
        guard.updated_at = Some(now);
        result
    }

    /// Returns an independent copy of the whole aggregate.
    pub fn snapshot(&self) -> AggregateState {
        self.lock().clone()
    }

    /// Replaces the latest power sample.
    pub fn set_power(&self, sample: PowerSample) {
        self.write(|state| state.power = Some(sample));
    }

    /// Replaces the price for the snapshot's region.
    pub fn set_price(&self, price: PriceSnapshot) {
        self.write(|state| {
            state.prices.insert(price.region, price);
        });
    }

    /// Replaces the solar reading wholesale.
    pub fn set_solar(&self, solar: SolarSnapshot) {
        self.write(|state| state.solar = solar);
    }

    /// Replaces the power feed connection status.
    pub fn set_connection(&self, connection: ConnectionState) {
        self.write(|state| state.connection = connection);
    }

    /// Records which optional features are active.
    pub fn set_features(&self, features: FeatureFlags) {
        self.write(|state| state.features = features);
    }
}
