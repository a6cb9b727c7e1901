use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Swedish electricity bidding zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Region {
    /// Luleå
    SE1,
    /// Sundsvall
    SE2,
    /// Stockholm
    SE3,
    /// Malmö
    SE4,
}

impl Region {
    /// Code used by the price API and as the time-series tag value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::SE1 => "SE1",
            Region::SE2 => "SE2",
            Region::SE3 => "SE3",
            Region::SE4 => "SE4",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SE1" => Ok(Region::SE1),
            "SE2" => Ok(Region::SE2),
            "SE3" => Ok(Region::SE3),
            "SE4" => Ok(Region::SE4),
            other => Err(format!("unknown price region '{}', expected SE1..SE4", other)),
        }
    }
}

/// One grid power reading. Negative watts means export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    /// Instantaneous grid power in watts.
    pub watts: f64,
    /// When the sample was received.
    pub observed_at: DateTime<Utc>,
}

/// The price interval that was current when it was selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Bidding zone the price belongs to.
    pub region: Region,
    /// Spot price in SEK per kWh.
    pub sek_per_kwh: f64,
    /// Spot price in EUR per kWh, when the feed provides it.
    pub eur_per_kwh: Option<f64>,
    /// Inclusive start of the interval.
    pub interval_start: DateTime<Utc>,
    /// Exclusive end of the interval.
    pub interval_end: DateTime<Utc>,
    /// When the day series this interval came from was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl PriceSnapshot {
    /// `true` when `now` lies in `[interval_start, interval_end)`.
    pub fn covers(&self, now: DateTime<Utc>) -> bool {
        self.interval_start <= now && now < self.interval_end
    }
}

/// Production status reported by the inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolarStatus {
    /// PV array is producing.
    Producing,
    /// Inverter reachable but not producing.
    Idle,
    /// No successful poll has completed yet.
    #[default]
    Unknown,
}

/// Last known solar production.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SolarSnapshot {
    /// Current PV production in watts.
    pub watts: f64,
    /// Production status.
    pub status: SolarStatus,
    /// When the reading was fetched; `None` until the first success.
    pub fetched_at: Option<DateTime<Utc>>,
}

impl SolarSnapshot {
    /// Watts, or `None` while nothing has ever been fetched.
    pub fn known_watts(&self) -> Option<f64> {
        match self.status {
            SolarStatus::Unknown => None,
            _ => Some(self.watts),
        }
    }
}

/// Power feed transport status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Whether the subscriber currently holds an acknowledged session.
    pub connected: bool,
    /// Last transport or broker error, cleared on reconnect.
    pub last_error: Option<String>,
}

/// Which optional features were configured at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Power feed subscription configured.
    pub power_enabled: bool,
    /// Solar polling configured; the dashboard hides the section otherwise.
    pub solar_enabled: bool,
    /// Time-series persistence configured.
    pub persistence_enabled: bool,
}
