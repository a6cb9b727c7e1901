//! Typed settings for the optional features.
//!
//! Each optional feature is resolved from raw, possibly-absent values. An
//! absent required value is a [`ConfigError::Missing`]: the caller logs it and
//! runs without the feature. A value that is present but unusable is
//! [`ConfigError::Invalid`].

use std::time::Duration;

use thiserror::Error;

use crate::core::daylight::{Location, QuotaSettings};

/// Why an optional feature could not be configured.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A required value was not provided.
    #[error("{feature} disabled: {missing} is not set")]
    Missing {
        /// Feature that stays off.
        feature: &'static str,
        /// The missing variable.
        missing: &'static str,
    },

    /// A value was provided but cannot be used.
    #[error("invalid {key}: {reason}")]
    Invalid {
        /// Offending variable.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Treats blank strings as absent.
fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn require(value: Option<String>, feature: &'static str, missing: &'static str) -> Result<String, ConfigError> {
    present(value).ok_or(ConfigError::Missing { feature, missing })
}

/// Power feed subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Optional user name.
    pub username: Option<String>,
    /// Optional password, only used together with `username`.
    pub password: Option<String>,
    /// Topic carrying the meter readings.
    pub topic: String,
    /// Client id presented to the broker.
    pub client_id: String,
    /// MQTT keep-alive.
    pub keep_alive: Duration,
}

impl MqttSettings {
    /// Resolves the subscription. Host and topic are required.
    pub fn resolve(
        host: Option<String>,
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
        topic: Option<String>,
        client_id: Option<String>,
    ) -> Result<Self, ConfigError> {
        const FEATURE: &str = "power feed";
        Ok(Self {
            host: require(host, FEATURE, "MQTT_BROKER_HOST")?,
            port: port.unwrap_or(1883),
            username: present(username),
            password: present(password),
            topic: require(topic, FEATURE, "MQTT_TOPIC")?,
            client_id: present(client_id).unwrap_or_else(|| format!("sotehus-{}", std::process::id())),
            keep_alive: Duration::from_secs(30),
        })
    }
}

/// Solar polling.
#[derive(Debug, Clone, PartialEq)]
pub struct SolarSettings {
    /// Monitoring API key.
    pub api_key: String,
    /// Site id.
    pub site_id: String,
    /// API base URL.
    pub base_url: String,
    /// Daily quota budget.
    pub quota: QuotaSettings,
    /// Reference location for the daylight window.
    pub location: Location,
}

impl SolarSettings {
    /// Resolves solar polling. Key and site id are required.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        api_key: Option<String>,
        site_id: Option<String>,
        base_url: Option<String>,
        max_daily_calls: Option<u32>,
        usage_percent: Option<f64>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        default_base_url: &str,
    ) -> Result<Self, ConfigError> {
        const FEATURE: &str = "solar feed";
        let api_key = require(api_key, FEATURE, "SOLAREDGE_API_KEY")?;
        let site_id = require(site_id, FEATURE, "SOLAREDGE_SITE_ID")?;

        let defaults = QuotaSettings::default();
        let usage_percent = usage_percent.unwrap_or(defaults.usage_percent);
        if !(usage_percent > 0.0 && usage_percent <= 1.0) {
            return Err(ConfigError::Invalid {
                key: "SOLAR_USAGE_PERCENT",
                reason: format!("{usage_percent} is outside (0, 1]"),
            });
        }

        let mut location = Location::default();
        location.latitude = latitude.unwrap_or(location.latitude);
        location.longitude = longitude.unwrap_or(location.longitude);

        Ok(Self {
            api_key,
            site_id,
            base_url: present(base_url).unwrap_or_else(|| default_base_url.to_string()),
            quota: QuotaSettings {
                max_daily_calls: max_daily_calls.unwrap_or(defaults.max_daily_calls),
                usage_percent,
            },
            location,
        })
    }
}

/// How the time-series store authenticates.
#[derive(Clone, PartialEq)]
pub enum InfluxAuth {
    /// API token.
    Token(String),
    /// User and password.
    Basic {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },
}

impl std::fmt::Debug for InfluxAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfluxAuth::Token(_) => f.write_str("Token(***)"),
            InfluxAuth::Basic { user, .. } => write!(f, "Basic({user}, ***)"),
        }
    }
}

/// Time-series persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct InfluxSettings {
    /// Base URL, e.g. `http://localhost:8086/`.
    pub url: String,
    /// Organization.
    pub org: String,
    /// Bucket.
    pub bucket: String,
    /// Credentials. A token wins over user/password.
    pub auth: InfluxAuth,
}

impl InfluxSettings {
    /// Resolves persistence. Host and either a token or user+password are required.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        host: Option<String>,
        port: Option<u16>,
        token: Option<String>,
        user: Option<String>,
        password: Option<String>,
        org: Option<String>,
        bucket: Option<String>,
    ) -> Result<Self, ConfigError> {
        const FEATURE: &str = "persistence";
        let host = require(host, FEATURE, "INFLUXDB2_HOST")?;
        let port = port.unwrap_or(8086);

        let auth = match (present(token), present(user), present(password)) {
            (Some(token), _, _) => InfluxAuth::Token(token),
            (None, Some(user), Some(password)) => InfluxAuth::Basic { user, password },
            (None, None, _) => return Err(ConfigError::Missing { feature: FEATURE, missing: "INFLUXDB2_TOKEN" }),
            (None, Some(_), None) => return Err(ConfigError::Missing { feature: FEATURE, missing: "INFLUXDB2_PASSWORD" }),
        };

        let url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}/", host.trim_end_matches('/'), port)
        } else {
            format!("http://{host}:{port}/")
        };

        Ok(Self {
            url,
            org: present(org).unwrap_or_else(|| "sotehus".to_string()),
            bucket: present(bucket).unwrap_or_else(|| "sotehus_bucket".to_string()),
            auth,
        })
    }
}
