//! # Data Ingestors Module
//!
//! Push-based inputs. Each ingestor owns its transport, parses what arrives
//! and hands typed samples to the core over a channel.
//!
//! ## Contained Modules:
//! - **`power_mqtt`**: the grid power meter subscription.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// MQTT subscriber for the grid power meter.
pub mod power_mqtt;

pub use power_mqtt::{parse_power_payload, PayloadError, PowerSubscriber};
