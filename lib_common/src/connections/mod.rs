//! # Connections Module
//!
//! Outbound connections to storage services.

/// InfluxDB 2 line-protocol sink and Flux reader.
pub mod influx;

pub use influx::{InfluxSink, StoredRecord};
