//! # Configuration Modules
//!
//! Typed, validated settings for the optional features. Loading the raw
//! values (CLI, environment, config file) is the binary's job; this module
//! only decides whether a feature is usable.

/// Per-feature settings and `ConfigError`.
pub mod settings;

pub use settings::{ConfigError, InfluxAuth, InfluxSettings, MqttSettings, SolarSettings};
