//! # lib_common
//!
//! Engine of the Sotehus power monitor. Every top-level folder is gated behind
//! a cargo feature of the same name (see `Cargo.toml`); `full` enables them all.

// Declare the modules to re-export
#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "connections")]
pub mod connections;
#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "feeds")]
pub mod feeds;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;

// Re-export the handles every binary needs
#[cfg(feature = "core")]
pub use crate::core::{ObserverRegistry, SharedState};
