//! # Data Retrieval Module
//!
//! Generic HTTP plumbing shared by the feed adapters and the time-series
//! sink. Adapters own the parsing and the mapping of status codes onto the
//! domain errors; this layer owns request building, credentials, timeouts and
//! retries.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: `ApiClient` built on `reqwest` and `reqwest-middleware`,
//!   with an optional exponential-backoff retry policy.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;

#[cfg(test)]
pub(crate) mod test_server;

pub use ky_http::{ApiClient, ApiResponse, Credentials, HttpError};
