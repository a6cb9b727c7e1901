//! # Feed Adapters
//!
//! HTTP implementations of the pull feeds the core consumes through the
//! `PriceFeed` and `SolarFeed` ports.
//!
//! ## Contained Modules:
//! - **`spotprice`**: day-ahead Nordic spot prices from elprisetjustnu.se.
//! - **`solaredge`**: current PV production from the SolarEdge monitoring API.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// SolarEdge monitoring API client.
pub mod solaredge;
/// elprisetjustnu.se day-ahead price client.
pub mod spotprice;

pub use solaredge::SolarEdgeClient;
pub use spotprice::ElprisetClient;
