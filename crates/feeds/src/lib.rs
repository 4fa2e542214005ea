//! Trade feed collection for tracked addresses.
//!
//! ## Architecture
//!
//! - `rest` - `TradeTransport` seam and the HTTP implementation
//! - `client` - `FeedClient`: per-address retries and concurrent fan-out
//! - `error` - `FeedError`

pub mod client;
pub mod error;
pub mod rest;

pub use client::{AddressFetch, FeedClient, FeedClientConfig};
pub use error::*;
pub use rest::*;
