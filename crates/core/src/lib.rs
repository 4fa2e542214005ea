//! Core data types for the whale watcher.

pub mod filter;
pub mod trade;

pub use filter::*;
pub use trade::*;
