//! Proxy Aggregator - Subscription Link Aggregator
//!
//! Collects proxy links from many subscription sources, deduplicates them and
//! partitions the result into chunked subscription files and per-protocol
//! files, optionally split by measured latency.

pub mod error;
pub mod proxy;

pub use error::{Error, Result};
pub use proxy::*;
