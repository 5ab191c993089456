//! Proxy link aggregation pipeline
//!
//! This module provides functionality for:
//! - Fetching subscription sources concurrently (plain text or base64-wrapped)
//! - Normalizing and deduplicating links across every source in a run
//! - Decoding vmess, vless, trojan and shadowsocks links into endpoints
//! - Optionally probing endpoints for TCP reachability and latency
//! - Writing size-bounded chunk files and protocol/speed partitions

pub mod codec;
pub mod decoder;
pub mod fetcher;
pub mod models;
pub mod normalizer;
pub mod partition;
pub mod pipeline;
pub mod prober;
pub mod scanner;

pub use decoder::{Endpoint, LinkDecoder, NO_REMARK};
pub use fetcher::{FetchError, FetchResult, Fetcher, FetcherConfig};
pub use models::{
    Protocol, ProtocolCount, ProtocolRecord, RawEntry, RunSummary, SourceDescriptor, SourceEncoding,
};
pub use normalizer::Deduplicator;
pub use partition::{
    ChunkWriter, OutputLayout, Partition, PartitionConfig, ProtocolPartitioner, ProtocolWriteMode,
    ProtocolWriter, SpeedTiers,
};
pub use pipeline::{Aggregator, ScanInput};
pub use prober::{Prober, ProberConfig};
pub use scanner::{LinkScanner, DEFAULT_SCAN_URL};
