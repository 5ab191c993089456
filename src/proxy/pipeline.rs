//! End-to-end aggregation run
//!
//! Sources are fetched in parallel and the run waits for every fetch before
//! anything else happens. The merged payloads are then deduplicated once and
//! fed to two independent outputs: size-bounded chunk files over the raw
//! entries, and protocol/speed partitions over decoded records.

use crate::proxy::decoder::LinkDecoder;
use crate::proxy::fetcher::Fetcher;
use crate::proxy::models::{ProtocolRecord, RawEntry, RunSummary, SourceDescriptor};
use crate::proxy::normalizer::Deduplicator;
use crate::proxy::partition::{
    ChunkWriter, OutputLayout, PartitionConfig, ProtocolPartitioner, ProtocolWriter,
};
use crate::proxy::prober::Prober;
use crate::proxy::scanner::LinkScanner;
use crate::{Error, Result};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Where scan mode reads links from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanInput {
    /// `sub*.txt` files in a local directory
    Local(PathBuf),
    /// Local files, or the remote document when the directory holds none
    LocalOrRemote { dir: PathBuf, remote: SourceDescriptor },
    /// A remote all-entries document only
    Remote(SourceDescriptor),
}

/// Drives a single aggregation run
pub struct Aggregator {
    fetcher: Fetcher,
    prober: Prober,
    partition: PartitionConfig,
    layout: OutputLayout,
    write_chunks: bool,
    write_protocols: bool,
}

impl Aggregator {
    /// Create an aggregator writing both chunk and protocol outputs
    pub fn new(fetcher: Fetcher, prober: Prober, partition: PartitionConfig, layout: OutputLayout) -> Self {
        Self {
            fetcher,
            prober,
            partition,
            layout,
            write_chunks: true,
            write_protocols: true,
        }
    }

    pub fn with_chunks(mut self, enabled: bool) -> Self {
        self.write_chunks = enabled;
        self
    }

    pub fn with_protocols(mut self, enabled: bool) -> Self {
        self.write_protocols = enabled;
        self
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Fetch, deduplicate and write every enabled output
    pub async fn run(&self, sources: &[SourceDescriptor]) -> Result<RunSummary> {
        self.layout.prepare()?;

        let mut summary = RunSummary {
            sources_total: sources.len(),
            ..RunSummary::default()
        };

        let results = self.fetcher.fetch_all(sources).await;
        summary.sources_fetched = results.iter().filter(|r| r.is_success()).count();
        info!(
            fetched = summary.sources_fetched,
            total = summary.sources_total,
            "all fetches finished"
        );

        let mut dedup = Deduplicator::new();
        let entries = dedup.normalize_all(results.iter().map(|r| r.body.as_str()));
        summary.unique_entries = entries.len();
        summary.duplicates_removed = dedup.duplicates();
        summary.discarded_lines = dedup.discarded();
        info!(
            unique = summary.unique_entries,
            duplicates = summary.duplicates_removed,
            discarded = summary.discarded_lines,
            "normalized entries"
        );

        if self.write_chunks {
            summary.chunks_written = ChunkWriter::new(&self.layout, &self.partition).write(&entries)?;
        }

        if self.write_protocols {
            self.categorize(entries, &mut summary).await?;
        }

        Ok(summary)
    }

    /// Build protocol partitions from links that were already aggregated
    ///
    /// Scanned links are deduplicated before decoding, the same as fetched
    /// ones.
    pub async fn run_scan(&self, input: &ScanInput) -> Result<RunSummary> {
        self.layout.prepare()?;

        let scanned = match input {
            ScanInput::Local(dir) => LinkScanner::scan_dir(dir)?,
            ScanInput::LocalOrRemote { dir, remote } => {
                let files = LinkScanner::subscription_files(dir).unwrap_or_else(|e| {
                    warn!(error = %e, "local scan unavailable");
                    Vec::new()
                });
                if files.is_empty() {
                    info!(dir = %dir.display(), url = %remote.url, "no local subscription files, scanning remote");
                    self.scan_remote(remote).await?
                } else {
                    info!(dir = %dir.display(), files = files.len(), "scanning subscription files");
                    LinkScanner::scan_files(&files)
                }
            }
            ScanInput::Remote(remote) => self.scan_remote(remote).await?,
        };

        let mut dedup = Deduplicator::new();
        let entries: Vec<RawEntry> = scanned.iter().filter_map(|e| dedup.admit(&e.link)).collect();

        let mut summary = RunSummary {
            unique_entries: entries.len(),
            duplicates_removed: dedup.duplicates(),
            ..RunSummary::default()
        };
        info!(
            links = scanned.len(),
            unique = summary.unique_entries,
            "scanned links"
        );

        self.categorize(entries, &mut summary).await?;
        Ok(summary)
    }

    async fn scan_remote(&self, source: &SourceDescriptor) -> Result<Vec<RawEntry>> {
        let body = self.fetcher.fetch(source).await.map_err(|e| Error::Remote {
            url: source.url.clone(),
            source: e,
        })?;
        debug!(url = %source.url, bytes = body.len(), "fetched scan input");
        Ok(LinkScanner::extract(&body))
    }

    /// Decode, optionally probe, and write protocol partitions
    pub async fn categorize(&self, entries: Vec<RawEntry>, summary: &mut RunSummary) -> Result<()> {
        let total = entries.len();
        let records: Vec<ProtocolRecord> = entries.iter().filter_map(LinkDecoder::decode).collect();
        summary.decoded_records = records.len();

        let (usable, unusable): (Vec<_>, Vec<_>) =
            records.into_iter().partition(ProtocolRecord::is_usable);
        debug!(
            undecodable = total - summary.decoded_records,
            unusable = unusable.len(),
            "dropped records before probing"
        );

        let candidates = usable.len();
        let reachable = self.prober.probe_records(usable).await;
        let unreachable = candidates - reachable.len();

        let mut partitioner = ProtocolPartitioner::new();
        partitioner.extend(reachable);

        summary.rejected_records = (total - summary.decoded_records) + unusable.len() + unreachable;
        summary.per_protocol = ProtocolWriter::new(&self.layout, &self.partition).write(partitioner)?;

        info!(
            records = summary.partitioned_records(),
            rejected = summary.rejected_records,
            "wrote protocol partitions"
        );
        Ok(())
    }
}
