//! Partitioning and writing of output artifacts
//!
//! Two policies live here:
//! - size-bounded chunking of raw entries into `Sub<i>.txt` files, each with a
//!   profile header and a base64 companion
//! - grouping decoded records by protocol and splitting each group into
//!   fast and normal speed tiers
//!
//! Writes are sequential. The first I/O failure aborts the step; files
//! written before it are left in place.

use crate::error::Error;
use crate::proxy::codec;
use crate::proxy::models::{Protocol, ProtocolCount, ProtocolRecord, RawEntry};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default maximum number of entries per chunk file
const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default latency below which a record is fast
const DEFAULT_FAST_THRESHOLD_MS: u64 = 200;

/// Default profile name used in header titles
const DEFAULT_PROFILE_NAME: &str = "Proxy Aggregator";

/// Default update interval advertised in headers, in hours
const DEFAULT_UPDATE_INTERVAL: u32 = 1;

/// File holding every unique entry
pub const ALL_ENTRIES_FILE: &str = "All_Configs_Sub.txt";

/// Base64 companion of [`ALL_ENTRIES_FILE`]
pub const ALL_ENTRIES_BASE64_FILE: &str = "All_Configs_base64_Sub.txt";

/// Matches chunk artifacts left behind by an earlier run
static CHUNK_FILE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Sub\d+(_base64)?\.txt$").expect("Invalid chunk file regex")
});

/// How protocol files are laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolWriteMode {
    /// One `link # label[ - N ms]` line per record
    #[default]
    Lines,
    /// vmess stays line-oriented; every other protocol file is one base64 blob
    EncodedBlob,
}

/// Configuration for partitioning and writing
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Maximum entries per chunk file
    pub chunk_size: usize,
    /// Records strictly below this latency are fast
    pub fast_threshold: Duration,
    /// Name embedded in header titles
    pub profile_name: String,
    /// Update interval advertised in headers
    pub update_interval: u32,
    /// Layout of protocol files
    pub write_mode: ProtocolWriteMode,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fast_threshold: Duration::from_millis(DEFAULT_FAST_THRESHOLD_MS),
            profile_name: DEFAULT_PROFILE_NAME.to_string(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            write_mode: ProtocolWriteMode::default(),
        }
    }
}

impl PartitionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_fast_threshold(mut self, threshold: Duration) -> Self {
        self.fast_threshold = threshold;
        self
    }

    pub fn with_profile_name(mut self, name: String) -> Self {
        self.profile_name = name;
        self
    }

    pub fn with_update_interval(mut self, hours: u32) -> Self {
        self.update_interval = hours;
        self
    }

    pub fn with_write_mode(mut self, mode: ProtocolWriteMode) -> Self {
        self.write_mode = mode;
        self
    }
}

/// Output roots supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    /// All-entries file and plain chunk files
    pub chunk_dir: PathBuf,
    /// Base64 companions of chunk files
    pub base64_dir: PathBuf,
    /// Protocol-partitioned files
    pub protocol_dir: PathBuf,
}

impl OutputLayout {
    /// Layout with chunk companions in `<chunk_dir>/Base64`
    pub fn new(chunk_dir: impl Into<PathBuf>, protocol_dir: impl Into<PathBuf>) -> Self {
        let chunk_dir = chunk_dir.into();
        Self {
            base64_dir: chunk_dir.join("Base64"),
            chunk_dir,
            protocol_dir: protocol_dir.into(),
        }
    }

    pub fn with_base64_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base64_dir = dir.into();
        self
    }

    /// Create every output root, failing before any work is done
    pub fn prepare(&self) -> Result<()> {
        for dir in [&self.chunk_dir, &self.base64_dir, &self.protocol_dir] {
            fs::create_dir_all(dir).map_err(|source| Error::Config {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Header prepended to subscription files
pub fn profile_header(title: &str, update_interval: u32) -> String {
    format!(
        "#profile-title: base64:{}\n#profile-update-interval: {}\n#support-url: \n#profile-web-page-url: \n",
        codec::encode(title),
        update_interval
    )
}

/// Ordered entries bound for one output artifact
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Partition {
    pub header: Option<String>,
    pub lines: Vec<String>,
}

impl Partition {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            header: None,
            lines,
        }
    }

    pub fn with_header(mut self, header: String) -> Self {
        self.header = Some(header);
        self
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Plain text: header followed by newline-terminated lines
    pub fn render(&self) -> String {
        let mut out = self.header.clone().unwrap_or_default();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Base64 of the exact plain text
    pub fn render_base64(&self) -> String {
        codec::encode(self.render())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| Error::write(path, e))?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote artifact");
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::write(path, e)),
    }
}

/// Split entries into newest-first windows of at most `chunk_size`
///
/// The sequence is reversed first so the most recently discovered entries
/// land in the lowest-numbered chunk. Every window but the last is full.
pub fn chunk_entries(entries: &[RawEntry], chunk_size: usize) -> Vec<Vec<&RawEntry>> {
    let reversed: Vec<&RawEntry> = entries.iter().rev().collect();
    reversed
        .chunks(chunk_size.max(1))
        .map(|window| window.to_vec())
        .collect()
}

/// Writer for the all-entries file and its size-bounded chunks
pub struct ChunkWriter<'a> {
    layout: &'a OutputLayout,
    config: &'a PartitionConfig,
}

impl<'a> ChunkWriter<'a> {
    pub fn new(layout: &'a OutputLayout, config: &'a PartitionConfig) -> Self {
        Self { layout, config }
    }

    /// Remove chunk files from an earlier run
    pub fn clean_stale(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in [&self.layout.chunk_dir, &self.layout.base64_dir] {
            let Ok(read_dir) = fs::read_dir(dir) else {
                continue;
            };
            for entry in read_dir.flatten() {
                let name = entry.file_name();
                if CHUNK_FILE_REGEX.is_match(&name.to_string_lossy())
                    && remove_if_exists(&entry.path())?
                {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "removed stale chunk files");
        }
        Ok(removed)
    }

    /// Write every entry, in discovery order, plus its base64 companion
    pub fn write_all_entries(&self, entries: &[RawEntry]) -> Result<()> {
        let partition = Partition::new(entries.iter().map(|e| e.link.clone()).collect())
            .with_header(profile_header(&self.config.profile_name, self.config.update_interval));

        write_file(&self.layout.chunk_dir.join(ALL_ENTRIES_FILE), &partition.render())?;
        write_file(
            &self.layout.chunk_dir.join(ALL_ENTRIES_BASE64_FILE),
            &partition.render_base64(),
        )
    }

    /// Title embedded in the header of chunk `index` (1-based)
    pub fn chunk_title(&self, index: usize) -> String {
        format!("{} | Sub{}", self.config.profile_name, index)
    }

    /// Write `Sub<i>.txt` chunks and their base64 companions
    ///
    /// Returns the number of chunks written.
    pub fn write_chunks(&self, entries: &[RawEntry]) -> Result<usize> {
        let windows = chunk_entries(entries, self.config.chunk_size);

        for (i, window) in windows.iter().enumerate() {
            let index = i + 1;
            let partition = Partition::new(window.iter().map(|e| e.link.clone()).collect())
                .with_header(profile_header(&self.chunk_title(index), self.config.update_interval));

            write_file(
                &self.layout.chunk_dir.join(format!("Sub{}.txt", index)),
                &partition.render(),
            )?;
            write_file(
                &self.layout.base64_dir.join(format!("Sub{}_base64.txt", index)),
                &partition.render_base64(),
            )?;
        }

        info!(
            chunks = windows.len(),
            entries = entries.len(),
            chunk_size = self.config.chunk_size,
            "wrote chunk files"
        );
        Ok(windows.len())
    }

    /// Clean, then write the all-entries file and every chunk
    pub fn write(&self, entries: &[RawEntry]) -> Result<usize> {
        self.clean_stale()?;
        self.write_all_entries(entries)?;
        self.write_chunks(entries)
    }
}

/// Records of one protocol split by speed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeedTiers {
    pub protocol: Protocol,
    pub fast: Vec<ProtocolRecord>,
    pub normal: Vec<ProtocolRecord>,
}

/// Sort records by latency and split them at `fast_threshold`
///
/// The sort is stable, so equal latencies keep their relative order.
/// Unmeasured records are always normal.
pub fn split_tiers(
    mut records: Vec<ProtocolRecord>,
    fast_threshold: Duration,
) -> (Vec<ProtocolRecord>, Vec<ProtocolRecord>) {
    let threshold = fast_threshold.as_millis() as u64;
    records.sort_by_key(|r| r.latency_ms);
    records
        .into_iter()
        .partition(|r| matches!(r.latency_ms, Some(ms) if ms < threshold))
}

/// Groups decoded records by protocol with per-protocol deduplication
///
/// Does not assume any upstream deduplication has run.
#[derive(Debug, Default)]
pub struct ProtocolPartitioner {
    groups: BTreeMap<Protocol, Vec<ProtocolRecord>>,
    seen: BTreeMap<Protocol, HashSet<String>>,
    duplicates: BTreeMap<Protocol, usize>,
    rejected: usize,
}

impl ProtocolPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; returns `false` if it was unusable or a duplicate
    pub fn insert(&mut self, record: ProtocolRecord) -> bool {
        if !record.is_usable() {
            self.rejected += 1;
            return false;
        }

        let seen = self.seen.entry(record.protocol).or_default();
        if !seen.insert(record.link.clone()) {
            *self.duplicates.entry(record.protocol).or_default() += 1;
            return false;
        }

        self.groups.entry(record.protocol).or_default().push(record);
        true
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = ProtocolRecord>) {
        for record in records {
            self.insert(record);
        }
    }

    /// Records dropped for an empty host or zero port
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Number of distinct records held
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, protocol: Protocol) -> &[ProtocolRecord] {
        self.groups.get(&protocol).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn duplicates(&self, protocol: Protocol) -> usize {
        self.duplicates.get(&protocol).copied().unwrap_or(0)
    }

    /// Split every group into speed tiers, in protocol order
    pub fn into_tiers(self, fast_threshold: Duration) -> Vec<SpeedTiers> {
        self.groups
            .into_iter()
            .map(|(protocol, records)| {
                let (fast, normal) = split_tiers(records, fast_threshold);
                SpeedTiers {
                    protocol,
                    fast,
                    normal,
                }
            })
            .collect()
    }
}

/// File name of a protocol tier
pub fn protocol_file_name(protocol: Protocol, fast: bool) -> String {
    if fast {
        format!("fast_{}.txt", protocol.tag())
    } else {
        format!("{}.txt", protocol.tag())
    }
}

/// Writer for protocol-partitioned files
pub struct ProtocolWriter<'a> {
    layout: &'a OutputLayout,
    config: &'a PartitionConfig,
}

impl<'a> ProtocolWriter<'a> {
    pub fn new(layout: &'a OutputLayout, config: &'a PartitionConfig) -> Self {
        Self { layout, config }
    }

    /// Render one tier's file contents according to the write mode
    pub fn render(&self, protocol: Protocol, records: &[ProtocolRecord]) -> String {
        match self.config.write_mode {
            ProtocolWriteMode::Lines => {
                Partition::new(records.iter().map(ProtocolRecord::to_line).collect()).render()
            }
            ProtocolWriteMode::EncodedBlob => {
                let links = Partition::new(records.iter().map(|r| r.link.clone()).collect());
                if protocol == Protocol::Vmess {
                    links.render()
                } else {
                    links.render_base64()
                }
            }
        }
    }

    /// Remove tier files from an earlier run
    pub fn clean_stale(&self) -> Result<()> {
        for protocol in Protocol::ALL {
            for fast in [true, false] {
                remove_if_exists(&self.layout.protocol_dir.join(protocol_file_name(protocol, fast)))?;
            }
        }
        Ok(())
    }

    /// Write every non-empty tier, returning per-protocol counts
    pub fn write(&self, partitioner: ProtocolPartitioner) -> Result<BTreeMap<Protocol, ProtocolCount>> {
        self.clean_stale()?;

        let duplicates: BTreeMap<Protocol, usize> = Protocol::ALL
            .into_iter()
            .map(|p| (p, partitioner.duplicates(p)))
            .collect();

        let mut counts = BTreeMap::new();
        for tiers in partitioner.into_tiers(self.config.fast_threshold) {
            for (fast, records) in [(true, &tiers.fast), (false, &tiers.normal)] {
                if records.is_empty() {
                    continue;
                }
                let path = self
                    .layout
                    .protocol_dir
                    .join(protocol_file_name(tiers.protocol, fast));
                write_file(&path, &self.render(tiers.protocol, records))?;
            }

            info!(
                protocol = %tiers.protocol,
                fast = tiers.fast.len(),
                normal = tiers.normal.len(),
                "wrote protocol files"
            );
            counts.insert(
                tiers.protocol,
                ProtocolCount {
                    fast: tiers.fast.len(),
                    normal: tiers.normal.len(),
                    duplicates: duplicates.get(&tiers.protocol).copied().unwrap_or(0),
                },
            );
        }

        Ok(counts)
    }
}
