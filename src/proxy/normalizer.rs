//! Line normalization and run-wide deduplication

use crate::proxy::models::RawEntry;
use std::collections::HashSet;

/// Splits fetched payloads into unique, protocol-prefixed entries
///
/// The seen-set lives for one run and is owned by whoever drives the
/// pipeline; the first occurrence of a link wins across every payload fed
/// through the same instance.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    duplicates: usize,
    discarded: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one payload, returning only entries not seen before
    pub fn normalize(&mut self, blob: &str) -> Vec<RawEntry> {
        blob.lines()
            .filter_map(|line| self.admit(line))
            .collect()
    }

    /// Normalize several payloads in order
    pub fn normalize_all<'a, I>(&mut self, blobs: I) -> Vec<RawEntry>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut entries = Vec::new();
        for blob in blobs {
            entries.extend(self.normalize(blob));
        }
        entries
    }

    /// Admit a single line if it is a new, recognized link
    pub fn admit(&mut self, line: &str) -> Option<RawEntry> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some(entry) = RawEntry::new(line) else {
            self.discarded += 1;
            return None;
        };

        if self.seen.insert(entry.link.clone()) {
            Some(entry)
        } else {
            self.duplicates += 1;
            None
        }
    }

    /// Number of distinct entries admitted so far
    pub fn unique(&self) -> usize {
        self.seen.len()
    }

    /// Recognized lines dropped because they were already seen
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Non-empty lines dropped for lacking a recognized prefix
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}
