//! Local subscription scanner
//!
//! Pulls decodable links out of previously written subscription files, or out
//! of a published all-entries document, so the structured pipeline can run
//! without fetching every source again.

use crate::error::Error;
use crate::proxy::models::RawEntry;
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Published all-entries document used when no local files are available
pub const DEFAULT_SCAN_URL: &str =
    "https://raw.githubusercontent.com/Danialsamadi/v2go/main/All_Configs_Sub.txt";

/// Links with a structured decoder, possibly several per line
static LINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:vmess|vless|trojan|ss)://\S+").expect("Invalid link regex")
});

/// Subscription file names picked up from a directory
static SUB_FILE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[sS]ub.*\.txt$").expect("Invalid file name regex"));

/// Scanner for links embedded in local text
pub struct LinkScanner;

impl LinkScanner {
    /// Extract every link occurrence from text, in order
    pub fn extract(content: &str) -> Vec<RawEntry> {
        LINK_REGEX
            .find_iter(content)
            .filter_map(|m| RawEntry::new(m.as_str()))
            .collect()
    }

    /// Subscription files in a directory, sorted by name
    pub fn subscription_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        let read_dir = fs::read_dir(dir).map_err(|source| Error::Read {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = read_dir
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .map(|name| SUB_FILE_REGEX.is_match(&name.to_string_lossy()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Extract links from the given files in order
    ///
    /// Files that cannot be read are skipped with a warning.
    pub fn scan_files(files: &[PathBuf]) -> Vec<RawEntry> {
        let mut entries = Vec::new();
        for path in files {
            match fs::read_to_string(path) {
                Ok(content) => entries.extend(Self::extract(&content)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
            }
        }
        entries
    }

    /// Extract links from every subscription file in a directory
    pub fn scan_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<RawEntry>> {
        let files = Self::subscription_files(&dir)?;
        info!(dir = %dir.as_ref().display(), files = files.len(), "scanning subscription files");
        Ok(Self::scan_files(&files))
    }
}
