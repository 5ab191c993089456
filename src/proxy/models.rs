//! Proxy link data models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Protocol enumeration, in prefix-matching priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
    ShadowsocksR,
    Hysteria2,
    Tuic,
    Warp,
}

impl Protocol {
    /// All protocols, in the order prefixes are checked
    pub const ALL: [Protocol; 8] = [
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::Trojan,
        Protocol::Shadowsocks,
        Protocol::ShadowsocksR,
        Protocol::Hysteria2,
        Protocol::Tuic,
        Protocol::Warp,
    ];

    /// Link prefix identifying this protocol
    pub fn prefix(self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess://",
            Protocol::Vless => "vless://",
            Protocol::Trojan => "trojan://",
            Protocol::Shadowsocks => "ss://",
            Protocol::ShadowsocksR => "ssr://",
            Protocol::Hysteria2 => "hy2://",
            Protocol::Tuic => "tuic://",
            Protocol::Warp => "warp://",
        }
    }

    /// Short tag used in file names and summaries
    pub fn tag(self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "ss",
            Protocol::ShadowsocksR => "ssr",
            Protocol::Hysteria2 => "hy2",
            Protocol::Tuic => "tuic",
            Protocol::Warp => "warp",
        }
    }

    /// Match a link against the prefix table; the first match wins
    pub fn detect(link: &str) -> Option<Protocol> {
        Self::ALL
            .into_iter()
            .find(|protocol| link.starts_with(protocol.prefix()))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.tag())
    }
}

/// How a source wraps its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SourceEncoding {
    #[default]
    RawText,
    Base64,
}

impl fmt::Display for SourceEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceEncoding::RawText => write!(f, "text"),
            SourceEncoding::Base64 => write!(f, "base64"),
        }
    }
}

/// Remote endpoint publishing proxy links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub url: String,
    pub encoding: SourceEncoding,
}

impl SourceDescriptor {
    pub fn new(url: &str, encoding: SourceEncoding) -> Self {
        Self {
            url: url.to_string(),
            encoding,
        }
    }

    pub fn text(url: &str) -> Self {
        Self::new(url, SourceEncoding::RawText)
    }

    pub fn base64(url: &str) -> Self {
        Self::new(url, SourceEncoding::Base64)
    }

    /// Parse one line of a sources file
    ///
    /// Supports formats:
    /// - `base64 URL`
    /// - `text URL`
    /// - `URL` (raw text)
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut parts = line.split_whitespace();
        let first = parts.next()?;
        let descriptor = match (first, parts.next()) {
            ("base64", Some(url)) => Self::base64(url),
            ("text", Some(url)) => Self::text(url),
            (url, None) => Self::text(url),
            _ => return None,
        };

        if parts.next().is_some() || !descriptor.url.starts_with("http") {
            return None;
        }
        Some(descriptor)
    }

    /// Built-in list of public subscription sources
    pub fn default_sources() -> Vec<SourceDescriptor> {
        const BASE64_SOURCES: &[&str] = &[
            "https://raw.githubusercontent.com/ALIILAPRO/v2rayNG-Config/main/sub.txt",
            "https://raw.githubusercontent.com/mfuu/v2ray/master/v2ray",
            "https://raw.githubusercontent.com/ts-sf/fly/main/v2",
            "https://raw.githubusercontent.com/aiboboxx/v2rayfree/main/v2",
            "https://raw.githubusercontent.com/mahsanet/MahsaFreeConfig/refs/heads/main/mci/sub_1.txt",
            "https://raw.githubusercontent.com/mahsanet/MahsaFreeConfig/refs/heads/main/mci/sub_2.txt",
            "https://raw.githubusercontent.com/mahsanet/MahsaFreeConfig/refs/heads/main/mci/sub_3.txt",
            "https://raw.githubusercontent.com/mahsanet/MahsaFreeConfig/refs/heads/main/app/sub.txt",
            "https://raw.githubusercontent.com/mahsanet/MahsaFreeConfig/refs/heads/main/mtn/sub_1.txt",
            "https://raw.githubusercontent.com/mahsanet/MahsaFreeConfig/refs/heads/main/mtn/sub_2.txt",
            "https://raw.githubusercontent.com/mahsanet/MahsaFreeConfig/refs/heads/main/mtn/sub_3.txt",
            "https://raw.githubusercontent.com/mahsanet/MahsaFreeConfig/refs/heads/main/mtn/sub_4.txt",
            "https://raw.githubusercontent.com/yebekhe/vpn-fail/refs/heads/main/sub-link",
            "https://v2.alicivil.workers.dev",
            "https://raw.githubusercontent.com/Surfboardv2ray/TGParse/main/splitted/mixed",
        ];
        const TEXT_SOURCES: &[&str] = &[
            "https://raw.githubusercontent.com/itsyebekhe/PSG/main/lite/subscriptions/xray/normal/mix",
            "https://raw.githubusercontent.com/HosseinKoofi/GO_V2rayCollector/main/mixed_iran.txt",
            "https://raw.githubusercontent.com/arshiacomplus/v2rayExtractor/refs/heads/main/mix/sub.html",
            "https://raw.githubusercontent.com/IranianCypherpunks/sub/main/config",
            "https://raw.githubusercontent.com/Rayan-Config/C-Sub/refs/heads/main/configs/proxy.txt",
            "https://raw.githubusercontent.com/sashalsk/V2Ray/main/V2Config",
            "https://raw.githubusercontent.com/mahdibland/ShadowsocksAggregator/master/Eternity.txt",
            "https://raw.githubusercontent.com/itsyebekhe/HiN-VPN/main/subscription/normal/mix",
            "https://raw.githubusercontent.com/sarinaesmailzadeh/V2Hub/main/merged",
            "https://raw.githubusercontent.com/freev2rayconfig/V2RAY_SUBSCRIPTION_LINK/main/v2rayconfigs.txt",
            "https://raw.githubusercontent.com/Everyday-VPN/Everyday-VPN/main/subscription/main.txt",
            "https://raw.githubusercontent.com/C4ssif3r/V2ray-sub/main/all.txt",
            "https://raw.githubusercontent.com/MahsaNetConfigTopic/config/refs/heads/main/xray_final.txt",
            "https://github.com/Epodonios/v2ray-configs/raw/main/All_Configs_Sub.txt",
        ];

        BASE64_SOURCES
            .iter()
            .map(|url| Self::base64(url))
            .chain(TEXT_SOURCES.iter().map(|url| Self::text(url)))
            .collect()
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.encoding)
    }
}

/// A single trimmed, protocol-prefixed link that survived deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawEntry {
    pub link: String,
    pub protocol: Protocol,
}

impl RawEntry {
    /// Build an entry from a link, if it carries a recognized prefix
    pub fn new(link: &str) -> Option<Self> {
        let link = link.trim();
        Protocol::detect(link).map(|protocol| Self {
            link: link.to_string(),
            protocol,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.link
    }
}

impl fmt::Display for RawEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.link)
    }
}

/// A link decoded into its endpoint and label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRecord {
    pub protocol: Protocol,
    pub link: String,
    pub host: String,
    pub port: u16,
    pub label: String,
    pub latency_ms: Option<u64>,
}

impl ProtocolRecord {
    pub fn new(protocol: Protocol, link: String, host: String, port: u16, label: String) -> Self {
        Self {
            protocol,
            link,
            host,
            port,
            label,
            latency_ms: None,
        }
    }

    /// Annotate with a measured connection latency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Whether the record points at a dialable endpoint
    pub fn is_usable(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }

    /// Endpoint in `host:port` form, bracketing IPv6 literals
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Line written to line-oriented protocol files
    pub fn to_line(&self) -> String {
        match self.latency_ms {
            Some(ms) => format!("{} # {} - {} ms", self.link, self.label, ms),
            None => format!("{} # {}", self.link, self.label),
        }
    }
}

impl fmt::Display for ProtocolRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.protocol, self.address(), self.label)
    }
}

/// Counts for one protocol partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolCount {
    pub fast: usize,
    pub normal: usize,
    pub duplicates: usize,
}

impl ProtocolCount {
    pub fn total(&self) -> usize {
        self.fast + self.normal
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub sources_total: usize,
    pub sources_fetched: usize,
    pub unique_entries: usize,
    pub duplicates_removed: usize,
    pub discarded_lines: usize,
    pub chunks_written: usize,
    pub decoded_records: usize,
    pub rejected_records: usize,
    pub per_protocol: BTreeMap<Protocol, ProtocolCount>,
}

impl RunSummary {
    /// Total records written across all protocol partitions
    pub fn partitioned_records(&self) -> usize {
        self.per_protocol.values().map(ProtocolCount::total).sum()
    }
}
