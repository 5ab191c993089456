//! Reachability prober module for timing TCP connects to decoded endpoints

use crate::proxy::models::ProtocolRecord;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Default timeout for a single connect attempt in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Default number of concurrent probes
const DEFAULT_CONCURRENCY: usize = 32;

/// Default latency ceiling; slower endpoints are dropped
const DEFAULT_CEILING_MS: u64 = 800;

/// Configuration for the reachability prober
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Whether probing runs at all
    pub enabled: bool,
    /// Timeout for each connect attempt
    pub timeout: Duration,
    /// Number of concurrent probes
    pub concurrency: usize,
    /// Records slower than this are discarded
    pub ceiling: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            ceiling: Duration::from_millis(DEFAULT_CEILING_MS),
        }
    }
}

impl ProberConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }
}

/// Prober for measuring connect latency
#[derive(Debug, Clone, Default)]
pub struct Prober {
    config: ProberConfig,
}

impl Prober {
    /// Create a new prober with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new prober with custom configuration
    pub fn with_config(config: ProberConfig) -> Self {
        Self { config }
    }

    /// Time a single TCP connect, returning `None` if it fails or times out
    pub async fn probe(host: &str, port: u16, timeout: Duration) -> Option<u64> {
        let start = Instant::now();
        let connect = if host.contains(':') {
            tokio::time::timeout(timeout, TcpStream::connect(format!("[{}]:{}", host, port))).await
        } else {
            tokio::time::timeout(timeout, TcpStream::connect((host, port))).await
        };

        match connect {
            Ok(Ok(stream)) => {
                let elapsed = start.elapsed().as_millis() as u64;
                drop(stream);
                Some(elapsed)
            }
            Ok(Err(e)) => {
                debug!(host, port, error = %e, "probe failed");
                None
            }
            Err(_) => {
                debug!(host, port, "probe timed out");
                None
            }
        }
    }

    /// Whether a measured latency is acceptable; the ceiling itself is kept
    pub fn within_ceiling(&self, latency_ms: u64) -> bool {
        latency_ms <= self.config.ceiling.as_millis() as u64
    }

    /// Probe one record, keeping it only if it answers within the ceiling
    pub async fn probe_record(&self, record: ProtocolRecord) -> Option<ProtocolRecord> {
        let latency = Self::probe(&record.host, record.port, self.config.timeout).await?;
        if !self.within_ceiling(latency) {
            debug!(address = %record.address(), latency, "probe too slow");
            return None;
        }
        Some(record.with_latency(latency))
    }

    /// Probe records concurrently, preserving input order among survivors
    ///
    /// Returns the input untouched when probing is disabled.
    pub async fn probe_records(&self, records: Vec<ProtocolRecord>) -> Vec<ProtocolRecord> {
        if !self.config.enabled || records.is_empty() {
            return records;
        }

        let total = records.len();
        info!(
            records = total,
            concurrency = self.config.concurrency,
            "probing endpoints"
        );

        let reachable = bounded_filter_map(records, self.config.concurrency, |record| {
            let prober = self.clone();
            async move { prober.probe_record(record).await }
        })
        .await;

        info!(
            reachable = reachable.len(),
            dropped = total - reachable.len(),
            "probing finished"
        );
        reachable
    }
}

/// Run `f` over `items` with at most `concurrency` futures in flight,
/// keeping the input order of the `Some` results
async fn bounded_filter_map<T, R, F, Fut>(items: Vec<T>, concurrency: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Option<R>>,
{
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    stream::iter(items)
        .map(|item| {
            let sem = Arc::clone(&semaphore);
            let fut = f(item);
            async move {
                let _permit = sem.acquire_owned().await.ok()?;
                fut.await
            }
        })
        .buffered(concurrency)
        .filter_map(|result| async move { result })
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::Protocol;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn record(host: &str, port: u16) -> ProtocolRecord {
        ProtocolRecord::new(
            Protocol::Trojan,
            format!("trojan://p@{}:{}", host, port),
            host.to_string(),
            port,
            "test".to_string(),
        )
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[test]
    fn test_prober_config_default() {
        let config = ProberConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.ceiling, Duration::from_millis(DEFAULT_CEILING_MS));
    }

    #[test]
    fn test_prober_config_builder() {
        let config = ProberConfig::new()
            .with_enabled(true)
            .with_timeout(Duration::from_millis(500))
            .with_concurrency(4)
            .with_ceiling(Duration::from_millis(100));

        assert!(config.enabled);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.ceiling, Duration::from_millis(100));
    }

    #[test]
    fn test_within_ceiling() {
        let prober = Prober::new();
        assert!(prober.within_ceiling(150));
        assert!(prober.within_ceiling(800));
        assert!(!prober.within_ceiling(801));
        assert!(!prober.within_ceiling(900));
    }

    #[tokio::test]
    async fn test_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let latency = Prober::probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(latency.is_some());
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let port = closed_port().await;
        let latency = Prober::probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(latency.is_none());
    }

    #[tokio::test]
    async fn test_probe_records_disabled_is_passthrough() {
        let prober = Prober::new();
        let records = vec![record("127.0.0.1", 1), record("127.0.0.1", 2)];
        let out = prober.probe_records(records.clone()).await;
        assert_eq!(out, records);
    }

    #[tokio::test]
    async fn test_probe_records_drops_unreachable_and_keeps_order() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_a = first.local_addr().unwrap().port();
        let open_b = second.local_addr().unwrap().port();
        let closed = closed_port().await;

        let config = ProberConfig::new()
            .with_enabled(true)
            .with_timeout(Duration::from_secs(2))
            .with_ceiling(Duration::from_secs(2));
        let prober = Prober::with_config(config);

        let out = prober
            .probe_records(vec![
                record("127.0.0.1", open_a),
                record("127.0.0.1", closed),
                record("127.0.0.1", open_b),
            ])
            .await;

        let ports: Vec<u16> = out.iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![open_a, open_b]);
        assert!(out.iter().all(|r| r.latency_ms.is_some()));
    }

    #[tokio::test]
    async fn test_bounded_filter_map_caps_in_flight() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = bounded_filter_map((0..12).collect::<Vec<u32>>(), 3, |n| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                (n % 2 == 0).then_some(n)
            }
        })
        .await;

        assert_eq!(out, vec![0, 2, 4, 6, 8, 10]);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_bounded_filter_map_single_slot_runs_serially() {
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let out = bounded_filter_map(vec![1u32, 2, 3], 0, |n| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Some(n)
            }
        })
        .await;

        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
