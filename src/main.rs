use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use proxy_aggregator::{
    Aggregator, Fetcher, FetcherConfig, OutputLayout, PartitionConfig, Prober, ProberConfig,
    ProtocolWriteMode, RunSummary, ScanInput, SourceDescriptor, DEFAULT_SCAN_URL,
};
use std::path::PathBuf;
use std::time::Duration;

/// Aggregate proxy subscription links and partition them by protocol and speed
#[derive(Parser)]
#[command(name = "proxy-aggregator")]
#[command(about = "Aggregate proxy subscription links and partition them by protocol and speed")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch all sources, write chunked subscriptions and protocol files
    Aggregate {
        /// File listing sources, one per line (`base64 URL`, `text URL` or `URL`)
        #[arg(short = 'f', long)]
        sources_file: Option<PathBuf>,
        /// Also fetch the built-in source list (default when no file is given)
        #[arg(long)]
        builtin_sources: bool,
        /// Number of concurrent fetches
        #[arg(short = 'n', long, default_value = "10")]
        threads: usize,
        /// Timeout in seconds for each source request
        #[arg(long, default_value = "20")]
        timeout: u64,
        /// Maximum number of entries per chunk file
        #[arg(long, default_value = "500")]
        chunk_size: usize,
        /// Name embedded in subscription header titles
        #[arg(long, default_value = "Proxy Aggregator")]
        profile_name: String,
        /// Skip chunked subscription files
        #[arg(long)]
        no_chunks: bool,
        /// Skip protocol-partitioned files
        #[arg(long)]
        no_protocols: bool,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        probe: ProbeArgs,
    },
    /// Build protocol files from local Sub*.txt files or a published all-entries file
    Scan {
        /// Directory holding sub*.txt files
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// Remote all-entries file used when the directory has no sub*.txt files
        #[arg(long, default_value = DEFAULT_SCAN_URL)]
        url: String,
        /// Read the remote file even if local files exist
        #[arg(long, conflicts_with = "offline")]
        remote: bool,
        /// Never fall back to the remote file
        #[arg(long)]
        offline: bool,
        /// Timeout in seconds for the remote request
        #[arg(long, default_value = "20")]
        timeout: u64,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        probe: ProbeArgs,
    },
}

#[derive(Args)]
struct OutputArgs {
    /// Directory for the all-entries file and chunk files
    #[arg(long, default_value = ".")]
    chunk_dir: PathBuf,
    /// Directory for base64 chunk companions (defaults to <chunk-dir>/Base64)
    #[arg(long)]
    base64_dir: Option<PathBuf>,
    /// Directory for protocol-partitioned files
    #[arg(long, default_value = "Splitted-By-Protocol")]
    protocol_dir: PathBuf,
    /// Protocol file layout (lines, blob)
    #[arg(long, default_value = "lines")]
    protocol_mode: String,
}

#[derive(Args)]
struct ProbeArgs {
    /// Measure TCP connect latency and drop slow or unreachable endpoints
    #[arg(long)]
    latency: bool,
    /// Timeout in milliseconds for each probe
    #[arg(long, default_value = "3000")]
    probe_timeout: u64,
    /// Number of concurrent probes
    #[arg(long, default_value = "32")]
    probe_threads: usize,
    /// Latency in milliseconds above which endpoints are dropped
    #[arg(long, default_value = "800")]
    ceiling: u64,
    /// Latency in milliseconds below which endpoints are fast
    #[arg(long, default_value = "200")]
    fast_threshold: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Aggregate {
            sources_file,
            builtin_sources,
            threads,
            timeout,
            chunk_size,
            profile_name,
            no_chunks,
            no_protocols,
            output,
            probe,
        } => {
            let mut sources = Vec::new();
            if let Some(file_path) = &sources_file {
                println!("Reading sources from {:?}...", file_path);
                let content = std::fs::read_to_string(file_path)
                    .with_context(|| format!("reading {:?}", file_path))?;
                sources.extend(content.lines().filter_map(SourceDescriptor::parse_line));
                println!("Loaded {} sources from file", sources.len());
            }
            if builtin_sources || sources_file.is_none() {
                sources.extend(SourceDescriptor::default_sources());
            }

            let fetcher = Fetcher::with_config(
                FetcherConfig::new()
                    .with_concurrency(threads)
                    .with_timeout(Duration::from_secs(timeout)),
            )?;
            let partition = partition_config(&output, &probe)?
                .with_chunk_size(chunk_size)
                .with_profile_name(profile_name);
            let aggregator = Aggregator::new(fetcher, prober(&probe), partition, layout(&output))
                .with_chunks(!no_chunks)
                .with_protocols(!no_protocols);

            println!("Fetching {} sources with {} threads, timeout: {}s", sources.len(), threads, timeout);
            let summary = aggregator
                .run(&sources)
                .await
                .map_err(|e| anyhow!("{} stage failed: {}", e.stage(), e))?;
            print_summary(&summary);
        }
        Commands::Scan {
            dir,
            url,
            remote,
            offline,
            timeout,
            output,
            probe,
        } => {
            let fetcher = Fetcher::with_config(FetcherConfig::new().with_timeout(Duration::from_secs(timeout)))?;
            let partition = partition_config(&output, &probe)?;
            let aggregator = Aggregator::new(fetcher, prober(&probe), partition, layout(&output));

            let source = SourceDescriptor::text(&url);
            let input = if remote {
                println!("Scanning {}...", url);
                ScanInput::Remote(source)
            } else if offline {
                println!("Scanning {:?}...", dir);
                ScanInput::Local(dir)
            } else {
                println!("Scanning {:?} (fallback: {})...", dir, url);
                ScanInput::LocalOrRemote { dir, remote: source }
            };

            let summary = aggregator
                .run_scan(&input)
                .await
                .map_err(|e| anyhow!("{} stage failed: {}", e.stage(), e))?;
            print_summary(&summary);
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("proxy_aggregator=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn layout(output: &OutputArgs) -> OutputLayout {
    let layout = OutputLayout::new(&output.chunk_dir, &output.protocol_dir);
    match &output.base64_dir {
        Some(dir) => layout.with_base64_dir(dir),
        None => layout,
    }
}

fn prober(probe: &ProbeArgs) -> Prober {
    Prober::with_config(
        ProberConfig::new()
            .with_enabled(probe.latency)
            .with_timeout(Duration::from_millis(probe.probe_timeout))
            .with_concurrency(probe.probe_threads)
            .with_ceiling(Duration::from_millis(probe.ceiling)),
    )
}

fn partition_config(output: &OutputArgs, probe: &ProbeArgs) -> Result<PartitionConfig> {
    Ok(PartitionConfig::new()
        .with_write_mode(parse_write_mode(&output.protocol_mode)?)
        .with_fast_threshold(Duration::from_millis(probe.fast_threshold)))
}

fn parse_write_mode(s: &str) -> Result<ProtocolWriteMode> {
    match s.to_lowercase().as_str() {
        "lines" => Ok(ProtocolWriteMode::Lines),
        "blob" => Ok(ProtocolWriteMode::EncodedBlob),
        _ => Err(anyhow!("Invalid protocol mode: {}. Use: lines, blob", s)),
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    if summary.sources_total > 0 {
        println!(
            "Sources: {} fetched, {} failed",
            summary.sources_fetched,
            summary.sources_total - summary.sources_fetched
        );
        println!("Unique entries: {}", summary.unique_entries);
        println!("Duplicates removed: {}", summary.duplicates_removed);
        println!("Chunk files written: {}", summary.chunks_written);
    } else {
        println!("Links found: {}", summary.unique_entries);
        println!("Duplicates removed: {}", summary.duplicates_removed);
    }

    if summary.per_protocol.is_empty() {
        return;
    }

    println!("\nConfiguration counts:");
    for (protocol, count) in &summary.per_protocol {
        print!("  {:<8} {} ({} fast, {} normal)", protocol, count.total(), count.fast, count.normal);
        if count.duplicates > 0 {
            print!(", {} duplicates", count.duplicates);
        }
        println!();
    }
    println!("  Total:   {}", summary.partitioned_records());
    println!("  Rejected: {}", summary.rejected_records);
}
