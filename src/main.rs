/*!
 * Prospect CLI - Command Line Interface
 */

use clap::{Parser, Subcommand, ValueEnum};
use prospect::{
    cli_progress::ScanProgressRenderer,
    config::{LogLevel, ScannerConfig},
    error::{Result, EXIT_PARTIAL, EXIT_SUCCESS},
    fixture::{self, Fixture, JsonLinesStore, MemoryStore, ThresholdAnalyzer},
    logging,
    scan::{ScanRequest, ScanSummary, Scanner, Store},
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "prospect")]
#[command(
    version,
    about = "Concurrent candidate scanner with rate limiting, retries and a circuit breaker",
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write logs to a file as JSON instead of stderr
    #[arg(long = "log", value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan against a JSON fixture
    Scan {
        /// Fixture describing sources and item data
        #[arg(short = 'f', long = "fixture", value_name = "FILE")]
        fixture: PathBuf,

        /// Persist accepted results to a JSON-lines file
        #[arg(short = 's', long = "store", value_name = "FILE")]
        store: Option<PathBuf>,

        /// Concurrent analysis workers
        #[arg(long = "analysis-concurrency", value_name = "N")]
        analysis_concurrency: Option<usize>,

        /// Concurrent discovery workers
        #[arg(long = "discovery-concurrency", value_name = "N")]
        discovery_concurrency: Option<usize>,

        /// Candidates taken from each source
        #[arg(long = "max-items", value_name = "N")]
        max_items: Option<usize>,

        /// Numeric payload field an item must reach to be accepted
        #[arg(long = "accept-field", value_name = "FIELD", requires = "min_value")]
        accept_field: Option<String>,

        /// Minimum value of --accept-field
        #[arg(long = "min-value", value_name = "X", requires = "accept_field")]
        min_value: Option<f64>,

        /// Print log lines only, without a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => ScannerConfig::from_file(path)?,
        None => ScannerConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose |= cli.verbose;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(EXIT_SUCCESS)
        }
        Commands::Scan {
            fixture,
            store,
            analysis_concurrency,
            discovery_concurrency,
            max_items,
            accept_field,
            min_value,
            no_progress,
        } => {
            if let Err(e) = logging::init_logging(&config) {
                eprintln!("Warning: Failed to initialize logging: {}", e);
            }

            let fixture = Arc::new(Fixture::from_file(&fixture)?);
            let analyzer = match (accept_field, min_value) {
                (Some(field), Some(min)) => ThresholdAnalyzer::new(field, min),
                _ => ThresholdAnalyzer::accept_all(),
            };
            let store: Arc<dyn Store> = match store {
                Some(path) => Arc::new(JsonLinesStore::open(path)?),
                None => Arc::new(MemoryStore::default()),
            };

            let mut request = ScanRequest::from_config(fixture.source_descriptors(), &config);
            if let Some(n) = analysis_concurrency {
                request.analysis_concurrency = n;
            }
            if let Some(n) = discovery_concurrency {
                request.discovery_concurrency = n;
            }
            if let Some(n) = max_items {
                request.max_items_per_source = n;
            }

            let scanner = Scanner::new(config, fixture::collaborators(fixture, analyzer, store));

            let runtime = tokio::runtime::Runtime::new()?;
            let summary = runtime.block_on(run_scan(&scanner, request, !no_progress))?;
            print_summary(&summary);

            Ok(if summary.is_clean() {
                EXIT_SUCCESS
            } else {
                EXIT_PARTIAL
            })
        }
    }
}

async fn run_scan(
    scanner: &Scanner,
    request: ScanRequest,
    show_progress: bool,
) -> Result<ScanSummary> {
    let handle = scanner.start_scan(request)?;

    let ctrl_c = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, letting in-flight items finish...");
                handle.cancel();
            }
        })
    };

    ScanProgressRenderer::new(handle.clone(), show_progress).run().await;
    let summary = handle.wait().await;
    ctrl_c.abort();
    summary
}

fn print_summary(summary: &ScanSummary) {
    println!();
    println!("Scan {}", summary.scan_id);
    println!(
        "  Started:     {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  Sources:     {} ({} failed)",
        summary.sources_total, summary.sources_failed
    );
    println!(
        "  Candidates:  {} ({} duplicates dropped)",
        summary.total_candidates, summary.duplicates_dropped
    );
    println!(
        "  Completed:   {} ({} accepted, {} rejected, {} failed)",
        summary.completed, summary.accepted, summary.rejected, summary.failed
    );
    if summary.skipped > 0 {
        println!("  Skipped:     {}", summary.skipped);
    }
    println!("  Retries:     {}", summary.retries);
    println!(
        "  Elapsed:     {:.2}s ({:.2} items/s)",
        summary.elapsed_secs, summary.throughput
    );
    if summary.cancelled {
        println!("  Status:      cancelled");
    }
}

