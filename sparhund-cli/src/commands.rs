use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use sparhund_config::SparhundConfig;
use sparhund_engine::{Engine, FinalReport, JsonLinesSink, LiveSource, PacketSource, PcapFileSource};
use sparhund_telemetry::{EventLogger, MetricsRecorder};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sparhund", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process a pcap file
    Read(ReadArgs),
    /// Capture from a network interface until Ctrl-C
    Live(LiveArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Configuration file; defaults to config/sparhund.yaml plus environment
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Output root for conversations and records
    #[arg(short, long)]
    pub out: Option<PathBuf>,
    /// Number of packet workers
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Do not write conversation files
    #[arg(long)]
    pub no_save_conns: bool,
    /// Verify TCP checksums and drop segments that fail
    #[arg(long)]
    pub checksum: bool,
    /// Print prometheus metrics after the report
    #[arg(long)]
    pub metrics: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Capture file to read
    #[arg(short, long)]
    pub file: PathBuf,
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LiveArgs {
    #[arg(short, long)]
    pub interface: String,
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Loads configuration and applies command line overrides.
fn load_config(args: &CommonArgs) -> anyhow::Result<SparhundConfig> {
    let mut config = match &args.config {
        Some(path) => SparhundConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SparhundConfig::load().context("loading configuration")?,
    };
    if let Some(out) = &args.out {
        config.output.root = out.clone();
    }
    if let Some(workers) = args.workers {
        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        config.capture.workers = workers;
    }
    if args.no_save_conns {
        config.output.save_conns = false;
    }
    if args.checksum {
        config.reassembly.checksum = true;
    }
    Ok(config)
}

async fn execute(
    config: SparhundConfig,
    print_metrics: bool,
    source: Box<dyn PacketSource>,
) -> anyhow::Result<()> {
    let metrics = Arc::new(MetricsRecorder::new().context("registering metrics")?);
    let sink = JsonLinesSink::new(&config.output.root)
        .with_context(|| format!("creating output root {}", config.output.root.display()))?;
    let quiet = config.telemetry.quiet;

    let engine = Arc::new(
        Engine::builder(config)
            .sink(Arc::new(sink))
            .metrics(Arc::clone(&metrics))
            .build()?,
    );
    let report = engine.run(source).await?;
    print_report(&report, quiet);

    if print_metrics {
        println!("{}", metrics.gather_metrics()?);
    }
    if let Some(err) = report.capture_error {
        bail!("capture failed: {}", err);
    }
    Ok(())
}

fn print_report(report: &FinalReport, quiet: bool) {
    if quiet {
        info!(packets = report.packets, records = report.records, "Done");
    } else {
        println!("{}", report);
    }
}

pub async fn read(args: ReadArgs) -> anyhow::Result<()> {
    let config = load_config(&args.common)?;
    EventLogger::init(&config.telemetry.log_level);
    info!(file = %args.file.display(), "Reading capture file");

    let source = PcapFileSource::new(&args.file, config.reassembly.checksum);
    execute(config, args.common.metrics, Box::new(source)).await
}

pub async fn live(args: LiveArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args.common)?;
    EventLogger::init(&config.telemetry.log_level);
    config.capture.interface = args.interface;

    let terminate = Arc::new(AtomicBool::new(false));
    tokio::spawn({
        let terminate = Arc::clone(&terminate);
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, stopping capture");
                    terminate.store(true, Ordering::SeqCst);
                }
                Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
            }
        }
    });

    let source = LiveSource::new(&config.capture, config.reassembly.checksum, terminate);
    execute(config, args.common.metrics, Box::new(source)).await
}
