//! dhcp6-exporterd entry point.
//!
//! Loads the switch connection from a config file and the current leases
//! from a JSON snapshot, starts the exporter, then applies lease events read
//! from stdin (one JSON object per line) until EOF.

use anyhow::Context;
use clap::Parser;
use dhcp6_exporterd::{
    ExporterConfig, ExporterService, LeaseEvent, MemoryLeaseStore, MetricsCollector,
};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Export DHCPv6 leases as static routes on an NX-OS switch
#[derive(Parser, Debug)]
#[command(name = "dhcp6-exporterd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Lease snapshot used for sibling lookups and resync
    #[arg(short = 'l', long)]
    leases: PathBuf,

    /// Print Prometheus metrics to stdout on exit
    #[arg(long)]
    print_metrics: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging()?;

    info!("dhcp6-exporterd: Starting");
    let config = ExporterConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let leases = MemoryLeaseStore::load(&args.leases)
        .with_context(|| format!("loading {}", args.leases.display()))?;
    info!(leases = leases.len(), "dhcp6-exporterd: Lease snapshot loaded");

    let metrics = Arc::new(MetricsCollector::new().context("registering metrics")?);
    let service = ExporterService::new(&config, Arc::new(leases), Some(Arc::clone(&metrics)))?;
    service.start()?;

    let stdin = io::stdin();
    let mut queued = 0usize;
    for (lineno, line) in stdin.lock().lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "dhcp6-exporterd: Failed to read event stream");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match LeaseEvent::from_json_line(&line) {
            Ok(event) => {
                if service.handle_event(&event) {
                    queued += 1;
                }
            }
            Err(e) => warn!(
                line = lineno + 1,
                error = %e,
                "dhcp6-exporterd: Skipping malformed event"
            ),
        }
    }

    info!(queued, "dhcp6-exporterd: Event stream closed, shutting down");
    service.stop();

    if args.print_metrics {
        print!("{}", metrics.gather_text());
    }
    Ok(())
}

fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;
    Ok(())
}
