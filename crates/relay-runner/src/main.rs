//! # relay-runner
//!
//! Main entry point for the relay lap counter.
//!
//! Rebuilds the registry from the journal, optionally imports a roster or
//! resets the lap counts, then serves the websocket gateways until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! relay --config relay.json --import teams.csv
//! relay --config relay.json --hour 5 --log-level debug
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::Parser;
use relay_core::journal::{self, Journal};
use relay_core::registry::{MemoryRegistry, Registry};
use relay_engine::processor::LapProcessor;
use relay_engine::roster;
use relay_engine::service::RelayService;
use tracing::{error, info, warn};

/// Relay race lap counter.
#[derive(Parser)]
#[command(name = "relay", about = "Relay race lap counter")]
struct Cli {
    /// Configuration file path (JSON). Defaults apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Roster CSV to import before starting. Only allowed on an empty journal.
    #[arg(long)]
    import: Option<PathBuf>,

    /// Hour to start at, for restarts in the middle of the event.
    #[arg(long)]
    hour: Option<u8>,

    /// Seconds until the event starts.
    #[arg(long)]
    start_in: Option<u64>,

    /// Zero every lap count before starting.
    #[arg(long)]
    reset_laps: bool,

    /// Listen address for the gateways, e.g. 0.0.0.0:8080.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration, then apply command-line overrides
    let mut config = match &cli.config {
        Some(path) => relay_core::config::load_config(path)?,
        None => relay_core::config::AppConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = Some(listen);
    }
    if let Some(hour) = cli.hour {
        config.hours.start_hour = Some(hour);
    }
    if let Some(secs) = cli.start_in {
        config.hours.start_in_secs = Some(secs);
    }
    config.validate()?;

    // 2. Initialize logging
    let module_name = config.module_name();
    let log_dir = cli.log_dir.or_else(|| config.log_path());
    relay_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &module_name)?;

    info!("{module_name} starting, log_level={}", cli.log_level);

    // 3. Rebuild state from the journal
    let journal_path = config.effective_journal_path();
    let mut registry = MemoryRegistry::new();
    journal::replay(&journal_path, &mut registry)?;

    let journal = Journal::open(&journal_path, config.effective_flush_threshold())?;
    let processor = LapProcessor::new(registry, journal, config.min_lap_interval());

    // 4. One-off admin operations, journaled like everything else
    let processor = admin_phase(processor, cli.import.as_deref(), cli.reset_laps, &journal_path)?;

    // 5. Serve until Ctrl+C or a fatal processor error
    let service = RelayService::start(&config, processor).await?;
    info!("serving on ws://{}, press Ctrl+C to stop", service.local_addr());

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("cannot listen for Ctrl+C: {e}");
            }
            info!("shutdown signal received");
        }
        _ = service.wait_shutdown() => {
            error!("processor stopped on its own");
        }
    }

    // 6. Ordered shutdown: tasks first, then the final journal flush
    let registry = service.stop().await?;
    info!(
        "stopped with {} team(s) and {} tag(s), goodbye",
        registry.team_count(),
        registry.tag_count()
    );
    Ok(())
}

/// Run the admin operations. On failure the journal is closed before the
/// error is returned, so completed steps are kept.
fn admin_phase(
    mut processor: LapProcessor<MemoryRegistry>,
    import: Option<&Path>,
    reset_laps: bool,
    journal_path: &Path,
) -> Result<LapProcessor<MemoryRegistry>> {
    match run_admin(import, reset_laps, journal_path, &mut processor) {
        Ok(()) => Ok(processor),
        Err(e) => {
            if let Err(close) = processor.close() {
                error!("cannot close journal {}: {close}", journal_path.display());
            }
            Err(e)
        }
    }
}

fn run_admin(
    import: Option<&Path>,
    reset_laps: bool,
    journal_path: &Path,
    processor: &mut LapProcessor<MemoryRegistry>,
) -> Result<()> {
    if let Some(path) = import {
        if processor.registry().team_count() > 0 {
            bail!(
                "refusing to import {}: journal {} already holds {} team(s)",
                path.display(),
                journal_path.display(),
                processor.registry().team_count()
            );
        }
        let entries = roster::load_roster(path)?;
        roster::import_roster(processor, &entries)?;
    }
    if reset_laps {
        warn!("resetting all lap counts");
        processor.reset_laps()?;
    }
    Ok(())
}
