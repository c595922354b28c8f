//! Firmcast Update Agent (firmcast-agent) - Main entry point
//!
//! Drives the scan/download state machine against a transport-stream
//! capture file, landing downloaded modules in an output directory and
//! persisting a diagnostics snapshot on exit.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use firmcast_agent::manifest::ComponentManifest;
use firmcast_agent::platform::{DirectorySink, TsFileSource};
use firmcast_agent::section::AbortFlag;
use firmcast_agent::state::{self, AgentState, NextStep};
use firmcast_agent::{discovery, download, ScanSession};
use firmcast_common::AgentConfig;

/// Command-line arguments for firmcast-agent
#[derive(Parser, Debug)]
#[command(name = "firmcast-agent")]
#[command(about = "Broadcast firmware update agent for Firmcast")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "FIRMCAST_CONFIG")]
    config: Option<String>,

    /// Transport-stream capture file to scan
    #[arg(short = 't', long, env = "FIRMCAST_CAPTURE")]
    capture: PathBuf,

    /// Component manifest (JSON) describing what is installed
    #[arg(short, long, env = "FIRMCAST_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Directory downloaded modules are landed under
    #[arg(short, long, default_value = "firmcast-out", env = "FIRMCAST_OUTPUT")]
    output: PathBuf,

    /// Exit after the first completed download or empty scan
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "firmcast_agent=debug,firmcast_common=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = AgentConfig::load(args.config.as_deref(), "FIRMCAST_CONFIG")
        .context("Failed to load configuration")?;
    if config.scan.frequencies.is_empty() {
        warn!("no frequencies configured, scans will find nothing");
    }

    let manifest = match &args.manifest {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read manifest {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse manifest {}", path.display()))?
        }
        None => ComponentManifest::default(),
    };

    info!(
        oui = config.device.oui,
        model_group = config.device.model_group,
        hardware_model = config.device.hardware_model,
        software_version = config.device.software_version,
        "Starting Firmcast update agent"
    );
    info!("Capture: {}", args.capture.display());
    info!("Output directory: {}", args.output.display());

    let abort = AbortFlag::new();
    let exit_requested = Arc::new(AtomicBool::new(false));

    let source = TsFileSource::open_capture(&args.capture, abort.clone())
        .with_context(|| format!("Failed to open capture {}", args.capture.display()))?;
    let sink = DirectorySink::new(args.output.clone());
    let session = ScanSession::new(config, manifest);

    // Shutdown raises the abort flag so in-flight section waits unwind,
    // then the state machine observes the exit request.
    {
        let abort = abort.clone();
        let exit_requested = Arc::clone(&exit_requested);
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown requested");
            exit_requested.store(true, Ordering::SeqCst);
            abort.raise();
        });
    }

    let once = args.once;
    let session = tokio::task::spawn_blocking(move || {
        run_agent(session, source, sink, abort, exit_requested, once)
    })
    .await
    .context("Agent worker panicked")?;

    let snapshot_path = args.output.join("diag.json");
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let snapshot =
        serde_json::to_string_pretty(&session.diag).context("Failed to encode diagnostics")?;
    std::fs::write(&snapshot_path, snapshot)
        .with_context(|| format!("Failed to write {}", snapshot_path.display()))?;
    info!("Diagnostics written to {}", snapshot_path.display());

    for entry in session.events.entries() {
        info!(
            category = ?entry.category,
            code = entry.code,
            count = entry.count,
            "event: {}",
            entry.message
        );
    }

    info!("Agent shutdown complete");
    Ok(())
}

/// The synchronous scan/download loop. Sleeps between events in small
/// slices so the abort flag is observed promptly.
fn run_agent(
    mut session: ScanSession,
    mut source: TsFileSource,
    mut sink: DirectorySink,
    abort: AbortFlag,
    exit_requested: Arc<AtomicBool>,
    once: bool,
) -> ScanSession {
    let params = session.params.clone();
    let mut tuner = source.clone();
    let mut step = NextStep {
        state: AgentState::Scan,
        delay_ms: 0,
    };

    loop {
        if step.state == AgentState::Exit {
            break;
        }

        if !sleep_unless_aborted(step.delay_ms, &abort) {
            let exiting = exit_requested.load(Ordering::SeqCst);
            if !exiting {
                abort.clear();
            }
            let done_pending = step.state == AgentState::DownloadDone;
            step = state::after_abort(exiting, done_pending, &params);
            continue;
        }

        step = match step.state {
            AgentState::Scan => {
                info!("Scan event starting");
                let result = discovery::channel_scan(&mut source, &mut tuner, &mut session)
                    .map(|best| best.map(|c| c.milliseconds_to_start));
                state::after_scan(&result, &params, &mut session.diag)
            }
            AgentState::Download => {
                info!("Download event starting");
                let result =
                    download::download_event(&mut source, &mut tuner, &mut session, &mut sink);
                state::after_download(&result, &params, &mut session.diag)
            }
            AgentState::DownloadDone => {
                info!(
                    complete = session.diag.download_complete,
                    "Download complete"
                );
                if once {
                    break;
                }
                state::after_done(&params)
            }
            AgentState::Exit => break,
        };

        if abort.is_raised() {
            let exiting = exit_requested.load(Ordering::SeqCst);
            if !exiting {
                abort.clear();
            }
            let done_pending = step.state == AgentState::DownloadDone;
            step = state::after_abort(exiting, done_pending, &params);
            continue;
        }

        // Single-shot operation against a capture: stop once a scan comes
        // up empty instead of retrying a file that will not change.
        if once && step.state == AgentState::Scan {
            info!("Single pass finished");
            break;
        }
    }

    session
}

/// Sleep in slices, returning false as soon as an abort is observed.
fn sleep_unless_aborted(delay_ms: u64, abort: &AbortFlag) -> bool {
    const SLICE_MS: u64 = 100;
    let mut remaining = delay_ms;
    while remaining > 0 {
        if abort.is_raised() {
            return false;
        }
        let slice = remaining.min(SLICE_MS);
        std::thread::sleep(Duration::from_millis(slice));
        remaining -= slice;
    }
    !abort.is_raised()
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
