//! socketlog Server Binary
//!
//! Shared-log TCP echo server.

use clap::Parser;
use socketlog::config::ServerConfig;
use socketlog::server::{spawn_signal_listener, LogServer, ShutdownCoordinator};
use socketlog::{daemon, logging};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "socketlog-server")]
#[command(about = "Shared-log TCP echo server")]
#[command(version)]
struct Args {
    /// Run as a daemon
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Shared data file
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Discard existing data file contents at startup
    #[arg(long)]
    truncate: bool,

    /// Seconds to wait for clients during shutdown before closing them
    #[arg(long)]
    drain_timeout: Option<u64>,

    /// Write diagnostics to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> socketlog::Result<ServerConfig> {
    let mut config = ServerConfig::load(args.config.as_deref())?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(data_file) = &args.data_file {
        config.storage.data_file = data_file.clone();
    }
    if args.truncate {
        config.storage.truncate_on_start = true;
    }
    if let Some(secs) = args.drain_timeout {
        config.shutdown.drain_timeout_secs = Some(secs);
    }
    if let Some(log_file) = &args.log_file {
        config.logging.file = Some(log_file.clone());
    }

    // Relative paths must survive the daemon's chdir
    config.storage.data_file = daemon::absolutize(&config.storage.data_file)?;
    if let Some(file) = &config.logging.file {
        config.logging.file = Some(daemon::absolutize(file)?);
    }

    config.validate()?;
    Ok(config)
}

/// Daemonization happens here, before the Tokio runtime spawns any threads.
fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    if args.daemon {
        if let Err(e) = daemon::daemonize() {
            eprintln!("Daemonization failed: {}", e);
            std::process::exit(1);
        }
    }

    // Diagnostics are best effort
    if let Err(e) = logging::init(&config.logging, args.verbose) {
        eprintln!("{}", e);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(serve(config));
    std::process::exit(code);
}

async fn serve(config: ServerConfig) -> i32 {
    info!("Starting socketlog server v{}", env!("CARGO_PKG_VERSION"));
    info!("Data file: {}", config.storage.data_file.display());

    // Handlers go in before the data file and listener exist
    let coordinator = ShutdownCoordinator::new();
    let signals = match spawn_signal_listener(coordinator.handle()) {
        Ok(task) => task,
        Err(e) => {
            error!("Failed to install signal handlers: {}", e);
            return 1;
        }
    };

    let server = match LogServer::with_coordinator(config, coordinator).await {
        Ok(server) => server,
        Err(e) => {
            error!("Startup failed: {}", e);
            signals.abort();
            return 1;
        }
    };

    let result = server.run().await;
    signals.abort();

    match result {
        Ok(report) => {
            if report.aborted > 0 || report.failed > 0 {
                warn!(
                    aborted = report.aborted,
                    failed = report.failed,
                    "Some connections did not finish cleanly"
                );
            }
            info!("socketlog server stopped");
            0
        }
        Err(e) => {
            error!("Server error: {}", e);
            1
        }
    }
}
