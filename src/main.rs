//! dictd server binary
//!
//! Main entry point for the dictd TCP server

use clap::Parser;
use dictd::{DictServer, ParseMode, Result, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-valued key-value store over TCP")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:27000")]
    bind: String,

    /// Snapshot file, created empty if missing
    #[arg(long, default_value = "./data.dat")]
    data_file: PathBuf,

    /// Seconds between periodic snapshots
    #[arg(long, default_value_t = 30)]
    snapshot_interval: u64,

    /// Seconds to wait for a request line; 0 waits forever
    #[arg(long, default_value_t = 30)]
    read_timeout: u64,

    /// Maximum number of connections served at once
    #[arg(long, default_value_t = 1000)]
    max_connections: usize,

    /// Run malformed GET/PUT/DELETE requests against the empty key instead of
    /// rejecting them
    #[arg(long)]
    lenient_args: bool,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: args.bind,
            snapshot_path: args.data_file,
            snapshot_interval: Duration::from_secs(args.snapshot_interval.max(1)),
            read_timeout: (args.read_timeout > 0).then(|| Duration::from_secs(args.read_timeout)),
            max_connections: args.max_connections.max(1),
            parse_mode: if args.lenient_args {
                ParseMode::Lenient
            } else {
                ParseMode::Strict
            },
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

/// Resolves on Ctrl+C, or on SIGTERM where available
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ServerConfig::from(Args::parse());
    info!("dictd starting up with {:?}", config);

    let server = Arc::new(DictServer::new(config).await?);

    // Setup graceful shutdown; the server saves a final snapshot before run returns
    let server_clone = Arc::clone(&server);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        server_clone.shutdown();
    });

    server.run().await?;

    Ok(())
}
