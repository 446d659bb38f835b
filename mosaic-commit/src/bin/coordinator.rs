//! Mosaic coordinator daemon.
//!
//! Listens for participant traffic on the given port and accepts commit
//! requests on stdin, one per line:
//!
//! ```text
//! commit <destination> <image-file> <address:path> [<address:path>...]
//! status
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use mosaic_commit::transport::tcp::{self, TcpTransport};
use mosaic_commit::{Coordinator, CoordinatorConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Mosaic 2PC coordinator.
#[derive(Parser, Debug)]
#[command(name = "mosaic-coordinator")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on for participant traffic.
    port: u16,

    /// Participant address book entry, `id=host:port`. Repeatable.
    #[arg(long = "participant", value_name = "ID=ADDR")]
    participants: Vec<String>,

    /// Working directory for the WAL, blobs and published artifacts.
    #[arg(long, default_value = "./coordinator-data")]
    data_dir: PathBuf,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_address_book(entries: &[String]) -> Result<HashMap<String, String>> {
    let mut routes = HashMap::new();
    for entry in entries {
        let (id, addr) = entry
            .split_once('=')
            .with_context(|| format!("bad --participant entry '{entry}', expected ID=ADDR"))?;
        routes.insert(id.to_string(), addr.to_string());
    }
    Ok(routes)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let listen_addr = format!("0.0.0.0:{}", args.port);
    let config = CoordinatorConfig::builder()
        .listen_addr(&listen_addr)
        .data_dir(&args.data_dir)
        .build()?;

    let routes = parse_address_book(&args.participants)?;
    let transport = TcpTransport::new(mosaic_commit::COORDINATOR_ADDR, routes);

    let coordinator = Coordinator::new(config, transport).context("failed to start coordinator")?;

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    // The transport exists, so recovery may re-send outcomes; the listener
    // starts right after so the re-collected acks can arrive.
    coordinator.recover().context("recovery failed")?;
    tokio::spawn(tcp::serve(listener, coordinator.clone()));

    info!(port = args.port, data_dir = %args.data_dir.display(), "coordinator started");

    let control = tokio::spawn(control_loop(coordinator.clone()));
    let mut fatal = coordinator.fatal_signal();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
        _ = fatal.changed() => {
            error!("fatal storage failure; exiting");
            std::process::exit(1);
        }
        _ = control => {
            info!("control stream closed; exiting");
        }
    }

    Ok(())
}

/// Read commit requests from stdin until EOF.
async fn control_loop(coordinator: Arc<Coordinator>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("commit") => {
                let Some(destination) = parts.next() else {
                    warn!("usage: commit <destination> <image-file> <address:path>...");
                    continue;
                };
                let Some(image_file) = parts.next() else {
                    warn!("usage: commit <destination> <image-file> <address:path>...");
                    continue;
                };
                let sources: Vec<String> = parts.map(str::to_string).collect();
                if sources.is_empty() {
                    warn!("commit needs at least one <address:path> source");
                    continue;
                }

                match std::fs::read(image_file) {
                    Ok(image) => coordinator.start_commit(destination, image, &sources),
                    Err(e) => error!(image_file, error = %e, "cannot read image"),
                }
            }
            Some("status") => {
                info!(
                    pending = coordinator.pending_transactions(),
                    abandoned = coordinator.abandoned_outcomes(),
                    "status"
                );
            }
            Some(other) => warn!(command = other, "unknown control command"),
            None => {}
        }
    }
}
