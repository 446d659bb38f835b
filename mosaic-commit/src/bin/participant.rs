//! Mosaic participant daemon.
//!
//! Guards the source files in its working directory, votes on commit
//! requests and applies the coordinator's decisions.

use anyhow::{Context, Result};
use clap::Parser;
use mosaic_commit::transport::tcp::{self, TcpTransport};
use mosaic_commit::{AutoApprove, Participant, ParticipantConfig, COORDINATOR_ADDR};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Mosaic 2PC participant.
#[derive(Parser, Debug)]
#[command(name = "mosaic-participant")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on for coordinator traffic.
    port: u16,

    /// This participant's identity.
    id: String,

    /// Address of the coordinator.
    #[arg(long, default_value = "127.0.0.1:7000")]
    coordinator: String,

    /// Working directory for the WAL and the guarded source files.
    #[arg(long, default_value = "./participant-data")]
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

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let listen_addr = format!("0.0.0.0:{}", args.port);
    let config = ParticipantConfig::builder()
        .id(&args.id)
        .listen_addr(&listen_addr)
        .coordinator_addr(&args.coordinator)
        .data_dir(&args.data_dir)
        .build()?;

    let routes = HashMap::from([(COORDINATOR_ADDR.to_string(), args.coordinator.clone())]);
    let transport = TcpTransport::new(&args.id, routes);

    let participant = Participant::new(config, transport, Arc::new(AutoApprove))
        .context("failed to start participant")?;

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    // Recovery re-locks staged files and re-sends pending yes votes.
    participant.recover().context("recovery failed")?;
    tokio::spawn(tcp::serve(listener, participant.clone()));

    info!(
        id = %args.id,
        port = args.port,
        data_dir = %args.data_dir.display(),
        "participant started"
    );

    let mut fatal = participant.fatal_signal();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
        _ = fatal.changed() => {
            error!("fatal storage failure; exiting");
            std::process::exit(1);
        }
    }

    Ok(())
}
