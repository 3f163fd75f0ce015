//! Cadenza backend - the privileged responder process.
//!
//! Owns storage and answers the UI process's datastore calls over the
//! IPC channel. The UI shell reads the announced port from stdout and
//! hands it to the initiator-side transport.

use anyhow::Result;
use cadenza_backend::{handlers, Engine};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "cadenza-backend")]
#[command(about = "Privileged responder process for Cadenza")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("starting Cadenza backend");

    let engine = Arc::new(Engine::new());
    let mut responder = cadenza_core::Responder::new();
    handlers::register(&mut responder, engine);

    let mut handle = responder.start_on(args.port).await?;

    // Announced on stdout for the shell process to read.
    println!("CADENZA_PORT={}", handle.port());
    info!("responder running on {}", handle.addr());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting");
    handle.shutdown();

    Ok(())
}
