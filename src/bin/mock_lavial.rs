//! Mock ticketing service for local testing
//!
//! Serves the verification and reservation endpoints from memory, seeded
//! with fixture tickets T-1, T-2 and T-3. A ticket verified once is answered
//! with 409 on every later verification.
//!
//! Usage:
//!   cargo run --bin mock-lavial -- --port 8080
//!   cargo run --bin ticket-scanner -- --api-url http://127.0.0.1:8080 scan

use clap::Parser;
use std::net::SocketAddr;
use ticket_scanner::infra::logging::init_logging;
use ticket_scanner::io::MockApi;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mock-lavial")]
#[command(about = "In-memory ticketing service for local simulation")]
struct Args {
    /// HTTP port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: std::net::IpAddr,

    /// Start without fixture data
    #[arg(long)]
    empty: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.json);

    let api = if args.empty { MockApi::new() } else { MockApi::with_fixtures() };
    let listener = TcpListener::bind(SocketAddr::new(args.host, args.port)).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    api.serve(listener, shutdown_rx).await?;
    Ok(())
}
