//! VM broker daemon
//!
//! Runs the broker and serves it over WebSocket until SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vm_broker::{Broker, BrokerConfig, InstanceService, SimulatedService};
use vm_broker_daemon::{Server, logging, signals};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// In-memory instances, for development and testing
    Simulated,
}

#[derive(Parser, Debug)]
#[command(name = "vm-broker-daemon")]
#[command(about = "Transaction broker for VM lifecycle operations", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "9101")]
    port: u16,

    /// Broker configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Lifecycle backend
    #[arg(long, value_enum, default_value = "simulated")]
    backend: Backend,

    /// Delay between simulated creation steps, in milliseconds
    #[arg(long, default_value = "500")]
    sim_step_delay_ms: u64,
}

fn service_for(args: &Args) -> Arc<dyn InstanceService> {
    match args.backend {
        Backend::Simulated => Arc::new(
            SimulatedService::new().with_step_delay(Duration::from_millis(args.sim_step_delay_ms)),
        ),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    let config = match &args.config {
        Some(path) => BrokerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => BrokerConfig::default(),
    };

    info!("Starting VM broker with {:?} backend", args.backend);

    let broker = Broker::builder()
        .with_config(config)
        .build(service_for(&args))?;
    signals::cancel_on_termination(broker.shutdown_token())?;

    let addr = format!("{}:{}", args.host, args.port);
    smol::block_on(async {
        let server = Server::bind(&addr, broker.api(), broker.shutdown_token()).await?;
        server.run().await
    })?;

    info!("VM broker stopped");
    Ok(())
}
