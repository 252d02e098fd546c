// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Murmur Node
//!
//! Entry point for the `murmur-node` binary.
//!
//! - `simulate` runs a network of nodes in-process and reports convergence
//! - `config` prints the default configuration or validates a file
//! - `version` prints build information

mod api;
mod cli;
mod logging;
mod metrics;
mod simulate;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use cli::{Commands, MurmurNodeCli};
use simulate::Simulation;

const DEFAULT_LOG_FILTER: &str = "murmur_node=info,murmur_protocol=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MurmurNodeCli::parse();
    logging::init_logging(DEFAULT_LOG_FILTER, cli.log_format);

    match cli.command {
        Commands::Simulate(args) => run_simulation(args).await,
        Commands::Config(args) => config_command(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

async fn run_simulation(args: cli::SimulateArgs) -> Result<()> {
    let config = simulate::load_config(args.config.as_deref())?;
    tracing::info!(
        nodes = args.nodes,
        miners = args.miners,
        duration_secs = args.duration_secs,
        api_port = ?args.api_port,
        "starting murmur simulation"
    );

    let sim = Simulation::build(&args, config)?;
    let report = sim.run(&args, shutdown_signal()).await?;
    simulate::print_report(&report);
    Ok(())
}

/// Prints the default configuration, writes it to a file, or validates one.
fn config_command(args: cli::ConfigArgs) -> Result<()> {
    if let Some(path) = args.check {
        simulate::load_config(Some(&path))?;
        println!("{}: ok", path.display());
        return Ok(());
    }

    let json = murmur_protocol::NodeConfig::default().to_json();
    match args.output {
        Some(path) => {
            std::fs::write(&path, json + "\n")
                .with_context(|| format!("failed to write config to {}", path.display()))?;
            tracing::info!(path = %path.display(), "default configuration written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_version() {
    println!("murmur-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", murmur_protocol::config::PROTOCOL_VERSION);
    println!("wire        v{}", murmur_protocol::config::WIRE_PROTOCOL_VERSION);
}

/// Resolves on SIGINT or SIGTERM. Only Ctrl+C on non-Unix platforms.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
