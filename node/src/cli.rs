//! # CLI Interface
//!
//! Command-line arguments for `murmur-node`, built with `clap` derive.
//! Subcommands: `simulate`, `config` and `version`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Murmur gossip + proof-of-work node.
///
/// Runs a network of Murmur nodes inside one process, wired together by an
/// in-memory transport, and optionally serves one of them over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "murmur-node",
    about = "Murmur gossip and proof-of-work node",
    version,
    propagate_version = true
)]
pub struct MurmurNodeCli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "MURMUR_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an in-process network of nodes and report where they converge.
    Simulate(SimulateArgs),
    /// Print the default configuration, or validate a configuration file.
    Config(ConfigArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `simulate` subcommand.
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of nodes in the network.
    #[arg(long, short = 'n', default_value_t = 4)]
    pub nodes: usize,

    /// How many of the nodes mine. The first `miners` nodes are chosen.
    #[arg(long, short = 'm', default_value_t = 1)]
    pub miners: usize,

    /// Seconds to run before shutting down.
    #[arg(long, short = 'd', default_value_t = 30)]
    pub duration_secs: u64,

    /// Milliseconds between injected transfers. 0 disables injection.
    #[arg(long, default_value_t = 500)]
    pub tx_interval_ms: u64,

    /// Starting proof-of-work difficulty. Overrides the configuration file.
    #[arg(long)]
    pub difficulty: Option<u64>,

    /// Amount credited at genesis to every simulated node's account.
    #[arg(long, default_value_t = 1_000_000)]
    pub genesis_balance: u64,

    /// JSON configuration shared by every node. Defaults apply when omitted.
    #[arg(long, short = 'c', env = "MURMUR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seed for gossip peer selection and transaction injection. Each node
    /// derives its own seed from it. Random when omitted.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Serve the HTTP API for node 0 on this port.
    #[arg(long, env = "MURMUR_API_PORT")]
    pub api_port: Option<u16>,
}

/// Arguments for the `config` subcommand.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Validate this file instead of printing the defaults.
    #[arg(long)]
    pub check: Option<PathBuf>,

    /// Write the defaults here instead of stdout.
    #[arg(long, short = 'o', conflicts_with = "check")]
    pub output: Option<PathBuf>,
}
