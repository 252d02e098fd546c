//! # Network Simulation
//!
//! Runs `n` nodes in one process over a [`MemoryNetwork`], each peered with
//! every other. The first `miners` nodes mine; the rest only relay. A
//! background task signs random transfers between the nodes' accounts so
//! the pools and blocks have something to carry.
//!
//! When the run ends every node is stopped and its final status reported.
//! The network has converged if all nodes report the same tip.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use murmur_protocol::crypto::Keypair;
use murmur_protocol::network::{InboundReceiver, MemoryNetwork, Node, NodeStatus, StaticPeers};
use murmur_protocol::storage::GenesisAllocation;
use murmur_protocol::NodeConfig;

use crate::api::{self, AppState};
use crate::cli::SimulateArgs;

/// Missed sync replies tolerated before a peer is skipped.
const MAX_PEER_STRIKES: u32 = 3;

/// Reads and validates a JSON configuration, or returns the defaults.
pub fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    let Some(path) = path else {
        return Ok(NodeConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    NodeConfig::from_json(&json).with_context(|| format!("invalid config in {}", path.display()))
}

/// Deterministic keypair for simulated node `index`.
pub fn node_keypair(index: usize) -> Keypair {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&(index as u64 + 1).to_le_bytes());
    seed[8..15].copy_from_slice(b"murmur!");
    Keypair::from_seed(&seed)
}

pub fn node_name(index: usize) -> String {
    format!("node-{index}")
}

/// Final state of a finished run.
#[derive(Debug, Serialize)]
pub struct Report {
    pub converged: bool,
    pub nodes: Vec<NodeStatus>,
}

impl Report {
    fn new(nodes: Vec<NodeStatus>) -> Self {
        let converged = nodes.windows(2).all(|pair| pair[0].tip == pair[1].tip);
        Self { converged, nodes }
    }
}

/// A built but not yet running network.
pub struct Simulation {
    pub network: MemoryNetwork,
    pub nodes: Vec<Arc<Node>>,
    inbound: Vec<InboundReceiver>,
}

impl Simulation {
    /// Creates the nodes. Every node's account is funded at genesis.
    pub fn build(args: &SimulateArgs, base: NodeConfig) -> Result<Self> {
        if args.nodes == 0 {
            bail!("a simulation needs at least one node");
        }
        if args.miners > args.nodes {
            bail!("{} miners requested but only {} nodes", args.miners, args.nodes);
        }

        let mut chain = base.chain.clone();
        if let Some(difficulty) = args.difficulty {
            chain.initial_difficulty = difficulty;
        }
        chain.genesis_allocations.extend((0..args.nodes).map(|i| GenesisAllocation {
            address: node_keypair(i).address(),
            amount: args.genesis_balance,
        }));

        let names: Vec<String> = (0..args.nodes).map(node_name).collect();
        let network = MemoryNetwork::new();
        let mut nodes = Vec::with_capacity(args.nodes);
        let mut inbound = Vec::with_capacity(args.nodes);

        for (i, name) in names.iter().enumerate() {
            let mut config = base.clone();
            config.chain = chain.clone();
            config.mining.enabled = i < args.miners;
            config.gossip.rng_seed = args.seed.map(|seed| seed.wrapping_add(i as u64));

            let peers = StaticPeers::new(
                names.iter().filter(|other| *other != name).cloned(),
                MAX_PEER_STRIKES,
            );
            let (transport, rx) = network.join(name.as_str());
            let node = Node::new(config, node_keypair(i), Arc::new(transport), Arc::new(peers))
                .with_context(|| format!("failed to create {name}"))?;
            nodes.push(Arc::new(node));
            inbound.push(rx);
        }

        tracing::info!(
            nodes = args.nodes,
            miners = args.miners,
            difficulty = chain.initial_difficulty,
            "simulation built"
        );
        Ok(Self {
            network,
            nodes,
            inbound,
        })
    }

    /// Runs until `duration` passes or `stop` resolves, then shuts every
    /// node down and reports.
    pub async fn run(
        self,
        args: &SimulateArgs,
        stop: impl std::future::Future<Output = ()>,
    ) -> Result<Report> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tracing::info!(members = self.network.members().len(), "simulation starting");

        let mut handles: Vec<JoinHandle<()>> = self
            .nodes
            .iter()
            .cloned()
            .zip(self.inbound)
            .map(|(node, inbound)| tokio::spawn(node.run(inbound, shutdown_rx.clone())))
            .collect();

        if args.tx_interval_ms > 0 && self.nodes.len() > 1 {
            handles.push(tokio::spawn(inject_transfers(
                self.nodes.clone(),
                Duration::from_millis(args.tx_interval_ms),
                args.seed,
                shutdown_rx.clone(),
            )));
        }

        if let Some(port) = args.api_port {
            let addr = format!("0.0.0.0:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind API listener on {addr}"))?;
            tracing::info!(%addr, node = %self.nodes[0].id(), "API server listening");
            let router = api::create_router(AppState::new(self.nodes[0].clone()));
            let mut api_shutdown = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                    let _ = api_shutdown.changed().await;
                });
                if let Err(e) = serve.await {
                    tracing::error!(error = %e, "API server error");
                }
            }));
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {
                tracing::info!(secs = args.duration_secs, "simulation time elapsed");
            }
            _ = stop => tracing::info!("stop requested"),
        }

        let _ = shutdown_tx.send(true);
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "simulation task failed");
            }
        }

        let report = Report::new(self.nodes.iter().map(|node| node.status()).collect());
        tracing::info!(converged = report.converged, "simulation finished");
        Ok(report)
    }
}

/// Signs a small transfer between two random nodes every `interval`.
async fn inject_transfers(
    nodes: Vec<Arc<Node>>,
    interval: Duration,
    seed: Option<u64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ 0x5eed),
        None => StdRng::from_entropy(),
    };
    let mut ticker = tokio::time::interval(interval);
    let mut injected = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let from = rng.gen_range(0..nodes.len());
                let to = (from + rng.gen_range(1..nodes.len())) % nodes.len();
                let amount = rng.gen_range(1..=10);
                match nodes[from].create_transaction(&nodes[to].address(), amount) {
                    Ok(tx) => {
                        injected += 1;
                        tracing::debug!(from = %nodes[from].id(), to = %nodes[to].id(), amount, tx = %tx.id.short(), "transfer injected");
                    }
                    Err(e) => tracing::debug!(error = %e, "transfer not injected"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!(injected, "transfer injection stopped");
}

/// Prints a one-line summary per node to stdout.
pub fn print_report(report: &Report) {
    println!(
        "{:<10} {:>7} {:>18} {:>6} {:>7} {:>9}  tip",
        "node", "height", "work", "pool", "orphans", "received"
    );
    for status in &report.nodes {
        println!(
            "{:<10} {:>7} {:>18} {:>6} {:>7} {:>9}  {}",
            status.id,
            status.height,
            status.total_work,
            status.pool_size,
            status.orphan_count,
            status.gossip.received,
            &status.tip[..16.min(status.tip.len())],
        );
    }
    if report.converged {
        println!("converged: every node reports the same tip");
    } else {
        println!("not converged: nodes disagree on the tip");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn args(nodes: usize, miners: usize) -> SimulateArgs {
        SimulateArgs {
            nodes,
            miners,
            duration_secs: 1,
            tx_interval_ms: 50,
            difficulty: Some(1 << 12),
            genesis_balance: 1_000,
            config: None,
            seed: Some(7),
            api_port: None,
        }
    }

    fn fast_config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.gossip.gossip_interval_ms = 20;
        config.gossip.anti_entropy_interval_ms = 200;
        config.chain.difficulty_window = 1_000_000;
        config.mining.poll_interval = 256;
        config
    }

    // -- Build --

    #[test]
    fn keypairs_are_distinct_and_stable() {
        assert_eq!(node_keypair(0).address(), node_keypair(0).address());
        assert_ne!(node_keypair(0).address(), node_keypair(1).address());
    }

    #[test]
    fn build_rejects_more_miners_than_nodes() {
        assert!(Simulation::build(&args(2, 3), fast_config()).is_err());
        assert!(Simulation::build(&args(0, 0), fast_config()).is_err());
    }

    #[test]
    fn build_funds_every_node_and_peers_them() {
        let sim = Simulation::build(&args(3, 1), fast_config()).unwrap();
        assert_eq!(sim.network.members(), vec!["node-0", "node-1", "node-2"]);
        for (i, node) in sim.nodes.iter().enumerate() {
            assert_eq!(node.account(&node_keypair(i).address()).balance, 1_000);
            assert_eq!(node.status().peers, 2);
            assert_eq!(node.config().mining.enabled, i == 0);
        }
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/murmur.json"))).is_err());
        assert_eq!(load_config(None).unwrap(), NodeConfig::default());
    }

    // -- Run --

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn short_run_mines_and_reports() {
        let args = args(3, 1);
        let sim = Simulation::build(&args, fast_config()).unwrap();
        let report = sim.run(&args, std::future::pending()).await.unwrap();

        assert_eq!(report.nodes.len(), 3);
        assert!(report.nodes[0].height > 0);
        assert!(report.nodes[0].mining);
    }
}
