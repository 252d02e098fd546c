//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use murmur_protocol::consensus::{mine, MiningSignal};
use murmur_protocol::crypto::Keypair;
use murmur_protocol::network::{InboundReceiver, MemoryNetwork, Node, StaticPeers};
use murmur_protocol::storage::{Block, ChainConfig, GenesisAllocation};
use murmur_protocol::transaction::Transaction;
use murmur_protocol::NodeConfig;

pub fn keypair(seed: u8) -> Keypair {
    Keypair::from_seed(&[seed; 32])
}

pub fn address(seed: u8) -> String {
    keypair(seed).address()
}

/// Difficulty 1, no retargeting, accounts 1..=4 funded.
pub fn chain_config() -> ChainConfig {
    ChainConfig {
        initial_difficulty: 1,
        difficulty_window: 1_000_000,
        genesis_allocations: (1..=4)
            .map(|seed| GenesisAllocation {
                address: address(seed),
                amount: 1_000,
            })
            .collect(),
        ..ChainConfig::default()
    }
}

/// A mined child of `parent` paying `miner_seed`.
pub fn child(parent: &Block, txs: Vec<Transaction>, miner_seed: u8) -> Block {
    let now = Utc::now().timestamp_millis() as u64;
    let template = Block::template(
        &parent.header,
        txs,
        address(miner_seed),
        now.max(parent.header.timestamp + 1),
        parent.header.difficulty,
    );
    mine(template, &MiningSignal::new().ticket(), 256).expect("difficulty 1 always mines")
}

/// Fast timers for tests that run the full node loop.
pub fn node_config(mining: bool) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.chain = chain_config();
    config.gossip.gossip_interval_ms = 20;
    config.gossip.anti_entropy_interval_ms = 100;
    config.gossip.fanout = 2;
    config.sync.request_timeout_ms = 500;
    config.mining.enabled = mining;
    config.mining.poll_interval = 256;
    config
}

/// Joins `name` to `net` and builds a node whose peers are `peers`.
pub fn spawn_node(
    net: &MemoryNetwork,
    name: &str,
    seed: u8,
    peers: &[&str],
    config: NodeConfig,
) -> (Arc<Node>, InboundReceiver) {
    let (transport, inbound) = net.join(name);
    let peers = StaticPeers::new(peers.iter().map(|p| p.to_string()), u32::MAX);
    let node = Node::new(config, keypair(seed), Arc::new(transport), Arc::new(peers))
        .expect("valid config");
    (Arc::new(node), inbound)
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
