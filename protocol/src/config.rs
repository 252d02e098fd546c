//! # Protocol Configuration & Constants
//!
//! Every default and magic number lives here. Component configs
//! ([`GossipConfig`], [`ChainConfig`], [`MempoolConfig`], [`SyncConfig`],
//! [`MiningConfig`]) take their defaults from these constants and are
//! grouped into a single [`NodeConfig`] that the binary loads from JSON.
//!
//! Every component validates its config at construction and rejects zero
//! intervals, capacities and counts. A node with a zero fan-out would never
//! gossip, and a zero retarget window would divide by zero.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::producer::MiningConfig;
use crate::network::gossip::GossipConfig;
use crate::network::mempool::MempoolConfig;
use crate::network::sync::SyncConfig;
use crate::storage::chain::ChainConfig;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// First four bytes of every wire frame. Peers drop anything else unparsed.
pub const PROTOCOL_MAGIC: [u8; 4] = *b"MRMR";

/// Wire format version, carried in every frame header.
pub const WIRE_PROTOCOL_VERSION: u8 = 1;

/// Crate-level protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Gossip
// ---------------------------------------------------------------------------

/// Peers pushed to per gossip tick.
pub const GOSSIP_FANOUT: usize = 3;

/// Gossip tick period.
pub const GOSSIP_INTERVAL_MS: u64 = 1_000;

/// Anti-entropy period. Deliberately much slower than the push tick.
pub const ANTI_ENTROPY_INTERVAL_MS: u64 = 30_000;

/// Hop ceiling for relayed messages.
pub const MESSAGE_TTL: u8 = 10;

/// Ticks a freshly accepted message stays in the outbound set.
pub const GOSSIP_PUSH_ROUNDS: u8 = 3;

/// How long a message id stays in the seen-set.
pub const SEEN_RETENTION_MS: u64 = 300_000;

/// Hard bound on the seen-set size, independent of age.
pub const SEEN_CAPACITY: usize = 100_000;

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

/// Desired average time between blocks.
pub const TARGET_BLOCK_INTERVAL_MS: u64 = 60_000;

/// Blocks per retarget period.
pub const DIFFICULTY_WINDOW: u64 = 10;

/// Maximum factor by which difficulty may move in one retarget.
pub const MAX_DIFFICULTY_ADJUSTMENT: u64 = 4;

/// Difficulty of the first retarget period: 2^16 expected hashes per block,
/// i.e. sixteen leading zero bits.
pub const INITIAL_DIFFICULTY: u64 = 1 << 16;

/// How far into the future a block timestamp may run ahead of the local clock.
pub const MAX_FUTURE_BLOCK_DRIFT_MS: u64 = 120_000;

/// How far into the future a transaction timestamp may run.
pub const MAX_FUTURE_TX_DRIFT_MS: u64 = 300_000;

/// Upper bound on transactions per block.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 100;

/// Amount credited to a block's miner.
pub const BLOCK_REWARD: u64 = 50;

/// Maximum buffered orphan blocks.
pub const ORPHAN_CAPACITY: usize = 256;

/// Nonce attempts between cancellation checks while mining.
pub const MINING_POLL_INTERVAL: u64 = 4_096;

// ---------------------------------------------------------------------------
// Pool & Sync
// ---------------------------------------------------------------------------

/// Maximum pending transactions per node.
pub const MEMPOOL_CAPACITY: usize = 10_000;

/// Pending transactions older than this are expired.
pub const MEMPOOL_MAX_AGE_MS: u64 = 3_600_000;

/// Bounded wait for an anti-entropy response.
pub const SYNC_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Maximum blocks returned in one sync response.
pub const SYNC_BATCH_SIZE: usize = 128;

/// Maximum transactions returned in one pool-diff response.
pub const SYNC_MAX_POOL_DIFF: usize = 512;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A configuration value that would make a component inoperable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Fails with [`ConfigError::Zero`] when `value` is zero.
pub(crate) fn require_nonzero<T>(field: &'static str, value: T) -> Result<(), ConfigError>
where
    T: PartialEq + Default,
{
    if value == T::default() {
        Err(ConfigError::Zero { field })
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Everything a node needs to be configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub gossip: GossipConfig,
    pub chain: ChainConfig,
    pub mempool: MempoolConfig,
    pub sync: SyncConfig,
    pub mining: MiningConfig,
}

impl NodeConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gossip.validate()?;
        self.chain.validate()?;
        self.mempool.validate()?;
        self.sync.validate()?;
        self.mining.validate()
    }

    /// Parses a JSON document. Missing fields fall back to their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Invalid {
                field: "config",
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
