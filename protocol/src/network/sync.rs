//! # Anti-Entropy Synchronization
//!
//! Gossip is best effort. A node that was partitioned, started late or lost
//! a few frames repairs itself here, on a much slower cadence than the push
//! tick.
//!
//! ## Protocol Overview
//!
//! ```text
//! Node                                   Peer
//! ────                                   ────
//!   │  Summary                             │
//!   │────────────────────────────────────> │
//!   │  Summary { tip, height, work, pool } │
//!   │<──────────────────────────────────── │
//!   │                                      │
//!   │  BlocksAfter { locator }  (if the peer's chain differs)
//!   │────────────────────────────────────> │
//!   │  Blocks([...])                       │
//!   │<──────────────────────────────────── │
//!   │                                      │
//!   │  PoolDiff { known }       (if pool sizes differ)
//!   │────────────────────────────────────> │
//!   │  Transactions([...])                 │
//!   │<──────────────────────────────────── │
//! ```
//!
//! `Blocks { ids }` fetches specific blocks, typically the missing parent of
//! an orphan.
//!
//! ## Design Decisions
//!
//! - **Request ids.** Every request carries an id that the response echoes.
//!   Responses with unknown ids, or from a peer other than the one asked,
//!   are dropped.
//!
//! - **Bounded wait.** Pending requests carry a deadline. Expired ones are
//!   handed back to the caller, which reports the peer to the peer manager.
//!
//! - **Everything goes through `try_add`.** Fetched blocks are ordinary
//!   blocks. They are validated, orphaned and fork-chosen exactly like
//!   gossiped ones, so a lying peer can waste bandwidth but not corrupt state.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{
    require_nonzero, ConfigError, SYNC_BATCH_SIZE, SYNC_MAX_POOL_DIFF, SYNC_REQUEST_TIMEOUT_MS,
};
use crate::network::mempool::Mempool;
use crate::network::transport::PeerId;
use crate::storage::block::{Block, BlockId};
use crate::storage::chain::{Chain, ChainSummary};
use crate::transaction::{Transaction, TxId};

pub type RequestId = u64;

// ---------------------------------------------------------------------------
// Sync Request / Response
// ---------------------------------------------------------------------------

/// What a node asks a peer for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRequest {
    /// The peer's chain tip and pool size.
    Summary,

    /// Canonical blocks after the highest locator entry the peer shares.
    BlocksAfter { locator: Vec<BlockId> },

    /// Specific blocks by id. Unknown ids are skipped.
    Blocks { ids: Vec<BlockId> },

    /// Pending transactions the requester does not list as known.
    PoolDiff { known: Vec<TxId> },
}

impl SyncRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::BlocksAfter { .. } => "blocks_after",
            Self::Blocks { .. } => "blocks",
            Self::PoolDiff { .. } => "pool_diff",
        }
    }
}

/// A node's state as reported during anti-entropy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub chain: ChainSummary,
    pub pool_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncResponse {
    Summary(PeerSummary),
    /// Blocks in ascending height order.
    Blocks(Vec<Block>),
    Transactions(Vec<Transaction>),
}

/// A request as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCall {
    pub request_id: RequestId,
    pub request: SyncRequest,
}

/// A response as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReply {
    pub request_id: RequestId,
    pub response: SyncResponse,
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a peer has to answer before it is reported.
    pub request_timeout_ms: u64,

    /// Maximum blocks returned per response. A full batch prompts the
    /// requester to ask again from its new tip.
    pub batch_size: usize,

    /// Maximum transactions returned per pool diff.
    pub max_pool_diff: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: SYNC_REQUEST_TIMEOUT_MS,
            batch_size: SYNC_BATCH_SIZE,
            max_pool_diff: SYNC_MAX_POOL_DIFF,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("sync.request_timeout_ms", self.request_timeout_ms)?;
        require_nonzero("sync.batch_size", self.batch_size)?;
        require_nonzero("sync.max_pool_diff", self.max_pool_diff)
    }
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

/// Why a response was not matched to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Never issued, already answered, or already timed out.
    UnknownRequest { request_id: RequestId },

    /// Answered by a peer other than the one asked.
    WrongPeer {
        request_id: RequestId,
        expected: PeerId,
        got: PeerId,
    },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownRequest { request_id } => {
                write!(f, "no pending request with id {}", request_id)
            }
            Self::WrongPeer {
                request_id,
                expected,
                got,
            } => write!(
                f,
                "request {} was sent to {} but answered by {}",
                request_id, expected, got
            ),
        }
    }
}

impl std::error::Error for SyncError {}

// ---------------------------------------------------------------------------
// Serving
// ---------------------------------------------------------------------------

/// Answers a request from local state. Read-only.
pub fn serve(request: &SyncRequest, chain: &Chain, pool: &Mempool, config: &SyncConfig) -> SyncResponse {
    match request {
        SyncRequest::Summary => SyncResponse::Summary(PeerSummary {
            chain: chain.summary(),
            pool_size: pool.len(),
        }),

        SyncRequest::BlocksAfter { locator } => {
            SyncResponse::Blocks(chain.blocks_after_locator(locator, config.batch_size))
        }

        SyncRequest::Blocks { ids } => {
            let mut blocks: Vec<Block> = ids
                .iter()
                .filter_map(|id| chain.block(id).cloned())
                .take(config.batch_size)
                .collect();
            blocks.sort_by_key(|b| b.height());
            SyncResponse::Blocks(blocks)
        }

        SyncRequest::PoolDiff { known } => {
            let known: std::collections::HashSet<&TxId> = known.iter().collect();
            SyncResponse::Transactions(
                pool.snapshot()
                    .into_iter()
                    .filter(|tx| !known.contains(&tx.id))
                    .take(config.max_pool_diff)
                    .collect(),
            )
        }
    }
}

/// Follow-up requests after comparing a peer's summary with local state.
///
/// Blocks are requested when the peer's tip differs and its work is not
/// lower; the pool diff when the pool sizes differ.
pub fn plan_followup(chain: &Chain, pool: &Mempool, remote: &PeerSummary) -> Vec<SyncRequest> {
    let local = chain.summary();
    let mut requests = Vec::new();

    if remote.chain.tip != local.tip && remote.chain.total_work >= local.total_work {
        requests.push(SyncRequest::BlocksAfter {
            locator: chain.locator(),
        });
    }
    if remote.pool_size != pool.len() {
        requests.push(SyncRequest::PoolDiff { known: pool.ids() });
    }
    requests
}

// ---------------------------------------------------------------------------
// Pending requests
// ---------------------------------------------------------------------------

/// A request waiting for its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub peer: PeerId,
    pub request: SyncRequest,
    pub deadline_ms: u64,
}

/// Issues request ids and tracks deadlines.
pub struct SyncTracker {
    timeout_ms: u64,
    next_id: AtomicU64,
    pending: DashMap<RequestId, PendingRequest>,
}

impl SyncTracker {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            timeout_ms: config.request_timeout_ms,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    /// Registers a request to `peer` and returns the call to send.
    pub fn begin(&self, peer: &PeerId, request: SyncRequest, now_ms: u64) -> SyncCall {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(peer = %peer, request_id, kind = request.kind(), "sync request");
        self.pending.insert(
            request_id,
            PendingRequest {
                peer: peer.clone(),
                request: request.clone(),
                deadline_ms: now_ms.saturating_add(self.timeout_ms),
            },
        );
        SyncCall {
            request_id,
            request,
        }
    }

    /// Matches a response to its request and stops tracking it.
    pub fn complete(&self, request_id: RequestId, from: &PeerId) -> Result<PendingRequest, SyncError> {
        let expected = match self.pending.get(&request_id) {
            Some(p) => p.peer.clone(),
            None => return Err(SyncError::UnknownRequest { request_id }),
        };
        if &expected != from {
            return Err(SyncError::WrongPeer {
                request_id,
                expected,
                got: from.clone(),
            });
        }
        self.pending
            .remove(&request_id)
            .map(|(_, p)| p)
            .ok_or(SyncError::UnknownRequest { request_id })
    }

    /// Removes and returns every request whose deadline has passed.
    pub fn expire(&self, now_ms: u64) -> Vec<(RequestId, PendingRequest)> {
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|e| e.deadline_ms <= now_ms)
            .map(|e| *e.key())
            .collect();
        let mut out: Vec<(RequestId, PendingRequest)> = expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pow::{mine, MiningSignal};
    use crate::consensus::producer::build_template;
    use crate::crypto::keys::Keypair;
    use crate::storage::chain::ChainConfig;
    use crate::storage::state::GenesisAllocation;
    use crate::transaction::signed_transfer;

    fn alice() -> Keypair {
        Keypair::from_seed(&[1u8; 32])
    }

    fn chain_config() -> ChainConfig {
        ChainConfig {
            initial_difficulty: 1,
            difficulty_window: 1_000,
            genesis_allocations: vec![GenesisAllocation {
                address: alice().address(),
                amount: 100,
            }],
            ..ChainConfig::default()
        }
    }

    fn extend(chain: &mut Chain, n: usize) {
        let miner = Keypair::from_seed(&[9u8; 32]).address();
        for _ in 0..n {
            let template = build_template(chain, &Mempool::default(), &miner);
            let block = mine(template.block, &MiningSignal::new().ticket(), 64).unwrap();
            chain.try_add(block).unwrap();
        }
    }

    fn peer(name: &str) -> PeerId {
        name.to_string()
    }

    // -- Serving --

    #[test]
    fn summary_reports_tip_and_pool() {
        let chain = Chain::new(chain_config());
        let pool = Mempool::default();
        pool.submit(signed_transfer(&alice(), &"x".repeat(64), 1, 1)).ok();

        match serve(&SyncRequest::Summary, &chain, &pool, &SyncConfig::default()) {
            SyncResponse::Summary(s) => {
                assert_eq!(s.chain, chain.summary());
                assert_eq!(s.pool_size, pool.len());
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn blocks_after_locator_fills_the_gap() {
        let mut ahead = Chain::new(chain_config());
        let behind = Chain::new(chain_config());
        extend(&mut ahead, 5);

        let request = SyncRequest::BlocksAfter {
            locator: behind.locator(),
        };
        let config = SyncConfig {
            batch_size: 3,
            ..SyncConfig::default()
        };
        match serve(&request, &ahead, &Mempool::default(), &config) {
            SyncResponse::Blocks(blocks) => {
                let heights: Vec<u64> = blocks.iter().map(|b| b.height()).collect();
                assert_eq!(heights, vec![1, 2, 3]);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn unknown_block_ids_are_skipped() {
        let mut chain = Chain::new(chain_config());
        extend(&mut chain, 2);
        let known = chain.tip_id();
        let request = SyncRequest::Blocks {
            ids: vec![crate::crypto::hash::Hash256([7; 32]), known],
        };
        match serve(&request, &chain, &Mempool::default(), &SyncConfig::default()) {
            SyncResponse::Blocks(blocks) => {
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].id(), known);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn pool_diff_excludes_known() {
        let chain = Chain::new(chain_config());
        let pool = Mempool::default();
        let bob = Keypair::from_seed(&[2u8; 32]).address();
        let a = signed_transfer(&alice(), &bob, 1, 1);
        let b = signed_transfer(&alice(), &bob, 1, 2);
        pool.submit(a.clone()).unwrap();
        pool.submit(b.clone()).unwrap();

        let request = SyncRequest::PoolDiff { known: vec![a.id] };
        assert_eq!(
            serve(&request, &chain, &pool, &SyncConfig::default()),
            SyncResponse::Transactions(vec![b])
        );
    }

    // -- Planning --

    #[test]
    fn identical_state_needs_nothing() {
        let chain = Chain::new(chain_config());
        let pool = Mempool::default();
        let remote = PeerSummary {
            chain: chain.summary(),
            pool_size: 0,
        };
        assert!(plan_followup(&chain, &pool, &remote).is_empty());
    }

    #[test]
    fn heavier_peer_triggers_block_fetch() {
        let mut ahead = Chain::new(chain_config());
        extend(&mut ahead, 2);
        let behind = Chain::new(chain_config());
        let remote = PeerSummary {
            chain: ahead.summary(),
            pool_size: 0,
        };
        let plan = plan_followup(&behind, &Mempool::default(), &remote);
        assert_eq!(
            plan,
            vec![SyncRequest::BlocksAfter {
                locator: behind.locator()
            }]
        );

        let plan = plan_followup(
            &ahead,
            &Mempool::default(),
            &PeerSummary {
                chain: behind.summary(),
                pool_size: 0,
            },
        );
        assert!(plan.is_empty(), "never fetch from a lighter peer");
    }

    #[test]
    fn pool_size_mismatch_triggers_diff() {
        let chain = Chain::new(chain_config());
        let remote = PeerSummary {
            chain: chain.summary(),
            pool_size: 4,
        };
        assert!(matches!(
            plan_followup(&chain, &Mempool::default(), &remote).as_slice(),
            [SyncRequest::PoolDiff { .. }]
        ));
    }

    // -- Tracking --

    #[test]
    fn responses_are_matched_by_id_and_peer() {
        let tracker = SyncTracker::new(&SyncConfig::default());
        let call = tracker.begin(&peer("a"), SyncRequest::Summary, 0);

        assert!(matches!(
            tracker.complete(call.request_id, &peer("b")),
            Err(SyncError::WrongPeer { .. })
        ));
        let pending = tracker.complete(call.request_id, &peer("a")).unwrap();
        assert_eq!(pending.request, SyncRequest::Summary);
        assert_eq!(
            tracker.complete(call.request_id, &peer("a")),
            Err(SyncError::UnknownRequest {
                request_id: call.request_id
            })
        );
    }

    #[test]
    fn requests_expire_after_the_timeout() {
        let tracker = SyncTracker::new(&SyncConfig {
            request_timeout_ms: 100,
            ..SyncConfig::default()
        });
        let first = tracker.begin(&peer("a"), SyncRequest::Summary, 0);
        tracker.begin(&peer("b"), SyncRequest::Summary, 50);

        assert!(tracker.expire(99).is_empty());
        let expired = tracker.expire(100);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, first.request_id);
        assert_eq!(expired[0].1.peer, "a");
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn request_ids_are_unique() {
        let tracker = SyncTracker::new(&SyncConfig::default());
        let a = tracker.begin(&peer("a"), SyncRequest::Summary, 0);
        let b = tracker.begin(&peer("a"), SyncRequest::Summary, 0);
        assert_ne!(a.request_id, b.request_id);
    }
}
