//! # Block Template Pipeline
//!
//! Turns "a bunch of pending transactions" into "an unmined block that will
//! pass validation once a nonce is found."
//!
//! ## Pipeline Stages
//!
//! ```text
//! 1. SELECT   — Pull pending transactions from the pool, oldest first
//! 2. EXECUTE  — Apply each to a scratch copy of the tip ledger; drop failures
//! 3. BUILD    — Construct the header on top of the canonical tip
//! 4. MINE     — Search for a nonce (see `pow::mine`)
//! ```
//!
//! Failed transactions are skipped, not removed. A transaction that skips
//! ahead of its sender's nonce may become valid once the earlier one lands;
//! a transaction that is truly stale is cleared by
//! [`Mempool::evict_conflicting`] when the tip moves.
//!
//! Execution makes repeated passes so that transactions from one sender that
//! arrived out of nonce order still land in the same block.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{require_nonzero, ConfigError, MINING_POLL_INTERVAL};
use crate::network::mempool::Mempool;
use crate::storage::block::Block;
use crate::storage::chain::Chain;
use crate::storage::state::{BlockUndo, LedgerError};
use crate::transaction::{verify_transaction_at, Transaction, TxId};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Whether this node mines at all.
    pub enabled: bool,
    /// Nonce attempts between cancellation checks.
    pub poll_interval: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval: MINING_POLL_INTERVAL,
        }
    }
}

impl MiningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("mining.poll_interval", self.poll_interval)
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A transaction left out of a template, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTransaction {
    pub tx_id: TxId,
    pub reason: String,
}

/// An unmined block plus what was left out of it.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    pub skipped: Vec<SkippedTransaction>,
}

/// Builds a template on the canonical tip of `chain` paying `miner`.
pub fn build_template(chain: &Chain, pool: &Mempool, miner: &str) -> BlockTemplate {
    build_template_at(chain, pool, miner, Utc::now().timestamp_millis() as u64)
}

/// [`build_template`] with an explicit clock.
pub fn build_template_at(chain: &Chain, pool: &Mempool, miner: &str, now_ms: u64) -> BlockTemplate {
    let parent = chain.current_tip();
    let timestamp = now_ms.max(parent.header.timestamp);
    let max_txs = chain.config().max_block_transactions;

    let mut ledger = chain.ledger().clone();
    let mut undo = BlockUndo::default();
    let mut included: Vec<Transaction> = Vec::new();
    let mut skipped = Vec::new();
    let mut pending: Vec<(Transaction, Option<LedgerError>)> = Vec::new();

    for tx in pool.snapshot() {
        match verify_transaction_at(&tx, timestamp) {
            Ok(()) => pending.push((tx, None)),
            Err(e) => skipped.push(SkippedTransaction {
                tx_id: tx.id,
                reason: e.to_string(),
            }),
        }
    }

    loop {
        let before = included.len();
        let mut retry = Vec::new();
        for (tx, _) in pending {
            if included.len() >= max_txs {
                retry.push((tx, None));
                continue;
            }
            match ledger.apply_transaction(&tx, &mut undo) {
                Ok(()) => included.push(tx),
                Err(e) => retry.push((tx, Some(e))),
            }
        }
        pending = retry;
        if included.len() == before || included.len() >= max_txs || pending.is_empty() {
            break;
        }
    }

    skipped.extend(pending.into_iter().map(|(tx, err)| SkippedTransaction {
        tx_id: tx.id,
        reason: err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "block full".to_string()),
    }));

    debug!(
        height = parent.height() + 1,
        included = included.len(),
        skipped = skipped.len(),
        "built block template"
    );

    let block = Block::template(
        &parent.header,
        included,
        miner.to_string(),
        timestamp,
        chain.next_difficulty(),
    );
    BlockTemplate { block, skipped }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pow::{mine, MiningSignal};
    use crate::crypto::keys::Keypair;
    use crate::storage::chain::{AddOutcome, ChainConfig};
    use crate::storage::state::GenesisAllocation;
    use crate::transaction::signed_transfer;

    fn alice() -> Keypair {
        Keypair::from_seed(&[1u8; 32])
    }

    fn bob() -> String {
        Keypair::from_seed(&[2u8; 32]).address()
    }

    fn miner() -> String {
        Keypair::from_seed(&[9u8; 32]).address()
    }

    fn chain() -> Chain {
        Chain::new(ChainConfig {
            initial_difficulty: 1,
            difficulty_window: 1_000,
            max_block_transactions: 3,
            genesis_allocations: vec![GenesisAllocation {
                address: alice().address(),
                amount: 10,
            }],
            ..ChainConfig::default()
        })
    }

    #[test]
    fn template_is_accepted_once_mined() {
        let mut chain = chain();
        let pool = Mempool::default();
        pool.submit(signed_transfer(&alice(), &bob(), 4, 1)).unwrap();

        let template = build_template(&chain, &pool, &miner());
        assert_eq!(template.block.tx_count(), 1);
        assert_eq!(template.block.parent_id(), chain.tip_id());

        let block = mine(template.block, &MiningSignal::new().ticket(), 256).unwrap();
        assert!(matches!(
            chain.try_add(block).unwrap(),
            AddOutcome::Attached { .. }
        ));
        assert_eq!(chain.balance_of(&bob()), 4);
    }

    #[test]
    fn out_of_order_nonces_still_land() {
        let chain = chain();
        let pool = Mempool::default();
        pool.submit(signed_transfer(&alice(), &bob(), 1, 2)).unwrap();
        pool.submit(signed_transfer(&alice(), &bob(), 1, 1)).unwrap();

        let template = build_template(&chain, &pool, &miner());
        let nonces: Vec<u64> = template.block.transactions.iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![1, 2]);
        assert!(template.skipped.is_empty());
    }

    #[test]
    fn conflicting_and_unfunded_transactions_are_skipped() {
        let chain = chain();
        let pool = Mempool::default();
        let keep = signed_transfer(&alice(), &bob(), 6, 1);
        let conflict = signed_transfer(&alice(), &bob(), 7, 1);
        let overspend = signed_transfer(&alice(), &bob(), 5, 2);
        for tx in [&keep, &conflict, &overspend] {
            pool.submit(tx.clone()).unwrap();
        }

        let template = build_template(&chain, &pool, &miner());
        assert_eq!(template.block.transactions, vec![keep]);
        let skipped: Vec<TxId> = template.skipped.iter().map(|s| s.tx_id).collect();
        assert!(skipped.contains(&conflict.id));
        assert!(skipped.contains(&overspend.id));
    }

    #[test]
    fn block_size_is_capped() {
        let chain = chain();
        let pool = Mempool::default();
        for nonce in 1..=5 {
            pool.submit(signed_transfer(&alice(), &bob(), 1, nonce)).unwrap();
        }
        let template = build_template(&chain, &pool, &miner());
        assert_eq!(template.block.tx_count(), 3);
        assert_eq!(template.skipped.len(), 2);
    }

    #[test]
    fn timestamp_never_precedes_parent() {
        let chain = Chain::new(ChainConfig {
            genesis_timestamp: 5_000,
            initial_difficulty: 1,
            ..ChainConfig::default()
        });
        let template = build_template_at(&chain, &Mempool::default(), &miner(), 1_000);
        assert_eq!(template.block.header.timestamp, 5_000);
    }
}
