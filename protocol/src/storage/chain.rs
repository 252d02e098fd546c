//! # Block Tree and Fork Choice
//!
//! [`Chain`] holds every valid block it has seen, arranged as a tree rooted at
//! genesis. The canonical chain is the branch with the most cumulative work;
//! equal work is broken by the lexicographically smaller tip id so every
//! node picks the same tip from the same set of blocks.
//!
//! ```text
//!            ┌── b2 ── b3          (side branch, kept)
//! genesis ── b1
//!            └── b2' ── b3' ── b4' (canonical, most work)
//! ```
//!
//! ## Ledger
//!
//! The ledger at the canonical tip is cached. Each indexed block keeps the
//! undo record produced when it was applied, so the ledger at any other
//! block is found by reverting canonical blocks down to the fork point and
//! replaying the side branch on a copy.
//!
//! ## Orphans
//!
//! Blocks whose parent is unknown wait in a bounded buffer keyed by the
//! missing parent. When the parent arrives every waiting descendant is
//! attached in breadth-first order. A full buffer evicts its oldest entry.
//!
//! ## Determinism
//!
//! Nothing here depends on arrival order except which orphans get evicted:
//! the final tip, canonical sequence and ledger are a function of the set of
//! blocks attached.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{
    require_nonzero, ConfigError, BLOCK_REWARD, DIFFICULTY_WINDOW, INITIAL_DIFFICULTY,
    MAX_DIFFICULTY_ADJUSTMENT, MAX_FUTURE_BLOCK_DRIFT_MS, MAX_TRANSACTIONS_PER_BLOCK,
    ORPHAN_CAPACITY, TARGET_BLOCK_INTERVAL_MS,
};
use crate::consensus::pow::{block_work, meets_target, next_difficulty};
use crate::storage::block::{Block, BlockHeader, BlockId};
use crate::storage::state::{AccountState, BlockUndo, GenesisAllocation, Ledger, LedgerError};
use crate::transaction::verification::is_well_formed_address;
use crate::transaction::{verify_transaction_at, Transaction, TransactionError, TxId};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Consensus parameters. Every node on a network must use identical values;
/// they are folded into the genesis block so mismatches fail loudly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Difficulty of genesis and of every block before the first retarget.
    pub initial_difficulty: u64,
    /// Desired spacing between blocks, in milliseconds.
    pub target_block_interval_ms: u64,
    /// Retarget every this many blocks.
    pub difficulty_window: u64,
    /// Largest factor by which one retarget may move the difficulty.
    pub max_adjustment_factor: u64,
    /// How far past the local clock a block timestamp may be.
    pub max_future_drift_ms: u64,
    /// Blocks held while waiting for their parent.
    pub orphan_capacity: usize,
    /// Largest number of transactions in one block.
    pub max_block_transactions: usize,
    /// Credited to the miner of each block.
    pub block_reward: u64,
    /// Genesis timestamp, Unix milliseconds.
    pub genesis_timestamp: u64,
    /// Balances that exist before the first block.
    pub genesis_allocations: Vec<GenesisAllocation>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            initial_difficulty: INITIAL_DIFFICULTY,
            target_block_interval_ms: TARGET_BLOCK_INTERVAL_MS,
            difficulty_window: DIFFICULTY_WINDOW,
            max_adjustment_factor: MAX_DIFFICULTY_ADJUSTMENT,
            max_future_drift_ms: MAX_FUTURE_BLOCK_DRIFT_MS,
            orphan_capacity: ORPHAN_CAPACITY,
            max_block_transactions: MAX_TRANSACTIONS_PER_BLOCK,
            block_reward: BLOCK_REWARD,
            genesis_timestamp: 0,
            genesis_allocations: Vec::new(),
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("chain.initial_difficulty", self.initial_difficulty)?;
        require_nonzero("chain.target_block_interval_ms", self.target_block_interval_ms)?;
        require_nonzero("chain.difficulty_window", self.difficulty_window)?;
        require_nonzero("chain.max_adjustment_factor", self.max_adjustment_factor)?;
        require_nonzero("chain.orphan_capacity", self.orphan_capacity)?;
        require_nonzero("chain.max_block_transactions", self.max_block_transactions)?;

        if let Some(bad) = self
            .genesis_allocations
            .iter()
            .find(|a| !is_well_formed_address(&a.address))
        {
            return Err(ConfigError::Invalid {
                field: "chain.genesis_allocations",
                reason: format!("malformed address {}", bad.address),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Why a block was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("malformed block: {0}")]
    MalformedBlock(String),

    #[error("block {block} does not meet difficulty {difficulty}")]
    BadProofOfWork { block: BlockId, difficulty: u64 },

    #[error("bad timestamp: {0}")]
    BadTimestamp(String),

    #[error("bad difficulty: expected {expected}, got {actual}")]
    BadDifficulty { expected: u64, actual: u64 },

    #[error("double spend by transaction {tx}: {reason}")]
    DoubleSpend { tx: TxId, reason: LedgerError },

    #[error("invalid signature on transaction {tx}")]
    InvalidSignature { tx: TxId },

    #[error("malformed transaction {tx}: {reason}")]
    MalformedTransaction { tx: TxId, reason: TransactionError },
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A full orphan buffer dropped its oldest block to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanBufferFull {
    pub evicted: BlockId,
}

/// A change of canonical tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipChange {
    pub old_tip: BlockId,
    pub new_tip: BlockId,
    /// Blocks removed from the canonical chain, old tip first.
    pub rolled_back: Vec<Block>,
    /// Blocks added to the canonical chain, lowest height first.
    pub applied: Vec<Block>,
}

impl TipChange {
    pub fn is_reorg(&self) -> bool {
        !self.rolled_back.is_empty()
    }
}

/// Result of [`Chain::try_add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The block is already indexed. Nothing changed.
    AlreadyKnown,
    /// The parent is unknown; the block is buffered until it arrives.
    Orphaned {
        missing_parent: BlockId,
        overflow: Option<OrphanBufferFull>,
    },
    /// The block and any orphans waiting on it were indexed.
    Attached {
        /// Every block indexed by this call, in attachment order.
        attached: Vec<BlockId>,
        /// Buffered orphans that failed validation once their parent arrived.
        rejected_orphans: Vec<(BlockId, ChainError)>,
        tip_change: Option<TipChange>,
    },
}

/// Compact view of the canonical chain exchanged during anti-entropy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSummary {
    pub tip: BlockId,
    pub height: u64,
    pub total_work: u128,
}

/// A transaction as recorded on the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub block: BlockId,
    pub height: u64,
    pub transaction: Transaction,
}

// ---------------------------------------------------------------------------
// Orphan Buffer
// ---------------------------------------------------------------------------

struct OrphanBuffer {
    capacity: usize,
    blocks: HashMap<BlockId, Block>,
    by_parent: HashMap<BlockId, Vec<BlockId>>,
    arrival: VecDeque<BlockId>,
}

impl OrphanBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            blocks: HashMap::new(),
            by_parent: HashMap::new(),
            arrival: VecDeque::new(),
        }
    }

    fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn insert(&mut self, block: Block) -> Option<OrphanBufferFull> {
        let mut overflow = None;
        while self.blocks.len() >= self.capacity {
            match self.evict_oldest() {
                Some(evicted) => overflow = Some(OrphanBufferFull { evicted }),
                None => break,
            }
        }

        let id = block.id();
        self.by_parent.entry(block.parent_id()).or_default().push(id);
        self.arrival.push_back(id);
        self.blocks.insert(id, block);
        overflow
    }

    fn evict_oldest(&mut self) -> Option<BlockId> {
        while let Some(id) = self.arrival.pop_front() {
            if let Some(block) = self.blocks.remove(&id) {
                self.unlink(&block.parent_id(), &id);
                return Some(id);
            }
        }
        None
    }

    fn unlink(&mut self, parent: &BlockId, id: &BlockId) {
        if let Some(children) = self.by_parent.get_mut(parent) {
            children.retain(|c| c != id);
            if children.is_empty() {
                self.by_parent.remove(parent);
            }
        }
    }

    /// Removes and returns every orphan waiting on `parent`, in arrival order.
    fn take_children(&mut self, parent: &BlockId) -> Vec<Block> {
        let ids = self.by_parent.remove(parent).unwrap_or_default();
        let taken: Vec<Block> = ids.iter().filter_map(|id| self.blocks.remove(id)).collect();
        if self.arrival.len() > self.capacity * 2 {
            let blocks = &self.blocks;
            self.arrival.retain(|id| blocks.contains_key(id));
        }
        taken
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

struct BlockEntry {
    block: Block,
    cumulative_work: u128,
    undo: BlockUndo,
}

/// The block tree, canonical chain and canonical ledger.
pub struct Chain {
    config: ChainConfig,
    genesis_id: BlockId,
    index: HashMap<BlockId, BlockEntry>,
    /// Blocks with no indexed children.
    leaves: HashSet<BlockId>,
    /// Canonical block ids by height.
    canonical: Vec<BlockId>,
    /// Ledger after applying the canonical tip.
    ledger: Ledger,
    orphans: OrphanBuffer,
}

impl Chain {
    /// A chain holding only the genesis block derived from `config`.
    pub fn new(config: ChainConfig) -> Self {
        let genesis = Block::genesis(
            config.genesis_timestamp,
            config.initial_difficulty,
            &config.genesis_allocations,
        );
        let genesis_id = genesis.id();
        let ledger = Ledger::from_allocations(&config.genesis_allocations);

        let mut index = HashMap::new();
        index.insert(
            genesis_id,
            BlockEntry {
                block: genesis,
                cumulative_work: 0,
                undo: BlockUndo::default(),
            },
        );

        info!(genesis = %genesis_id.short(), "chain initialised");

        Self {
            orphans: OrphanBuffer::new(config.orphan_capacity),
            config,
            genesis_id,
            index,
            leaves: HashSet::from([genesis_id]),
            canonical: vec![genesis_id],
            ledger,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    // -- Insertion --

    /// Validates `block` and adds it to the tree.
    ///
    /// Returns [`AddOutcome::AlreadyKnown`] for duplicates,
    /// [`AddOutcome::Orphaned`] when the parent is missing, and
    /// [`AddOutcome::Attached`] otherwise. A rejected block leaves the chain
    /// untouched.
    pub fn try_add(&mut self, block: Block) -> Result<AddOutcome, ChainError> {
        let id = block.id();
        if self.index.contains_key(&id) {
            return Ok(AddOutcome::AlreadyKnown);
        }
        if self.orphans.contains(&id) {
            return Ok(AddOutcome::Orphaned {
                missing_parent: block.parent_id(),
                overflow: None,
            });
        }

        self.check_integrity(&block)?;

        let parent = block.parent_id();
        if !self.index.contains_key(&parent) {
            let overflow = self.orphans.insert(block);
            if let Some(full) = overflow {
                warn!(
                    evicted = %full.evicted.short(),
                    capacity = self.config.orphan_capacity,
                    "orphan buffer full, evicted oldest"
                );
            }
            debug!(block = %id.short(), parent = %parent.short(), "buffered orphan");
            return Ok(AddOutcome::Orphaned {
                missing_parent: parent,
                overflow,
            });
        }

        let old_tip = self.tip_id();
        self.attach(block)?;

        let mut attached = vec![id];
        let mut rejected_orphans = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(parent) = queue.pop_front() {
            for child in self.orphans.take_children(&parent) {
                let child_id = child.id();
                if self.index.contains_key(&child_id) {
                    continue;
                }
                match self.attach(child) {
                    Ok(()) => {
                        attached.push(child_id);
                        queue.push_back(child_id);
                    }
                    Err(e) => {
                        warn!(block = %child_id.short(), error = %e, "rejected buffered orphan");
                        rejected_orphans.push((child_id, e));
                    }
                }
            }
        }

        let tip_change = (self.tip_id() != old_tip).then(|| self.tip_change_from(old_tip));
        if let Some(change) = &tip_change {
            info!(
                tip = %change.new_tip.short(),
                height = self.height(),
                rolled_back = change.rolled_back.len(),
                applied = change.applied.len(),
                "canonical tip changed"
            );
        }

        Ok(AddOutcome::Attached {
            attached,
            rejected_orphans,
            tip_change,
        })
    }

    /// Checks that depend only on the block itself.
    fn check_integrity(&self, block: &Block) -> Result<(), ChainError> {
        if block.height() == 0 {
            return Err(ChainError::MalformedBlock(
                "only genesis may have height 0".into(),
            ));
        }
        if block.header.difficulty == 0 {
            return Err(ChainError::MalformedBlock("zero difficulty".into()));
        }
        block.verify().map_err(ChainError::MalformedBlock)?;
        if block.tx_count() > self.config.max_block_transactions {
            return Err(ChainError::MalformedBlock(format!(
                "{} transactions exceeds limit {}",
                block.tx_count(),
                self.config.max_block_transactions
            )));
        }
        if !is_well_formed_address(&block.header.miner) {
            return Err(ChainError::MalformedBlock(format!(
                "malformed miner address {}",
                block.header.miner
            )));
        }
        if !meets_target(&block.id(), block.header.difficulty) {
            return Err(ChainError::BadProofOfWork {
                block: block.id(),
                difficulty: block.header.difficulty,
            });
        }
        Ok(())
    }

    /// Checks that depend on the parent.
    fn check_context(&self, block: &Block, parent: &BlockHeader) -> Result<(), ChainError> {
        if block.height() != parent.height + 1 {
            return Err(ChainError::MalformedBlock(format!(
                "height {} does not follow parent height {}",
                block.height(),
                parent.height
            )));
        }

        if block.header.timestamp < parent.timestamp {
            return Err(ChainError::BadTimestamp(format!(
                "timestamp {} precedes parent timestamp {}",
                block.header.timestamp, parent.timestamp
            )));
        }
        let now = Utc::now().timestamp_millis() as u64;
        let limit = now.saturating_add(self.config.max_future_drift_ms);
        if block.header.timestamp > limit {
            return Err(ChainError::BadTimestamp(format!(
                "timestamp {} is more than {}ms ahead of local clock {}",
                block.header.timestamp, self.config.max_future_drift_ms, now
            )));
        }

        let expected = self.difficulty_after(&parent.hash);
        if block.header.difficulty != expected {
            return Err(ChainError::BadDifficulty {
                expected,
                actual: block.header.difficulty,
            });
        }

        for tx in &block.transactions {
            verify_transaction_at(tx, block.header.timestamp).map_err(|reason| {
                if reason.is_signature_failure() {
                    ChainError::InvalidSignature { tx: tx.id }
                } else {
                    ChainError::MalformedTransaction { tx: tx.id, reason }
                }
            })?;
        }
        Ok(())
    }

    /// Validates against the parent, applies to the parent's ledger, indexes,
    /// and moves the canonical tip if the new branch wins.
    fn attach(&mut self, block: Block) -> Result<(), ChainError> {
        let parent_id = block.parent_id();
        let (parent_header, parent_work) = {
            let parent = &self.index[&parent_id];
            (parent.block.header.clone(), parent.cumulative_work)
        };
        self.check_context(&block, &parent_header)?;

        let id = block.id();
        let work = parent_work + block_work(block.header.difficulty);
        let extends_tip = parent_id == self.tip_id();
        let reward = self.config.block_reward;

        let (undo, branch_ledger) = if extends_tip {
            let undo = self
                .ledger
                .apply_block(&block, reward)
                .map_err(|(i, e)| ledger_rejection(&block, i, e))?;
            (undo, None)
        } else {
            let mut scratch = self.ledger_at(&parent_id)?;
            let undo = scratch
                .apply_block(&block, reward)
                .map_err(|(i, e)| ledger_rejection(&block, i, e))?;
            (undo, Some(scratch))
        };

        debug!(
            block = %id.short(),
            height = block.height(),
            txs = block.tx_count(),
            "indexed block"
        );

        self.index.insert(
            id,
            BlockEntry {
                block,
                cumulative_work: work,
                undo,
            },
        );
        self.leaves.remove(&parent_id);
        self.leaves.insert(id);

        match branch_ledger {
            None => self.canonical.push(id),
            Some(ledger) => {
                if self.is_better(work, &id) {
                    self.switch_to(id, ledger);
                }
            }
        }
        Ok(())
    }

    fn is_better(&self, work: u128, id: &BlockId) -> bool {
        let tip_work = self.total_work();
        work > tip_work || (work == tip_work && *id < self.tip_id())
    }

    /// Makes `new_tip` canonical with `ledger` as its state.
    fn switch_to(&mut self, new_tip: BlockId, ledger: Ledger) {
        let (fork, branch) = self.branch_to_canonical(&new_tip);
        let fork_height = self.index[&fork].block.height() as usize;
        self.canonical.truncate(fork_height + 1);
        self.canonical.extend(branch.into_iter().rev());
        self.ledger = ledger;
    }

    /// Walks back from `id` to the canonical chain. Returns the fork point
    /// and the non-canonical ids visited, `id` first.
    fn branch_to_canonical(&self, id: &BlockId) -> (BlockId, Vec<BlockId>) {
        let mut branch = Vec::new();
        let mut cursor = *id;
        while !self.is_canonical(&cursor) {
            branch.push(cursor);
            cursor = self.index[&cursor].block.parent_id();
        }
        (cursor, branch)
    }

    /// The ledger after applying `id`, which must be indexed.
    fn ledger_at(&self, id: &BlockId) -> Result<Ledger, ChainError> {
        let (fork, branch) = self.branch_to_canonical(id);
        let fork_height = self.index[&fork].block.height() as usize;

        let mut ledger = self.ledger.clone();
        for canonical_id in self.canonical[fork_height + 1..].iter().rev() {
            ledger.revert(&self.index[canonical_id].undo);
        }
        for branch_id in branch.iter().rev() {
            let block = &self.index[branch_id].block;
            ledger
                .apply_block(block, self.config.block_reward)
                .map_err(|(i, e)| ledger_rejection(block, i, e))?;
        }
        Ok(ledger)
    }

    /// Builds the tip change from `old_tip` to the current tip.
    fn tip_change_from(&self, old_tip: BlockId) -> TipChange {
        let (fork, rolled_back_ids) = self.branch_to_canonical(&old_tip);
        let fork_height = self.index[&fork].block.height() as usize;

        TipChange {
            old_tip,
            new_tip: self.tip_id(),
            rolled_back: rolled_back_ids
                .iter()
                .map(|id| self.index[id].block.clone())
                .collect(),
            applied: self.canonical[fork_height + 1..]
                .iter()
                .map(|id| self.index[id].block.clone())
                .collect(),
        }
    }

    // -- Difficulty --

    /// Difficulty required of a child of `parent`.
    fn difficulty_after(&self, parent: &BlockId) -> u64 {
        let parent_entry = &self.index[parent];
        let current = parent_entry.block.header.difficulty;
        let height = parent_entry.block.height() + 1;
        if height % self.config.difficulty_window != 0 {
            return current;
        }

        // Timestamps of up to `window + 1` ancestors, excluding genesis.
        let mut timestamps = Vec::new();
        let mut cursor = Some(parent_entry);
        while let Some(entry) = cursor {
            if entry.block.height() == 0 || timestamps.len() as u64 > self.config.difficulty_window {
                break;
            }
            timestamps.push(entry.block.header.timestamp);
            cursor = self.index.get(&entry.block.parent_id());
        }
        timestamps.reverse();

        next_difficulty(
            current,
            &timestamps,
            self.config.target_block_interval_ms,
            self.config.max_adjustment_factor,
        )
    }

    /// Difficulty required of the next block on the canonical tip.
    pub fn next_difficulty(&self) -> u64 {
        self.difficulty_after(&self.tip_id())
    }

    // -- Queries --

    pub fn genesis_id(&self) -> BlockId {
        self.genesis_id
    }

    pub fn tip_id(&self) -> BlockId {
        *self.canonical.last().unwrap_or(&self.genesis_id)
    }

    /// The canonical tip block.
    pub fn current_tip(&self) -> &Block {
        &self.index[&self.tip_id()].block
    }

    pub fn height(&self) -> u64 {
        self.canonical.len() as u64 - 1
    }

    /// Cumulative work of the canonical tip.
    pub fn total_work(&self) -> u128 {
        self.index[&self.tip_id()].cumulative_work
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.index.contains_key(id)
    }

    /// Whether `id` is indexed or waiting in the orphan buffer.
    pub fn has_seen(&self, id: &BlockId) -> bool {
        self.index.contains_key(id) || self.orphans.contains(id)
    }

    pub fn block(&self, id: &BlockId) -> Option<&Block> {
        self.index.get(id).map(|e| &e.block)
    }

    pub fn is_canonical(&self, id: &BlockId) -> bool {
        self.index
            .get(id)
            .map(|e| self.canonical.get(e.block.height() as usize) == Some(id))
            .unwrap_or(false)
    }

    pub fn block_at_height(&self, height: u64) -> Option<&Block> {
        self.canonical
            .get(height as usize)
            .and_then(|id| self.block(id))
    }

    /// Canonical blocks after `id`, lowest first. `None` if `id` is not on
    /// the canonical chain.
    pub fn blocks_since(&self, id: &BlockId) -> Option<Vec<Block>> {
        if !self.is_canonical(id) {
            return None;
        }
        let height = self.index[id].block.height() as usize;
        Some(
            self.canonical[height + 1..]
                .iter()
                .map(|id| self.index[id].block.clone())
                .collect(),
        )
    }

    /// Canonical blocks after the highest locator entry this chain also has
    /// on its canonical branch, at most `limit`. Falls back to genesis.
    pub fn blocks_after_locator(&self, locator: &[BlockId], limit: usize) -> Vec<Block> {
        let start = locator
            .iter()
            .find(|id| self.is_canonical(id))
            .map(|id| self.index[id].block.height() as usize)
            .unwrap_or(0);
        self.canonical[start + 1..]
            .iter()
            .take(limit)
            .map(|id| self.index[id].block.clone())
            .collect()
    }

    /// Canonical ids at exponentially spaced heights back from the tip,
    /// always ending with genesis.
    pub fn locator(&self) -> Vec<BlockId> {
        let mut locator = Vec::new();
        let mut height = self.height() as i64;
        let mut step = 1i64;
        while height > 0 {
            locator.push(self.canonical[height as usize]);
            if locator.len() >= 10 {
                step *= 2;
            }
            height -= step;
        }
        locator.push(self.genesis_id);
        locator
    }

    /// Ids of every indexed block with no indexed child.
    pub fn tips(&self) -> Vec<BlockId> {
        let mut tips: Vec<BlockId> = self.leaves.iter().copied().collect();
        tips.sort();
        tips
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            tip: self.tip_id(),
            height: self.height(),
            total_work: self.total_work(),
        }
    }

    // -- Ledger --

    /// The ledger at the canonical tip.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn account(&self, address: &str) -> AccountState {
        self.ledger.get(address)
    }

    pub fn balance_of(&self, address: &str) -> u64 {
        self.ledger.balance_of(address)
    }

    pub fn nonce_of(&self, address: &str) -> u64 {
        self.ledger.nonce_of(address)
    }

    /// Canonical transactions sent or received by `address`, oldest first.
    pub fn transaction_history(&self, address: &str) -> Vec<TransactionRecord> {
        self.canonical
            .iter()
            .map(|id| &self.index[id].block)
            .flat_map(|block| {
                block
                    .transactions
                    .iter()
                    .filter(|tx| tx.sender == address || tx.recipient == address)
                    .map(move |tx| TransactionRecord {
                        block: block.id(),
                        height: block.height(),
                        transaction: tx.clone(),
                    })
            })
            .collect()
    }

    /// Whether the canonical chain contains transaction `id`.
    pub fn contains_transaction(&self, id: &TxId) -> bool {
        self.canonical
            .iter()
            .any(|b| self.index[b].block.transactions.iter().any(|tx| tx.id == *id))
    }
}

fn ledger_rejection(block: &Block, index: usize, reason: LedgerError) -> ChainError {
    match block.transactions.get(index) {
        Some(tx) if reason.is_double_spend() => ChainError::DoubleSpend { tx: tx.id, reason },
        Some(tx) => ChainError::MalformedBlock(format!("transaction {}: {}", tx.id, reason)),
        None => ChainError::MalformedBlock(format!("block reward: {}", reason)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
