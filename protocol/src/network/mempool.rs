//! Oldest-first transaction pool.
//!
//! Thread-safe pool for verified transactions awaiting block inclusion.
//! Transactions are indexed by id for O(1) lookups and by arrival sequence
//! in a B-tree so miners always take the oldest first.
//!
//! ## Design
//!
//! - `DashMap` provides lock-free concurrent reads for the hot path (API
//!   queries, duplicate detection during gossip).
//! - `parking_lot::RwLock<BTreeMap>` protects the arrival index. The
//!   sequence number is unique per pool, so it doubles as the key.
//! - A full pool evicts its oldest entry to make room. Nothing is ever
//!   rejected for capacity.
//! - The pool does no double-spend checks on entry. After the canonical tip
//!   moves, [`Mempool::evict_conflicting`] drops everything whose nonce the
//!   new ledger has already consumed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{require_nonzero, ConfigError, MEMPOOL_CAPACITY, MEMPOOL_MAX_AGE_MS};
use crate::storage::state::Ledger;
use crate::transaction::{verify_transaction_at, Transaction, TransactionError, TxId};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for pool behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum number of transactions the pool will hold.
    pub capacity: usize,

    /// Milliseconds after which a pending transaction is dropped by
    /// [`Mempool::expire`].
    pub max_age_ms: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            capacity: MEMPOOL_CAPACITY,
            max_age_ms: MEMPOOL_MAX_AGE_MS,
        }
    }
}

impl MempoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("mempool.capacity", self.capacity)?;
        require_nonzero("mempool.max_age_ms", self.max_age_ms)
    }
}

// ---------------------------------------------------------------------------
// PoolEntry
// ---------------------------------------------------------------------------

/// A transaction together with pool-management metadata.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub transaction: Transaction,

    /// Arrival sequence number. Lower is older.
    pub seq: u64,

    /// Unix milliseconds when the transaction entered the pool.
    pub added_at_ms: u64,
}

// ---------------------------------------------------------------------------
// PoolError
// ---------------------------------------------------------------------------

/// Reasons [`Mempool::submit`] refuses a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The signature does not verify against the sender.
    InvalidSignature { tx: TxId },

    /// The transaction fails a structural check.
    MalformedTransaction { tx: TxId, reason: TransactionError },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSignature { tx } => write!(f, "invalid signature on transaction {}", tx),
            Self::MalformedTransaction { tx, reason } => {
                write!(f, "malformed transaction {}: {}", tx, reason)
            }
        }
    }
}

impl std::error::Error for PoolError {}

impl PoolError {
    fn from_verification(tx: &Transaction, reason: TransactionError) -> Self {
        if reason.is_signature_failure() {
            Self::InvalidSignature { tx: tx.id }
        } else {
            Self::MalformedTransaction { tx: tx.id, reason }
        }
    }
}

/// What a successful [`Mempool::submit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Newly inserted; `evicted` is the oldest entry dropped to make room.
    Inserted { evicted: Option<TxId> },
    /// Already pending. Nothing changed.
    AlreadyPresent,
}

impl SubmitOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

/// A thread-safe transaction pool ordered by arrival.
pub struct Mempool {
    /// Pending transactions indexed by id.
    transactions: DashMap<TxId, PoolEntry>,

    /// Arrival sequence to id, oldest first.
    order: RwLock<BTreeMap<u64, TxId>>,

    next_seq: AtomicU64,

    config: MempoolConfig,
}

impl fmt::Debug for Mempool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mempool")
            .field("size", &self.transactions.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            transactions: DashMap::new(),
            order: RwLock::new(BTreeMap::new()),
            next_seq: AtomicU64::new(0),
            config,
        }
    }

    /// Verifies and inserts `tx`.
    ///
    /// 1. **Duplicate**: an id already pending is a no-op success.
    /// 2. **Verify**: signature and structural checks against the local clock.
    /// 3. **Capacity**: a full pool evicts its oldest entry.
    pub fn submit(&self, tx: Transaction) -> Result<SubmitOutcome, PoolError> {
        self.submit_at(tx, now_ms())
    }

    /// [`submit`](Self::submit) with an explicit clock, for tests and replay.
    pub fn submit_at(&self, tx: Transaction, now_ms: u64) -> Result<SubmitOutcome, PoolError> {
        if self.transactions.contains_key(&tx.id) {
            return Ok(SubmitOutcome::AlreadyPresent);
        }

        verify_transaction_at(&tx, now_ms)
            .map_err(|reason| PoolError::from_verification(&tx, reason))?;

        let mut evicted = None;
        while self.transactions.len() >= self.config.capacity {
            match self.evict_oldest() {
                Some(id) => evicted = Some(id),
                None => break,
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let tx_id = tx.id;
        self.transactions.insert(
            tx_id,
            PoolEntry {
                transaction: tx,
                seq,
                added_at_ms: now_ms,
            },
        );
        self.order.write().insert(seq, tx_id);

        if let Some(id) = evicted {
            debug!(evicted = %id.short(), capacity = self.config.capacity, "mempool full, evicted oldest");
        }
        Ok(SubmitOutcome::Inserted { evicted })
    }

    /// Up to `max_count` transactions, oldest first.
    pub fn select_for_block(&self, max_count: usize) -> Vec<Transaction> {
        let order = self.order.read();
        order
            .values()
            .filter_map(|id| self.transactions.get(id).map(|e| e.transaction.clone()))
            .take(max_count)
            .collect()
    }

    /// Removes the given ids. Missing ids are ignored. Returns how many
    /// were removed.
    pub fn remove(&self, ids: &[TxId]) -> usize {
        ids.iter().filter(|id| self.remove_one(id).is_some()).count()
    }

    /// Drops every transaction whose nonce `ledger` has already consumed.
    /// Returns the dropped ids.
    pub fn evict_conflicting(&self, ledger: &Ledger) -> Vec<TxId> {
        let stale: Vec<TxId> = self
            .transactions
            .iter()
            .filter(|entry| ledger.is_stale(&entry.value().transaction))
            .map(|entry| *entry.key())
            .collect();

        for id in &stale {
            self.remove_one(id);
        }
        stale
    }

    /// Removes transactions older than `config.max_age_ms`. Returns how many
    /// were removed.
    pub fn expire(&self, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.config.max_age_ms);

        // Collect first to avoid holding a DashMap iterator while mutating.
        let expired: Vec<TxId> = self
            .transactions
            .iter()
            .filter(|entry| entry.value().added_at_ms < cutoff)
            .map(|entry| *entry.key())
            .collect();

        self.remove(&expired)
    }

    /// Every pending transaction, oldest first.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.select_for_block(usize::MAX)
    }

    /// Pending ids, oldest first.
    pub fn ids(&self) -> Vec<TxId> {
        self.order.read().values().copied().collect()
    }

    pub fn get(&self, id: &TxId) -> Option<Transaction> {
        self.transactions.get(id).map(|e| e.transaction.clone())
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.transactions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn pending_for_sender(&self, sender: &str) -> Vec<Transaction> {
        self.snapshot()
            .into_iter()
            .filter(|tx| tx.sender == sender)
            .collect()
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn remove_one(&self, id: &TxId) -> Option<Transaction> {
        let (_, entry) = self.transactions.remove(id)?;
        self.order.write().remove(&entry.seq);
        Some(entry.transaction)
    }

    fn evict_oldest(&self) -> Option<TxId> {
        // Release the index lock before touching the DashMap.
        let (_, id) = self.order.write().pop_first()?;
        self.transactions.remove(&id);
        Some(id)
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MempoolConfig::default())
    }
}

/// Current time in Unix milliseconds.
fn now_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
