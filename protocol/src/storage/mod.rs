//! # Storage Module
//!
//! In-memory block tree and account ledger.
//!
//! ## Architecture
//!
//! ```text
//! block.rs  — Block structure, genesis block, hash/verify operations
//! state.rs  — Account ledger with per-block undo records
//! chain.rs  — Block tree, fork choice, orphan buffer, reorgs
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! Block ──try_add──▶ Chain ──apply_block──▶ Ledger
//!                      │
//!                      └──▶ TipChange (rolled back / applied)
//! ```
//!
//! ## Design Decisions
//!
//! 1. **BLAKE3 for block ids and Merkle roots.** Transaction ids stay
//!    double SHA-256 so they are independent of the block hash function.
//!
//! 2. **Undo instead of snapshots.** Each block remembers the prior state
//!    of the accounts it touched. Reorgs revert those records rather than
//!    rebuilding from genesis.
//!
//! 3. **Nothing is persisted.** A restarted node resyncs from its peers.

pub mod block;
pub mod chain;
pub mod state;

pub use block::{Block, BlockHeader, BlockId};
pub use chain::{
    AddOutcome, Chain, ChainConfig, ChainError, ChainSummary, OrphanBufferFull, TipChange,
    TransactionRecord,
};
pub use state::{AccountState, BlockUndo, GenesisAllocation, Ledger, LedgerError};
