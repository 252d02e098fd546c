//! # Consensus Module
//!
//! Proof-of-work serialises block production; the heaviest branch wins.
//!
//! ```text
//! pow.rs      — targets, nonce search, difficulty retargeting, cancellation
//! producer.rs — block templates from the pool on top of the canonical tip
//! ```
//!
//! Fork choice itself lives in [`crate::storage::chain`], next to the block
//! tree it walks.

pub mod pow;
pub mod producer;

pub use pow::{
    block_work, meets_target, mine, next_difficulty, target_for, MiningError, MiningSignal,
    MiningTicket,
};
pub use producer::{build_template, BlockTemplate, MiningConfig, SkippedTransaction};
