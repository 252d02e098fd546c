//! # Proof of Work
//!
//! Difficulty is linear: a block of difficulty `D` takes `D` hash attempts on
//! average to find. The target it maps to is
//!
//! ```text
//! target = U256::MAX / D
//! ```
//!
//! and a header hash, read as a 256-bit big-endian integer, meets the target
//! when `hash < target`. Difficulty 1 accepts every hash except the all-ones
//! value, which is what the tests and local simulations rely on.
//!
//! ## Retargeting
//!
//! [`next_difficulty`] scales the current difficulty by
//! `expected_elapsed / actual_elapsed` over a window of block timestamps,
//! clamped to a factor of `max_factor` in either direction. Integer math
//! only, so every node computes the same value.
//!
//! ## Cancellation
//!
//! The nonce search is CPU-bound and runs on a blocking thread. It polls a
//! [`MiningTicket`] every `poll_interval` attempts and gives up as soon as the
//! shared [`MiningSignal`] has moved on, which the node does whenever the
//! canonical tip changes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use primitive_types::U256;

use crate::crypto::hash::Hash256;
use crate::storage::block::Block;

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// The 256-bit target for difficulty `difficulty`. Zero is treated as one.
pub fn target_for(difficulty: u64) -> U256 {
    U256::MAX / U256::from(difficulty.max(1))
}

/// `true` if `hash` satisfies `difficulty`.
pub fn meets_target(hash: &Hash256, difficulty: u64) -> bool {
    U256::from_big_endian(hash.as_bytes()) < target_for(difficulty)
}

/// Work contributed by one block. Cumulative work is the sum along a branch.
pub fn block_work(difficulty: u64) -> u128 {
    difficulty as u128
}

/// Retargets `current` from the spacing of `timestamps` (oldest first).
///
/// Fewer than two timestamps leaves the difficulty unchanged. A window whose
/// timestamps do not advance is treated as one millisecond of elapsed time.
pub fn next_difficulty(
    current: u64,
    timestamps: &[u64],
    target_interval_ms: u64,
    max_factor: u64,
) -> u64 {
    let current = current.max(1);
    if timestamps.len() < 2 {
        return current;
    }

    let (first, last) = (timestamps[0], timestamps[timestamps.len() - 1]);
    let actual = last.saturating_sub(first).max(1) as u128;
    let expected = (timestamps.len() as u128 - 1) * target_interval_ms as u128;
    let max_factor = max_factor.max(1) as u128;

    let current_wide = current as u128;
    let raw = current_wide * expected / actual;
    let floor = (current_wide / max_factor).max(1);
    let ceiling = current_wide.saturating_mul(max_factor);

    raw.clamp(floor, ceiling).min(u64::MAX as u128) as u64
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared signal telling in-flight mining jobs that their work is stale.
#[derive(Clone, Debug, Default)]
pub struct MiningSignal {
    generation: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
}

impl MiningSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidates every ticket issued so far.
    pub fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Invalidates every ticket, present and future.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// A ticket valid until the next [`bump`](Self::bump) or [`stop`](Self::stop).
    pub fn ticket(&self) -> MiningTicket {
        MiningTicket {
            signal: self.clone(),
            generation: self.generation(),
        }
    }
}

/// Snapshot of a [`MiningSignal`] generation.
#[derive(Clone, Debug)]
pub struct MiningTicket {
    signal: MiningSignal,
    generation: u64,
}

impl MiningTicket {
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_stopped() || self.signal.generation() != self.generation
    }
}

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Why a mining attempt ended without a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningError {
    /// The ticket was invalidated before a nonce was found.
    Cancelled { attempts: u64 },
    /// Every nonce was tried without success.
    NonceSpaceExhausted,
}

impl fmt::Display for MiningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled { attempts } => {
                write!(f, "mining cancelled after {} attempts", attempts)
            }
            Self::NonceSpaceExhausted => write!(f, "nonce space exhausted"),
        }
    }
}

impl std::error::Error for MiningError {}

// ---------------------------------------------------------------------------
// Mining
// ---------------------------------------------------------------------------

/// Searches for a nonce that makes `block` meet its own difficulty.
///
/// Starts from the template's current nonce. On success the returned block
/// has its nonce and cached hash set.
pub fn mine(mut block: Block, ticket: &MiningTicket, poll_interval: u64) -> Result<Block, MiningError> {
    let poll_interval = poll_interval.max(1);
    let target = target_for(block.header.difficulty);
    let mut preimage = block.header.pow_prefix();
    let prefix_len = preimage.len();
    let mut attempts: u64 = 0;
    let mut nonce = block.header.nonce;

    loop {
        if attempts % poll_interval == 0 && ticket.is_cancelled() {
            return Err(MiningError::Cancelled { attempts });
        }

        preimage.truncate(prefix_len);
        preimage.extend_from_slice(&nonce.to_le_bytes());
        let hash = blake3::hash(&preimage);

        if U256::from_big_endian(hash.as_bytes()) < target {
            block.header.nonce = nonce;
            block.header.hash = Hash256(*hash.as_bytes());
            return Ok(block);
        }

        attempts += 1;
        nonce = nonce.wrapping_add(1);
        if nonce == block.header.nonce {
            return Err(MiningError::NonceSpaceExhausted);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn template(difficulty: u64) -> Block {
        let genesis = Block::genesis(0, 1, &[]);
        Block::template(&genesis.header, vec![], "miner".into(), 1, difficulty)
    }

    // -- Targets --

    #[test]
    fn difficulty_one_accepts_all_but_the_maximum() {
        let mut almost = [0xff; 32];
        almost[31] = 0xfe;
        assert!(meets_target(&Hash256(almost), 1));
        assert!(meets_target(&Hash256::ZERO, 1));
        assert!(!meets_target(&Hash256([0xff; 32]), 1));
    }

    #[test]
    fn target_itself_is_rejected() {
        let mut bytes = [0u8; 32];
        target_for(2).to_big_endian(&mut bytes);
        assert!(!meets_target(&Hash256(bytes), 2));
    }

    #[test]
    fn higher_difficulty_lowers_the_target() {
        assert!(target_for(2) < target_for(1));
        assert!(!meets_target(&Hash256([0xff; 32]), 2));

        let mut low = [0u8; 32];
        low[0] = 0x7f;
        assert!(meets_target(&Hash256(low), 2));
    }

    #[test]
    fn zero_difficulty_is_treated_as_one() {
        assert_eq!(target_for(0), target_for(1));
    }

    // -- Retargeting --

    #[test]
    fn on_schedule_keeps_difficulty() {
        let ts = [0, 100, 200, 300];
        assert_eq!(next_difficulty(1000, &ts, 100, 4), 1000);
    }

    #[test]
    fn fast_blocks_raise_difficulty() {
        let ts = [0, 50, 100, 150];
        assert_eq!(next_difficulty(1000, &ts, 100, 4), 2000);
    }

    #[test]
    fn slow_blocks_lower_difficulty() {
        let ts = [0, 200, 400, 600];
        assert_eq!(next_difficulty(1000, &ts, 100, 4), 500);
    }

    #[test]
    fn adjustment_is_clamped() {
        let fast = [0, 1, 2, 3];
        assert_eq!(next_difficulty(1000, &fast, 100, 4), 4000);

        let slow = [0, 10_000, 20_000, 30_000];
        assert_eq!(next_difficulty(1000, &slow, 100, 4), 250);
    }

    #[test]
    fn difficulty_never_drops_below_one() {
        let slow = [0, 10_000];
        assert_eq!(next_difficulty(1, &slow, 1, 4), 1);
    }

    #[test]
    fn short_window_is_a_no_op() {
        assert_eq!(next_difficulty(77, &[5], 100, 4), 77);
        assert_eq!(next_difficulty(77, &[], 100, 4), 77);
    }

    #[test]
    fn non_advancing_timestamps_do_not_divide_by_zero() {
        let ts = [10, 10, 10];
        assert_eq!(next_difficulty(100, &ts, 100, 4), 400);
    }

    // -- Mining --

    #[test]
    fn mined_block_meets_its_target() {
        let signal = MiningSignal::new();
        let block = mine(template(16), &signal.ticket(), 64).unwrap();
        assert!(meets_target(&block.id(), 16));
        assert_eq!(block.id(), block.header.compute_hash());
        block.verify().unwrap();
    }

    #[test]
    fn bumped_signal_cancels_mining() {
        let signal = MiningSignal::new();
        let ticket = signal.ticket();
        signal.bump();
        assert!(matches!(
            mine(template(u64::MAX), &ticket, 1),
            Err(MiningError::Cancelled { attempts: 0 })
        ));
    }

    #[test]
    fn stopped_signal_cancels_new_tickets() {
        let signal = MiningSignal::new();
        signal.stop();
        assert!(signal.ticket().is_cancelled());
    }
}
