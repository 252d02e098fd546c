//! # Ledger State
//!
//! The ledger maps addresses to account states. Applying a block runs its
//! transactions in order, credits the miner, and returns an undo record that
//! restores the previous state exactly. The chain keeps the ledger at the
//! canonical tip and uses undo records to walk it back during a reorg.
//!
//! ## State Transitions
//!
//! A transaction `T: sender -> recipient` for amount `A`:
//!
//! 1. Verify `T.nonce == sender.nonce + 1`.
//! 2. Verify `sender.balance >= A`.
//! 3. `sender.balance -= A`
//! 4. `sender.nonce = T.nonce`
//! 5. `recipient.balance += A`
//!
//! After the last transaction the miner's balance grows by the block reward.
//!
//! ## Root Hash
//!
//! [`Ledger::root_hash`] is a Merkle root over the sorted accounts. Nothing in
//! the header commits to it; it exists so that two nodes (or a test) can
//! compare whole ledgers cheaply.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use crate::crypto::hash::{blake3_hash, merkle_root, Hash256};
use crate::storage::block::Block;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// AccountState
// ---------------------------------------------------------------------------

/// The state of a single account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Spendable balance in base units.
    pub balance: u64,
    /// Nonce of the last transaction applied from this account (0 = none).
    pub nonce: u64,
}

impl AccountState {
    pub fn with_balance(balance: u64) -> Self {
        Self { balance, nonce: 0 }
    }
}

/// A balance credited at genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub address: String,
    pub amount: u64,
}

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Why a transaction cannot be applied on top of a given ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The nonce was already consumed by an earlier transaction.
    #[error("nonce {nonce} already used by {sender} (current nonce {current})")]
    NonceReused {
        sender: String,
        nonce: u64,
        current: u64,
    },

    /// The nonce skips ahead of the account's next expected nonce.
    #[error("nonce gap for {sender}: expected {expected}, got {got}")]
    NonceGap {
        sender: String,
        expected: u64,
        got: u64,
    },

    #[error("insufficient balance for {sender}: have {balance}, need {amount}")]
    InsufficientBalance {
        sender: String,
        balance: u64,
        amount: u64,
    },

    #[error("balance overflow crediting {address}")]
    Overflow { address: String },
}

impl LedgerError {
    /// `true` when the transaction spends funds or a nonce that a previous
    /// transaction already spent.
    pub fn is_double_spend(&self) -> bool {
        matches!(
            self,
            Self::NonceReused { .. } | Self::InsufficientBalance { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// BlockUndo
// ---------------------------------------------------------------------------

/// Prior account states touched by one block, in first-touch order.
///
/// `None` means the account did not exist before the block.
#[derive(Clone, Debug, Default)]
pub struct BlockUndo {
    entries: Vec<(String, Option<AccountState>)>,
    touched: HashSet<String>,
}

impl BlockUndo {
    fn record(&mut self, address: &str, prior: Option<AccountState>) {
        if self.touched.insert(address.to_string()) {
            self.entries.push((address.to_string(), prior));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// In-memory account ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ledger {
    accounts: HashMap<String, AccountState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger holding only the genesis allocations. Repeated addresses
    /// accumulate.
    pub fn from_allocations(allocations: &[GenesisAllocation]) -> Self {
        let mut ledger = Self::new();
        for allocation in allocations {
            let account = ledger
                .accounts
                .entry(allocation.address.clone())
                .or_default();
            account.balance = account.balance.saturating_add(allocation.amount);
        }
        ledger
    }

    /// The account at `address`, or the empty account if never seen.
    pub fn get(&self, address: &str) -> AccountState {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    pub fn balance_of(&self, address: &str) -> u64 {
        self.get(address).balance
    }

    pub fn nonce_of(&self, address: &str) -> u64 {
        self.get(address).nonce
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AccountState)> {
        self.accounts.iter()
    }

    /// Whether `tx` could be applied right now, without applying it.
    pub fn check_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let sender = self.get(&tx.sender);

        if tx.nonce <= sender.nonce {
            return Err(LedgerError::NonceReused {
                sender: tx.sender.clone(),
                nonce: tx.nonce,
                current: sender.nonce,
            });
        }
        if tx.nonce != sender.nonce + 1 {
            return Err(LedgerError::NonceGap {
                sender: tx.sender.clone(),
                expected: sender.nonce + 1,
                got: tx.nonce,
            });
        }
        if sender.balance < tx.amount {
            return Err(LedgerError::InsufficientBalance {
                sender: tx.sender.clone(),
                balance: sender.balance,
                amount: tx.amount,
            });
        }
        if self.balance_of(&tx.recipient).checked_add(tx.amount).is_none() {
            return Err(LedgerError::Overflow {
                address: tx.recipient.clone(),
            });
        }
        Ok(())
    }

    /// `true` if `tx` can never apply on top of this ledger or any of its
    /// descendants, because its nonce has already been consumed.
    pub fn is_stale(&self, tx: &Transaction) -> bool {
        tx.nonce <= self.nonce_of(&tx.sender)
    }

    /// Applies one transaction, recording prior states into `undo`.
    pub fn apply_transaction(
        &mut self,
        tx: &Transaction,
        undo: &mut BlockUndo,
    ) -> Result<(), LedgerError> {
        self.check_transaction(tx)?;

        undo.record(&tx.sender, self.accounts.get(&tx.sender).copied());
        undo.record(&tx.recipient, self.accounts.get(&tx.recipient).copied());

        let sender = self.accounts.entry(tx.sender.clone()).or_default();
        sender.balance -= tx.amount;
        sender.nonce = tx.nonce;

        let recipient = self.accounts.entry(tx.recipient.clone()).or_default();
        recipient.balance += tx.amount;
        Ok(())
    }

    /// Adds `amount` to `address`, recording the prior state into `undo`.
    pub fn credit(
        &mut self,
        address: &str,
        amount: u64,
        undo: &mut BlockUndo,
    ) -> Result<(), LedgerError> {
        let prior = self.accounts.get(address).copied();
        let balance = prior
            .unwrap_or_default()
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow {
                address: address.to_string(),
            })?;

        undo.record(address, prior);
        self.accounts.entry(address.to_string()).or_default().balance = balance;
        Ok(())
    }

    /// Applies a whole block atomically.
    ///
    /// On success returns the undo record. On failure the ledger is left
    /// exactly as it was and the error of the first failing transaction is
    /// returned with its index.
    pub fn apply_block(
        &mut self,
        block: &Block,
        reward: u64,
    ) -> Result<BlockUndo, (usize, LedgerError)> {
        let mut undo = BlockUndo::default();

        for (index, tx) in block.transactions.iter().enumerate() {
            if let Err(e) = self.apply_transaction(tx, &mut undo) {
                self.revert(&undo);
                return Err((index, e));
            }
        }

        if reward > 0 {
            if let Err(e) = self.credit(&block.header.miner, reward, &mut undo) {
                self.revert(&undo);
                return Err((block.transactions.len(), e));
            }
        }

        Ok(undo)
    }

    /// Restores every account touched by the block that produced `undo`.
    pub fn revert(&mut self, undo: &BlockUndo) {
        for (address, prior) in undo.entries.iter().rev() {
            match prior {
                Some(state) => {
                    self.accounts.insert(address.clone(), *state);
                }
                None => {
                    self.accounts.remove(address);
                }
            }
        }
    }

    /// Merkle root over the accounts sorted by address. Empty ledger gives
    /// [`Hash256::ZERO`].
    pub fn root_hash(&self) -> Hash256 {
        let sorted: BTreeMap<&String, &AccountState> = self.accounts.iter().collect();
        let leaves: Vec<Hash256> = sorted
            .iter()
            .map(|(address, state)| {
                let mut preimage = Vec::with_capacity(address.len() + 16);
                preimage.extend_from_slice(address.as_bytes());
                preimage.extend_from_slice(&state.balance.to_le_bytes());
                preimage.extend_from_slice(&state.nonce.to_le_bytes());
                Hash256(blake3_hash(&preimage))
            })
            .collect();
        merkle_root(&leaves)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
