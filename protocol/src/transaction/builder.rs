//! Transaction construction via the builder pattern.
//!
//! [`TransactionBuilder`] assembles the fields and computes the content
//! id; signing happens separately in [`super::signing`] so construction
//! stays testable without key material.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::crypto::hash::{double_sha256, Hash256};

/// Transaction ids are content hashes; this is their alias for readability.
pub type TxId = Hash256;

/// Domain tag mixed into the canonical bytes so a transaction preimage can
/// never be replayed as some other signed structure.
const TX_DOMAIN_TAG: &[u8] = b"murmur/tx/v1";

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A value transfer between two accounts.
///
/// `id` is `double_sha256(signable_bytes)`, so it is fixed before signing and
/// two transactions with identical fields are the same transaction. The
/// signature covers the same bytes.
///
/// # Canonical Byte Format
///
/// ```text
/// tag || sender || 0x00 || recipient || 0x00 || amount (LE u64)
///     || nonce (LE u64) || timestamp (LE u64)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content-derived identifier.
    pub id: TxId,

    /// Sender address (hex Ed25519 public key).
    pub sender: String,

    /// Recipient address.
    pub recipient: String,

    /// Amount transferred, in base units.
    pub amount: u64,

    /// The sender's sequence number. The first transaction from an account
    /// carries nonce 1 and every later one increments by exactly one.
    pub nonce: u64,

    /// Creation time, Unix milliseconds.
    pub timestamp: u64,

    /// Hex Ed25519 signature over [`Transaction::signable_bytes`].
    pub signature: Option<String>,
}

impl Transaction {
    /// Canonical bytes used for both the id and the signature.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TX_DOMAIN_TAG.len() + 160);
        buf.extend_from_slice(TX_DOMAIN_TAG);
        buf.extend_from_slice(self.sender.as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(self.recipient.as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    /// Recomputes the id from the current field values.
    pub fn compute_id(&self) -> TxId {
        Hash256(double_sha256(&self.signable_bytes()))
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for unsigned [`Transaction`]s.
///
/// ```
/// use murmur_protocol::transaction::TransactionBuilder;
///
/// let tx = TransactionBuilder::new()
///     .sender("aa".repeat(32).as_str())
///     .recipient("bb".repeat(32).as_str())
///     .amount(10)
///     .nonce(1)
///     .build();
/// assert_eq!(tx.id, tx.compute_id());
/// ```
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    sender: String,
    recipient: String,
    amount: u64,
    nonce: u64,
    timestamp: Option<u64>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, address: &str) -> Self {
        self.sender = address.to_string();
        self
    }

    pub fn recipient(mut self, address: &str) -> Self {
        self.recipient = address.to_string();
        self
    }

    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Sets the timestamp explicitly. Defaults to the current UTC time.
    pub fn timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    /// Produces the unsigned transaction with its id filled in.
    pub fn build(self) -> Transaction {
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis() as u64);

        let mut tx = Transaction {
            id: Hash256::ZERO,
            sender: self.sender,
            recipient: self.recipient,
            amount: self.amount,
            nonce: self.nonce,
            timestamp,
            signature: None,
        };
        tx.id = tx.compute_id();
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TransactionBuilder {
        TransactionBuilder::new()
            .sender("alice")
            .recipient("bob")
            .amount(5)
            .nonce(1)
            .timestamp(1_700_000_000_000)
    }

    #[test]
    fn id_is_deterministic() {
        assert_eq!(sample().build().id, sample().build().id);
    }

    #[test]
    fn id_covers_every_field() {
        let base = sample().build().id;
        assert_ne!(base, sample().amount(6).build().id);
        assert_ne!(base, sample().nonce(2).build().id);
        assert_ne!(base, sample().recipient("carol").build().id);
        assert_ne!(base, sample().timestamp(1).build().id);
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = sample().sender("ab").recipient("c").build();
        let b = sample().sender("a").recipient("bc").build();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn built_transaction_is_unsigned() {
        assert!(!sample().build().is_signed());
    }
}
