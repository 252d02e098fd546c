//! Transaction verification: structural checks and signature validation.
//!
//! Everything here is stateless. Whether a transaction double-spends is a
//! question about the ledger at a particular block and is answered by
//! [`crate::storage::state::Ledger`], not by this module.
//!
//! Checks run cheapest first so obviously invalid input never reaches the
//! Ed25519 verifier.

use chrono::Utc;
use thiserror::Error;

use super::builder::{Transaction, TxId};
use crate::config::MAX_FUTURE_TX_DRIFT_MS;
use crate::crypto::keys::PublicKey;
use crate::crypto::signatures::{verify_hex, SignatureError};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Reasons a transaction fails stateless verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: TxId, actual: TxId },

    #[error("transaction is unsigned")]
    MissingSignature,

    #[error("malformed signature encoding")]
    MalformedSignature,

    #[error("signature does not verify against sender {sender}")]
    InvalidSignature { sender: String },

    #[error("invalid address: {address}")]
    InvalidAddress { address: String },

    #[error("invalid nonce: must be > 0")]
    InvalidNonce,

    #[error("amount must be > 0")]
    ZeroAmount,

    #[error("sender and recipient must differ")]
    SelfTransfer,

    #[error("timestamp {timestamp_ms} is more than {max_drift_ms}ms ahead of {reference_ms}")]
    TimestampTooFarInFuture {
        timestamp_ms: u64,
        reference_ms: u64,
        max_drift_ms: u64,
    },
}

impl TransactionError {
    /// `true` for failures of the cryptographic check itself, as opposed to
    /// a structurally malformed transaction.
    pub fn is_signature_failure(&self) -> bool {
        matches!(self, Self::InvalidSignature { .. })
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Verifies `tx` against the local clock.
pub fn verify_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    verify_transaction_at(tx, Utc::now().timestamp_millis() as u64)
}

/// Verifies `tx` against an explicit reference time.
///
/// Chain validation passes the enclosing block's timestamp so that every
/// node reaches the same verdict regardless of when it sees the block.
///
/// Checks, in order:
///
/// 1. nonce > 0
/// 2. amount > 0
/// 3. sender ≠ recipient
/// 4. recipient is a well-formed address
/// 5. timestamp no more than [`MAX_FUTURE_TX_DRIFT_MS`] past `reference_ms`
/// 6. id equals the hash of the canonical bytes
/// 7. signature present and valid under the sender's key
pub fn verify_transaction_at(tx: &Transaction, reference_ms: u64) -> Result<(), TransactionError> {
    if tx.nonce == 0 {
        return Err(TransactionError::InvalidNonce);
    }

    if tx.amount == 0 {
        return Err(TransactionError::ZeroAmount);
    }

    if tx.sender == tx.recipient {
        return Err(TransactionError::SelfTransfer);
    }

    if !is_well_formed_address(&tx.recipient) {
        return Err(TransactionError::InvalidAddress {
            address: tx.recipient.clone(),
        });
    }

    if tx.timestamp > reference_ms.saturating_add(MAX_FUTURE_TX_DRIFT_MS) {
        return Err(TransactionError::TimestampTooFarInFuture {
            timestamp_ms: tx.timestamp,
            reference_ms,
            max_drift_ms: MAX_FUTURE_TX_DRIFT_MS,
        });
    }

    let expected = tx.compute_id();
    if tx.id != expected {
        return Err(TransactionError::IdMismatch {
            expected,
            actual: tx.id,
        });
    }

    let signature = tx
        .signature
        .as_deref()
        .ok_or(TransactionError::MissingSignature)?;

    match verify_hex(&tx.sender, &tx.signable_bytes(), signature) {
        Ok(()) => Ok(()),
        Err(SignatureError::MalformedPublicKey) => Err(TransactionError::InvalidAddress {
            address: tx.sender.clone(),
        }),
        Err(SignatureError::MalformedSignature) => Err(TransactionError::MalformedSignature),
        Err(SignatureError::VerificationFailed) => Err(TransactionError::InvalidSignature {
            sender: tx.sender.clone(),
        }),
    }
}

/// An address is a hex Ed25519 public key that decodes to a curve point.
pub fn is_well_formed_address(address: &str) -> bool {
    PublicKey::from_hex(address).is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
