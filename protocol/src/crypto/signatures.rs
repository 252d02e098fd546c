//! # Digital Signatures
//!
//! The sign/verify boundary consumed by transactions and the pool. Callers
//! hand in addresses and hex strings as they appear on the wire; this module
//! turns them into keys and reports a single yes/no answer.

use thiserror::Error;

use super::keys::{Keypair, PublicKey, Signature};

/// Errors during signature verification.
///
/// Deliberately coarse: callers only need to know which input was bad.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("malformed signature encoding")]
    MalformedSignature,

    #[error("malformed public key")]
    MalformedPublicKey,
}

/// Signs `message` with `keypair`.
pub fn sign(keypair: &Keypair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

/// Verifies a typed signature.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    public_key.verify(message, signature)
}

/// Verifies a hex signature against a hex address.
pub fn verify_hex(address: &str, message: &[u8], signature_hex: &str) -> Result<(), SignatureError> {
    let public_key = PublicKey::from_hex(address).map_err(|_| SignatureError::MalformedPublicKey)?;
    let signature =
        Signature::from_hex(signature_hex).map_err(|_| SignatureError::MalformedSignature)?;
    if public_key.verify(message, &signature) {
        Ok(())
    } else {
        Err(SignatureError::VerificationFailed)
    }
}
