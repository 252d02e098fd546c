//! Transaction signing with Ed25519 keypairs.
//!
//! The signature covers [`Transaction::signable_bytes`], the same bytes the
//! id is derived from, so signing never changes the id.

use super::builder::{Transaction, TransactionBuilder};
use crate::crypto::keys::Keypair;

/// Signs `tx` in place and returns it for chaining.
///
/// The caller is responsible for `keypair` owning `tx.sender`;
/// verification rejects the transaction otherwise.
pub fn sign_transaction<'a>(tx: &'a mut Transaction, keypair: &Keypair) -> &'a Transaction {
    let signature = keypair.sign(&tx.signable_bytes());
    tx.signature = Some(signature.to_hex());
    tx
}

/// Builds and signs a transfer from `keypair`'s account.
pub fn signed_transfer(keypair: &Keypair, recipient: &str, amount: u64, nonce: u64) -> Transaction {
    let mut tx = TransactionBuilder::new()
        .sender(&keypair.address())
        .recipient(recipient)
        .amount(amount)
        .nonce(nonce)
        .build();
    sign_transaction(&mut tx, keypair);
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_sets_signature_and_keeps_id() {
        let kp = Keypair::generate();
        let mut tx = TransactionBuilder::new()
            .sender(&kp.address())
            .recipient("bb")
            .amount(1)
            .nonce(1)
            .build();
        let id = tx.id;

        sign_transaction(&mut tx, &kp);
        assert!(tx.is_signed());
        assert_eq!(tx.id, id);
    }

    #[test]
    fn signing_is_deterministic() {
        let kp = Keypair::from_seed(&[3u8; 32]);
        let mut a = TransactionBuilder::new()
            .sender(&kp.address())
            .recipient("bb")
            .amount(1)
            .nonce(1)
            .timestamp(10)
            .build();
        let mut b = a.clone();
        sign_transaction(&mut a, &kp);
        sign_transaction(&mut b, &kp);
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn signed_transfer_uses_keypair_address() {
        let kp = Keypair::generate();
        let tx = signed_transfer(&kp, "cc", 9, 4);
        assert_eq!(tx.sender, kp.address());
        assert_eq!(tx.nonce, 4);
        assert!(tx.is_signed());
    }
}
