//! # Transaction Module
//!
//! Construction, signing and stateless verification of value transfers.
//!
//! ```text
//! builder.rs      — Transaction + TransactionBuilder, canonical bytes and id
//! signing.rs      — Ed25519 signing
//! verification.rs — structural and signature checks
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Build** with [`TransactionBuilder`].
//! 2. **Sign** with [`sign_transaction`].
//! 3. **Submit** to the pool, which runs [`verify_transaction`].
//! 4. **Include** in a block, where the ledger checks nonce and balance.
//!
//! ## Design Decisions
//!
//! - Ids are `double_sha256` of the canonical bytes, so the id is known
//!   before signing and identical fields always give the same id.
//! - Amounts are `u64` base units. No floating point near money.
//! - Double-spend detection is not done here. Two conflicting transactions
//!   may both sit in the pool; the chain decides which one lands.

pub mod builder;
pub mod signing;
pub mod verification;

pub use builder::{Transaction, TransactionBuilder, TxId};
pub use signing::{sign_transaction, signed_transfer};
pub use verification::{verify_transaction, verify_transaction_at, TransactionError};
