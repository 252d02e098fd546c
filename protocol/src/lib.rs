// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Murmur Protocol — Core Library
//!
//! A peer-to-peer node that spreads transactions and blocks by gossip and
//! agrees on their order with proof-of-work.
//!
//! Every node keeps three things: a pool of pending transactions, a tree of
//! blocks with the heaviest branch marked canonical, and a record of the
//! messages it has already seen. New items are pushed to a few random peers
//! per round; a slower anti-entropy pass repairs whatever gossip missed.
//!
//! ## Architecture
//!
//! - **crypto** — Hashing, Ed25519 keys and signatures. Black boxes to the rest.
//! - **transaction** — Transfers: construction, signing, stateless checks.
//! - **storage** — Blocks, the account ledger and the block tree with fork choice.
//! - **consensus** — Proof-of-work targets, mining, retargeting, block templates.
//! - **network** — Pool, gossip, anti-entropy, wire format, transport, node runtime.
//! - **metrics** — Per-node Prometheus registry.
//! - **config** — Protocol constants and validated configuration.
//!
//! ## Design Philosophy
//!
//! 1. Every node that has seen the same set of blocks picks the same tip,
//!    whatever order they arrived in.
//! 2. Bad input from a peer is dropped and logged. It never panics the node.
//! 3. No global state. A process can run as many nodes as it likes.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod metrics;
pub mod network;
pub mod storage;
pub mod transaction;

pub use config::{ConfigError, NodeConfig};
pub use network::{MemoryNetwork, Node, NodeStatus};
