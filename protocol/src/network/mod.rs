//! # Network Module
//!
//! Everything that moves between peers, and the runtime that owns a node's
//! state while it does.
//!
//! ## Architecture
//!
//! ```text
//! message_store.rs — bounded, age-evicting seen-set for deduplication
//! mempool.rs       — pending transactions, oldest first, bounded
//! gossip.rs        — push gossip: fan-out, hop ceiling, push rounds
//! sync.rs          — anti-entropy: summaries, block and pool repair
//! wire.rs          — framed binary encoding of everything above
//! transport.rs     — Transport / PeerManager seams, in-memory network
//! node.rs          — the Node runtime tying it all together
//! ```
//!
//! ## Design Decisions
//!
//! - The gossip engine and the sync helpers do no I/O. They take the live
//!   peer list and the clock as arguments and return what to send, so the
//!   whole protocol can be tested without a runtime.
//! - The mempool is internally concurrent (`DashMap`) but the node still
//!   mutates it under its single state lock, together with the chain.
//! - The transport is a trait. The crate ships only [`MemoryNetwork`]; a
//!   socket transport plugs in by implementing [`Transport`].

pub mod gossip;
pub mod mempool;
pub mod message_store;
pub mod node;
pub mod sync;
pub mod transport;
pub mod wire;

pub use gossip::{
    Envelope, GossipConfig, GossipEngine, GossipStats, Payload, PayloadSink, ReceiveOutcome,
    Verdict,
};
pub use mempool::{Mempool, MempoolConfig, PoolEntry, PoolError, SubmitOutcome};
pub use message_store::{MessageId, MessageStore};
pub use node::{Node, NodeError, NodeState, NodeStatus};
pub use sync::{
    PeerSummary, RequestId, SyncCall, SyncConfig, SyncError, SyncReply, SyncRequest,
    SyncResponse, SyncTracker,
};
pub use transport::{
    Inbound, InboundReceiver, MemoryNetwork, MemoryTransport, PeerId, PeerManager, StaticPeers,
    Transport, TransportError,
};
pub use wire::{decode, encode, Frame, WireError};
