//! # Gossip Engine
//!
//! Push-based epidemic dissemination of transactions and blocks. When a node
//! accepts a new item it queues it for outbound gossip. Every tick it picks
//! `fanout` random live peers and pushes them every queued message they have
//! not been sent yet. Each peer does the same, resulting in O(log N)
//! propagation across the network.
//!
//! ## Deduplication
//!
//! A message id is a domain-separated BLAKE3 hash of the payload kind and the
//! item id, so the same block or transaction always travels under the same
//! id. Inbound ids are checked against the payload before anything else, then
//! against the [`MessageStore`]. A message already seen is dropped without
//! touching the chain or the pool.
//!
//! ## Hop Count
//!
//! Each envelope carries the number of hops it has travelled. A node that
//! accepts an envelope re-queues it with one more hop, unless that would
//! exceed the TTL ceiling. This bounds the propagation diameter and prevents
//! messages from circulating indefinitely in partitioned subgraphs.
//!
//! ## No I/O
//!
//! The engine never touches the network. [`GossipEngine::tick`] returns the
//! sends to perform and [`GossipEngine::receive`] hands payloads to a
//! [`PayloadSink`]; the node runtime does the rest.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::{
    require_nonzero, ConfigError, ANTI_ENTROPY_INTERVAL_MS, GOSSIP_FANOUT, GOSSIP_INTERVAL_MS,
    GOSSIP_PUSH_ROUNDS, MESSAGE_TTL, SEEN_CAPACITY, SEEN_RETENTION_MS,
};
use crate::crypto::hash::{domain_separated_hash, Hash256};
use crate::network::message_store::{MessageId, MessageStore};
use crate::network::transport::PeerId;
use crate::storage::block::{Block, BlockId};
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the gossip layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Number of peers pushed to on each tick.
    pub fanout: usize,
    /// Milliseconds between ticks.
    pub gossip_interval_ms: u64,
    /// Milliseconds between anti-entropy rounds.
    pub anti_entropy_interval_ms: u64,
    /// Maximum number of hops a message can travel.
    pub ttl_ceiling: u8,
    /// Ticks a message stays queued for outbound gossip.
    pub push_rounds: u8,
    /// How long a seen message id is remembered.
    pub seen_retention_ms: u64,
    /// Hard bound on remembered message ids.
    pub seen_capacity: usize,
    /// Seed for peer selection. `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: GOSSIP_FANOUT,
            gossip_interval_ms: GOSSIP_INTERVAL_MS,
            anti_entropy_interval_ms: ANTI_ENTROPY_INTERVAL_MS,
            ttl_ceiling: MESSAGE_TTL,
            push_rounds: GOSSIP_PUSH_ROUNDS,
            seen_retention_ms: SEEN_RETENTION_MS,
            seen_capacity: SEEN_CAPACITY,
            rng_seed: None,
        }
    }
}

impl GossipConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("gossip.fanout", self.fanout)?;
        require_nonzero("gossip.gossip_interval_ms", self.gossip_interval_ms)?;
        require_nonzero("gossip.anti_entropy_interval_ms", self.anti_entropy_interval_ms)?;
        require_nonzero("gossip.ttl_ceiling", self.ttl_ceiling)?;
        require_nonzero("gossip.push_rounds", self.push_rounds)?;
        require_nonzero("gossip.seen_retention_ms", self.seen_retention_ms)?;
        require_nonzero("gossip.seen_capacity", self.seen_capacity)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// What an envelope carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Transaction(Transaction),
    Block(Block),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transaction(_) => "transaction",
            Self::Block(_) => "block",
        }
    }

    /// Id of the carried item: transaction id or block id.
    pub fn item_id(&self) -> Hash256 {
        match self {
            Self::Transaction(tx) => tx.id,
            Self::Block(block) => block.id(),
        }
    }

    /// The gossip id this payload always travels under.
    pub fn message_id(&self) -> MessageId {
        let context = match self {
            Self::Transaction(_) => "murmur/gossip/tx/v1",
            Self::Block(_) => "murmur/gossip/block/v1",
        };
        Hash256(domain_separated_hash(context, self.item_id().as_bytes()))
    }
}

/// A gossip message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: MessageId,
    /// Hops travelled so far. Zero at the originating node.
    pub hops: u8,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(payload: Payload) -> Self {
        Self {
            id: payload.message_id(),
            hops: 0,
            payload,
        }
    }

    /// `true` if the id matches the payload.
    pub fn is_consistent(&self) -> bool {
        self.id == self.payload.message_id()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// What the local node made of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Newly accepted into the pool or chain.
    Accepted,
    /// Already held locally. Nothing changed.
    Known,
    /// A block whose parent is missing; held until the parent arrives.
    Orphan { missing_parent: BlockId },
    /// Failed validation and was discarded.
    Rejected(String),
}

impl Verdict {
    /// Only newly accepted payloads are passed on. An orphan is held but
    /// not relayed until it attaches.
    pub fn should_propagate(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Destination for payloads that survive deduplication.
pub trait PayloadSink {
    fn deliver(&mut self, payload: &Payload, from: &PeerId) -> Verdict;
}

/// Result of [`GossipEngine::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The id does not match the payload. Nothing was recorded.
    Inconsistent,
    /// Seen before; dropped.
    Duplicate,
    /// Dispatched; `requeued` tells whether it will be gossiped onward.
    Delivered { verdict: Verdict, requeued: bool },
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipStats {
    pub received: u64,
    pub duplicates: u64,
    pub inconsistent: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub originated: u64,
    pub sent: u64,
    pub ttl_expired: u64,
}

// ---------------------------------------------------------------------------
// Gossip Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Outbound {
    envelope: Envelope,
    /// Peer that delivered the message to us.
    origin: Option<PeerId>,
    sent_to: HashSet<PeerId>,
    rounds_left: u8,
}

/// The gossip engine. Owned by one node and mutated only under its lock.
pub struct GossipEngine {
    config: GossipConfig,
    store: MessageStore,
    outbound: Vec<Outbound>,
    rng: StdRng,
    stats: GossipStats,
}

impl GossipEngine {
    pub fn new(config: GossipConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store: MessageStore::new(config.seen_retention_ms, config.seen_capacity),
            outbound: Vec::new(),
            rng,
            stats: GossipStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Queues a locally created payload for gossip. Returns its message id,
    /// or `None` if it was already seen.
    pub fn originate(&mut self, payload: Payload, now_ms: u64) -> Option<MessageId> {
        let envelope = Envelope::new(payload);
        let id = envelope.id;
        if !self.store.mark_seen(id, now_ms) {
            return None;
        }
        self.stats.originated += 1;
        self.enqueue(envelope, None);
        Some(id)
    }

    /// Queues a payload that was already seen but held back, such as an
    /// orphan block that has now attached.
    pub fn relay(&mut self, payload: Payload, now_ms: u64) {
        let envelope = Envelope::new(payload);
        self.store.mark_seen(envelope.id, now_ms);
        if self.outbound.iter().any(|e| e.envelope.id == envelope.id) {
            return;
        }
        self.enqueue(envelope, None);
    }

    /// Handles an inbound envelope from `from`.
    ///
    /// The id is checked against the payload, then against the seen set.
    /// New messages are marked seen and dispatched to `sink`. Accepted ones
    /// are re-queued with one more hop, unless that would pass the TTL
    /// ceiling.
    pub fn receive<S: PayloadSink>(
        &mut self,
        envelope: Envelope,
        from: &PeerId,
        sink: &mut S,
        now_ms: u64,
    ) -> ReceiveOutcome {
        self.stats.received += 1;

        if !envelope.is_consistent() {
            self.stats.inconsistent += 1;
            debug!(peer = %from, id = %envelope.id.short(), "dropping envelope with inconsistent id");
            return ReceiveOutcome::Inconsistent;
        }

        if !self.store.mark_seen(envelope.id, now_ms) {
            self.stats.duplicates += 1;
            trace!(peer = %from, id = %envelope.id.short(), "dropping duplicate gossip message");
            return ReceiveOutcome::Duplicate;
        }

        let verdict = sink.deliver(&envelope.payload, from);
        let mut requeued = false;
        match &verdict {
            Verdict::Rejected(reason) => {
                self.stats.rejected += 1;
                debug!(
                    peer = %from,
                    kind = envelope.payload.kind(),
                    item = %envelope.payload.item_id().short(),
                    reason = %reason,
                    "rejected gossiped payload"
                );
            }
            v if v.should_propagate() => {
                self.stats.accepted += 1;
                let hops = envelope.hops.saturating_add(1);
                if hops <= self.config.ttl_ceiling {
                    self.enqueue(Envelope { hops, ..envelope }, Some(from.clone()));
                    requeued = true;
                } else {
                    self.stats.ttl_expired += 1;
                    trace!(id = %envelope.id.short(), hops, "hop limit reached, not re-gossiping");
                }
            }
            _ => {}
        }

        ReceiveOutcome::Delivered { verdict, requeued }
    }

    /// One gossip round.
    ///
    /// Picks up to `fanout` peers at random from `peers` and returns, for
    /// each, every queued envelope not yet sent to it. Queued envelopes age
    /// by one round; expired ones leave the queue.
    pub fn tick(&mut self, peers: &[PeerId], now_ms: u64) -> Vec<(PeerId, Envelope)> {
        self.store.prune(now_ms);

        let targets: Vec<PeerId> = peers
            .choose_multiple(&mut self.rng, self.config.fanout)
            .cloned()
            .collect();

        let mut sends = Vec::new();
        for peer in &targets {
            for entry in self.outbound.iter_mut() {
                if entry.origin.as_ref() == Some(peer) || entry.sent_to.contains(peer) {
                    continue;
                }
                entry.sent_to.insert(peer.clone());
                sends.push((peer.clone(), entry.envelope.clone()));
            }
        }

        for entry in self.outbound.iter_mut() {
            entry.rounds_left = entry.rounds_left.saturating_sub(1);
        }
        self.outbound.retain(|e| e.rounds_left > 0);

        self.stats.sent += sends.len() as u64;
        if !sends.is_empty() {
            trace!(peers = targets.len(), sends = sends.len(), "gossip tick");
        }
        sends
    }

    /// Picks one random peer, for anti-entropy.
    pub fn pick_peer(&mut self, peers: &[PeerId]) -> Option<PeerId> {
        peers.choose(&mut self.rng).cloned()
    }

    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.store.has_seen(id)
    }

    /// Records an id as seen without queueing it; used for items that
    /// arrive through anti-entropy rather than gossip.
    pub fn mark_seen(&mut self, id: MessageId, now_ms: u64) -> bool {
        self.store.mark_seen(id, now_ms)
    }

    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    pub fn seen_count(&self) -> usize {
        self.store.len()
    }

    pub fn stats(&self) -> GossipStats {
        self.stats
    }

    fn enqueue(&mut self, envelope: Envelope, origin: Option<PeerId>) {
        self.outbound.push(Outbound {
            envelope,
            origin,
            sent_to: HashSet::new(),
            rounds_left: self.config.push_rounds,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
