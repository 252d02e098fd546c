//! # Node Runtime
//!
//! A [`Node`] is one participant: a chain, a pool and a gossip engine behind
//! a single lock, plus the tasks that drive them.
//!
//! ```text
//!            ┌───────────── Node::run ─────────────┐
//! inbound ──>│ decode ─> gossip.receive ─> Ingest  │──> chain / pool
//!            │ gossip timer ─> gossip.tick ─> send │
//!            │ anti-entropy timer ─> Summary req   │
//!            └─────────────────────────────────────┘
//!            ┌──────────── mining task ────────────┐
//!            │ template ─> spawn_blocking(mine)    │──> submit_mined
//!            └─────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! - **One lock.** Chain, pool and gossip state change together: accepting a
//!   block moves transactions out of the pool and may reorg the chain. A
//!   single `parking_lot::Mutex` around [`NodeState`] keeps those updates
//!   atomic. The lock is never held across an `.await`.
//! - **Fire-and-forget sends.** Each outbound frame is its own task. A slow
//!   or dead peer delays nobody and its failures are only logged.
//! - **Mining off the runtime.** The nonce search runs on the blocking pool
//!   and polls a [`MiningSignal`] that is bumped on every tip change. A mined
//!   block is inserted only if its parent is still the tip.
//! - **No globals.** Everything hangs off the `Node`, so a process can host
//!   as many as it likes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigError, NodeConfig};
use crate::consensus::pow::{mine, MiningError, MiningSignal, MiningTicket};
use crate::consensus::producer::build_template_at;
use crate::crypto::keys::Keypair;
use crate::metrics::NodeMetrics;
use crate::network::gossip::{
    Envelope, GossipEngine, GossipStats, Payload, PayloadSink, ReceiveOutcome, Verdict,
};
use crate::network::mempool::{Mempool, PoolError, SubmitOutcome};
use crate::network::sync::{
    plan_followup, serve, SyncReply, SyncRequest, SyncResponse, SyncTracker,
};
use crate::network::transport::{InboundReceiver, PeerId, PeerManager, Transport};
use crate::network::wire::{self, Frame};
use crate::storage::block::{Block, BlockId};
use crate::storage::chain::{AddOutcome, Chain, TipChange, TransactionRecord};
use crate::storage::state::AccountState;
use crate::transaction::verification::is_well_formed_address;
use crate::transaction::{signed_transfer, Transaction, TxId};

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

// ---------------------------------------------------------------------------
// Errors & Status
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("transaction rejected: {0}")]
    Rejected(#[from] PoolError),

    #[error("invalid recipient address {0}")]
    BadRecipient(String),
}

/// Point-in-time view of a node, served by the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: PeerId,
    pub address: String,
    pub tip: String,
    pub height: u64,
    pub total_work: u128,
    pub pool_size: usize,
    pub orphan_count: usize,
    pub block_count: usize,
    pub seen_count: usize,
    pub peers: usize,
    pub sync_in_flight: usize,
    pub mining: bool,
    pub gossip: GossipStats,
}

// ---------------------------------------------------------------------------
// Node State
// ---------------------------------------------------------------------------

/// Everything guarded by the node lock.
pub struct NodeState {
    pub chain: Chain,
    pub mempool: Mempool,
    pub gossip: GossipEngine,
}

/// What an ingest pass changed, applied to metrics and the miner once the
/// lock is released.
#[derive(Debug, Default)]
struct Effects {
    tip_changed: bool,
    reorgs: u64,
    blocks_accepted: u64,
    txs_accepted: u64,
    orphans: u64,
    missing_parents: Vec<BlockId>,
    /// Buffered orphans that attached and should now be gossiped.
    relay: Vec<Block>,
}

/// Feeds payloads into the chain and pool.
struct Ingest<'a> {
    chain: &'a mut Chain,
    mempool: &'a Mempool,
    now_ms: u64,
    effects: Effects,
}

impl<'a> Ingest<'a> {
    fn new(chain: &'a mut Chain, mempool: &'a Mempool, now_ms: u64) -> Self {
        Self {
            chain,
            mempool,
            now_ms,
            effects: Effects::default(),
        }
    }

    fn transaction(&mut self, tx: Transaction) -> Verdict {
        if self.chain.contains_transaction(&tx.id) {
            return Verdict::Known;
        }
        if self.chain.ledger().is_stale(&tx) {
            return Verdict::Rejected(format!(
                "nonce {} already used by {}",
                tx.nonce, tx.sender
            ));
        }
        match self.mempool.submit_at(tx, self.now_ms) {
            Ok(SubmitOutcome::Inserted { .. }) => {
                self.effects.txs_accepted += 1;
                Verdict::Accepted
            }
            Ok(SubmitOutcome::AlreadyPresent) => Verdict::Known,
            Err(e) => Verdict::Rejected(e.to_string()),
        }
    }

    fn block(&mut self, block: Block) -> Verdict {
        match self.chain.try_add(block) {
            Ok(AddOutcome::AlreadyKnown) => Verdict::Known,
            Ok(AddOutcome::Orphaned { missing_parent, .. }) => {
                self.effects.orphans += 1;
                self.effects.missing_parents.push(missing_parent);
                Verdict::Orphan { missing_parent }
            }
            Ok(AddOutcome::Attached {
                attached,
                tip_change,
                ..
            }) => {
                self.effects.blocks_accepted += attached.len() as u64;
                for id in attached.iter().skip(1) {
                    if let Some(block) = self.chain.block(id) {
                        self.effects.relay.push(block.clone());
                    }
                }
                if let Some(change) = tip_change {
                    self.reconcile_pool(&change);
                }
                Verdict::Accepted
            }
            Err(e) => Verdict::Rejected(e.to_string()),
        }
    }

    /// Brings the pool in line with a new canonical tip.
    ///
    /// Transactions now on chain leave the pool. Transactions only in the
    /// rolled-back blocks come back. Anything the new ledger makes stale is
    /// evicted.
    fn reconcile_pool(&mut self, change: &TipChange) {
        let applied: HashSet<TxId> = change
            .applied
            .iter()
            .flat_map(|b| b.transaction_ids())
            .collect();
        let applied_ids: Vec<TxId> = applied.iter().copied().collect();
        self.mempool.remove(&applied_ids);

        let mut restored = 0usize;
        for block in &change.rolled_back {
            for tx in &block.transactions {
                if applied.contains(&tx.id) {
                    continue;
                }
                if let Ok(outcome) = self.mempool.submit_at(tx.clone(), self.now_ms) {
                    restored += outcome.is_new() as usize;
                }
            }
        }
        let evicted = self.mempool.evict_conflicting(self.chain.ledger());

        self.effects.tip_changed = true;
        if change.is_reorg() {
            self.effects.reorgs += 1;
            info!(
                old_tip = %change.old_tip.short(),
                new_tip = %change.new_tip.short(),
                depth = change.rolled_back.len(),
                restored,
                evicted = evicted.len(),
                "chain reorganised"
            );
        }
    }
}

impl PayloadSink for Ingest<'_> {
    fn deliver(&mut self, payload: &Payload, _from: &PeerId) -> Verdict {
        match payload {
            Payload::Transaction(tx) => self.transaction(tx.clone()),
            Payload::Block(block) => self.block(block.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A gossip + proof-of-work node.
pub struct Node {
    id: PeerId,
    config: NodeConfig,
    keypair: Keypair,
    transport: Arc<dyn Transport>,
    peers: Arc<dyn PeerManager>,
    state: Mutex<NodeState>,
    sync: SyncTracker,
    mining: MiningSignal,
    metrics: NodeMetrics,
}

impl Node {
    /// Validates `config` and builds a node at genesis.
    pub fn new(
        config: NodeConfig,
        keypair: Keypair,
        transport: Arc<dyn Transport>,
        peers: Arc<dyn PeerManager>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let id = transport.local_id().clone();
        let metrics = NodeMetrics::new(&id)?;
        let state = NodeState {
            chain: Chain::new(config.chain.clone()),
            mempool: Mempool::new(config.mempool.clone()),
            gossip: GossipEngine::new(config.gossip.clone()),
        };

        info!(node = %id, address = %keypair.address(), mining = config.mining.enabled, "node created");

        Ok(Self {
            id,
            sync: SyncTracker::new(&config.sync),
            config,
            keypair,
            transport,
            peers,
            state: Mutex::new(state),
            mining: MiningSignal::new(),
            metrics,
        })
    }

    // -- Accessors --

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Account address of this node's keypair; mining rewards go here.
    pub fn address(&self) -> String {
        self.keypair.address()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Runs `f` with the locked state.
    pub fn inspect<R>(&self, f: impl FnOnce(&NodeState) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn status(&self) -> NodeStatus {
        let peers = self.peers.live_peers().len();
        let state = self.state.lock();
        let summary = state.chain.summary();
        NodeStatus {
            id: self.id.clone(),
            address: self.keypair.address(),
            tip: summary.tip.to_hex(),
            height: summary.height,
            total_work: summary.total_work,
            pool_size: state.mempool.len(),
            orphan_count: state.chain.orphan_count(),
            block_count: state.chain.block_count(),
            seen_count: state.gossip.seen_count(),
            peers,
            sync_in_flight: self.sync.in_flight(),
            mining: self.config.mining.enabled,
            gossip: state.gossip.stats(),
        }
    }

    pub fn current_tip(&self) -> Block {
        self.state.lock().chain.current_tip().clone()
    }

    pub fn blocks_since(&self, id: &BlockId) -> Option<Vec<Block>> {
        self.state.lock().chain.blocks_since(id)
    }

    pub fn block(&self, id: &BlockId) -> Option<Block> {
        self.state.lock().chain.block(id).cloned()
    }

    pub fn pool_snapshot(&self) -> Vec<Transaction> {
        self.state.lock().mempool.snapshot()
    }

    pub fn account(&self, address: &str) -> AccountState {
        self.state.lock().chain.account(address)
    }

    pub fn transaction_history(&self, address: &str) -> Vec<TransactionRecord> {
        self.state.lock().chain.transaction_history(address)
    }

    // -- Local submissions --

    /// Admits a transaction from a local client and gossips it.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<TxId, NodeError> {
        let now = now_ms();
        let id = tx.id;
        {
            let mut state = self.state.lock();
            let outcome = state.mempool.submit_at(tx.clone(), now)?;
            if outcome.is_new() {
                self.metrics.transactions_accepted.inc();
            }
            state.gossip.originate(Payload::Transaction(tx), now);
            self.metrics.pool_size.set(state.mempool.len() as i64);
        }
        debug!(node = %self.id, tx = %id.short(), "local transaction submitted");
        Ok(id)
    }

    /// Signs a transfer from this node's account with its next free nonce,
    /// admits it and gossips it.
    pub fn create_transaction(&self, recipient: &str, amount: u64) -> Result<Transaction, NodeError> {
        if !is_well_formed_address(recipient) {
            return Err(NodeError::BadRecipient(recipient.to_string()));
        }
        let sender = self.keypair.address();
        let nonce = {
            let state = self.state.lock();
            let pending = state
                .mempool
                .pending_for_sender(&sender)
                .iter()
                .map(|tx| tx.nonce)
                .max()
                .unwrap_or(0);
            state.chain.nonce_of(&sender).max(pending) + 1
        };
        let tx = signed_transfer(&self.keypair, recipient, amount, nonce);
        self.submit_transaction(tx.clone())?;
        Ok(tx)
    }

    // -- Runtime --

    /// Drives the node until `shutdown` flips to `true` or the inbound queue
    /// closes.
    pub async fn run(self: Arc<Self>, mut inbound: InboundReceiver, mut shutdown: watch::Receiver<bool>) {
        let mut gossip_timer =
            tokio::time::interval(Duration::from_millis(self.config.gossip.gossip_interval_ms));
        let mut anti_entropy_timer =
            tokio::time::interval(Duration::from_millis(self.config.gossip.anti_entropy_interval_ms));
        gossip_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        anti_entropy_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let miner = self
            .config
            .mining
            .enabled
            .then(|| tokio::spawn(self.clone().mining_loop()));

        info!(node = %self.id, "node running");
        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some((bytes, from)) => self.handle_frame(&bytes, &from),
                    None => break,
                },
                _ = gossip_timer.tick() => self.gossip_round(),
                _ = anti_entropy_timer.tick() => self.anti_entropy_round(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.mining.stop();
        if let Some(handle) = miner {
            if let Err(e) = handle.await {
                warn!(node = %self.id, error = %e, "mining task failed");
            }
        }
        info!(node = %self.id, height = self.status().height, "node stopped");
    }

    /// Decodes and dispatches one inbound frame.
    pub fn handle_frame(&self, bytes: &[u8], from: &PeerId) {
        match wire::decode(bytes) {
            Ok(Frame::Gossip(envelope)) => self.handle_gossip(envelope, from),
            Ok(Frame::SyncRequest(call)) => {
                let response = {
                    let state = self.state.lock();
                    serve(&call.request, &state.chain, &state.mempool, &self.config.sync)
                };
                self.send(
                    from.clone(),
                    Frame::SyncResponse(SyncReply {
                        request_id: call.request_id,
                        response,
                    }),
                );
            }
            Ok(Frame::SyncResponse(reply)) => self.handle_sync_reply(reply, from),
            Err(e) => debug!(node = %self.id, peer = %from, error = %e, "dropping undecodable frame"),
        }
    }

    fn handle_gossip(&self, envelope: Envelope, from: &PeerId) {
        let now = now_ms();
        self.metrics.gossip_received.inc();
        let (outcome, effects) = {
            let mut guard = self.state.lock();
            let NodeState {
                chain,
                mempool,
                gossip,
            } = &mut *guard;
            let mut ingest = Ingest::new(chain, mempool, now);
            let outcome = gossip.receive(envelope, from, &mut ingest, now);
            let effects = ingest.effects;
            for block in &effects.relay {
                gossip.relay(Payload::Block(block.clone()), now);
            }
            self.refresh_gauges(&guard);
            (outcome, effects)
        };

        match &outcome {
            ReceiveOutcome::Duplicate => self.metrics.gossip_duplicates.inc(),
            ReceiveOutcome::Inconsistent => self.metrics.gossip_rejected.inc(),
            ReceiveOutcome::Delivered {
                verdict: Verdict::Rejected(reason),
                ..
            } => {
                self.metrics.gossip_rejected.inc();
                trace!(node = %self.id, peer = %from, reason = %reason, "gossip payload rejected");
            }
            _ => {}
        }

        if let ReceiveOutcome::Delivered {
            verdict: Verdict::Orphan { missing_parent },
            ..
        } = outcome
        {
            self.request(from, SyncRequest::Blocks {
                ids: vec![missing_parent],
            });
        }
        self.apply_effects(effects, false, from);
    }

    fn handle_sync_reply(&self, reply: SyncReply, from: &PeerId) {
        let pending = match self.sync.complete(reply.request_id, from) {
            Ok(p) => p,
            Err(e) => {
                debug!(node = %self.id, peer = %from, error = %e, "unmatched sync response");
                return;
            }
        };
        self.peers.report_responsive(from);
        let now = now_ms();

        match reply.response {
            SyncResponse::Summary(remote) => {
                let plan = {
                    let state = self.state.lock();
                    plan_followup(&state.chain, &state.mempool, &remote)
                };
                for request in plan {
                    self.request(from, request);
                }
            }
            SyncResponse::Blocks(blocks) => {
                let full_batch = blocks.len() >= self.config.sync.batch_size
                    && matches!(pending.request, SyncRequest::BlocksAfter { .. });
                let received = blocks.len();
                let effects = self.ingest_batch(blocks.into_iter().map(Payload::Block), now);
                debug!(
                    node = %self.id,
                    peer = %from,
                    received,
                    accepted = effects.blocks_accepted,
                    "applied synced blocks"
                );
                self.apply_effects(effects, true, from);
                if full_batch {
                    let locator = self.state.lock().chain.locator();
                    self.request(from, SyncRequest::BlocksAfter { locator });
                }
            }
            SyncResponse::Transactions(txs) => {
                let effects = self.ingest_batch(txs.into_iter().map(Payload::Transaction), now);
                self.apply_effects(effects, true, from);
            }
        }
    }

    /// Ingests payloads fetched by anti-entropy. They are marked seen so that
    /// later gossip copies are dropped as duplicates.
    fn ingest_batch(&self, payloads: impl Iterator<Item = Payload>, now: u64) -> Effects {
        let mut guard = self.state.lock();
        let NodeState {
            chain,
            mempool,
            gossip,
        } = &mut *guard;
        let mut ingest = Ingest::new(chain, mempool, now);
        for payload in payloads {
            gossip.mark_seen(payload.message_id(), now);
            if let Verdict::Rejected(reason) = ingest.deliver(&payload, &self.id) {
                trace!(node = %self.id, item = %payload.item_id().short(), reason = %reason, "synced item rejected");
            }
        }
        let effects = ingest.effects;
        for block in &effects.relay {
            gossip.relay(Payload::Block(block.clone()), now);
        }
        self.refresh_gauges(&guard);
        effects
    }

    fn apply_effects(&self, effects: Effects, from_sync: bool, peer: &PeerId) {
        self.metrics.blocks_accepted.inc_by(effects.blocks_accepted);
        self.metrics.transactions_accepted.inc_by(effects.txs_accepted);
        self.metrics.orphans.inc_by(effects.orphans);
        self.metrics.reorgs.inc_by(effects.reorgs);
        if effects.tip_changed {
            self.mining.bump();
        }
        // A synced block that is itself an orphan means the gap is wider
        // than one block; fetch the whole missing range instead.
        if from_sync && !effects.missing_parents.is_empty() {
            let locator = self.state.lock().chain.locator();
            self.request(peer, SyncRequest::BlocksAfter { locator });
        }
    }

    fn refresh_gauges(&self, state: &NodeState) {
        self.metrics.pool_size.set(state.mempool.len() as i64);
        self.metrics.chain_height.set(state.chain.height() as i64);
    }

    /// One push round plus pool and request housekeeping.
    pub fn gossip_round(&self) {
        let now = now_ms();
        let peers = self.peers.live_peers();
        let sends = {
            let mut state = self.state.lock();
            let expired = state.mempool.expire(now);
            if expired > 0 {
                debug!(node = %self.id, expired, "expired pending transactions");
            }
            self.refresh_gauges(&state);
            state.gossip.tick(&peers, now)
        };

        self.metrics.gossip_forwarded.inc_by(sends.len() as u64);
        for (peer, envelope) in sends {
            self.send(peer, Frame::Gossip(envelope));
        }

        for (request_id, pending) in self.sync.expire(now) {
            self.metrics.sync_timeouts.inc();
            warn!(
                node = %self.id,
                peer = %pending.peer,
                request_id,
                kind = pending.request.kind(),
                "sync request timed out"
            );
            self.peers.report_unresponsive(&pending.peer);
        }
    }

    /// Asks one random peer for its summary.
    pub fn anti_entropy_round(&self) {
        let peers = self.peers.live_peers();
        let target = self.state.lock().gossip.pick_peer(&peers);
        if let Some(peer) = target {
            self.request(&peer, SyncRequest::Summary);
        }
    }

    fn request(&self, peer: &PeerId, request: SyncRequest) {
        let call = self.sync.begin(peer, request, now_ms());
        self.send(peer.clone(), Frame::SyncRequest(call));
    }

    fn send(&self, peer: PeerId, frame: Frame) {
        let bytes = match wire::encode(&frame) {
            Ok(b) => b,
            Err(e) => {
                warn!(node = %self.id, peer = %peer, error = %e, "failed to encode frame");
                return;
            }
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(node = %self.id, peer = %peer, "no runtime, dropping send");
                return;
            }
        };
        let transport = self.transport.clone();
        let metrics = self.metrics.clone();
        let node = self.id.clone();
        runtime.spawn(async move {
            if let Err(e) = transport.send(&peer, bytes).await {
                metrics.send_failures.inc();
                warn!(node = %node, peer = %peer, error = %e, "send failed");
            }
        });
    }

    // -- Mining --

    /// A template on the current tip and a ticket valid until the tip moves.
    fn prepare_mining(&self) -> (Block, MiningTicket) {
        let state = self.state.lock();
        let template = build_template_at(&state.chain, &state.mempool, &self.keypair.address(), now_ms());
        (template.block, self.mining.ticket())
    }

    /// Inserts a freshly mined block if it still extends the tip.
    pub fn submit_mined(&self, block: Block) -> Option<BlockId> {
        let now = now_ms();
        let id = block.id();
        let effects = {
            let mut guard = self.state.lock();
            if guard.chain.tip_id() != block.parent_id() {
                debug!(node = %self.id, block = %id.short(), "mined block is stale, discarding");
                return None;
            }
            let NodeState {
                chain,
                mempool,
                gossip,
            } = &mut *guard;
            let mut ingest = Ingest::new(chain, mempool, now);
            match ingest.block(block.clone()) {
                Verdict::Accepted => {}
                other => {
                    warn!(node = %self.id, block = %id.short(), verdict = ?other, "mined block not accepted");
                    return None;
                }
            }
            let effects = ingest.effects;
            gossip.originate(Payload::Block(block.clone()), now);
            self.refresh_gauges(&guard);
            effects
        };

        self.metrics.blocks_mined.inc();
        info!(
            node = %self.id,
            block = %id.short(),
            height = block.height(),
            txs = block.tx_count(),
            difficulty = block.header.difficulty,
            "mined block"
        );
        self.apply_effects(effects, false, &self.id);
        Some(id)
    }

    /// Builds, mines and submits one block on the calling thread.
    pub fn mine_one(&self) -> Result<Option<BlockId>, MiningError> {
        let (template, ticket) = self.prepare_mining();
        let block = mine(template, &ticket, self.config.mining.poll_interval)?;
        Ok(self.submit_mined(block))
    }

    async fn mining_loop(self: Arc<Self>) {
        info!(node = %self.id, "mining started");
        let poll_interval = self.config.mining.poll_interval;
        while !self.mining.is_stopped() {
            let (template, ticket) = self.prepare_mining();
            let result = tokio::task::spawn_blocking(move || mine(template, &ticket, poll_interval)).await;
            match result {
                Ok(Ok(block)) => {
                    self.submit_mined(block);
                }
                Ok(Err(MiningError::Cancelled { attempts })) => {
                    trace!(node = %self.id, attempts, "mining restarted on new tip");
                }
                Ok(Err(e)) => debug!(node = %self.id, error = %e, "mining attempt abandoned"),
                Err(e) => {
                    warn!(node = %self.id, error = %e, "mining worker panicked");
                    break;
                }
            }
        }
        info!(node = %self.id, "mining stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::{MemoryNetwork, StaticPeers};
    use crate::storage::chain::ChainConfig;
    use crate::storage::state::GenesisAllocation;

    fn keypair(n: u8) -> Keypair {
        Keypair::from_seed(&[n; 32])
    }

    fn config(mining: bool) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.chain = ChainConfig {
            initial_difficulty: 1,
            difficulty_window: 1_000,
            genesis_allocations: vec![GenesisAllocation {
                address: keypair(1).address(),
                amount: 1_000,
            }],
            ..ChainConfig::default()
        };
        config.gossip.rng_seed = Some(1);
        config.mining.enabled = mining;
        config.mining.poll_interval = 64;
        config
    }

    fn node(net: &MemoryNetwork, name: &str, seed: u8, peers: &[&str]) -> (Arc<Node>, InboundReceiver) {
        let (transport, inbound) = net.join(name);
        let peers = StaticPeers::new(peers.iter().map(|p| p.to_string()), 3);
        let node = Node::new(config(false), keypair(seed), Arc::new(transport), Arc::new(peers)).unwrap();
        (Arc::new(node), inbound)
    }

    // -- Construction --

    #[test]
    fn invalid_config_is_rejected() {
        let net = MemoryNetwork::new();
        let (transport, _rx) = net.join("a");
        let mut cfg = config(false);
        cfg.gossip.fanout = 0;
        let result = Node::new(
            cfg,
            keypair(1),
            Arc::new(transport),
            Arc::new(StaticPeers::new(Vec::new(), 1)),
        );
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    // -- Transactions --

    #[test]
    fn create_transaction_uses_next_nonce() {
        let net = MemoryNetwork::new();
        let (a, _rx) = node(&net, "a", 1, &[]);
        let to = keypair(2).address();

        let first = a.create_transaction(&to, 10).unwrap();
        let second = a.create_transaction(&to, 10).unwrap();
        assert_eq!(first.nonce, 1);
        assert_eq!(second.nonce, 2);
        assert_eq!(a.pool_snapshot().len(), 2);
    }

    #[test]
    fn bad_recipient_is_refused() {
        let net = MemoryNetwork::new();
        let (a, _rx) = node(&net, "a", 1, &[]);
        assert!(matches!(
            a.create_transaction("not-an-address", 1),
            Err(NodeError::BadRecipient(_))
        ));
    }

    // -- Mining --

    #[test]
    fn mined_block_moves_transactions_out_of_the_pool() {
        let net = MemoryNetwork::new();
        let (a, _rx) = node(&net, "a", 1, &[]);
        let to = keypair(2).address();
        a.create_transaction(&to, 10).unwrap();

        let id = a.mine_one().unwrap().expect("extends tip");
        assert_eq!(a.current_tip().id(), id);
        assert!(a.pool_snapshot().is_empty());
        assert_eq!(a.account(&to).balance, 10);
        assert_eq!(a.account(&a.address()).balance, 1_000 - 10 + a.config().chain.block_reward);
        assert_eq!(a.metrics().blocks_mined.get(), 1);
    }

    #[test]
    fn stale_mined_block_is_discarded() {
        let net = MemoryNetwork::new();
        let (a, _rx) = node(&net, "a", 1, &[]);
        let (template, ticket) = a.prepare_mining();
        let stale = mine(template, &ticket, 64).unwrap();
        a.mine_one().unwrap();
        assert_eq!(a.submit_mined(stale), None);
        assert_eq!(a.status().height, 1);
    }

    // -- Frames --

    #[tokio::test]
    async fn gossiped_block_is_ingested_and_duplicates_counted() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = node(&net, "a", 1, &["b"]);
        let (b, _b_rx) = node(&net, "b", 2, &["a"]);
        a.mine_one().unwrap();

        let frame = wire::encode(&Frame::Gossip(Envelope::new(Payload::Block(a.current_tip())))).unwrap();
        b.handle_frame(&frame, &"a".to_string());
        b.handle_frame(&frame, &"a".to_string());

        assert_eq!(b.current_tip().id(), a.current_tip().id());
        assert_eq!(b.metrics().gossip_duplicates.get(), 1);
        assert_eq!(b.metrics().blocks_accepted.get(), 1);
    }

    #[tokio::test]
    async fn orphan_triggers_parent_request() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = node(&net, "a", 1, &["b"]);
        let (b, _b_rx) = node(&net, "b", 2, &["a"]);
        a.mine_one().unwrap();
        a.mine_one().unwrap();

        let frame = wire::encode(&Frame::Gossip(Envelope::new(Payload::Block(a.current_tip())))).unwrap();
        b.handle_frame(&frame, &"a".to_string());
        assert_eq!(b.status().orphan_count, 1);
        assert_eq!(b.status().sync_in_flight, 1);
    }

    #[tokio::test]
    async fn garbage_frames_are_ignored() {
        let net = MemoryNetwork::new();
        let (a, _rx) = node(&net, "a", 1, &[]);
        a.handle_frame(b"definitely not a frame", &"x".to_string());
        assert_eq!(a.status().height, 0);
    }

    #[test]
    fn status_reflects_state() {
        let net = MemoryNetwork::new();
        let (a, _rx) = node(&net, "a", 1, &["b", "c"]);
        let status = a.status();
        assert_eq!(status.id, "a");
        assert_eq!(status.height, 0);
        assert_eq!(status.peers, 2);
        assert_eq!(status.tip, a.current_tip().id().to_hex());
    }
}
