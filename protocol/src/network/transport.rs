//! # Transport & Peers
//!
//! The two collaborators a node talks to but does not own.
//!
//! - [`Transport`] delivers opaque frames to a peer, best effort. A send
//!   either reaches the peer's inbound queue or fails; nothing is retried.
//! - [`PeerManager`] supplies the live peer set and decides what to do with
//!   peers that stop answering.
//!
//! [`MemoryNetwork`] implements the transport over tokio channels so that
//! many nodes can run in one process. Links can be cut and restored to
//! simulate partitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Peers are identified by their transport address.
pub type PeerId = String;

/// A frame as it arrives: payload bytes plus the sender.
pub type Inbound = (Bytes, PeerId);

/// Receiving half handed to the node runtime.
pub type InboundReceiver = mpsc::UnboundedReceiver<Inbound>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("link {from} -> {to} is down")]
    LinkDown { from: PeerId, to: PeerId },

    #[error("peer {0} is no longer receiving")]
    Closed(PeerId),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Best-effort frame delivery.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Address other peers know this node by.
    fn local_id(&self) -> &PeerId;

    async fn send(&self, peer: &PeerId, frame: Bytes) -> Result<(), TransportError>;
}

/// Source of live peers.
pub trait PeerManager: Send + Sync + 'static {
    fn live_peers(&self) -> Vec<PeerId>;

    /// A request to `peer` went unanswered.
    fn report_unresponsive(&self, peer: &PeerId);

    /// `peer` answered a request.
    fn report_responsive(&self, _peer: &PeerId) {}
}

// ---------------------------------------------------------------------------
// StaticPeers
// ---------------------------------------------------------------------------

/// A fixed peer list that drops peers after repeated timeouts.
pub struct StaticPeers {
    peers: RwLock<Vec<PeerId>>,
    strikes: DashMap<PeerId, u32>,
    max_strikes: u32,
}

impl StaticPeers {
    pub fn new(peers: impl IntoIterator<Item = PeerId>, max_strikes: u32) -> Self {
        Self {
            peers: RwLock::new(peers.into_iter().collect()),
            strikes: DashMap::new(),
            max_strikes: max_strikes.max(1),
        }
    }

    pub fn add(&self, peer: PeerId) {
        let mut peers = self.peers.write();
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    pub fn remove(&self, peer: &PeerId) -> bool {
        self.strikes.remove(peer);
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|p| p != peer);
        peers.len() != before
    }

    pub fn strikes(&self, peer: &PeerId) -> u32 {
        self.strikes.get(peer).map(|s| *s).unwrap_or(0)
    }
}

impl PeerManager for StaticPeers {
    fn live_peers(&self) -> Vec<PeerId> {
        self.peers.read().clone()
    }

    fn report_unresponsive(&self, peer: &PeerId) {
        let strikes = {
            let mut entry = self.strikes.entry(peer.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        if strikes >= self.max_strikes && self.remove(peer) {
            warn!(peer = %peer, strikes, "dropping unresponsive peer");
        } else {
            debug!(peer = %peer, strikes, "peer missed a sync deadline");
        }
    }

    fn report_responsive(&self, peer: &PeerId) {
        self.strikes.remove(peer);
    }
}

// ---------------------------------------------------------------------------
// MemoryNetwork
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Switchboard {
    mailboxes: HashMap<PeerId, mpsc::UnboundedSender<Inbound>>,
    /// Directed links that currently drop everything.
    cut: HashSet<(PeerId, PeerId)>,
}

/// An in-process network. Cloning yields another handle to the same one.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    switchboard: Arc<RwLock<Switchboard>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` and returns its transport and inbound queue. Joining
    /// twice replaces the previous mailbox.
    pub fn join(&self, id: impl Into<PeerId>) -> (MemoryTransport, InboundReceiver) {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.switchboard.write().mailboxes.insert(id.clone(), tx);
        (
            MemoryTransport {
                local: id,
                network: self.clone(),
            },
            rx,
        )
    }

    pub fn leave(&self, id: &PeerId) {
        self.switchboard.write().mailboxes.remove(id);
    }

    pub fn members(&self) -> Vec<PeerId> {
        let mut members: Vec<PeerId> = self.switchboard.read().mailboxes.keys().cloned().collect();
        members.sort();
        members
    }

    /// Cuts the link in both directions.
    pub fn disconnect(&self, a: &PeerId, b: &PeerId) {
        let mut board = self.switchboard.write();
        board.cut.insert((a.clone(), b.clone()));
        board.cut.insert((b.clone(), a.clone()));
    }

    /// Cuts every link between the two groups.
    pub fn partition(&self, left: &[PeerId], right: &[PeerId]) {
        for a in left {
            for b in right {
                self.disconnect(a, b);
            }
        }
    }

    /// Restores every cut link.
    pub fn heal(&self) {
        self.switchboard.write().cut.clear();
    }

    fn deliver(&self, from: &PeerId, to: &PeerId, frame: Bytes) -> Result<(), TransportError> {
        let board = self.switchboard.read();
        if board.cut.contains(&(from.clone(), to.clone())) {
            return Err(TransportError::LinkDown {
                from: from.clone(),
                to: to.clone(),
            });
        }
        let mailbox = board
            .mailboxes
            .get(to)
            .ok_or_else(|| TransportError::UnknownPeer(to.clone()))?;
        mailbox
            .send((frame, from.clone()))
            .map_err(|_| TransportError::Closed(to.clone()))
    }
}

/// One node's handle onto a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    local: PeerId,
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> &PeerId {
        &self.local
    }

    async fn send(&self, peer: &PeerId, frame: Bytes) -> Result<(), TransportError> {
        self.network.deliver(&self.local, peer, frame)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- MemoryNetwork --

    #[tokio::test]
    async fn frames_reach_the_peer_with_sender() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.join("a");
        let (_b, mut b_rx) = net.join("b");

        a.send(&"b".to_string(), Bytes::from_static(b"hi")).await.unwrap();
        let (frame, from) = b_rx.recv().await.unwrap();
        assert_eq!(&frame[..], b"hi");
        assert_eq!(from, "a");
    }

    #[tokio::test]
    async fn unknown_peer_is_an_error() {
        let net = MemoryNetwork::new();
        let (a, _rx) = net.join("a");
        assert_eq!(
            a.send(&"ghost".to_string(), Bytes::new()).await,
            Err(TransportError::UnknownPeer("ghost".into()))
        );
    }

    #[tokio::test]
    async fn partition_cuts_both_directions_until_healed() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.join("a");
        let (b, mut b_rx) = net.join("b");
        net.partition(&["a".to_string()], &["b".to_string()]);

        assert!(matches!(
            a.send(&"b".to_string(), Bytes::new()).await,
            Err(TransportError::LinkDown { .. })
        ));
        assert!(b.send(&"a".to_string(), Bytes::new()).await.is_err());

        net.heal();
        a.send(&"b".to_string(), Bytes::from_static(b"x")).await.unwrap();
        assert!(b_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn closed_mailbox_is_reported() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.join("a");
        let (_b, b_rx) = net.join("b");
        drop(b_rx);
        assert_eq!(
            a.send(&"b".to_string(), Bytes::new()).await,
            Err(TransportError::Closed("b".into()))
        );
    }

    // -- StaticPeers --

    #[test]
    fn peers_are_dropped_after_max_strikes() {
        let peers = StaticPeers::new(vec!["a".to_string(), "b".to_string()], 2);
        peers.report_unresponsive(&"a".to_string());
        assert_eq!(peers.live_peers().len(), 2);
        peers.report_unresponsive(&"a".to_string());
        assert_eq!(peers.live_peers(), vec!["b".to_string()]);
    }

    #[test]
    fn a_response_clears_strikes() {
        let peers = StaticPeers::new(vec!["a".to_string()], 2);
        peers.report_unresponsive(&"a".to_string());
        peers.report_responsive(&"a".to_string());
        assert_eq!(peers.strikes(&"a".to_string()), 0);
        peers.report_unresponsive(&"a".to_string());
        assert_eq!(peers.live_peers().len(), 1);
    }
}
