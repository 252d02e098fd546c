//! Push gossip over a simulated, fully connected network.
//!
//! Every node accepts every new payload. A run must reach every node, stop
//! on its own, and never send the same message to the same peer twice.

mod common;

use std::collections::VecDeque;

use murmur_protocol::network::gossip::{
    Envelope, GossipConfig, GossipEngine, Payload, PayloadSink, Verdict,
};
use murmur_protocol::network::PeerId;
use murmur_protocol::transaction::signed_transfer;

use common::{address, keypair};

#[derive(Default)]
struct Counter {
    delivered: usize,
}

impl PayloadSink for Counter {
    fn deliver(&mut self, _payload: &Payload, _from: &PeerId) -> Verdict {
        self.delivered += 1;
        Verdict::Accepted
    }
}

struct Outcome {
    rounds: usize,
    reached: usize,
    sends: usize,
    duplicate_deliveries: usize,
}

fn simulate(nodes: usize, fanout: usize, seed: u64, messages: usize) -> Outcome {
    let names: Vec<PeerId> = (0..nodes).map(|i| format!("n{}", i)).collect();
    let mut engines: Vec<GossipEngine> = (0..nodes)
        .map(|i| {
            GossipEngine::new(GossipConfig {
                fanout,
                push_rounds: 10,
                rng_seed: Some(seed * 1_000 + i as u64),
                ..GossipConfig::default()
            })
        })
        .collect();
    let mut sinks: Vec<Counter> = (0..nodes).map(|_| Counter::default()).collect();

    for nonce in 1..=messages as u64 {
        let tx = signed_transfer(&keypair(1), &address(2), 1, nonce);
        engines[0].originate(Payload::Transaction(tx), 0);
    }

    let mut rounds = 0;
    let mut sends = 0;
    loop {
        rounds += 1;
        let mut in_flight: VecDeque<(usize, PeerId, Envelope)> = VecDeque::new();
        for (i, engine) in engines.iter_mut().enumerate() {
            let peers: Vec<PeerId> = names.iter().filter(|n| **n != names[i]).cloned().collect();
            for (peer, envelope) in engine.tick(&peers, rounds as u64) {
                in_flight.push_back((i, peer, envelope));
            }
        }
        sends += in_flight.len();
        while let Some((from, to, envelope)) = in_flight.pop_front() {
            let target = names.iter().position(|n| *n == to).unwrap();
            engines[target].receive(envelope, &names[from], &mut sinks[target], rounds as u64);
        }
        if engines.iter().all(|e| e.queued() == 0) || rounds > 200 {
            break;
        }
    }

    Outcome {
        rounds,
        reached: sinks.iter().skip(1).filter(|s| s.delivered == messages).count() + 1,
        sends,
        duplicate_deliveries: engines.iter().map(|e| e.stats().duplicates as usize).sum(),
    }
}

#[test]
fn gossip_reaches_everyone_and_terminates() {
    for seed in 0..10 {
        let nodes = 16;
        let outcome = simulate(nodes, 3, seed, 2);
        assert!(outcome.rounds <= 200, "seed {} did not terminate", seed);
        assert_eq!(outcome.reached, nodes, "seed {} missed nodes", seed);
        // Each engine sends a message to each peer at most once.
        assert!(outcome.sends <= 2 * nodes * (nodes - 1));
    }
}

#[test]
fn fanout_two_also_terminates() {
    for seed in 0..5 {
        let outcome = simulate(12, 2, seed, 1);
        assert!(outcome.rounds <= 200);
        assert_eq!(outcome.reached, 12);
    }
}

#[test]
fn redundant_copies_are_absorbed_as_duplicates() {
    let outcome = simulate(8, 3, 7, 1);
    let first_copies = 8 - 1;
    assert_eq!(outcome.sends, first_copies + outcome.duplicate_deliveries);
}
