//! Three nodes over the in-memory network, one of them mining.
//!
//! A transfer created on one node is mined by another and lands on every
//! node's chain.

mod common;

use std::time::Duration;

use tokio::sync::watch;

use murmur_protocol::network::MemoryNetwork;

use common::{address, eventually, node_config, spawn_node};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transfer_is_mined_and_replicated() {
    let net = MemoryNetwork::new();
    let mut miner_config = node_config(true);
    miner_config.chain.initial_difficulty = 1 << 10;
    let mut config = node_config(false);
    config.chain.initial_difficulty = 1 << 10;

    let (miner, miner_rx) = spawn_node(&net, "miner", 9, &["alice", "bob"], miner_config);
    let (alice, alice_rx) = spawn_node(&net, "alice", 1, &["miner", "bob"], config.clone());
    let (bob, bob_rx) = spawn_node(&net, "bob", 2, &["miner", "alice"], config);

    let (stop_tx, stop_rx) = watch::channel(false);
    let tasks = vec![
        tokio::spawn(miner.clone().run(miner_rx, stop_rx.clone())),
        tokio::spawn(alice.clone().run(alice_rx, stop_rx.clone())),
        tokio::spawn(bob.clone().run(bob_rx, stop_rx)),
    ];

    let tx = alice.create_transaction(&address(4), 75).unwrap();

    let replicated = eventually(Duration::from_secs(20), || {
        [&miner, &alice, &bob].iter().all(|node| {
            node.status().height >= 3
                && node
                    .transaction_history(&address(4))
                    .iter()
                    .any(|record| record.transaction.id == tx.id)
        })
    })
    .await;

    stop_tx.send(true).unwrap();
    for task in tasks {
        task.await.unwrap();
    }
    assert!(replicated, "statuses: {:?} {:?} {:?}", miner.status(), alice.status(), bob.status());

    // A single miner means no forks: every chain is a prefix of the miner's.
    let reference = miner.inspect(|s| s.chain.block_at_height(3).map(|b| b.id()));
    for node in [&alice, &bob] {
        assert_eq!(node.inspect(|s| s.chain.block_at_height(3).map(|b| b.id())), reference);
        assert_eq!(node.account(&address(4)).balance, 1_000 + 75);
        assert!(node.pool_snapshot().iter().all(|p| p.id != tx.id));
    }
    assert!(miner.metrics().blocks_mined.get() >= 3);
    assert!(miner.account(&miner.address()).balance > 0);
}
