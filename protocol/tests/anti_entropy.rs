//! Anti-entropy repairs what gossip missed during a partition.

mod common;

use std::time::Duration;

use tokio::sync::watch;

use murmur_protocol::network::MemoryNetwork;

use common::{address, eventually, node_config, spawn_node};

#[tokio::test]
async fn partitioned_node_catches_up_after_heal() {
    let net = MemoryNetwork::new();
    let (a, a_rx) = spawn_node(&net, "a", 1, &["b"], node_config(false));
    let (b, b_rx) = spawn_node(&net, "b", 2, &["a"], node_config(false));

    net.partition(&["a".to_string()], &["b".to_string()]);

    let (stop_tx, stop_rx) = watch::channel(false);
    let a_task = tokio::spawn(a.clone().run(a_rx, stop_rx.clone()));
    let b_task = tokio::spawn(b.clone().run(b_rx, stop_rx));

    for _ in 0..3 {
        a.mine_one().unwrap().expect("extends the tip");
    }
    let pending = a.create_transaction(&address(3), 25).unwrap();

    // Let the push rounds expire while the link is down.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(b.status().height, 0);
    assert!(b.metrics().sync_timeouts.get() > 0 || b.status().sync_in_flight > 0);

    net.heal();
    let caught_up = eventually(Duration::from_secs(10), || {
        b.current_tip().id() == a.current_tip().id()
            && b.pool_snapshot().iter().any(|tx| tx.id == pending.id)
    })
    .await;
    assert!(caught_up, "b never repaired: {:?}", b.status());
    assert_eq!(b.account(&a.address()).balance, a.account(&a.address()).balance);

    stop_tx.send(true).unwrap();
    a_task.await.unwrap();
    b_task.await.unwrap();
}

#[tokio::test]
async fn unanswered_requests_time_out() {
    let net = MemoryNetwork::new();
    let (b, b_rx) = spawn_node(&net, "b", 2, &["ghost"], node_config(false));

    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(b.clone().run(b_rx, stop_rx));

    let timed_out = eventually(Duration::from_secs(5), || b.metrics().sync_timeouts.get() > 0).await;
    assert!(timed_out);

    stop_tx.send(true).unwrap();
    task.await.unwrap();
}
