//! Pool bookkeeping across a reorganisation.
//!
//! After the switch, transactions that only the abandoned branch contained
//! are pending again, while transactions the winning branch spends against
//! are gone.

mod common;

use std::sync::Arc;

use murmur_protocol::network::{encode, Envelope, Frame, MemoryNetwork, Node, Payload};
use murmur_protocol::storage::Block;
use murmur_protocol::transaction::signed_transfer;

use common::{address, child, keypair, node_config, spawn_node};

fn deliver(node: &Arc<Node>, block: &Block) {
    let frame = encode(&Frame::Gossip(Envelope::new(Payload::Block(block.clone())))).unwrap();
    node.handle_frame(&frame, &"feeder".to_string());
}

#[tokio::test]
async fn reorg_restores_and_evicts_pool_entries() {
    let net = MemoryNetwork::new();
    let (node, _inbound) = spawn_node(&net, "n", 9, &[], node_config(false));
    let genesis = node.current_tip();

    // Losing branch: account 1 pays account 2 twice; account 3 pays account 4.
    let spent_twice = signed_transfer(&keypair(1), &address(2), 10, 1);
    let rolled_back_only = signed_transfer(&keypair(1), &address(2), 20, 2);
    let on_both = signed_transfer(&keypair(3), &address(4), 30, 1);
    let a1 = child(&genesis, vec![spent_twice.clone(), rolled_back_only.clone(), on_both.clone()], 10);

    // Winning branch: account 1 spends nonce 1 elsewhere.
    let conflicting = signed_transfer(&keypair(1), &address(4), 40, 1);
    let b1 = child(&genesis, vec![conflicting.clone(), on_both.clone()], 11);
    let b2 = child(&b1, vec![], 11);

    deliver(&node, &a1);
    assert_eq!(node.current_tip().id(), a1.id());
    assert!(node.pool_snapshot().is_empty());

    deliver(&node, &b1);
    deliver(&node, &b2);
    assert_eq!(node.current_tip().id(), b2.id());
    assert_eq!(node.metrics().reorgs.get(), 1);

    let pool: Vec<_> = node.pool_snapshot().into_iter().map(|tx| tx.id).collect();
    assert!(pool.contains(&rolled_back_only.id), "only in the losing branch");
    assert!(!pool.contains(&spent_twice.id), "nonce now used by the winner");
    assert!(!pool.contains(&on_both.id), "already on the winning branch");
    assert!(!pool.contains(&conflicting.id));
    assert_eq!(pool.len(), 1);

    assert_eq!(node.account(&address(4)).balance, 1_000 + 40 + 30);
    assert_eq!(node.account(&address(2)).balance, 1_000);
}

#[tokio::test]
async fn restored_transaction_is_mined_on_the_new_tip() {
    let net = MemoryNetwork::new();
    let (node, _inbound) = spawn_node(&net, "n", 9, &[], node_config(false));
    let genesis = node.current_tip();

    let tx = signed_transfer(&keypair(2), &address(3), 5, 1);
    let a1 = child(&genesis, vec![tx.clone()], 10);
    let b1 = child(&genesis, vec![], 11);
    let b2 = child(&b1, vec![], 11);

    deliver(&node, &a1);
    deliver(&node, &b1);
    deliver(&node, &b2);
    assert_eq!(node.pool_snapshot(), vec![tx.clone()]);

    node.mine_one().unwrap().expect("extends the tip");
    assert!(node.pool_snapshot().is_empty());
    assert_eq!(node.account(&address(3)).balance, 1_005);
    assert_eq!(node.status().height, 3);
}
