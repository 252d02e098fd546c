//! # Node Metrics
//!
//! Each node owns its own [`prometheus::Registry`]. Nothing is registered
//! globally, so any number of nodes can share a process (the simulator and
//! the integration tests run dozens).

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Metric handles for one node. Cloning shares the underlying counters.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub gossip_received: IntCounter,
    pub gossip_duplicates: IntCounter,
    pub gossip_rejected: IntCounter,
    pub gossip_forwarded: IntCounter,
    pub blocks_accepted: IntCounter,
    pub transactions_accepted: IntCounter,
    pub reorgs: IntCounter,
    pub orphans: IntCounter,
    pub blocks_mined: IntCounter,
    pub sync_timeouts: IntCounter,
    pub send_failures: IntCounter,
    pub pool_size: IntGauge,
    pub chain_height: IntGauge,
}

impl NodeMetrics {
    /// Creates a registry labelled with `node` and registers every metric.
    pub fn new(node: &str) -> Result<Self, prometheus::Error> {
        let labels = std::iter::once(("node".to_string(), node.to_string())).collect();
        let registry = Registry::new_custom(Some("murmur".into()), Some(labels))?;

        Ok(Self {
            gossip_received: counter(&registry, "gossip_received_total", "Gossip envelopes received")?,
            gossip_duplicates: counter(&registry, "gossip_duplicates_total", "Gossip envelopes dropped as already seen")?,
            gossip_rejected: counter(&registry, "gossip_rejected_total", "Gossiped payloads that failed validation")?,
            gossip_forwarded: counter(&registry, "gossip_forwarded_total", "Gossip envelopes sent to peers")?,
            blocks_accepted: counter(&registry, "blocks_accepted_total", "Blocks attached to the block tree")?,
            transactions_accepted: counter(&registry, "transactions_accepted_total", "Transactions admitted to the pool")?,
            reorgs: counter(&registry, "reorgs_total", "Canonical tip changes that rolled back blocks")?,
            orphans: counter(&registry, "orphans_total", "Blocks buffered because their parent was unknown")?,
            blocks_mined: counter(&registry, "blocks_mined_total", "Blocks mined locally and attached")?,
            sync_timeouts: counter(&registry, "sync_timeouts_total", "Anti-entropy requests that went unanswered")?,
            send_failures: counter(&registry, "send_failures_total", "Frames the transport failed to deliver")?,
            pool_size: gauge(&registry, "pool_size", "Pending transactions in the pool")?,
            chain_height: gauge(&registry, "chain_height", "Height of the canonical tip")?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let g = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}
