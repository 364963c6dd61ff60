use std::time::Duration;

use super::lookup::LookupStrategy;
use super::node::NodeId;
use super::routing::DEFAULT_BUCKET_SIZE;

/// How long an outbound query waits for its response or error.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Nodes queried in parallel by each lookup round.
pub const DEFAULT_LOOKUP_FANOUT: usize = 10;

/// Hop bound for the recursive lookup strategy.
pub const DEFAULT_MAX_LOOKUP_DEPTH: usize = 8;

/// Maximum outstanding outbound queries.
pub const MAX_PENDING_DHT_QUERIES: usize = 1024;

/// Inbound queries retained for diagnostics.
pub const DEFAULT_QUERY_LOG_CAPACITY: usize = 256;

pub const TOKEN_ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How often the server fires node inactivity timers and refreshes
/// stale buckets.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

pub const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
];

#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Our node id. Random when unset.
    pub node_id: Option<NodeId>,
    pub query_timeout: Duration,
    /// K: entries per routing table bucket, and nodes per `find_node` reply.
    pub bucket_size: usize,
    pub lookup_fanout: usize,
    pub lookup_strategy: LookupStrategy,
    pub max_pending_queries: usize,
    pub query_log_capacity: usize,
    pub token_rotation: Duration,
    pub maintenance_interval: Duration,
    pub bootstrap_nodes: Vec<String>,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            bucket_size: DEFAULT_BUCKET_SIZE,
            lookup_fanout: DEFAULT_LOOKUP_FANOUT,
            lookup_strategy: LookupStrategy::Iterative { retries: 2 },
            max_pending_queries: MAX_PENDING_DHT_QUERIES,
            query_log_capacity: DEFAULT_QUERY_LOG_CAPACITY,
            token_rotation: TOKEN_ROTATION_INTERVAL,
            maintenance_interval: MAINTENANCE_INTERVAL,
            bootstrap_nodes: BOOTSTRAP_NODES.iter().map(|s| s.to_string()).collect(),
        }
    }
}
