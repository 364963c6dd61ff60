use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::engine::Dht;
use super::error::DhtError;
use super::node::{NodeEntry, NodeId};

#[derive(Debug, Clone, Copy, Default)]
pub struct BootstrapOptions {
    /// `find_node` target. Random when unset.
    pub target: Option<NodeId>,
    /// Overrides the configured query timeout.
    pub timeout: Option<Duration>,
}

impl Dht {
    /// Seeds the routing table from one rendezvous node.
    ///
    /// The seed's id is unknown up front, so it is adopted from its reply.
    /// Returns the number of nodes in the table afterwards. Timeouts and
    /// malformed replies are returned as errors; retrying is up to the
    /// caller.
    pub async fn bootstrap(
        &self,
        seed: SocketAddr,
        options: BootstrapOptions,
    ) -> Result<usize, DhtError> {
        let target = options.target.unwrap_or_else(NodeId::generate);
        let timeout = options.timeout.unwrap_or(self.config().query_timeout);

        debug!("Bootstrapping from {} toward {}", seed, target);
        let reply = self.find_node_query(seed, None, target, timeout).await?;

        let now = Instant::now();
        self.routing_table()
            .add_node(NodeEntry::new(reply.id, seed, now));
        let learned = self.routing_table().add_nodes(reply.nodes, now);

        info!(
            "DHT bootstrap via {} ({}) added {} nodes, {} in routing table",
            seed,
            reply.id,
            learned,
            self.count_nodes()
        );

        Ok(self.count_nodes())
    }
}
