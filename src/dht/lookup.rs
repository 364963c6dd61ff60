use std::collections::HashSet;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use super::compact::{decode_nodes, decode_peers};
use super::config::DEFAULT_MAX_LOOKUP_DEPTH;
use super::engine::Dht;
use super::error::DhtError;
use super::message::DhtQuery;
use super::node::{NodeEntry, NodeId, NodeInfo};
use crate::bencode::{Dict, Value};

/// How `get_peers` walks the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// Query the closest known nodes, merge what they return into the
    /// routing table, and start over up to `retries` more times while no
    /// peers have been found.
    Iterative { retries: u32 },
    /// Follow returned nodes that are strictly closer to the target than
    /// the node that returned them, at most `max_depth` hops deep. Each hop
    /// queries the `fanout` closest such nodes.
    Recursive { max_depth: usize },
}

impl LookupStrategy {
    pub fn recursive() -> Self {
        LookupStrategy::Recursive {
            max_depth: DEFAULT_MAX_LOOKUP_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LookupOptions {
    pub strategy: LookupStrategy,
    /// Nodes queried per round, closest to the target first.
    pub fanout: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindNodeReply {
    /// The responder's id.
    pub id: NodeId,
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPeersReply {
    pub id: NodeId,
    pub token: Option<Bytes>,
    pub nodes: Vec<NodeInfo>,
    pub peers: Vec<SocketAddrV4>,
}

/// Peers in first-seen order, each (host, port) once.
#[derive(Debug, Default)]
struct PeerSet {
    seen: HashSet<SocketAddrV4>,
    peers: Vec<SocketAddrV4>,
}

impl PeerSet {
    fn extend(&mut self, peers: impl IntoIterator<Item = SocketAddrV4>) {
        for peer in peers {
            if self.seen.insert(peer) {
                self.peers.push(peer);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn into_vec(self) -> Vec<SocketAddrV4> {
        self.peers
    }
}

fn responder_id(values: &Dict) -> Result<NodeId, DhtError> {
    values
        .get(b"id".as_slice())
        .and_then(Value::as_bytes)
        .and_then(|b| NodeId::from_bytes(b).ok())
        .ok_or_else(|| DhtError::protocol("response is missing a valid `id'"))
}

impl Dht {
    /// Per-call options built from the engine configuration.
    pub fn lookup_options(&self) -> LookupOptions {
        LookupOptions {
            strategy: self.config().lookup_strategy,
            fanout: self.config().lookup_fanout,
            timeout: self.config().query_timeout,
        }
    }

    pub async fn ping(&self, addr: SocketAddr, node_id: Option<NodeId>) -> Result<NodeId, DhtError> {
        let values = self
            .query(addr, node_id, DhtQuery::Ping, self.config().query_timeout)
            .await?;
        responder_id(&values)
    }

    /// Sends one `find_node` query. The `nodes` field must be a byte
    /// string whose length is a multiple of 26.
    pub async fn find_node_query(
        &self,
        addr: SocketAddr,
        node_id: Option<NodeId>,
        target: NodeId,
        timeout: Duration,
    ) -> Result<FindNodeReply, DhtError> {
        let values = self
            .query(addr, node_id, DhtQuery::FindNode { target }, timeout)
            .await?;

        let id = responder_id(&values)?;
        let nodes = match values.get(b"nodes".as_slice()) {
            Some(Value::Bytes(nodes)) => decode_nodes(nodes)?,
            _ => return Err(DhtError::protocol("`nodes' parameter was invalid")),
        };

        Ok(FindNodeReply { id, nodes })
    }

    /// Sends one `get_peers` query and records the returned token on the
    /// responder. Malformed `nodes` or `values` are ignored.
    pub async fn get_peers_query(
        &self,
        node: &NodeInfo,
        info_hash: NodeId,
        timeout: Duration,
    ) -> Result<GetPeersReply, DhtError> {
        let values = self
            .query(node.addr, Some(node.id), DhtQuery::GetPeers { info_hash }, timeout)
            .await?;

        let id = responder_id(&values)?;

        let token = values.get(b"token".as_slice()).and_then(Value::as_bytes).cloned();
        if let Some(token) = &token {
            self.routing_table().set_token(&id, token.clone());
        }

        let nodes = values
            .get(b"nodes".as_slice())
            .and_then(Value::as_bytes)
            .and_then(|b| decode_nodes(b).ok())
            .unwrap_or_default();

        let peers = values
            .get(b"values".as_slice())
            .and_then(Value::as_list)
            .map(decode_peers)
            .unwrap_or_default();

        Ok(GetPeersReply {
            id,
            token,
            nodes,
            peers,
        })
    }

    /// Queries every candidate in parallel. Responses may arrive in any
    /// order; results come back paired with the node they belong to.
    async fn fan_out(
        &self,
        candidates: &[NodeInfo],
        info_hash: NodeId,
        timeout: Duration,
    ) -> Vec<(NodeInfo, Result<GetPeersReply, DhtError>)> {
        let queries = candidates.iter().map(|node| async move {
            (*node, self.get_peers_query(node, info_hash, timeout).await)
        });

        futures::future::join_all(queries).await
    }

    fn closest_infos(&self, target: &NodeId, count: usize) -> Vec<NodeInfo> {
        self.routing_table()
            .closest(target, count)
            .iter()
            .map(NodeEntry::info)
            .collect()
    }

    /// Finds peers for `info_hash`. Failing nodes count as returning no
    /// peers, so the result is empty rather than an error when nothing
    /// was found.
    pub async fn get_peers(&self, info_hash: NodeId, options: LookupOptions) -> Vec<SocketAddrV4> {
        let peers = match options.strategy {
            LookupStrategy::Iterative { retries } => {
                self.get_peers_iterative(info_hash, options, retries).await
            }
            LookupStrategy::Recursive { max_depth } => {
                self.get_peers_recursive(info_hash, options, max_depth).await
            }
        };

        info!(
            "DHT get_peers for {} found {} peers",
            info_hash,
            peers.len()
        );
        peers
    }

    async fn get_peers_iterative(
        &self,
        info_hash: NodeId,
        options: LookupOptions,
        mut retries: u32,
    ) -> Vec<SocketAddrV4> {
        let mut peers = PeerSet::default();

        loop {
            let candidates = self.closest_infos(&info_hash, options.fanout);
            if candidates.is_empty() {
                debug!("get_peers for {}: routing table is empty", info_hash);
                break;
            }

            for (node, result) in self.fan_out(&candidates, info_hash, options.timeout).await {
                match result {
                    Ok(reply) => {
                        self.routing_table().add_nodes(reply.nodes, Instant::now());
                        peers.extend(reply.peers);
                    }
                    Err(e) => debug!("get_peers query to {} failed: {}", node.addr, e),
                }
            }

            if !peers.is_empty() || retries == 0 {
                break;
            }
            retries -= 1;
            debug!(
                "get_peers for {} found nothing, {} retries left",
                info_hash, retries
            );
        }

        peers.into_vec()
    }

    async fn get_peers_recursive(
        &self,
        info_hash: NodeId,
        options: LookupOptions,
        max_depth: usize,
    ) -> Vec<SocketAddrV4> {
        let mut peers = PeerSet::default();
        let mut frontier = self.closest_infos(&info_hash, options.fanout);
        let mut visited: HashSet<NodeId> = frontier.iter().map(|n| n.id).collect();
        visited.insert(*self.our_id());
        let mut depth = 0;

        while !frontier.is_empty() {
            if depth >= max_depth {
                debug!(
                    "get_peers for {} stopped at depth {} with {} candidates left",
                    info_hash,
                    depth,
                    frontier.len()
                );
                break;
            }

            let mut next = Vec::new();

            for (node, result) in self.fan_out(&frontier, info_hash, options.timeout).await {
                let reply = match result {
                    Ok(reply) => reply,
                    Err(e) => {
                        debug!("get_peers query to {} failed: {}", node.addr, e);
                        continue;
                    }
                };

                if depth > 0 {
                    self.routing_table()
                        .add_nodes([NodeInfo::new(reply.id, node.addr)], Instant::now());
                }
                peers.extend(reply.peers);

                let parent_distance = reply.id.distance(&info_hash);
                next.extend(reply.nodes.into_iter().filter(|candidate| {
                    candidate.addr.port() != 0
                        && candidate.id.distance(&info_hash) < parent_distance
                        && visited.insert(candidate.id)
                }));
            }

            // Each hop queries at most `fanout` nodes, the closest ones first.
            next.sort_by_key(|candidate| candidate.id.distance(&info_hash));
            next.truncate(options.fanout);

            frontier = next;
            depth += 1;
        }

        peers.into_vec()
    }

    /// One round of `find_node` against the closest known nodes, merging
    /// everything learned into the routing table.
    pub async fn find_node(&self, target: NodeId) -> Vec<NodeInfo> {
        let candidates = self.closest_infos(&target, self.config().lookup_fanout);
        let timeout = self.config().query_timeout;

        let queries = candidates.iter().map(|node| async move {
            (
                node.addr,
                self.find_node_query(node.addr, Some(node.id), target, timeout)
                    .await,
            )
        });

        let mut learned = Vec::new();
        for (addr, result) in futures::future::join_all(queries).await {
            match result {
                Ok(reply) => learned.extend(reply.nodes),
                Err(e) => debug!("find_node query to {} failed: {}", addr, e),
            }
        }

        self.routing_table().add_nodes(learned.iter().copied(), Instant::now());
        learned
    }
}
