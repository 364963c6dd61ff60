use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use super::node::{NodeEntry, NodeId, NodeInfo, NodeStatus, QUESTIONABLE_AFTER};

pub const DEFAULT_BUCKET_SIZE: usize = 8;
const NUM_BUCKETS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddNodeResult {
    /// The node is now in its bucket.
    Added,
    /// The bucket was full; the node waits in the replacement cache.
    Cached,
    /// A node with this id is already known.
    Exists,
    /// Port zero, our own id, or both bucket and cache are full.
    Ignored,
}

#[derive(Debug)]
struct Bucket {
    nodes: VecDeque<NodeEntry>,
    replacement_cache: VecDeque<NodeEntry>,
}

impl Bucket {
    fn new(capacity: usize) -> Self {
        Self {
            nodes: VecDeque::with_capacity(capacity),
            replacement_cache: VecDeque::with_capacity(capacity),
        }
    }

    fn contains(&self, id: &NodeId) -> bool {
        self.get(id).is_some()
    }

    fn add(&mut self, entry: NodeEntry, capacity: usize) -> AddNodeResult {
        if self.contains(&entry.id) {
            return AddNodeResult::Exists;
        }

        if self.nodes.len() < capacity {
            self.nodes.push_back(entry);
            return AddNodeResult::Added;
        }

        if self.replacement_cache.len() < capacity {
            self.replacement_cache.push_back(entry);
            return AddNodeResult::Cached;
        }

        AddNodeResult::Ignored
    }

    fn remove(&mut self, id: &NodeId) -> Option<NodeEntry> {
        if let Some(pos) = self.nodes.iter().position(|n| &n.id == id) {
            let removed = self.nodes.remove(pos);

            if let Some(replacement) = self.replacement_cache.pop_front() {
                self.nodes.push_back(replacement);
            }

            return removed;
        }

        let pos = self.replacement_cache.iter().position(|n| &n.id == id)?;
        self.replacement_cache.remove(pos)
    }

    fn get(&self, id: &NodeId) -> Option<&NodeEntry> {
        self.nodes
            .iter()
            .chain(self.replacement_cache.iter())
            .find(|n| &n.id == id)
    }

    fn get_mut(&mut self, id: &NodeId) -> Option<&mut NodeEntry> {
        self.nodes
            .iter_mut()
            .chain(self.replacement_cache.iter_mut())
            .find(|n| &n.id == id)
    }

    fn last_activity(&self) -> Option<Instant> {
        self.nodes
            .iter()
            .map(|n| n.last_response.or(n.last_query).unwrap_or(n.first_seen))
            .max()
    }
}

/// Known nodes, bucketed by the length of the id prefix they share with us.
///
/// Every health mutation goes through the table and is followed by a
/// reconcile step that evicts the entry if it turned bad. A single lock
/// covers all buckets, so an eviction never interleaves with a `closest`
/// read that is building a query fan-out.
pub struct RoutingTable {
    our_id: NodeId,
    bucket_size: usize,
    buckets: RwLock<Vec<Bucket>>,
}

impl RoutingTable {
    pub fn new(our_id: NodeId) -> Self {
        Self::with_bucket_size(our_id, DEFAULT_BUCKET_SIZE)
    }

    pub fn with_bucket_size(our_id: NodeId, bucket_size: usize) -> Self {
        let buckets = (0..NUM_BUCKETS).map(|_| Bucket::new(bucket_size)).collect();

        Self {
            our_id,
            bucket_size: bucket_size.max(1),
            buckets: RwLock::new(buckets),
        }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    /// Returns the entry for `info.id`, creating and inserting it if needed.
    ///
    /// When the new entry cannot be inserted (port zero, full bucket) the
    /// fresh, detached entry is returned.
    pub fn ensure_node(&self, info: NodeInfo, now: Instant) -> NodeEntry {
        let bucket_idx = self.our_id.bucket_index(&info.id);
        let mut buckets = self.buckets.write();
        let bucket = &mut buckets[bucket_idx];

        if let Some(existing) = bucket.get(&info.id) {
            return existing.clone();
        }

        let entry = NodeEntry::new(info.id, info.addr, now);
        if Self::eligible(&self.our_id, &entry) {
            bucket.add(entry.clone(), self.bucket_size);
        }
        entry
    }

    /// Inserts `entry` unless its id is already known. Entries with port
    /// zero are never inserted.
    pub fn add_node(&self, entry: NodeEntry) -> AddNodeResult {
        if !Self::eligible(&self.our_id, &entry) {
            return AddNodeResult::Ignored;
        }

        let bucket_idx = self.our_id.bucket_index(&entry.id);
        let mut buckets = self.buckets.write();
        buckets[bucket_idx].add(entry, self.bucket_size)
    }

    /// Bulk insert of freshly learned contacts. Returns how many were added.
    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = NodeInfo>, now: Instant) -> usize {
        nodes
            .into_iter()
            .filter(|info| info.addr.port() != 0)
            .map(|info| self.add_node(NodeEntry::new(info.id, info.addr, now)))
            .filter(|result| *result == AddNodeResult::Added)
            .count()
    }

    pub fn remove_node(&self, id: &NodeId) -> Option<NodeEntry> {
        let bucket_idx = self.our_id.bucket_index(id);
        let mut buckets = self.buckets.write();
        buckets[bucket_idx].remove(id)
    }

    pub fn count_nodes(&self) -> usize {
        self.buckets.read().iter().map(|b| b.nodes.len()).sum()
    }

    pub fn get(&self, id: &NodeId) -> Option<NodeEntry> {
        let bucket_idx = self.our_id.bucket_index(id);
        self.buckets.read()[bucket_idx].get(id).cloned()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        let bucket_idx = self.our_id.bucket_index(id);
        self.buckets.read()[bucket_idx].contains(id)
    }

    /// Up to `count` entries ordered by ascending XOR distance to `target`.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<NodeEntry> {
        let buckets = self.buckets.read();
        let mut nodes: Vec<(&NodeEntry, [u8; 20])> = buckets
            .iter()
            .flat_map(|b| b.nodes.iter())
            .filter(|n| !n.is_bad())
            .map(|n| (n, n.id.distance(target)))
            .collect();

        nodes.sort_by(|a, b| a.1.cmp(&b.1));
        nodes.truncate(count);
        nodes.into_iter().map(|(n, _)| n.clone()).collect()
    }

    /// Snapshot of every bucketed entry, for persistence or diagnostics.
    pub fn nodes(&self) -> Vec<NodeEntry> {
        self.buckets
            .read()
            .iter()
            .flat_map(|b| b.nodes.iter().cloned())
            .collect()
    }

    pub fn record_query_sent(&self, id: &NodeId, now: Instant) -> Option<NodeStatus> {
        self.update(id, |entry| entry.record_query_sent(now))
    }

    pub fn record_response_received(&self, id: &NodeId, now: Instant) -> Option<NodeStatus> {
        self.update(id, |entry| entry.record_response_received(now))
    }

    pub fn record_failure(&self, id: &NodeId) -> Option<NodeStatus> {
        self.update(id, NodeEntry::record_failure)
    }

    pub fn set_token(&self, id: &NodeId, token: Bytes) {
        self.update(id, |entry| entry.set_token(token));
    }

    /// Fires due inactivity timers, including those of cached replacements.
    /// Returns how many nodes turned questionable.
    pub fn refresh_statuses(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.write();
        buckets
            .iter_mut()
            .flat_map(|b| b.nodes.iter_mut().chain(b.replacement_cache.iter_mut()))
            .map(|n| n.poll_status(now))
            .filter(|changed| *changed)
            .count()
    }

    /// Indexes of non-empty buckets with no activity for [`QUESTIONABLE_AFTER`].
    pub fn stale_buckets(&self, now: Instant) -> Vec<usize> {
        self.buckets
            .read()
            .iter()
            .enumerate()
            .filter_map(|(i, bucket)| {
                let last = bucket.last_activity()?;
                (now.saturating_duration_since(last) >= QUESTIONABLE_AFTER).then_some(i)
            })
            .collect()
    }

    fn eligible(our_id: &NodeId, entry: &NodeEntry) -> bool {
        entry.addr.port() != 0 && &entry.id != our_id
    }

    fn update(&self, id: &NodeId, f: impl FnOnce(&mut NodeEntry)) -> Option<NodeStatus> {
        let bucket_idx = self.our_id.bucket_index(id);
        let mut buckets = self.buckets.write();
        let bucket = &mut buckets[bucket_idx];

        let entry = bucket.get_mut(id)?;
        f(entry);
        let status = entry.status();

        Self::reconcile(bucket, id, status);
        Some(status)
    }

    fn reconcile(bucket: &mut Bucket, id: &NodeId, status: NodeStatus) {
        if status == NodeStatus::Bad {
            if let Some(evicted) = bucket.remove(id) {
                debug!(
                    "Evicting bad node {} at {} after {} failures",
                    evicted.id, evicted.addr, evicted.failures
                );
            }
        }
    }
}
