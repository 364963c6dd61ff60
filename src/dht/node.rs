use super::error::DhtError;
use bytes::Bytes;
use rand::Rng as _;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Consecutive failures tolerated from a node that has responded before.
const MAX_FAILURES: u32 = 3;

/// A good node with no activity for this long becomes questionable (BEP-5).
pub const QUESTIONABLE_AFTER: Duration = Duration::from_secs(15 * 60);

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        let id: [u8; 20] = bytes.try_into().map_err(|_| DhtError::InvalidNodeId)?;
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance. Byte arrays compare lexicographically, which is the
    /// same order as the 160-bit unsigned integer they spell.
    pub fn distance(&self, other: &NodeId) -> [u8; 20] {
        let mut dist = [0u8; 20];
        for (d, (a, b)) in dist.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            *d = a ^ b;
        }
        dist
    }

    /// Length of the common bit prefix with `other`, capped at 159.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        let dist = self.distance(other);

        for (i, &byte) in dist.iter().enumerate() {
            if byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }

        159
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for NodeId {
    type Err = DhtError;

    /// Parses the 40-character hex form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 || !s.is_ascii() {
            return Err(DhtError::InvalidNodeId);
        }

        let mut id = [0u8; 20];
        for (i, byte) in id.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| DhtError::InvalidNodeId)?;
        }
        Ok(Self(id))
    }
}

/// A node's identity and address, as carried in compact node info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeInfo {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl NodeInfo {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }

    pub fn from_compact(data: &[u8]) -> Option<Self> {
        if data.len() != 26 {
            return None;
        }

        let id = NodeId::from_bytes(&data[..20]).ok()?;
        let ip = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
        let port = u16::from_be_bytes([data[24], data[25]]);

        Some(Self::new(id, SocketAddr::new(IpAddr::V4(ip), port)))
    }

    /// Returns `None` for IPv6 addresses, which have no 26-byte form.
    pub fn to_compact(&self) -> Option<[u8; 26]> {
        let mut compact = [0u8; 26];
        compact[..20].copy_from_slice(&self.id.0);

        match self.addr {
            SocketAddr::V4(v4) => {
                compact[20..24].copy_from_slice(&v4.ip().octets());
                compact[24..26].copy_from_slice(&v4.port().to_be_bytes());
                Some(compact)
            }
            SocketAddr::V6(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Responded recently, or queried us after having responded before.
    Good,
    /// Never responded, or inactive for [`QUESTIONABLE_AFTER`].
    Questionable,
    /// Failed too often. Removed from the routing table.
    Bad,
}

/// A remote node as tracked by the routing table.
///
/// Health follows the BEP-5 good/questionable/bad classification. A node that
/// has answered us at least once survives up to [`MAX_FAILURES`] consecutive
/// failures; a node that never answered goes bad on its first failure.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub first_seen: Instant,
    pub last_query: Option<Instant>,
    pub last_response: Option<Instant>,
    pub token: Option<Bytes>,
    pub failures: u32,
    status: NodeStatus,
    questionable_at: Option<Instant>,
}

impl NodeEntry {
    pub fn new(id: NodeId, addr: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            addr,
            first_seen: now,
            last_query: None,
            last_response: None,
            token: None,
            failures: 0,
            status: NodeStatus::Questionable,
            questionable_at: None,
        }
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo::new(self.id, self.addr)
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn is_good(&self) -> bool {
        self.status == NodeStatus::Good
    }

    pub fn is_bad(&self) -> bool {
        self.status == NodeStatus::Bad
    }

    /// When the current inactivity timer fires, if one is armed.
    pub fn questionable_at(&self) -> Option<Instant> {
        self.questionable_at
    }

    /// The node sent us a query.
    pub fn record_query_sent(&mut self, now: Instant) {
        self.last_query = Some(now);

        if self.last_response.is_some() {
            self.mark_good(now);
        }
    }

    /// The node answered one of our queries.
    pub fn record_response_received(&mut self, now: Instant) {
        self.last_response = Some(now);
        self.failures = 0;
        self.mark_good(now);
    }

    /// One of our queries to the node timed out or came back as an error.
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);

        if self.failures > MAX_FAILURES || self.last_response.is_none() {
            self.status = NodeStatus::Bad;
            self.questionable_at = None;
        }
    }

    /// Fires the inactivity timer if it is due. Returns true on a transition.
    pub fn poll_status(&mut self, now: Instant) -> bool {
        match self.questionable_at {
            Some(deadline) if now >= deadline && self.status == NodeStatus::Good => {
                self.status = NodeStatus::Questionable;
                self.questionable_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn set_token(&mut self, token: Bytes) {
        self.token = Some(token);
    }

    // Re-arming overwrites the previous deadline, so a superseded timer can
    // never fire.
    fn mark_good(&mut self, now: Instant) {
        if self.status == NodeStatus::Bad {
            return;
        }
        self.status = NodeStatus::Good;
        self.questionable_at = Some(now + QUESTIONABLE_AFTER);
    }
}
