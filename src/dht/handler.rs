use std::net::IpAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use tracing::debug;

use super::compact::encode_nodes;
use super::engine::{Dht, QueryRecord};
use super::error::RemoteError;
use super::message::DhtQuery;
use super::node::{NodeEntry, NodeId};
use crate::bencode::{Dict, Value};

/// Answers inbound queries on behalf of the server loop.
pub trait QueryHandler: Send + Sync {
    fn handle(&self, dht: &Dht, query: &QueryRecord) -> Result<Dict, RemoteError>;

    /// Called from the server's maintenance tick.
    fn maintain(&self, _now: Instant) {}
}

struct TokenSecrets {
    current: [u8; 16],
    previous: [u8; 16],
    rotated_at: Instant,
}

impl TokenSecrets {
    fn new(now: Instant) -> Self {
        Self {
            current: rand::random(),
            previous: rand::random(),
            rotated_at: now,
        }
    }

    fn rotate(&mut self, now: Instant) {
        self.previous = self.current;
        self.current = rand::random();
        self.rotated_at = now;
    }
}

fn token_with_secret(ip: &IpAddr, secret: &[u8; 16]) -> Bytes {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    hasher.update(ip.to_string().as_bytes());

    let result = hasher.finalize();
    Bytes::copy_from_slice(&result[..8])
}

/// Answers `ping`, `find_node` and `get_peers`. Everything else, including
/// `announce_peer`, gets error 204.
///
/// This node stores no peers, so `get_peers` replies carry a token and the
/// closest nodes but never `values`.
pub struct ReferenceHandler {
    token_secrets: RwLock<TokenSecrets>,
    token_rotation: Duration,
}

impl ReferenceHandler {
    pub fn new(token_rotation: Duration) -> Self {
        Self {
            token_secrets: RwLock::new(TokenSecrets::new(Instant::now())),
            token_rotation,
        }
    }

    pub fn generate_token(&self, ip: &IpAddr) -> Bytes {
        token_with_secret(ip, &self.token_secrets.read().current)
    }

    /// Accepts tokens issued under the current or the previous secret.
    ///
    /// This handler never stores peers, so it never checks a token itself.
    /// A handler that answers `announce_peer` should wrap this one and
    /// validate the token the announcing node echoes back.
    pub fn validate_token(&self, ip: &IpAddr, token: &[u8]) -> bool {
        let secrets = self.token_secrets.read();

        token_with_secret(ip, &secrets.current).as_ref() == token
            || token_with_secret(ip, &secrets.previous).as_ref() == token
    }

    pub fn rotate_token_secret(&self, now: Instant) {
        self.token_secrets.write().rotate(now);
        debug!("DHT token secret rotated");
    }
}

impl QueryHandler for ReferenceHandler {
    fn handle(&self, dht: &Dht, query: &QueryRecord) -> Result<Dict, RemoteError> {
        let parsed = DhtQuery::parse(&query.method, &query.args);
        debug!(
            "Answering {} from {} ({})",
            query.method_name(),
            query.from,
            if parsed.is_ok() { "ok" } else { "error" }
        );

        let mut values = Dict::new();
        values.insert(Bytes::from_static(b"id"), Value::bytes(dht.our_id().as_bytes()));

        let k = dht.config().bucket_size;
        let closest_nodes = |target: &NodeId| {
            let infos: Vec<_> = dht
                .routing_table()
                .closest(target, k)
                .iter()
                .map(NodeEntry::info)
                .collect();
            Value::Bytes(encode_nodes(&infos))
        };

        match parsed? {
            DhtQuery::Ping => {}
            DhtQuery::FindNode { target } => {
                values.insert(Bytes::from_static(b"nodes"), closest_nodes(&target));
            }
            DhtQuery::GetPeers { info_hash } => {
                values.insert(
                    Bytes::from_static(b"token"),
                    Value::Bytes(self.generate_token(&query.from.ip())),
                );
                values.insert(Bytes::from_static(b"nodes"), closest_nodes(&info_hash));
            }
        }

        Ok(values)
    }

    fn maintain(&self, now: Instant) {
        let due = {
            let secrets = self.token_secrets.read();
            now.saturating_duration_since(secrets.rotated_at) >= self.token_rotation
        };
        if due {
            self.rotate_token_secret(now);
        }
    }
}
