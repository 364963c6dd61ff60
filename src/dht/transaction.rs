use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::oneshot;

use super::error::DhtError;
use super::message::TransactionId;
use super::node::NodeId;
use crate::bencode::Dict;

pub type QueryResult = Result<Dict, DhtError>;

struct Transaction {
    method: &'static str,
    node_id: Option<NodeId>,
    addr: SocketAddr,
    deadline: Instant,
    responder: oneshot::Sender<QueryResult>,
}

/// How an inbound response or error matched the pending set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved {
        method: &'static str,
        node_id: Option<NodeId>,
        addr: SocketAddr,
    },
    Unassociated,
}

/// A transaction whose deadline passed. Its waiter already got `Timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub transaction_id: TransactionId,
    pub method: &'static str,
    pub node_id: Option<NodeId>,
    pub addr: SocketAddr,
}

/// Outstanding outbound queries keyed by their 4-byte transaction id.
///
/// A transaction ends exactly once: whichever of `resolve`, `expire` or
/// `cancel` removes it from the map delivers to its waiter, and the others
/// find nothing.
pub struct TransactionManager {
    next: u32,
    max_pending: usize,
    pending: HashMap<TransactionId, Transaction>,
}

impl TransactionManager {
    pub fn new(max_pending: usize) -> Self {
        Self::with_start(max_pending, rand::random())
    }

    /// Starts the id counter at `start` instead of a random value.
    pub fn with_start(max_pending: usize, start: u32) -> Self {
        Self {
            next: start,
            max_pending,
            pending: HashMap::new(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, transaction_id: &[u8]) -> bool {
        self.pending.contains_key(transaction_id)
    }

    // The counter wraps at 2^32. Ids still in flight are skipped; the
    // pending bound keeps this loop short.
    fn allocate_id(&mut self) -> TransactionId {
        loop {
            let id = Bytes::copy_from_slice(&self.next.to_be_bytes());
            self.next = self.next.wrapping_add(1);
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn register(
        &mut self,
        method: &'static str,
        node_id: Option<NodeId>,
        addr: SocketAddr,
        timeout: Duration,
        now: Instant,
    ) -> Result<(TransactionId, oneshot::Receiver<QueryResult>), DhtError> {
        if self.pending.len() >= self.max_pending {
            return Err(DhtError::TooManyPending);
        }

        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(
            id.clone(),
            Transaction {
                method,
                node_id,
                addr,
                deadline: now + timeout,
                responder: tx,
            },
        );

        Ok((id, rx))
    }

    pub fn resolve(&mut self, transaction_id: &[u8], outcome: QueryResult) -> Resolution {
        let Some(transaction) = self.pending.remove(transaction_id) else {
            return Resolution::Unassociated;
        };

        // The waiter may have given up; that is not our concern.
        let _ = transaction.responder.send(outcome);

        Resolution::Resolved {
            method: transaction.method,
            node_id: transaction.node_id,
            addr: transaction.addr,
        }
    }

    /// Removes every transaction due at `now` and fails it with `Timeout`.
    pub fn expire(&mut self, now: Instant) -> Vec<Expired> {
        let due: Vec<TransactionId> = self
            .pending
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        due.into_iter()
            .filter_map(|id| {
                let transaction = self.pending.remove(&id)?;
                let _ = transaction.responder.send(Err(DhtError::Timeout));
                Some(Expired {
                    transaction_id: id,
                    method: transaction.method,
                    node_id: transaction.node_id,
                    addr: transaction.addr,
                })
            })
            .collect()
    }

    /// Drops a transaction that never made it onto the wire.
    pub fn cancel(&mut self, transaction_id: &[u8], err: DhtError) -> bool {
        match self.pending.remove(transaction_id) {
            Some(transaction) => {
                let _ = transaction.responder.send(Err(err));
                true
            }
            None => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|t| t.deadline).min()
    }
}
