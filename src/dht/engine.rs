use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::config::DhtConfig;
use super::error::{DhtError, RemoteError};
use super::message::{
    build_error, build_query, build_response, DhtMessage, DhtQuery, MessageBody, MessageKind,
    TransactionId,
};
use super::node::{NodeEntry, NodeId, NodeInfo};
use super::routing::RoutingTable;
use super::transaction::{QueryResult, Resolution, TransactionManager};
use crate::bencode::{encode, Dict, Value};

/// A datagram the transport must deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub data: Bytes,
    pub addr: SocketAddr,
}

/// An inbound query as seen by the engine.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub transaction_id: TransactionId,
    pub method: Bytes,
    pub args: Dict,
    pub from: SocketAddr,
    /// The querying node, when it sent a valid `id`.
    pub node: Option<NodeEntry>,
    pub received_at: Instant,
}

impl QueryRecord {
    pub fn method_name(&self) -> String {
        String::from_utf8_lossy(&self.method).into_owned()
    }
}

/// An inbound query waiting for an answer. Dropping it sends nothing.
#[derive(Debug)]
pub struct IncomingQuery {
    record: QueryRecord,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl IncomingQuery {
    pub fn record(&self) -> &QueryRecord {
        &self.record
    }

    /// Answers the query with a result dictionary or a KRPC error.
    pub fn respond(self, payload: Result<Dict, RemoteError>) -> Result<(), DhtError> {
        let tid = &self.record.transaction_id;
        let message = match payload {
            Ok(values) => build_response(tid, values),
            Err(err) => build_error(tid, err.code, &err.message),
        };

        self.outgoing
            .send(Outgoing {
                data: Bytes::from(encode(&message)),
                addr: self.record.from,
            })
            .map_err(|_| DhtError::Closed)
    }
}

#[derive(Debug)]
pub enum DhtEvent {
    Query(IncomingQuery),
    /// A response or error whose transaction is not pending.
    Unassociated {
        transaction_id: TransactionId,
        from: SocketAddr,
        kind: MessageKind,
    },
}

/// Receiving ends handed to whoever drives the transport.
pub struct DhtChannels {
    pub outgoing: mpsc::UnboundedReceiver<Outgoing>,
    pub events: mpsc::UnboundedReceiver<DhtEvent>,
}

/// The KRPC engine.
///
/// It never touches a socket. Inbound datagrams come in through
/// [`Dht::recv_message`], outbound ones leave as [`Outgoing`] values on the
/// outgoing channel, and transaction deadlines fire when the driver calls
/// [`Dht::expire`].
pub struct Dht {
    our_id: NodeId,
    config: DhtConfig,
    routing_table: RoutingTable,
    transactions: Mutex<TransactionManager>,
    query_log: Mutex<VecDeque<QueryRecord>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    events: mpsc::UnboundedSender<DhtEvent>,
}

impl Dht {
    pub fn new(config: DhtConfig) -> (Self, DhtChannels) {
        Self::with_nodes(config, Vec::new())
    }

    /// Builds an engine whose routing table starts with `nodes`.
    pub fn with_nodes(
        config: DhtConfig,
        nodes: impl IntoIterator<Item = NodeInfo>,
    ) -> (Self, DhtChannels) {
        let our_id = config.node_id.unwrap_or_else(NodeId::generate);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let routing_table = RoutingTable::with_bucket_size(our_id, config.bucket_size);
        routing_table.add_nodes(nodes, Instant::now());

        let dht = Self {
            our_id,
            routing_table,
            transactions: Mutex::new(TransactionManager::new(config.max_pending_queries)),
            query_log: Mutex::new(VecDeque::with_capacity(config.query_log_capacity)),
            outgoing: outgoing_tx,
            events: events_tx,
            config,
        };

        let channels = DhtChannels {
            outgoing: outgoing_rx,
            events: events_rx,
        };

        (dht, channels)
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn config(&self) -> &DhtConfig {
        &self.config
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn count_nodes(&self) -> usize {
        self.routing_table.count_nodes()
    }

    pub fn nodes(&self) -> Vec<NodeEntry> {
        self.routing_table.nodes()
    }

    pub fn pending_queries(&self) -> usize {
        self.transactions.lock().pending_count()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.transactions.lock().next_deadline()
    }

    /// The most recent inbound queries, oldest first.
    pub fn recent_queries(&self) -> Vec<QueryRecord> {
        self.query_log.lock().iter().cloned().collect()
    }

    /// Validates and dispatches one inbound datagram.
    ///
    /// A malformed datagram yields `DhtError::Protocol` and changes nothing.
    pub fn recv_message(
        &self,
        data: &[u8],
        from: SocketAddr,
        now: Instant,
    ) -> Result<MessageKind, DhtError> {
        let message = DhtMessage::parse(data)?;
        let kind = message.kind();
        let sender_id = message.sender_id();
        let DhtMessage {
            transaction_id,
            body,
        } = message;

        match body {
            MessageBody::Query { method, args } => {
                self.recv_query(transaction_id, method, args, sender_id, from, now)
            }
            MessageBody::Response { values } => {
                self.recv_response(transaction_id, values, sender_id, from, now)
            }
            MessageBody::Error { code, message } => {
                self.recv_error(transaction_id, code, message, from)
            }
        }

        Ok(kind)
    }

    fn recv_query(
        &self,
        transaction_id: TransactionId,
        method: Bytes,
        args: Dict,
        sender_id: Option<NodeId>,
        from: SocketAddr,
        now: Instant,
    ) {
        let node = sender_id.map(|id| {
            let mut entry = self.routing_table.ensure_node(NodeInfo::new(id, from), now);
            entry.record_query_sent(now);
            self.routing_table.record_query_sent(&id, now);
            entry
        });

        let record = QueryRecord {
            transaction_id,
            method,
            args,
            from,
            node,
            received_at: now,
        };

        self.log_query(record.clone());

        let query = IncomingQuery {
            record,
            outgoing: self.outgoing.clone(),
        };

        if self.events.send(DhtEvent::Query(query)).is_err() {
            debug!("Dropping query from {}: no query handler", from);
        }
    }

    fn recv_response(
        &self,
        transaction_id: TransactionId,
        values: Dict,
        sender_id: Option<NodeId>,
        from: SocketAddr,
        now: Instant,
    ) {
        if !self.transactions.lock().is_pending(&transaction_id) {
            self.unassociated(transaction_id, from, MessageKind::Response);
            return;
        }

        if let Some(id) = sender_id {
            self.routing_table.ensure_node(NodeInfo::new(id, from), now);
            self.routing_table.record_response_received(&id, now);
        }

        let resolution = self.transactions.lock().resolve(&transaction_id, Ok(values));
        if resolution == Resolution::Unassociated {
            self.unassociated(transaction_id, from, MessageKind::Response);
        }
    }

    fn recv_error(&self, transaction_id: TransactionId, code: i64, message: String, from: SocketAddr) {
        let err = DhtError::Remote { code, message };
        let resolution = self.transactions.lock().resolve(&transaction_id, Err(err));

        match resolution {
            Resolution::Resolved { node_id, method, .. } => {
                debug!("{} query to {} answered with error {}", method, from, code);
                if let Some(id) = node_id {
                    self.routing_table.record_failure(&id);
                }
            }
            Resolution::Unassociated => {
                self.unassociated(transaction_id, from, MessageKind::Error);
            }
        }
    }

    fn unassociated(&self, transaction_id: TransactionId, from: SocketAddr, kind: MessageKind) {
        debug!(
            "Unassociated {:?} from {} (transaction {:02x?})",
            kind,
            from,
            transaction_id.as_ref()
        );
        let _ = self.events.send(DhtEvent::Unassociated {
            transaction_id,
            from,
            kind,
        });
    }

    fn log_query(&self, record: QueryRecord) {
        let capacity = self.config.query_log_capacity;
        if capacity == 0 {
            return;
        }

        let mut log = self.query_log.lock();
        if log.len() >= capacity {
            log.pop_front();
        }
        log.push_back(record);
    }

    /// Fires every transaction deadline due at `now`, counting a failure
    /// against each target node. Returns how many transactions timed out.
    pub fn expire(&self, now: Instant) -> usize {
        let expired = self.transactions.lock().expire(now);

        for transaction in &expired {
            debug!(
                "{} query to {} timed out",
                transaction.method, transaction.addr
            );
            if let Some(id) = transaction.node_id {
                self.routing_table.record_failure(&id);
            }
        }

        expired.len()
    }

    /// Sends `query` and waits for its outcome.
    ///
    /// Resolves once: with the response dictionary, with the remote error,
    /// or with `Timeout` after the driver's [`Dht::expire`] passes the
    /// deadline.
    pub async fn query(
        &self,
        addr: SocketAddr,
        node_id: Option<NodeId>,
        query: DhtQuery,
        timeout: Duration,
    ) -> QueryResult {
        let rx = {
            let mut transactions = self.transactions.lock();
            let (tid, rx) =
                transactions.register(query.method(), node_id, addr, timeout, Instant::now())?;

            let message = build_query(&tid, query.method().as_bytes(), query.to_args(&self.our_id));
            trace!("Sending {} to {}", query.method(), addr);

            if let Err(err) = self.send(&message, addr) {
                transactions.cancel(&tid, DhtError::Closed);
                return Err(err);
            }
            rx
        };

        rx.await.map_err(|_| DhtError::Closed)?
    }

    fn send(&self, message: &Value, addr: SocketAddr) -> Result<(), DhtError> {
        self.outgoing
            .send(Outgoing {
                data: Bytes::from(encode(message)),
                addr,
            })
            .map_err(|_| DhtError::Closed)
    }
}
