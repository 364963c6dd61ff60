//! Distributed Hash Table (BEP-5)
//!
//! The KRPC engine behind a mainline DHT node. [`Dht`] validates and routes
//! datagrams, tracks outbound transactions and keeps the Kademlia routing
//! table; it never performs I/O itself. [`DhtServer`] binds it to a UDP
//! socket and answers inbound queries through a [`QueryHandler`].
//!
//! Peer discovery is [`Dht::get_peers`], seeded by [`Dht::bootstrap`].

mod bootstrap;
mod compact;
mod config;
mod engine;
mod error;
mod handler;
mod lookup;
mod message;
mod node;
mod routing;
mod server;
mod transaction;

pub use bootstrap::BootstrapOptions;
pub use compact::{
    decode_nodes, decode_peer, decode_peers, encode_nodes, encode_peer, COMPACT_NODE_LEN,
    COMPACT_PEER_LEN,
};
pub use config::{
    DhtConfig, BOOTSTRAP_NODES, DEFAULT_LOOKUP_FANOUT, DEFAULT_MAX_LOOKUP_DEPTH,
    DEFAULT_QUERY_TIMEOUT, MAX_PENDING_DHT_QUERIES,
};
pub use engine::{Dht, DhtChannels, DhtEvent, IncomingQuery, Outgoing, QueryRecord};
pub use error::{DhtError, RemoteError};
pub use handler::{QueryHandler, ReferenceHandler};
pub use lookup::{FindNodeReply, GetPeersReply, LookupOptions, LookupStrategy};
pub use message::{
    build_error, build_query, build_response, DhtMessage, DhtQuery, MessageBody, MessageKind,
    TransactionId,
};
pub use node::{NodeEntry, NodeId, NodeInfo, NodeStatus, QUESTIONABLE_AFTER};
pub use routing::{AddNodeResult, RoutingTable, DEFAULT_BUCKET_SIZE};
pub use server::{id_in_bucket, DhtServer};
pub use transaction::{Expired, QueryResult, Resolution, TransactionManager};
