//! rdht - A BitTorrent mainline DHT node
//!
//! An implementation of the BEP-5 distributed hash table used for
//! trackerless peer discovery.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 Bencode encoding/decoding
//! - [`dht`] - BEP-5 KRPC engine, routing table, lookups and UDP server

pub mod bencode;
pub mod dht;

pub use bencode::{decode, encode, BencodeError, Value};
pub use dht::{
    Dht, DhtConfig, DhtError, DhtMessage, DhtServer, LookupStrategy, NodeId, NodeInfo,
    RoutingTable,
};
