//! Compact node info (26 bytes) and compact peer info (6 bytes).

use super::error::DhtError;
use super::node::NodeInfo;
use crate::bencode::Value;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, SocketAddrV4};

pub const COMPACT_NODE_LEN: usize = 26;
pub const COMPACT_PEER_LEN: usize = 6;

/// Concatenates compact node info records. IPv6 nodes are skipped.
pub fn encode_nodes<'a>(nodes: impl IntoIterator<Item = &'a NodeInfo>) -> Bytes {
    let mut buf = BytesMut::new();
    for compact in nodes.into_iter().filter_map(NodeInfo::to_compact) {
        buf.put_slice(&compact);
    }
    buf.freeze()
}

/// Splits a `nodes` blob into records, preserving order.
pub fn decode_nodes(data: &[u8]) -> Result<Vec<NodeInfo>, DhtError> {
    if data.len() % COMPACT_NODE_LEN != 0 {
        return Err(DhtError::protocol(format!(
            "compact node info length {} is not a multiple of {}",
            data.len(),
            COMPACT_NODE_LEN
        )));
    }

    Ok(data
        .chunks_exact(COMPACT_NODE_LEN)
        .filter_map(NodeInfo::from_compact)
        .collect())
}

pub fn encode_peer(addr: &SocketAddrV4) -> [u8; COMPACT_PEER_LEN] {
    let mut data = [0u8; COMPACT_PEER_LEN];
    data[..4].copy_from_slice(&addr.ip().octets());
    data[4..].copy_from_slice(&addr.port().to_be_bytes());
    data
}

pub fn decode_peer(data: &[u8]) -> Result<SocketAddrV4, DhtError> {
    if data.len() != COMPACT_PEER_LEN {
        return Err(DhtError::protocol(format!(
            "compact peer info must be {} bytes, got {}",
            COMPACT_PEER_LEN,
            data.len()
        )));
    }

    let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
    let port = u16::from_be_bytes([data[4], data[5]]);
    Ok(SocketAddrV4::new(ip, port))
}

/// Decodes a `values` list. Entries that are not 6-byte strings are dropped.
pub fn decode_peers(values: &[Value]) -> Vec<SocketAddrV4> {
    values
        .iter()
        .filter_map(Value::as_bytes)
        .filter_map(|b| decode_peer(b).ok())
        .collect()
}
