use super::error::{DhtError, RemoteError};
use super::node::NodeId;
use crate::bencode::{decode, encode, Dict, Value};
use bytes::Bytes;

pub type TransactionId = Bytes;

const KEY_T: &[u8] = b"t";
const KEY_Y: &[u8] = b"y";
const KEY_Q: &[u8] = b"q";
const KEY_A: &[u8] = b"a";
const KEY_R: &[u8] = b"r";
const KEY_E: &[u8] = b"e";

/// A validated KRPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtMessage {
    pub transaction_id: TransactionId,
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Query { method: Bytes, args: Dict },
    Response { values: Dict },
    Error { code: i64, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Query,
    Response,
    Error,
}

impl MessageKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'q' => Some(MessageKind::Query),
            b'r' => Some(MessageKind::Response),
            b'e' => Some(MessageKind::Error),
            _ => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            MessageKind::Query => "q",
            MessageKind::Response => "r",
            MessageKind::Error => "e",
        }
    }
}

fn envelope(transaction_id: &TransactionId, kind: MessageKind) -> Dict {
    let mut dict = Dict::new();
    dict.insert(Bytes::from_static(KEY_T), Value::Bytes(transaction_id.clone()));
    dict.insert(Bytes::from_static(KEY_Y), Value::string(kind.tag()));
    dict
}

/// `{t, y: "q", q: method, a: args}`
pub fn build_query(transaction_id: &TransactionId, method: &[u8], args: Dict) -> Value {
    let mut dict = envelope(transaction_id, MessageKind::Query);
    dict.insert(Bytes::from_static(KEY_Q), Value::bytes(method));
    dict.insert(Bytes::from_static(KEY_A), Value::Dict(args));
    Value::Dict(dict)
}

/// `{t, y: "r", r: values}`
pub fn build_response(transaction_id: &TransactionId, values: Dict) -> Value {
    let mut dict = envelope(transaction_id, MessageKind::Response);
    dict.insert(Bytes::from_static(KEY_R), Value::Dict(values));
    Value::Dict(dict)
}

/// `{t, y: "e", e: [code, message]}`
pub fn build_error(transaction_id: &TransactionId, code: i64, message: &str) -> Value {
    let mut dict = envelope(transaction_id, MessageKind::Error);
    dict.insert(
        Bytes::from_static(KEY_E),
        Value::List(vec![Value::Integer(code), Value::string(message)]),
    );
    Value::Dict(dict)
}

impl DhtMessage {
    pub fn kind(&self) -> MessageKind {
        match self.body {
            MessageBody::Query { .. } => MessageKind::Query,
            MessageBody::Response { .. } => MessageKind::Response,
            MessageBody::Error { .. } => MessageKind::Error,
        }
    }

    /// The `id` argument of a query or response, when it is a valid node id.
    pub fn sender_id(&self) -> Option<NodeId> {
        let dict = match &self.body {
            MessageBody::Query { args, .. } => args,
            MessageBody::Response { values } => values,
            MessageBody::Error { .. } => return None,
        };

        dict.get(b"id".as_slice())
            .and_then(Value::as_bytes)
            .and_then(|b| NodeId::from_bytes(b).ok())
    }

    /// Decodes and validates a datagram, failing on the first violation.
    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let value = decode(data).map_err(|e| DhtError::protocol(format!("bencode: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, DhtError> {
        let mut dict = value
            .into_dict()
            .ok_or_else(|| DhtError::protocol("root object is not a dictionary"))?;

        let transaction_id = match dict.remove(KEY_T) {
            Some(Value::Bytes(t)) => t,
            _ => return Err(DhtError::protocol("`t' is missing or not a string")),
        };

        let kind = match dict.get(KEY_Y) {
            Some(Value::Bytes(y)) => y
                .first()
                .and_then(|&tag| MessageKind::from_tag(tag))
                .ok_or_else(|| DhtError::protocol("`y' value is invalid"))?,
            _ => return Err(DhtError::protocol("`y' is missing or not a string")),
        };

        let body = match kind {
            MessageKind::Query => {
                let method = match dict.remove(KEY_Q) {
                    Some(Value::Bytes(q)) => q,
                    _ => return Err(DhtError::protocol("`q' is missing or not a string")),
                };
                let args = match dict.remove(KEY_A) {
                    Some(Value::Dict(a)) => a,
                    _ => return Err(DhtError::protocol("`a' is missing or not a dictionary")),
                };
                MessageBody::Query { method, args }
            }
            MessageKind::Response => match dict.remove(KEY_R) {
                Some(Value::Dict(values)) => MessageBody::Response { values },
                _ => return Err(DhtError::protocol("`r' is missing or not a dictionary")),
            },
            MessageKind::Error => match dict.remove(KEY_E) {
                Some(Value::List(e)) => {
                    let code = e.first().and_then(Value::as_integer).unwrap_or(0);
                    let message = e
                        .get(1)
                        .and_then(Value::as_bytes)
                        .map(|m| String::from_utf8_lossy(m).into_owned())
                        .unwrap_or_else(|| "unknown error".to_string());
                    MessageBody::Error { code, message }
                }
                _ => return Err(DhtError::protocol("`e' is missing or not a list")),
            },
        };

        Ok(Self {
            transaction_id,
            body,
        })
    }

    pub fn to_value(&self) -> Value {
        match &self.body {
            MessageBody::Query { method, args } => {
                build_query(&self.transaction_id, method, args.clone())
            }
            MessageBody::Response { values } => build_response(&self.transaction_id, values.clone()),
            MessageBody::Error { code, message } => {
                build_error(&self.transaction_id, *code, message)
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(&self.to_value())
    }
}

/// The query methods this node issues and answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtQuery {
    Ping,
    FindNode { target: NodeId },
    GetPeers { info_hash: NodeId },
}

impl DhtQuery {
    pub fn method(&self) -> &'static str {
        match self {
            DhtQuery::Ping => "ping",
            DhtQuery::FindNode { .. } => "find_node",
            DhtQuery::GetPeers { .. } => "get_peers",
        }
    }

    /// Argument dictionary for an outbound query sent as `our_id`.
    pub fn to_args(&self, our_id: &NodeId) -> Dict {
        let mut args = Dict::new();
        args.insert(Bytes::from_static(b"id"), Value::bytes(our_id.as_bytes()));

        match self {
            DhtQuery::Ping => {}
            DhtQuery::FindNode { target } => {
                args.insert(Bytes::from_static(b"target"), Value::bytes(target.as_bytes()));
            }
            DhtQuery::GetPeers { info_hash } => {
                args.insert(
                    Bytes::from_static(b"info_hash"),
                    Value::bytes(info_hash.as_bytes()),
                );
            }
        }

        args
    }

    /// Interprets an inbound query. Unknown methods map to error 204,
    /// missing or malformed arguments to 203.
    pub fn parse(method: &[u8], args: &Dict) -> Result<Self, RemoteError> {
        let id_arg = |key: &[u8]| {
            args.get(key)
                .and_then(Value::as_bytes)
                .and_then(|b| NodeId::from_bytes(b).ok())
        };

        match method {
            b"ping" => Ok(DhtQuery::Ping),
            b"find_node" => id_arg(b"target")
                .map(|target| DhtQuery::FindNode { target })
                .ok_or_else(|| RemoteError::protocol("invalid target")),
            b"get_peers" => id_arg(b"info_hash")
                .map(|info_hash| DhtQuery::GetPeers { info_hash })
                .ok_or_else(|| RemoteError::protocol("invalid info_hash")),
            _ => Err(RemoteError::method_not_implemented()),
        }
    }
}
