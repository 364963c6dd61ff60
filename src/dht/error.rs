use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// A malformed KRPC message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A `y = "e"` reply from the remote node.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("timeout")]
    Timeout,

    #[error("invalid node id length")]
    InvalidNodeId,

    #[error("too many pending queries")]
    TooManyPending,

    #[error("dht engine closed")]
    Closed,
}

impl DhtError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        DhtError::Protocol(msg.into())
    }
}

/// An error a query handler sends back as a KRPC error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

impl RemoteError {
    pub const GENERIC: i64 = 201;
    pub const SERVER: i64 = 202;
    pub const PROTOCOL: i64 = 203;
    pub const METHOD_UNKNOWN: i64 = 204;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_implemented() -> Self {
        Self::new(Self::METHOD_UNKNOWN, "method not implemented")
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(Self::PROTOCOL, message)
    }
}

impl From<RemoteError> for DhtError {
    fn from(err: RemoteError) -> Self {
        DhtError::Remote {
            code: err.code,
            message: err.message,
        }
    }
}
