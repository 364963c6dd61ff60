//! Bencode encoding and decoding ([BEP-3]).
//!
//! KRPC messages are bencoded dictionaries, so this module only needs the
//! four bencode types and a strict decoder. Dictionary keys are kept in a
//! `BTreeMap`, which makes the encoder emit them in the sorted order other
//! DHT implementations expect.
//!
//! ```
//! use rdht::bencode::{decode, encode, Value};
//!
//! let value = decode(b"d1:t2:aa1:y1:qe").unwrap();
//! assert_eq!(value.get(b"y").and_then(Value::as_str), Some("q"));
//! assert_eq!(encode(&value), b"d1:t2:aa1:y1:qe");
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::decode;
pub use encode::encode;
pub use error::BencodeError;
pub use value::{Dict, Value};
