//! Driftnet Protocol -- wire types and the strict text codec.
//!
//! One UDP datagram carries one semicolon-delimited text message.
//! Decoding is deliberately conservative: a malformed datagram is a
//! typed `DecodeError`, never a best-effort guess.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

pub mod messages;

pub use messages::{Dying, Hello, List, Message, Syn};

/// Maximum peer ID length in characters.
pub const MAX_ID_LEN: usize = 16;

/// Maximum payload of a single LIST part in bytes.
pub const MAX_LIST_DATA_BYTES: usize = 255;

/// Maximum number of peer IDs carried by one HELLO.
pub const MAX_HELLO_PEERS: usize = 255;

/// Sequence number of a catalog that has published nothing yet.
pub const SENTINEL_SEQ_NUM: i64 = i64::MIN;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown message type: {0:?}")]
    UnknownType(String),
    #[error("wrong number of fields for {kind}: got {got}")]
    FieldCount { kind: &'static str, got: usize },
    #[error("invalid peer ID: {0:?}")]
    InvalidId(String),
    #[error("invalid {field}: {source}")]
    IntField {
        field: &'static str,
        source: std::num::ParseIntError,
    },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
    #[error("peer count mismatch: declared {declared}, got {got}")]
    PeerCountMismatch { declared: usize, got: usize },
    #[error("part number {part_num} outside total {total_parts}")]
    PartOutOfRange { part_num: u32, total_parts: u32 },
    #[error("LIST data too long: {0} bytes (max {MAX_LIST_DATA_BYTES})")]
    DataTooLong(usize),
    #[error("datagram is not valid UTF-8")]
    NotUtf8,
    #[error("empty datagram")]
    Empty,
}

/// A validated peer identifier: up to 16 ASCII alphanumerics.
///
/// Invalid IDs cannot be constructed, so every message holding a
/// `PeerId` is valid on the encode side by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Result<Self, DecodeError> {
        let id = id.into();
        if id.len() > MAX_ID_LEN || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DecodeError::InvalidId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A message paired with the address it arrived from or is bound for.
///
/// The unit of I/O on every actor's queue. Immutable: the multiplexer
/// hands the same envelope to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub addr: SocketAddr,
    pub msg: Message,
}

impl Envelope {
    pub fn new(addr: SocketAddr, msg: Message) -> Self {
        Self { addr, msg }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.addr, self.msg)
    }
}
