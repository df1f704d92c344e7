//! The four gossip message kinds and their text codec.
//!
//! Wire format: semicolon-separated fields, type tag first.
//!
//!   HELLO;sender;seqNum;helloInterval;peerCount;peer1;...;peerN
//!   SYN;sender;peer;seqNum
//!   LIST;sender;peer;seqNum;totalParts;partNum;data
//!   DYING;sender
//!
//! `encode` is the exact inverse of `decode`. Validation runs on both
//! sides so that a malformed peer (or a local bug) surfaces as a
//! discard-with-log event instead of being silently tolerated.

use crate::{DecodeError, PeerId, MAX_HELLO_PEERS, MAX_LIST_DATA_BYTES};

const HELLO: &str = "HELLO";
const SYN: &str = "SYN";
const LIST: &str = "LIST";
const DYING: &str = "DYING";

/// Liveness advertisement, broadcast periodically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub sender: PeerId,
    pub seq_num: i64,
    /// Seconds between two HELLOs from this sender. Wire range [0,255].
    pub hello_interval: u8,
    /// IDs of the sender's known live peers (a liveness digest).
    pub peers: Vec<PeerId>,
}

/// Directed request asking `peer` to stream its catalog back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syn {
    pub sender: PeerId,
    pub peer: PeerId,
    pub seq_num: i64,
}

/// One row of a multi-part catalog transfer, addressed to `peer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct List {
    pub sender: PeerId,
    pub peer: PeerId,
    pub seq_num: i64,
    pub total_parts: u32,
    pub part_num: u32,
    pub data: String,
}

/// Voluntary liveness withdrawal, broadcast on shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dying {
    pub sender: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Syn(Syn),
    List(List),
    Dying(Dying),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello(_) => HELLO,
            Message::Syn(_) => SYN,
            Message::List(_) => LIST,
            Message::Dying(_) => DYING,
        }
    }

    pub fn sender(&self) -> &PeerId {
        match self {
            Message::Hello(m) => &m.sender,
            Message::Syn(m) => &m.sender,
            Message::List(m) => &m.sender,
            Message::Dying(m) => &m.sender,
        }
    }

    /// Decode a raw datagram payload.
    pub fn decode_datagram(payload: &[u8]) -> Result<Self, DecodeError> {
        let raw = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
        Self::decode(raw)
    }

    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }
        let kind = raw.split(';').next().unwrap_or("");
        match kind {
            HELLO => Hello::decode(raw).map(Message::Hello),
            SYN => Syn::decode(raw).map(Message::Syn),
            LIST => List::decode(raw).map(Message::List),
            DYING => Dying::decode(raw).map(Message::Dying),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }

    pub fn encode(&self) -> Result<String, DecodeError> {
        match self {
            Message::Hello(m) => m.encode(),
            Message::Syn(m) => m.encode(),
            Message::List(m) => m.encode(),
            Message::Dying(m) => m.encode(),
        }
    }
}

fn parse_i64(field: &'static str, raw: &str) -> Result<i64, DecodeError> {
    raw.parse()
        .map_err(|source| DecodeError::IntField { field, source })
}

fn parse_bounded(field: &'static str, raw: &str, max: i64) -> Result<i64, DecodeError> {
    let value = parse_i64(field, raw)?;
    if value < 0 || value > max {
        return Err(DecodeError::OutOfRange { field, value });
    }
    Ok(value)
}

impl Hello {
    fn decode(raw: &str) -> Result<Self, DecodeError> {
        let parts: Vec<&str> = raw.split(';').collect();
        if parts.len() < 5 {
            return Err(DecodeError::FieldCount {
                kind: HELLO,
                got: parts.len(),
            });
        }

        let sender: PeerId = parts[1].parse()?;
        let seq_num = parse_i64("sequence number", parts[2])?;
        let hello_interval = parse_bounded("HELLO interval", parts[3], 255)? as u8;

        let declared = parse_bounded("peer count", parts[4], MAX_HELLO_PEERS as i64)? as usize;
        let got = parts.len() - 5;
        if declared != got {
            return Err(DecodeError::PeerCountMismatch { declared, got });
        }

        let peers = parts[5..]
            .iter()
            .map(|p| p.parse())
            .collect::<Result<Vec<PeerId>, _>>()?;

        Ok(Self {
            sender,
            seq_num,
            hello_interval,
            peers,
        })
    }

    fn encode(&self) -> Result<String, DecodeError> {
        if self.peers.len() > MAX_HELLO_PEERS {
            return Err(DecodeError::OutOfRange {
                field: "peer count",
                value: self.peers.len() as i64,
            });
        }
        let mut out = format!(
            "{HELLO};{};{};{};{}",
            self.sender,
            self.seq_num,
            self.hello_interval,
            self.peers.len()
        );
        for peer in &self.peers {
            out.push(';');
            out.push_str(peer.as_str());
        }
        Ok(out)
    }
}

impl Syn {
    fn decode(raw: &str) -> Result<Self, DecodeError> {
        let parts: Vec<&str> = raw.split(';').collect();
        if parts.len() != 4 {
            return Err(DecodeError::FieldCount {
                kind: SYN,
                got: parts.len(),
            });
        }
        Ok(Self {
            sender: parts[1].parse()?,
            peer: parts[2].parse()?,
            seq_num: parse_i64("sequence number", parts[3])?,
        })
    }

    fn encode(&self) -> Result<String, DecodeError> {
        Ok(format!("{SYN};{};{};{}", self.sender, self.peer, self.seq_num))
    }
}

impl List {
    fn decode(raw: &str) -> Result<Self, DecodeError> {
        // data is the last field and may itself contain semicolons.
        let parts: Vec<&str> = raw.splitn(7, ';').collect();
        if parts.len() != 7 {
            return Err(DecodeError::FieldCount {
                kind: LIST,
                got: parts.len(),
            });
        }

        let sender: PeerId = parts[1].parse()?;
        let peer: PeerId = parts[2].parse()?;
        let seq_num = parse_i64("sequence number", parts[3])?;
        let total_parts = parse_bounded("total parts", parts[4], u32::MAX as i64)? as u32;
        let part_num = parse_bounded("part number", parts[5], u32::MAX as i64)? as u32;
        if part_num >= total_parts {
            return Err(DecodeError::PartOutOfRange {
                part_num,
                total_parts,
            });
        }

        let data = parts[6].to_string();
        if data.len() > MAX_LIST_DATA_BYTES {
            return Err(DecodeError::DataTooLong(data.len()));
        }

        Ok(Self {
            sender,
            peer,
            seq_num,
            total_parts,
            part_num,
            data,
        })
    }

    fn encode(&self) -> Result<String, DecodeError> {
        if self.part_num >= self.total_parts {
            return Err(DecodeError::PartOutOfRange {
                part_num: self.part_num,
                total_parts: self.total_parts,
            });
        }
        if self.data.len() > MAX_LIST_DATA_BYTES {
            return Err(DecodeError::DataTooLong(self.data.len()));
        }
        Ok(format!(
            "{LIST};{};{};{};{};{};{}",
            self.sender, self.peer, self.seq_num, self.total_parts, self.part_num, self.data
        ))
    }
}

impl Dying {
    fn decode(raw: &str) -> Result<Self, DecodeError> {
        let parts: Vec<&str> = raw.split(';').collect();
        if parts.len() != 2 {
            return Err(DecodeError::FieldCount {
                kind: DYING,
                got: parts.len(),
            });
        }
        Ok(Self {
            sender: parts[1].parse()?,
        })
    }

    fn encode(&self) -> Result<String, DecodeError> {
        Ok(format!("{DYING};{}", self.sender))
    }
}
