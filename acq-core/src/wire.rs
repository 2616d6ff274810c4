//! Packet codec: fixed-layout requests, trailing-offset replies.
//!
//! Request layout: `[8 magic][4 version LE][type codes][4 declared length LE][4 sender IPv4][6 MAC]`.
//! Replies are parsed from the end of the datagram because the prefix length varies
//! between request variants.

use std::net::Ipv4Addr;

use crate::device::{ConnectionStatus, LocalIdentity, MacAddr, SerialNumber};
use crate::protocol::{RequestKind, DECLARED_LENGTH, PROTOCOL_VERSION, REPLY_MAGIC, REQUEST_MAGIC};

const MAGIC_LEN: usize = 8;
const VERSION_LEN: usize = 4;
/// Trailing fixed part of a request: declared length + IPv4 + MAC.
const TRAILER_LEN: usize = 4 + 4 + 6;
/// Smallest request (no type codes).
pub const MIN_REQUEST_LEN: usize = MAGIC_LEN + VERSION_LEN + TRAILER_LEN;

/// Replies at or below this length only carry a toggle signal.
pub const SHORT_REPLY_MAX_LEN: usize = 29;
const LINK_IP_FROM_END: usize = 23;
const SERIAL_FROM_END: usize = 19;
/// Absolute offset of the connection-state flag in a full reply.
const STATUS_OFFSET: usize = 31;
/// Length of the reply `encode_reply` produces for a full reply.
pub const FULL_REPLY_LEN: usize = 34;

/// A discovery/control request as laid out on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPacket {
    pub version: u32,
    pub type_codes: Vec<u8>,
    pub declared_length: u32,
    pub sender_ip: Ipv4Addr,
    pub mac: MacAddr,
}

impl DiscoveryPacket {
    pub fn new(
        type_codes: &[u8],
        sender_ip: Ipv4Addr,
        mac: MacAddr,
        version: u32,
        declared_length: u32,
    ) -> Self {
        Self {
            version,
            type_codes: type_codes.to_vec(),
            declared_length,
            sender_ip,
            mac,
        }
    }

    /// Request of the given kind with the protocol's version and declared length.
    pub fn request(kind: RequestKind, identity: &LocalIdentity) -> Self {
        Self::new(
            kind.type_codes(),
            identity.ip,
            identity.mac,
            PROTOCOL_VERSION,
            DECLARED_LENGTH,
        )
    }

    pub fn kind(&self) -> Option<RequestKind> {
        RequestKind::from_type_codes(&self.type_codes)
    }

    pub fn encoded_len(&self) -> usize {
        MIN_REQUEST_LEN + self.type_codes.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&REQUEST_MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.type_codes);
        out.extend_from_slice(&self.declared_length.to_le_bytes());
        out.extend_from_slice(&self.sender_ip.octets());
        out.extend_from_slice(&self.mac.octets());
        out
    }

    /// Parse a request. Everything between the version and the trailer is the type-code sequence.
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketDecodeError> {
        if bytes.len() < MIN_REQUEST_LEN {
            return Err(PacketDecodeError::Truncated {
                len: bytes.len(),
                need: MIN_REQUEST_LEN,
            });
        }
        if bytes[..MAGIC_LEN] != REQUEST_MAGIC {
            return Err(PacketDecodeError::BadMagic);
        }
        let version = read_u32_le(&bytes[MAGIC_LEN..MAGIC_LEN + VERSION_LEN]);
        let trailer = bytes.len() - TRAILER_LEN;
        let type_codes = bytes[MAGIC_LEN + VERSION_LEN..trailer].to_vec();
        let declared_length = read_u32_le(&bytes[trailer..trailer + 4]);
        let sender_ip = read_ipv4(&bytes[trailer + 4..trailer + 8]);
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes[trailer + 8..]);
        Ok(Self {
            version,
            type_codes,
            declared_length,
            sender_ip,
            mac: MacAddr(mac),
        })
    }
}

/// A controller's answer to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryReply {
    /// Identity and state of the replying controller.
    Full {
        link_ip: Ipv4Addr,
        serial: SerialNumber,
        status: ConnectionStatus,
    },
    /// Acknowledgement; `toggle` means the controller flipped its connection state.
    Short { toggle: bool },
}

/// Classify and parse a received datagram.
pub fn decode_reply(bytes: &[u8]) -> Result<DiscoveryReply, PacketDecodeError> {
    let len = bytes.len();
    if len == 0 {
        return Err(PacketDecodeError::Empty);
    }
    if len <= SHORT_REPLY_MAX_LEN {
        return Ok(DiscoveryReply::Short {
            toggle: bytes[len - 1] == 0,
        });
    }
    if len <= STATUS_OFFSET {
        return Err(PacketDecodeError::Truncated {
            len,
            need: STATUS_OFFSET + 1,
        });
    }
    let ip_at = len - LINK_IP_FROM_END;
    let serial_at = len - SERIAL_FROM_END;
    let mut serial = [0u8; 16];
    serial.copy_from_slice(&bytes[serial_at..serial_at + 16]);
    Ok(DiscoveryReply::Full {
        link_ip: read_ipv4(&bytes[ip_at..ip_at + 4]),
        serial: SerialNumber(serial),
        status: ConnectionStatus::from_flag(bytes[STATUS_OFFSET]),
    })
}

/// Build the datagram a controller sends for `reply`.
/// Full replies are `[8 magic][3 type bytes][4 link IP][16 serial][1 state][2 padding]`.
pub fn encode_reply(reply: &DiscoveryReply) -> Vec<u8> {
    let mut out = Vec::with_capacity(FULL_REPLY_LEN);
    out.extend_from_slice(&REPLY_MAGIC);
    match reply {
        DiscoveryReply::Full {
            link_ip,
            serial,
            status,
        } => {
            out.extend_from_slice(&[1, 1, 0]);
            out.extend_from_slice(&link_ip.octets());
            out.extend_from_slice(serial.as_bytes());
            out.push(status.flag());
            out.extend_from_slice(&[0, 0]);
        }
        DiscoveryReply::Short { toggle } => {
            out.push(if *toggle { 0 } else { 1 });
        }
    }
    out
}

fn read_u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn read_ipv4(b: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(b[0], b[1], b[2], b[3])
}

/// Error decoding a request or reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketDecodeError {
    #[error("empty datagram")]
    Empty,
    #[error("datagram too short: {len} bytes, need {need}")]
    Truncated { len: usize, need: usize },
    #[error("bad magic header")]
    BadMagic,
}
