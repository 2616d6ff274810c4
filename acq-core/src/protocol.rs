//! Discovery/control protocol: constants and request kinds.

/// Header every request starts with.
pub const REQUEST_MAGIC: [u8; 8] = [0xFA, 0xFB, 0xFC, 0xFD, 0xDD, 0xCC, 0xBB, 0xAA];

/// Header controllers put on their replies. Never validated on receive.
pub const REPLY_MAGIC: [u8; 8] = [0x00, 0x00, 0xC0, 0xFF, 0xAA, 0xBB, 0xCC, 0xDD];

/// Protocol version carried in every request (4 bytes LE on the wire).
pub const PROTOCOL_VERSION: u32 = 5;

/// Declared payload length field carried in every request.
pub const DECLARED_LENGTH: u32 = 10;

const PROBE_CODES: [u8; 7] = [1, 1, 1, 0, 0, 0, 0];
const CONNECT_CODES: [u8; 12] = [1, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0];
const DISCONNECT_CODES: [u8; 7] = [1, 1, 3, 0, 0, 0, 0];

/// The three requests a host can send to a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Broadcast: any controller on the segment answers with a full reply.
    Probe,
    /// Unicast: ask the controller to accept this host.
    Connect,
    /// Unicast: release the controller.
    Disconnect,
}

impl RequestKind {
    /// Type-code sequence that identifies this request on the wire.
    pub fn type_codes(self) -> &'static [u8] {
        match self {
            RequestKind::Probe => &PROBE_CODES,
            RequestKind::Connect => &CONNECT_CODES,
            RequestKind::Disconnect => &DISCONNECT_CODES,
        }
    }

    /// Classify a decoded type-code sequence.
    pub fn from_type_codes(codes: &[u8]) -> Option<Self> {
        [RequestKind::Probe, RequestKind::Connect, RequestKind::Disconnect]
            .into_iter()
            .find(|k| k.type_codes() == codes)
    }

    pub fn name(self) -> &'static str {
        match self {
            RequestKind::Probe => "probe",
            RequestKind::Connect => "connect",
            RequestKind::Disconnect => "disconnect",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
