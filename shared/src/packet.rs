//! Packet framing: fixed header, type tags, and sequence arithmetic.

use crate::bitpack::{BitPack, BitPackError};
use crate::{GAME_ID, MAX_PACKET_DATA_LEN};
use thiserror::Error;

/// Fixed header layout: 4-byte magic, sequence, ack, frame counter, type.
pub const HEADER_LEN: usize = 10;
/// Header plus the 2-byte payload length field.
pub const PACKET_OVERHEAD: usize = HEADER_LEN + 2;

/// Every message kind in the protocol. Closed set; any other tag fails
/// format validation before a peer is even resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Init = 0,
    ConnectRequest = 1,
    ConnectChallenge = 2,
    ConnectChallengeResp = 3,
    ConnectAccepted = 4,
    ConnectRejected = 5,
    Disconnect = 6,
    Ping = 7,
    Input = 8,
    Settings = 9,
    State = 10,
    Message = 11,
    Error = 12,
}

impl PacketType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Init),
            1 => Some(Self::ConnectRequest),
            2 => Some(Self::ConnectChallenge),
            3 => Some(Self::ConnectChallengeResp),
            4 => Some(Self::ConnectAccepted),
            5 => Some(Self::ConnectRejected),
            6 => Some(Self::Disconnect),
            7 => Some(Self::Ping),
            8 => Some(Self::Input),
            9 => Some(Self::Settings),
            10 => Some(Self::State),
            11 => Some(Self::Message),
            12 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Why a connection attempt was turned down. Each maps to a distinct
/// rejection payload the client can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    ServerFull = 0,
    InvalidPacket = 1,
    FailedChallenge = 2,
}

impl RejectReason {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::ServerFull),
            1 => Some(Self::InvalidPacket),
            2 => Some(Self::FailedChallenge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerFull => "SERVER FULL",
            Self::InvalidPacket => "INVALID PACKET FORMAT",
            Self::FailedChallenge => "FAILED CHALLENGE",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),
    #[error("game id mismatch: {found:#010x}")]
    BadMagic { found: u32 },
    #[error("invalid packet type tag: {0}")]
    BadType(u8),
    #[error("payload length {len} exceeds limit {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("payload truncated: declared {declared}, got {actual}")]
    Truncated { declared: usize, actual: usize },
    #[error("malformed payload for {0:?}")]
    MalformedPayload(PacketType),
    #[error(transparent)]
    Codec(#[from] BitPackError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub game_id: u32,
    /// Sender-assigned sequence id, incremented on every send.
    pub id: u16,
    /// Echo of the peer's latest seen sequence id.
    pub ack: u16,
    pub frame_no: u8,
    pub ptype: PacketType,
}

/// One wire record: fixed header + 2-byte length + bounded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new(header: PacketHeader, data: Vec<u8>) -> Self {
        Self { header, data }
    }

    /// Wire size = header + length field + payload.
    pub fn wire_size(&self) -> usize {
        PACKET_OVERHEAD + self.data.len()
    }

    /// Frames the packet through the bit codec.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut bp = BitPack::new(self.wire_size());
        bp.write(32, self.header.game_id)?;
        bp.write(16, u32::from(self.header.id))?;
        bp.write(16, u32::from(self.header.ack))?;
        bp.write(8, u32::from(self.header.frame_no))?;
        bp.write(8, self.header.ptype as u32)?;
        bp.write(16, self.data.len() as u32)?;
        bp.write_bytes(&self.data)?;
        Ok(bp.to_bytes())
    }

    /// Parses a raw datagram. Rejects unknown type tags and length-field
    /// lies; the magic check is left to [`validate_format`](Self::validate_format)
    /// so callers can distinguish cross-protocol noise from garbage.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < PACKET_OVERHEAD {
            return Err(PacketError::TooShort(buf.len()));
        }

        let mut bp = BitPack::from_bytes(buf);
        let game_id = bp.read(32)?;
        let id = bp.read(16)? as u16;
        let ack = bp.read(16)? as u16;
        let frame_no = bp.read(8)? as u8;
        let tag = bp.read(8)? as u8;
        let ptype = PacketType::from_u8(tag).ok_or(PacketError::BadType(tag))?;
        let data_len = bp.read(16)? as usize;

        if data_len > MAX_PACKET_DATA_LEN {
            return Err(PacketError::PayloadTooLarge {
                len: data_len,
                max: MAX_PACKET_DATA_LEN,
            });
        }
        let available = buf.len() - PACKET_OVERHEAD;
        if data_len > available {
            return Err(PacketError::Truncated {
                declared: data_len,
                actual: available,
            });
        }

        let mut data = vec![0u8; data_len];
        bp.read_bytes(&mut data)?;

        Ok(Self {
            header: PacketHeader {
                game_id,
                id,
                ack,
                frame_no,
                ptype,
            },
            data,
        })
    }

    /// Cheap pre-auth gate: a mismatched magic constant rejects the packet
    /// unconditionally before any other processing.
    pub fn validate_format(&self) -> Result<(), PacketError> {
        if self.header.game_id != GAME_ID {
            return Err(PacketError::BadMagic {
                found: self.header.game_id,
            });
        }
        Ok(())
    }
}

/// Wraparound-safe ordering over the 16-bit sequence space: `id` is newer
/// than `cmp` when the forward distance (mod 65536) is at most 32768.
pub fn is_packet_id_greater(id: u16, cmp: u16) -> bool {
    ((id >= cmp) && (id - cmp <= 32768)) || ((id <= cmp) && (cmp - id > 32768))
}

/// Per-endpoint sequence bookkeeping: the outgoing counter and the highest
/// id seen from the peer. One of these per socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeInfo {
    pub local_latest_packet_id: u16,
    pub remote_latest_packet_id: Option<u16>,
}

impl NodeInfo {
    /// Claims the next outgoing sequence id. Assigned at send time.
    pub fn next_packet_id(&mut self) -> u16 {
        let id = self.local_latest_packet_id;
        self.local_latest_packet_id = self.local_latest_packet_id.wrapping_add(1);
        id
    }

    /// Records `id` if it is strictly newer than anything seen so far.
    /// Returns false for replays and stale reorderings.
    pub fn accept_remote(&mut self, id: u16) -> bool {
        match self.remote_latest_packet_id {
            Some(latest) if id == latest || !is_packet_id_greater(id, latest) => false,
            _ => {
                self.remote_latest_packet_id = Some(id);
                true
            }
        }
    }
}
