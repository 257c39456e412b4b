//! Typed payloads: one variant per packet type, so every handler is
//! exhaustively checked, plus the salt material that binds a session.
//!
//! Post-handshake client-to-server payloads carry an 8-byte session token
//! (`xor_salts`) ahead of the body; the token is attached and stripped
//! here so no other component touches raw payload offsets.

use crate::bitpack::BitPack;
use crate::input::NetPlayerInput;
use crate::packet::{PacketError, PacketType, RejectReason};
use crate::{HANDSHAKE_DATA_LEN, MAX_PACKET_DATA_LEN, PLAYER_NAME_MAX, SALT_LEN};

pub type Salt = [u8; SALT_LEN];

/// Generates a random 64-bit salt.
pub fn generate_salt() -> Salt {
    rand::random::<u64>().to_le_bytes()
}

/// The shared session token. Never transmitted; both ends derive it from
/// the two salts that did cross the wire.
pub fn xor_salts(client_salt: &Salt, server_salt: &Salt) -> Salt {
    let mut out = [0u8; SALT_LEN];
    for (i, b) in out.iter_mut().enumerate() {
        *b = client_salt[i] ^ server_salt[i];
    }
    out
}

/// Decoded packet payload. Closed sum over [`PacketType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Init,
    /// Zero-padded to [`HANDSHAKE_DATA_LEN`] so the minimum handshake
    /// payload is large and symmetric (anti-amplification).
    ConnectRequest {
        client_salt: Salt,
        name: String,
    },
    ConnectChallenge {
        client_salt: Salt,
        server_salt: Salt,
    },
    /// Leading bytes are the recomputed session token; padded like the
    /// connect request.
    ConnectChallengeResp {
        xor_salts: Salt,
    },
    ConnectAccepted {
        client_id: u8,
    },
    ConnectRejected {
        reason: RejectReason,
    },
    Disconnect,
    Ping,
    Input {
        inputs: Vec<NetPlayerInput>,
    },
    Settings {
        data: Vec<u8>,
    },
    State {
        snapshot: Vec<u8>,
    },
    ChatMessage {
        text: String,
    },
    Error {
        code: u8,
    },
}

impl Message {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Init => PacketType::Init,
            Self::ConnectRequest { .. } => PacketType::ConnectRequest,
            Self::ConnectChallenge { .. } => PacketType::ConnectChallenge,
            Self::ConnectChallengeResp { .. } => PacketType::ConnectChallengeResp,
            Self::ConnectAccepted { .. } => PacketType::ConnectAccepted,
            Self::ConnectRejected { .. } => PacketType::ConnectRejected,
            Self::Disconnect => PacketType::Disconnect,
            Self::Ping => PacketType::Ping,
            Self::Input { .. } => PacketType::Input,
            Self::Settings { .. } => PacketType::Settings,
            Self::State { .. } => PacketType::State,
            Self::ChatMessage { .. } => PacketType::Message,
            Self::Error { .. } => PacketType::Error,
        }
    }

    /// Serializes the payload. `token` prefixes the session token onto
    /// message kinds that are authenticated by it; the handshake variants
    /// carry their salt material inline instead.
    pub fn encode_payload(&self, token: Option<&Salt>) -> Result<Vec<u8>, PacketError> {
        let mut bp = BitPack::new(MAX_PACKET_DATA_LEN);

        if let Some(token) = token {
            match self {
                Self::ConnectRequest { .. } | Self::ConnectChallengeResp { .. } => {}
                _ => bp.write_bytes(token)?,
            }
        }

        match self {
            Self::Init | Self::Disconnect | Self::Ping => {}

            Self::ConnectRequest { client_salt, name } => {
                bp.write_bytes(client_salt)?;
                let name_bytes = name.as_bytes();
                let len = name_bytes.len().min(PLAYER_NAME_MAX);
                bp.write(8, len as u32)?;
                bp.write_bytes(&name_bytes[..len])?;
            }

            Self::ConnectChallenge {
                client_salt,
                server_salt,
            } => {
                bp.write_bytes(client_salt)?;
                bp.write_bytes(server_salt)?;
            }

            Self::ConnectChallengeResp { xor_salts } => {
                bp.write_bytes(xor_salts)?;
            }

            Self::ConnectAccepted { client_id } => {
                bp.write(8, u32::from(*client_id))?;
            }

            Self::ConnectRejected { reason } => {
                bp.write(8, *reason as u32)?;
            }

            Self::Input { inputs } => {
                bp.write(8, inputs.len() as u32)?;
                for input in inputs {
                    bp.write(32, input.keys)?;
                    bp.write(32, input.delta_t.to_bits())?;
                }
            }

            Self::Settings { data } => {
                bp.write(16, data.len() as u32)?;
                bp.write_bytes(data)?;
            }

            Self::State { snapshot } => {
                bp.write_bytes(snapshot)?;
            }

            Self::ChatMessage { text } => {
                let bytes = text.as_bytes();
                bp.write(16, bytes.len() as u32)?;
                bp.write_bytes(bytes)?;
            }

            Self::Error { code } => {
                bp.write(8, u32::from(*code))?;
            }
        }

        let mut payload = bp.to_bytes();

        // Handshake payloads are fixed-size regardless of content.
        if matches!(
            self,
            Self::ConnectRequest { .. } | Self::ConnectChallengeResp { .. }
        ) {
            payload.resize(HANDSHAKE_DATA_LEN, 0);
        }

        Ok(payload)
    }

    /// Parses a payload for `ptype`. For token-authenticated kinds the
    /// caller passes the payload with the 8-byte token already stripped;
    /// handshake kinds are parsed in full.
    pub fn decode(ptype: PacketType, payload: &[u8]) -> Result<Self, PacketError> {
        let malformed = || PacketError::MalformedPayload(ptype);
        let mut bp = BitPack::from_bytes(payload);

        match ptype {
            PacketType::Init => Ok(Self::Init),
            PacketType::Disconnect => Ok(Self::Disconnect),
            PacketType::Ping => Ok(Self::Ping),

            PacketType::ConnectRequest => {
                if payload.len() != HANDSHAKE_DATA_LEN {
                    return Err(malformed());
                }
                let mut client_salt = [0u8; SALT_LEN];
                bp.read_bytes(&mut client_salt).map_err(|_| malformed())?;
                let len = bp.read(8).map_err(|_| malformed())? as usize;
                if len > PLAYER_NAME_MAX {
                    return Err(malformed());
                }
                let mut name_bytes = vec![0u8; len];
                bp.read_bytes(&mut name_bytes).map_err(|_| malformed())?;
                let name = String::from_utf8(name_bytes).map_err(|_| malformed())?;
                Ok(Self::ConnectRequest { client_salt, name })
            }

            PacketType::ConnectChallenge => {
                let mut client_salt = [0u8; SALT_LEN];
                let mut server_salt = [0u8; SALT_LEN];
                bp.read_bytes(&mut client_salt).map_err(|_| malformed())?;
                bp.read_bytes(&mut server_salt).map_err(|_| malformed())?;
                Ok(Self::ConnectChallenge {
                    client_salt,
                    server_salt,
                })
            }

            PacketType::ConnectChallengeResp => {
                if payload.len() != HANDSHAKE_DATA_LEN {
                    return Err(malformed());
                }
                let mut xor_salts = [0u8; SALT_LEN];
                bp.read_bytes(&mut xor_salts).map_err(|_| malformed())?;
                Ok(Self::ConnectChallengeResp { xor_salts })
            }

            PacketType::ConnectAccepted => {
                let client_id = bp.read(8).map_err(|_| malformed())? as u8;
                Ok(Self::ConnectAccepted { client_id })
            }

            PacketType::ConnectRejected => {
                let tag = bp.read(8).map_err(|_| malformed())? as u8;
                let reason = RejectReason::from_u8(tag).ok_or_else(malformed)?;
                Ok(Self::ConnectRejected { reason })
            }

            PacketType::Input => {
                let count = bp.read(8).map_err(|_| malformed())? as usize;
                let mut inputs = Vec::with_capacity(count);
                for _ in 0..count {
                    let keys = bp.read(32).map_err(|_| malformed())?;
                    let delta_t = f32::from_bits(bp.read(32).map_err(|_| malformed())?);
                    inputs.push(NetPlayerInput { keys, delta_t });
                }
                Ok(Self::Input { inputs })
            }

            PacketType::Settings => {
                let len = bp.read(16).map_err(|_| malformed())? as usize;
                let mut data = vec![0u8; len];
                bp.read_bytes(&mut data).map_err(|_| malformed())?;
                Ok(Self::Settings { data })
            }

            PacketType::State => Ok(Self::State {
                snapshot: payload.to_vec(),
            }),

            PacketType::Message => {
                let len = bp.read(16).map_err(|_| malformed())? as usize;
                let mut bytes = vec![0u8; len];
                bp.read_bytes(&mut bytes).map_err(|_| malformed())?;
                let text = String::from_utf8(bytes).map_err(|_| malformed())?;
                Ok(Self::ChatMessage { text })
            }

            PacketType::Error => {
                let code = bp.read(8).map_err(|_| malformed())? as u8;
                Ok(Self::Error { code })
            }
        }
    }
}
