//! Protocol core shared by the server and client: the bit-level codec,
//! packet framing, typed payloads, and the constants both ends must agree
//! on. Everything here is transport-layer; simulation and rendering live
//! with the application.

pub mod bitpack;
pub mod input;
pub mod message;
pub mod packet;
pub mod tick;

pub use bitpack::{BitPack, BitPackError};
pub use input::NetPlayerInput;
pub use message::{generate_salt, xor_salts, Message, Salt};
pub use packet::{
    is_packet_id_greater, NodeInfo, Packet, PacketError, PacketHeader, PacketType, RejectReason,
    HEADER_LEN, PACKET_OVERHEAD,
};
pub use tick::FixedStep;

use std::net::SocketAddr;

/// Protocol magic. Packets carrying anything else are rejected before any
/// other processing.
pub const GAME_ID: u32 = 0x308B_4134;

/// Well-known server port.
pub const SERVER_PORT: u16 = 27001;

/// Slot table capacity: the fixed small number of clients one server holds.
pub const MAX_CLIENTS: usize = 8;

/// Buffered player-input records per client between network passes.
pub const INPUT_QUEUE_MAX: usize = 16;

/// Handshake payloads are zero-padded to exactly this many bytes.
pub const HANDSHAKE_DATA_LEN: usize = 1024;

/// Payload ceiling for a single datagram.
pub const MAX_PACKET_DATA_LEN: usize = 1400;

/// Salt and session-token width in bytes.
pub const SALT_LEN: usize = 8;

/// Bound on the player name carried in a connect request.
pub const PLAYER_NAME_MAX: usize = 16;

/// Peer silence beyond this window forces removal.
pub const DISCONNECTION_TIMEOUT: f64 = 7.0;

/// How often an idle client pings to keep its slot warm.
pub const PING_PERIOD: f64 = 3.0;

/// Simulation tick rate (fixed-step).
pub const TARGET_FPS: f64 = 60.0;

/// Network send tick rate; deliberately lower than the simulation rate.
pub const TICK_RATE: f64 = 20.0;

/// DISCONNECT is the only redundantly-sent message: a small fixed repeat
/// raises delivery probability over an unacknowledged transport.
pub const DISCONNECT_REDUNDANCY: usize = 3;

/// Per-peer connection lifecycle. `Disconnected` is both the initial and
/// the terminal state; a slot is eligible for reassignment exactly when it
/// holds this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    SendingConnectionRequest,
    SendingChallengeResponse,
    Connected,
}

/// Address-only comparison, ignoring the port. The default peer match is
/// full `SocketAddr` equality; this exists for address-only checks such as
/// NAT rebinding.
pub fn same_host(a: &SocketAddr, b: &SocketAddr) -> bool {
    a.ip() == b.ip()
}
