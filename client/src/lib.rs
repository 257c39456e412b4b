//! # Client Library
//!
//! Connecting endpoint of the UDP transport. The client initiates the
//! salt-exchange handshake, batches captured inputs between network ticks,
//! keeps its slot warm with periodic pings, and consumes the state
//! snapshots the server broadcasts.
//!
//! ## Architecture
//!
//! The session runs single-threaded with non-blocking socket reads,
//! mirroring the server loop. [`network::Client`] exposes explicit pump
//! methods (`drain_socket`, `flush_inputs`, `tick`) so the loop can be
//! driven deterministically; [`network::Client::run`] wires them into the
//! fixed-step loop the headless binary uses.
//!
//! ## Connection Lifecycle
//!
//! 1. `connect` sends a padded CONNECT_REQUEST carrying a fresh salt.
//! 2. The server's challenge echoes that salt alongside its own; the
//!    client derives the xor session token and answers with a padded
//!    response proving it.
//! 3. On CONNECT_ACCEPTED the client learns its id and starts flushing
//!    inputs; rejection or prolonged server silence resets the session.

pub mod network;
