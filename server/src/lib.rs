//! # Authoritative Server Library
//!
//! This library provides the authoritative endpoint of the UDP transport.
//! It owns the canonical simulation, admits clients through a salt-exchange
//! handshake, replays their buffered inputs at a fixed step, and broadcasts
//! state snapshots at the network tick rate.
//!
//! ## Architecture
//!
//! ### Single-Threaded Session Loop
//! All socket I/O, handshake bookkeeping, and simulation run sequentially
//! on one thread with non-blocking reads. There are no locks and no
//! cross-task channels; each loop pass drains the socket completely, then
//! advances two independent fixed-step accumulators (simulation and
//! network send).
//!
//! ### Connection Admission
//! Peers are admitted through a three-step handshake: a padded connect
//! request carrying the client's salt, a challenge carrying the server's
//! salt, and a padded response proving the peer can derive the xor of the
//! two. The derived token then silently authenticates every later packet.
//!
//! ## Module Organization
//!
//! - [`client_manager`]: fixed-capacity slot table keyed by address, with
//!   per-peer salt material, sequence high-water mark, and input queue.
//! - [`game`]: the [`game::Simulation`] boundary the transport calls into,
//!   plus the concrete arena world shipped with the binary.
//! - [`network`]: the [`network::Server`] session loop itself.

pub mod client_manager;
pub mod game;
pub mod network;
