//! Server session loop: socket drain, handshake authentication, fixed-step
//! simulation, and periodic state broadcast.
//!
//! Everything runs on one thread with cooperative, non-blocking I/O. The
//! drain phase empties the socket before anything else; two independent
//! fixed-step accumulators then gate the simulation and the network send
//! schedule. No per-packet failure is fatal to the loop.

use crate::client_manager::ClientManager;
use crate::game::Simulation;
use log::{debug, error, info, warn};
use shared::{
    generate_salt, xor_salts, ConnectionState, FixedStep, Message, NodeInfo, Packet, PacketError,
    PacketHeader, PacketType, RejectReason, DISCONNECTION_TIMEOUT, DISCONNECT_REDUNDANCY, GAME_ID,
    HANDSHAKE_DATA_LEN, MAX_CLIENTS, SALT_LEN, TARGET_FPS, TICK_RATE,
};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::sleep;

/// Knobs the binary exposes; defaults are the protocol contract.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_clients: usize,
    /// Simulation ticks per second.
    pub sim_rate: f64,
    /// STATE broadcast ticks per second.
    pub net_rate: f64,
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: MAX_CLIENTS,
            sim_rate: TARGET_FPS,
            net_rate: TICK_RATE,
            timeout: Duration::from_secs_f64(DISCONNECTION_TIMEOUT),
        }
    }
}

/// Authoritative endpoint: one socket, one slot table, one simulation.
pub struct Server<S: Simulation> {
    socket: UdpSocket,
    config: ServerConfig,
    clients: ClientManager,
    sim: S,
    node: NodeInfo,
    frame_no: u8,
}

impl<S: Simulation> Server<S> {
    pub async fn bind(
        addr: &str,
        config: ServerConfig,
        sim: S,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Server listening on {}", socket.local_addr()?);

        let clients = ClientManager::new(config.max_clients);
        Ok(Self {
            socket,
            config,
            clients,
            sim,
            node: NodeInfo::default(),
            frame_no: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    /// Main loop: drain, simulate, broadcast, breathe. Runs until the
    /// process is told to exit (raced against ctrl-c by the caller).
    pub async fn run(&mut self) {
        info!(
            "Server started: sim {:.0} Hz, net {:.0} Hz, {} slots",
            self.config.sim_rate, self.config.net_rate, self.config.max_clients
        );

        let mut sim_step = FixedStep::new(self.config.sim_rate);
        let mut net_step = FixedStep::new(self.config.net_rate);
        let sim_dt = sim_step.dt() as f32;
        let mut last = Instant::now();

        loop {
            self.drain_socket().await;

            let now = Instant::now();
            let elapsed = now.duration_since(last).as_secs_f64();
            last = now;

            sim_step.accumulate(elapsed);
            while sim_step.consume() {
                self.simulate(sim_dt);
            }

            net_step.accumulate(elapsed);
            if net_step.consume() {
                self.network_tick().await;
            }

            // Caps CPU usage; not part of protocol correctness.
            sleep(Duration::from_millis(1)).await;
        }
    }

    /// Drain phase: fully process every pending datagram before returning.
    pub async fn drain_socket(&mut self) {
        let mut buf = [0u8; 2048];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, from)) => {
                    let datagram = buf[..len].to_vec();
                    self.process_datagram(&datagram, from).await;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Error receiving packet: {}", e);
                    break;
                }
            }
        }
    }

    /// Simulation phase: replay buffered inputs in arrival order as atomic
    /// apply-then-advance steps; idle peers still get one zero-input step.
    pub fn simulate(&mut self, dt: f32) {
        for client_id in 0..self.clients.capacity() {
            let inputs = {
                let Some(slot) = self.clients.get_mut(client_id) else {
                    continue;
                };
                if slot.state != ConnectionState::Connected {
                    continue;
                }
                std::mem::take(&mut slot.pending_inputs)
            };

            if inputs.is_empty() {
                self.sim.step(client_id, dt);
            } else {
                for input in &inputs {
                    self.sim.apply_input(client_id, input);
                }
            }
        }

        self.frame_no = self.frame_no.wrapping_add(1);
    }

    /// Send phase: sweep timeouts, then broadcast fresh state to every
    /// surviving connected peer.
    pub async fn network_tick(&mut self) {
        let now = Instant::now();
        let active: Vec<usize> = self.clients.iter_active().map(|s| s.client_id).collect();

        for client_id in active {
            let Some(slot) = self.clients.get(client_id) else {
                continue;
            };
            let Some(addr) = slot.addr else { continue };
            let ack = slot.remote_latest_packet_id.unwrap_or(0);
            let connected = slot.state == ConnectionState::Connected;

            if slot.is_timed_out(self.config.timeout, now) {
                warn!("Client {} timed out, disconnecting", client_id);
                self.send_disconnect(addr, ack).await;
                self.sim.deactivate(client_id);
                self.clients.remove(client_id);
                continue;
            }

            if connected {
                let snapshot = self.sim.snapshot();
                self.send_message(addr, ack, &Message::State { snapshot })
                    .await;
            }
        }
    }

    async fn process_datagram(&mut self, buf: &[u8], from: SocketAddr) {
        let pkt = match Packet::decode(buf) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("Invalid packet format from {}: {}", from, e);
                return;
            }
        };
        if let Err(e) = pkt.validate_format() {
            warn!("Invalid packet format from {}: {}", from, e);
            return;
        }

        if pkt.header.ptype == PacketType::ConnectRequest {
            self.handle_connect_request(&pkt, from).await;
            return;
        }

        // Everything else requires an existing slot for this exact
        // address+port; unknown peers are dropped without reply.
        let Some(client_id) = self.clients.find_by_addr(from) else {
            debug!("Packet from unknown peer {}, ignoring", from);
            return;
        };

        let authed = match self.clients.get(client_id) {
            Some(slot) => authenticate_packet(&pkt, &slot.xor_salts),
            None => return,
        };
        if !authed {
            warn!("Client {} failed authentication", client_id);
            if pkt.header.ptype == PacketType::ConnectChallengeResp {
                let addr = self.slot_addr(client_id);
                let ack = self.slot_ack(client_id);
                if let Some(slot) = self.clients.get_mut(client_id) {
                    slot.last_reject_reason = Some(RejectReason::FailedChallenge);
                }
                if let Some(addr) = addr {
                    self.send_message(
                        addr,
                        ack,
                        &Message::ConnectRejected {
                            reason: RejectReason::FailedChallenge,
                        },
                    )
                    .await;
                }
                self.sim.deactivate(client_id);
                self.clients.remove(client_id);
            }
            return;
        }

        {
            let Some(slot) = self.clients.get_mut(client_id) else {
                return;
            };
            if !slot.accept_packet_id(pkt.header.id) {
                debug!("Not latest packet from client {}, ignoring", client_id);
                return;
            }
            slot.last_packet_at = Some(Instant::now());
        }

        // The challenge response carries its token inline; every other
        // authenticated kind has the 8-byte session token stripped here.
        let payload = if pkt.header.ptype == PacketType::ConnectChallengeResp {
            &pkt.data[..]
        } else {
            &pkt.data[SALT_LEN..]
        };
        let msg = match Message::decode(pkt.header.ptype, payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Malformed {:?} from client {}: {}", pkt.header.ptype, client_id, e);
                return;
            }
        };

        match msg {
            Message::ConnectChallengeResp { .. } => self.accept_client(client_id).await,

            Message::Input { inputs } => {
                if let Some(slot) = self.clients.get_mut(client_id) {
                    for input in inputs {
                        slot.push_input(input);
                    }
                }
            }

            Message::Ping => {
                if let Some(addr) = self.slot_addr(client_id) {
                    let ack = self.slot_ack(client_id);
                    self.send_message(addr, ack, &Message::Ping).await;
                }
            }

            Message::Disconnect => {
                info!("Client {} disconnected", client_id);
                self.sim.deactivate(client_id);
                self.clients.remove(client_id);
            }

            Message::ChatMessage { text } => self.sim.on_chat_message(client_id, &text),
            Message::Settings { data } => self.sim.on_settings(client_id, &data),

            other => {
                warn!(
                    "Unexpected {:?} from client {}, ignoring",
                    other.packet_type(),
                    client_id
                );
            }
        }
    }

    async fn handle_connect_request(&mut self, pkt: &Packet, from: SocketAddr) {
        // Length gate comes first: a short request allocates nothing.
        if pkt.data.len() != HANDSHAKE_DATA_LEN {
            warn!(
                "Connect request from {} with payload length {} != {}",
                from,
                pkt.data.len(),
                HANDSHAKE_DATA_LEN
            );
            return;
        }

        let (client_salt, name) = match Message::decode(PacketType::ConnectRequest, &pkt.data) {
            Ok(Message::ConnectRequest { client_salt, name }) => (client_salt, name),
            Ok(_) | Err(_) => {
                warn!("Malformed connect request from {}", from);
                return;
            }
        };

        // One slot per address+port. A pending peer retransmitting the
        // same salt gets its challenge again; anything else is ignored.
        if let Some(existing) = self.clients.find_by_addr(from) {
            let retransmission = self
                .clients
                .get(existing)
                .map(|s| {
                    s.state == ConnectionState::SendingConnectionRequest
                        && s.client_salt == client_salt
                })
                .unwrap_or(false);
            if retransmission {
                debug!("Connect request retransmission from {}", from);
                self.send_challenge(existing).await;
            } else {
                debug!("Connect request from already-active peer {}, ignoring", from);
            }
            return;
        }

        match self.clients.allocate(from) {
            Some(client_id) => {
                if let Some(slot) = self.clients.get_mut(client_id) {
                    slot.client_salt = client_salt;
                    slot.server_salt = generate_salt();
                    slot.xor_salts = xor_salts(&slot.client_salt, &slot.server_salt);
                    slot.name = name;
                    slot.last_packet_at = Some(Instant::now());
                }
                info!(
                    "Welcome new client! ({}/{})",
                    self.clients.active_count(),
                    self.clients.capacity()
                );
                self.send_challenge(client_id).await;
            }
            None => {
                info!("Server is full and can't accept new clients.");
                // Throwaway record: the reject is sent straight back to
                // the source address, no slot is ever touched.
                self.send_message(
                    from,
                    pkt.header.id,
                    &Message::ConnectRejected {
                        reason: RejectReason::ServerFull,
                    },
                )
                .await;
            }
        }
    }

    async fn accept_client(&mut self, client_id: usize) {
        let Some(addr) = self.slot_addr(client_id) else {
            return;
        };
        let ack = self.slot_ack(client_id);

        if let Some(slot) = self.clients.get_mut(client_id) {
            slot.state = ConnectionState::Connected;
        }
        self.sim.activate(client_id);
        info!("Accept client: {}", client_id);

        self.send_message(
            addr,
            ack,
            &Message::ConnectAccepted {
                client_id: client_id as u8,
            },
        )
        .await;
        // The fresh peer gets a complete world picture before the next tick.
        self.send_message(addr, ack, &Message::Init).await;
        let snapshot = self.sim.snapshot();
        self.send_message(addr, ack, &Message::State { snapshot }).await;
    }

    async fn send_challenge(&mut self, client_id: usize) {
        let Some(slot) = self.clients.get(client_id) else {
            return;
        };
        let Some(addr) = slot.addr else { return };
        let ack = slot.remote_latest_packet_id.unwrap_or(0);
        let msg = Message::ConnectChallenge {
            client_salt: slot.client_salt,
            server_salt: slot.server_salt,
        };
        self.send_message(addr, ack, &msg).await;
    }

    async fn send_disconnect(&mut self, addr: SocketAddr, ack: u16) {
        // Redundantly sent so the notice survives an unacknowledged
        // transport; every other message relies on the next tick instead.
        match self.build_packet(ack, &Message::Disconnect) {
            Ok(bytes) => {
                for _ in 0..DISCONNECT_REDUNDANCY {
                    if let Err(e) = self.socket.send_to(&bytes, addr).await {
                        error!("Failed to send DISCONNECT to {}: {}", addr, e);
                    }
                }
            }
            Err(e) => error!("Failed to encode DISCONNECT: {}", e),
        }
    }

    async fn send_message(&mut self, to: SocketAddr, ack: u16, msg: &Message) {
        match self.build_packet(ack, msg) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, to).await {
                    error!("Failed to send {:?} to {}: {}", msg.packet_type(), to, e);
                }
            }
            Err(e) => error!("Failed to encode {:?}: {}", msg.packet_type(), e),
        }
    }

    fn build_packet(&mut self, ack: u16, msg: &Message) -> Result<Vec<u8>, PacketError> {
        let header = PacketHeader {
            game_id: GAME_ID,
            id: self.node.next_packet_id(),
            ack,
            frame_no: self.frame_no,
            ptype: msg.packet_type(),
        };
        let payload = msg.encode_payload(None)?;
        Packet::new(header, payload).encode()
    }

    fn slot_addr(&self, client_id: usize) -> Option<SocketAddr> {
        self.clients.get(client_id).and_then(|s| s.addr)
    }

    fn slot_ack(&self, client_id: usize) -> u16 {
        self.clients
            .get(client_id)
            .and_then(|s| s.remote_latest_packet_id)
            .unwrap_or(0)
    }
}

/// Per-type salt check over the leading payload bytes. The connect request
/// is handled on its own path; by the time this runs the slot's token is
/// authoritative for every remaining kind.
fn authenticate_packet(pkt: &Packet, xor_salts: &shared::Salt) -> bool {
    match pkt.header.ptype {
        PacketType::ConnectChallengeResp => {
            pkt.data.len() == HANDSHAKE_DATA_LEN && pkt.data[..SALT_LEN] == xor_salts[..]
        }
        _ => pkt.data.len() >= SALT_LEN && pkt.data[..SALT_LEN] == xor_salts[..],
    }
}
