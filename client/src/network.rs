//! Client session loop: initiator side of the handshake, input batching,
//! keepalive pings, and snapshot intake.
//!
//! Mirrors the server's single-threaded shape: one socket drained with
//! non-blocking reads, explicit pump methods, no background tasks. The
//! headless binary drives [`Client::run`]; tests drive the pump methods
//! directly.

use log::{debug, error, info, warn};
use shared::{
    generate_salt, xor_salts, ConnectionState, FixedStep, Message, NetPlayerInput, NodeInfo,
    Packet, PacketError, PacketHeader, RejectReason, Salt, DISCONNECTION_TIMEOUT,
    DISCONNECT_REDUNDANCY, GAME_ID, INPUT_QUEUE_MAX, PING_PERIOD, SALT_LEN, TARGET_FPS, TICK_RATE,
};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::sleep;

/// Resend cadence for the pending handshake message.
const HANDSHAKE_RETRY_PERIOD: f64 = 0.5;

/// Connecting endpoint: owns the socket, the handshake state machine, and
/// the outgoing input queue.
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    node: NodeInfo,
    state: ConnectionState,
    client_id: Option<u8>,
    client_salt: Salt,
    server_salt: Salt,
    xor_salts: Salt,
    name: String,
    frame_no: u8,
    received_init: bool,
    latest_snapshot: Option<Vec<u8>>,
    /// Inputs captured since the last network flush, bounded by
    /// [`INPUT_QUEUE_MAX`].
    pending_inputs: Vec<NetPlayerInput>,
    last_packet_at: Option<Instant>,
    last_ping_at: Instant,
    last_handshake_at: Instant,
    last_reject: Option<RejectReason>,
}

impl Client {
    pub async fn new(server_addr: &str, name: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            node: NodeInfo::default(),
            state: ConnectionState::Disconnected,
            client_id: None,
            client_salt: [0; SALT_LEN],
            server_salt: [0; SALT_LEN],
            xor_salts: [0; SALT_LEN],
            name: name.to_string(),
            frame_no: 0,
            received_init: false,
            latest_snapshot: None,
            pending_inputs: Vec::new(),
            last_packet_at: None,
            last_ping_at: Instant::now(),
            last_handshake_at: Instant::now(),
            last_reject: None,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn client_id(&self) -> Option<u8> {
        self.client_id
    }

    pub fn received_init(&self) -> bool {
        self.received_init
    }

    pub fn latest_snapshot(&self) -> Option<&[u8]> {
        self.latest_snapshot.as_deref()
    }

    pub fn last_reject(&self) -> Option<RejectReason> {
        self.last_reject
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Starts the handshake: fresh salt, fresh sequence space, one padded
    /// connect request on the wire.
    pub async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server at {}...", self.server_addr);

        self.node = NodeInfo::default();
        self.client_salt = generate_salt();
        self.server_salt = [0; SALT_LEN];
        self.xor_salts = [0; SALT_LEN];
        self.client_id = None;
        self.received_init = false;
        self.latest_snapshot = None;
        self.last_reject = None;
        self.state = ConnectionState::SendingConnectionRequest;
        self.last_handshake_at = Instant::now();

        self.send_connect_request().await;
        Ok(())
    }

    /// Drains every pending datagram. Packets not from the server address
    /// are dropped without processing.
    pub async fn drain_socket(&mut self) {
        let mut buf = [0u8; 2048];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, from)) => {
                    if from != self.server_addr {
                        debug!("Packet from non-server peer {}, ignoring", from);
                        continue;
                    }
                    let datagram = buf[..len].to_vec();
                    self.process_datagram(&datagram).await;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Error receiving packet: {}", e);
                    break;
                }
            }
        }
    }

    /// Buffers one captured input record for the next network flush.
    /// Overflow drops the newest record.
    pub fn queue_input(&mut self, input: NetPlayerInput) -> bool {
        if self.pending_inputs.len() >= INPUT_QUEUE_MAX {
            debug!("input queue full ({}), dropping newest", INPUT_QUEUE_MAX);
            return false;
        }
        self.pending_inputs.push(input);
        true
    }

    /// Sends every buffered input in one packet and clears the queue.
    /// A no-op unless connected.
    pub async fn flush_inputs(&mut self) {
        if self.state != ConnectionState::Connected || self.pending_inputs.is_empty() {
            return;
        }
        let inputs = std::mem::take(&mut self.pending_inputs);
        let token = self.xor_salts;
        self.send_message(&Message::Input { inputs }, Some(&token))
            .await;
    }

    /// Timer pass: handshake retransmission, keepalive ping, and the
    /// server-silence watchdog.
    pub async fn tick(&mut self) {
        let now = Instant::now();

        match self.state {
            ConnectionState::SendingConnectionRequest => {
                if now.duration_since(self.last_handshake_at).as_secs_f64()
                    >= HANDSHAKE_RETRY_PERIOD
                {
                    self.last_handshake_at = now;
                    self.send_connect_request().await;
                }
            }
            ConnectionState::SendingChallengeResponse => {
                if now.duration_since(self.last_handshake_at).as_secs_f64()
                    >= HANDSHAKE_RETRY_PERIOD
                {
                    self.last_handshake_at = now;
                    self.send_challenge_response().await;
                }
            }
            ConnectionState::Connected => {
                if now.duration_since(self.last_ping_at).as_secs_f64() >= PING_PERIOD {
                    self.last_ping_at = now;
                    let token = self.xor_salts;
                    self.send_message(&Message::Ping, Some(&token)).await;
                }
            }
            ConnectionState::Disconnected => {}
        }

        if self.state != ConnectionState::Disconnected {
            if let Some(at) = self.last_packet_at {
                if now.duration_since(at).as_secs_f64() >= DISCONNECTION_TIMEOUT {
                    warn!("Server silent for {:.1}s, disconnecting", DISCONNECTION_TIMEOUT);
                    self.reset_session();
                }
            }
        }
    }

    /// Graceful teardown: the notice is redundantly sent since nothing
    /// acknowledges it.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        info!("Disconnecting from server");
        let token = self.xor_salts;
        match self.build_packet(&Message::Disconnect, Some(&token)) {
            Ok(bytes) => {
                for _ in 0..DISCONNECT_REDUNDANCY {
                    if let Err(e) = self.socket.send_to(&bytes, self.server_addr).await {
                        error!("Failed to send DISCONNECT: {}", e);
                    }
                }
            }
            Err(e) => error!("Failed to encode DISCONNECT: {}", e),
        }
        self.reset_session();
    }

    /// Main loop for the headless binary: drain, capture an idle input per
    /// simulation step, flush at the network rate, run timers.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut sim_step = FixedStep::new(TARGET_FPS);
        let mut net_step = FixedStep::new(TICK_RATE);
        let sim_dt = sim_step.dt() as f32;
        let mut last = Instant::now();

        loop {
            self.drain_socket().await;

            let now = Instant::now();
            let elapsed = now.duration_since(last).as_secs_f64();
            last = now;

            sim_step.accumulate(elapsed);
            while sim_step.consume() {
                if self.is_connected() {
                    self.queue_input(NetPlayerInput::idle(sim_dt));
                }
                self.frame_no = self.frame_no.wrapping_add(1);
            }

            net_step.accumulate(elapsed);
            if net_step.consume() {
                self.flush_inputs().await;
            }

            self.tick().await;

            sleep(Duration::from_millis(1)).await;
        }
    }

    async fn process_datagram(&mut self, buf: &[u8]) {
        let pkt = match Packet::decode(buf) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!("Invalid packet from server: {}", e);
                return;
            }
        };
        if let Err(e) = pkt.validate_format() {
            warn!("Invalid packet from server: {}", e);
            return;
        }

        if !self.node.accept_remote(pkt.header.id) {
            debug!("Stale packet {} from server, ignoring", pkt.header.id);
            return;
        }
        self.last_packet_at = Some(Instant::now());

        let msg = match Message::decode(pkt.header.ptype, &pkt.data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Malformed {:?} from server: {}", pkt.header.ptype, e);
                return;
            }
        };
        self.handle_message(msg).await;
    }

    async fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::ConnectChallenge {
                client_salt,
                server_salt,
            } => {
                if self.state != ConnectionState::SendingConnectionRequest {
                    return;
                }
                // The echoed salt proves the challenge answers our request.
                if client_salt != self.client_salt {
                    warn!("Challenge echoes a salt we never sent, ignoring");
                    return;
                }
                self.server_salt = server_salt;
                self.xor_salts = xor_salts(&self.client_salt, &self.server_salt);
                self.state = ConnectionState::SendingChallengeResponse;
                self.last_handshake_at = Instant::now();
                self.send_challenge_response().await;
            }

            Message::ConnectAccepted { client_id } => {
                if self.state != ConnectionState::SendingChallengeResponse {
                    return;
                }
                info!("Connected! Client ID: {}", client_id);
                self.client_id = Some(client_id);
                self.state = ConnectionState::Connected;
            }

            Message::ConnectRejected { reason } => {
                warn!("Connection rejected: {}", reason.as_str());
                self.last_reject = Some(reason);
                self.reset_session();
            }

            Message::Init => {
                self.received_init = true;
            }

            Message::State { snapshot } => {
                self.latest_snapshot = Some(snapshot);
            }

            Message::Ping => {} // pong; last_packet_at already refreshed

            Message::Disconnect => {
                info!("Server closed the connection");
                self.reset_session();
            }

            other => {
                warn!("Unexpected {:?} from server, ignoring", other.packet_type());
            }
        }
    }

    async fn send_connect_request(&mut self) {
        let msg = Message::ConnectRequest {
            client_salt: self.client_salt,
            name: self.name.clone(),
        };
        self.send_message(&msg, None).await;
    }

    async fn send_challenge_response(&mut self) {
        let msg = Message::ConnectChallengeResp {
            xor_salts: self.xor_salts,
        };
        self.send_message(&msg, None).await;
    }

    async fn send_message(&mut self, msg: &Message, token: Option<&Salt>) {
        match self.build_packet(msg, token) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, self.server_addr).await {
                    error!("Failed to send {:?}: {}", msg.packet_type(), e);
                }
            }
            Err(e) => error!("Failed to encode {:?}: {}", msg.packet_type(), e),
        }
    }

    fn build_packet(&mut self, msg: &Message, token: Option<&Salt>) -> Result<Vec<u8>, PacketError> {
        let header = PacketHeader {
            game_id: GAME_ID,
            id: self.node.next_packet_id(),
            ack: self.node.remote_latest_packet_id.unwrap_or(0),
            frame_no: self.frame_no,
            ptype: msg.packet_type(),
        };
        let payload = msg.encode_payload(token)?;
        Packet::new(header, payload).encode()
    }

    fn reset_session(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.client_id = None;
        self.client_salt = [0; SALT_LEN];
        self.server_salt = [0; SALT_LEN];
        self.xor_salts = [0; SALT_LEN];
        self.received_init = false;
        self.pending_inputs.clear();
        self.last_packet_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_client() -> Client {
        // Nothing listens on the server address; these tests never await a
        // reply, only observe local state transitions.
        Client::new("127.0.0.1:27999", "tester").await.unwrap()
    }

    #[tokio::test]
    async fn connect_arms_the_handshake() {
        let mut client = test_client().await;
        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::SendingConnectionRequest);
        assert_ne!(client.client_salt, [0; SALT_LEN]);
        assert_eq!(client.client_id(), None);
    }

    #[tokio::test]
    async fn challenge_with_wrong_echo_is_ignored() {
        let mut client = test_client().await;
        client.connect().await.unwrap();
        let mut wrong = client.client_salt;
        wrong[0] ^= 0xFF;
        client
            .handle_message(Message::ConnectChallenge {
                client_salt: wrong,
                server_salt: [9; SALT_LEN],
            })
            .await;
        assert_eq!(client.state(), ConnectionState::SendingConnectionRequest);
        assert_eq!(client.xor_salts, [0; SALT_LEN]);
    }

    #[tokio::test]
    async fn valid_challenge_derives_token_and_advances() {
        let mut client = test_client().await;
        client.connect().await.unwrap();
        let echo = client.client_salt;
        let server_salt = [0x3C; SALT_LEN];
        client
            .handle_message(Message::ConnectChallenge {
                client_salt: echo,
                server_salt,
            })
            .await;
        assert_eq!(client.state(), ConnectionState::SendingChallengeResponse);
        assert_eq!(client.xor_salts, xor_salts(&echo, &server_salt));
    }

    #[tokio::test]
    async fn accepted_out_of_order_is_ignored() {
        let mut client = test_client().await;
        client.connect().await.unwrap();
        // Still waiting for the challenge; an ACCEPTED here is bogus.
        client
            .handle_message(Message::ConnectAccepted { client_id: 3 })
            .await;
        assert_eq!(client.state(), ConnectionState::SendingConnectionRequest);
        assert_eq!(client.client_id(), None);
    }

    #[tokio::test]
    async fn rejection_resets_the_session() {
        let mut client = test_client().await;
        client.connect().await.unwrap();
        client
            .handle_message(Message::ConnectRejected {
                reason: RejectReason::ServerFull,
            })
            .await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.last_reject(), Some(RejectReason::ServerFull));
    }

    #[tokio::test]
    async fn input_queue_is_bounded_drop_newest() {
        let mut client = test_client().await;
        for i in 0..INPUT_QUEUE_MAX {
            assert!(client.queue_input(NetPlayerInput::new(i as u32, 0.016)));
        }
        assert!(!client.queue_input(NetPlayerInput::new(999, 0.016)));
        assert_eq!(client.pending_inputs.len(), INPUT_QUEUE_MAX);
        assert_eq!(client.pending_inputs[0].keys, 0);
    }

    #[tokio::test]
    async fn flush_without_connection_keeps_queue_intact() {
        let mut client = test_client().await;
        client.queue_input(NetPlayerInput::idle(0.016));
        client.flush_inputs().await;
        assert_eq!(client.pending_inputs.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_and_init_are_recorded() {
        let mut client = test_client().await;
        client.handle_message(Message::Init).await;
        assert!(client.received_init());
        client
            .handle_message(Message::State {
                snapshot: vec![1, 2, 3],
            })
            .await;
        assert_eq!(client.latest_snapshot(), Some(&[1u8, 2, 3][..]));
    }

    #[tokio::test]
    async fn server_disconnect_clears_the_session() {
        let mut client = test_client().await;
        client.connect().await.unwrap();
        let echo = client.client_salt;
        client
            .handle_message(Message::ConnectChallenge {
                client_salt: echo,
                server_salt: [1; SALT_LEN],
            })
            .await;
        client
            .handle_message(Message::ConnectAccepted { client_id: 0 })
            .await;
        assert!(client.is_connected());

        client.handle_message(Message::Disconnect).await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.xor_salts, [0; SALT_LEN]);
    }
}
