//! Integration tests for the UDP transport.
//!
//! These drive a real server and real clients over loopback sockets by
//! pumping the session loops deterministically instead of running them.

use client::network::Client;
use server::game::ArenaWorld;
use server::network::{Server, ServerConfig};
use shared::{
    ConnectionState, Message, NetPlayerInput, Packet, PacketHeader, PacketType, RejectReason,
    Salt, GAME_ID, SALT_LEN,
};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_test::assert_ok;
use tokio::time::{sleep, timeout};

async fn spawn_server(max_clients: usize) -> Server<ArenaWorld> {
    let config = ServerConfig {
        max_clients,
        ..ServerConfig::default()
    };
    Server::bind("127.0.0.1:0", config, ArenaWorld::new(max_clients))
        .await
        .expect("bind server")
}

async fn connect_client(server: &Server<ArenaWorld>, name: &str) -> Client {
    let addr = server.local_addr().unwrap();
    let mut client = Client::new(&addr.to_string(), name).await.unwrap();
    tokio_test::assert_ok!(client.connect().await);
    client
}

/// One cooperative pass per endpoint until `cond` holds or patience runs
/// out. Returns whether the condition was reached.
async fn pump_until<F>(server: &mut Server<ArenaWorld>, client: &mut Client, cond: F) -> bool
where
    F: Fn(&Server<ArenaWorld>, &Client) -> bool,
{
    for _ in 0..100 {
        server.drain_socket().await;
        client.drain_socket().await;
        client.tick().await;
        if cond(server, client) {
            return true;
        }
        sleep(Duration::from_millis(2)).await;
    }
    false
}

fn raw_packet(id: u16, msg: &Message, token: Option<&Salt>) -> Vec<u8> {
    let header = PacketHeader {
        game_id: GAME_ID,
        id,
        ack: 0,
        frame_no: 0,
        ptype: msg.packet_type(),
    };
    Packet::new(header, msg.encode_payload(token).unwrap())
        .encode()
        .unwrap()
}

async fn recv_packet(socket: &UdpSocket) -> Option<Packet> {
    let mut buf = [0u8; 2048];
    match timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(Packet::decode(&buf[..len]).unwrap()),
        _ => None,
    }
}

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    /// Full three-step handshake over real sockets.
    #[tokio::test]
    async fn client_connects_and_learns_its_slot() {
        let mut server = spawn_server(4).await;
        let mut client = connect_client(&server, "alice").await;

        assert!(pump_until(&mut server, &mut client, |_, c| c.is_connected()).await);
        assert_eq!(client.client_id(), Some(0));
        assert!(client.received_init());
        assert!(client.latest_snapshot().is_some());

        let slot = server.clients().get(0).unwrap();
        assert_eq!(slot.state, ConnectionState::Connected);
        assert_eq!(slot.name, "alice");
        assert_eq!(server.simulation().active_count(), 1);
    }

    #[tokio::test]
    async fn two_clients_get_distinct_slots() {
        let mut server = spawn_server(4).await;
        let mut first = connect_client(&server, "alice").await;
        assert!(pump_until(&mut server, &mut first, |_, c| c.is_connected()).await);

        let mut second = connect_client(&server, "bob").await;
        assert!(pump_until(&mut server, &mut second, |_, c| c.is_connected()).await);

        assert_eq!(first.client_id(), Some(0));
        assert_eq!(second.client_id(), Some(1));
        assert_eq!(server.clients().connected_count(), 2);
    }

    /// A bogus challenge response gets exactly one reject and frees the
    /// slot for the next peer.
    #[tokio::test]
    async fn failed_challenge_rejects_and_frees_the_slot() {
        let mut server = spawn_server(4).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let request = Message::ConnectRequest {
            client_salt: [7; SALT_LEN],
            name: "mallory".into(),
        };
        socket
            .send_to(&raw_packet(0, &request, None), server_addr)
            .await
            .unwrap();
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;
        assert_eq!(server.clients().active_count(), 1);

        let challenge = recv_packet(&socket).await.expect("challenge");
        assert_eq!(challenge.header.ptype, PacketType::ConnectChallenge);

        // Answer with a token that cannot derive from the exchanged salts.
        let response = Message::ConnectChallengeResp {
            xor_salts: [0xEE; SALT_LEN],
        };
        socket
            .send_to(&raw_packet(1, &response, None), server_addr)
            .await
            .unwrap();
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;

        let reject = recv_packet(&socket).await.expect("reject");
        assert_eq!(reject.header.ptype, PacketType::ConnectRejected);
        let msg = Message::decode(PacketType::ConnectRejected, &reject.data).unwrap();
        assert_eq!(
            msg,
            Message::ConnectRejected {
                reason: RejectReason::FailedChallenge
            }
        );
        assert_eq!(server.clients().active_count(), 0);
    }

    #[tokio::test]
    async fn full_server_turns_down_the_extra_peer() {
        let mut server = spawn_server(1).await;
        let mut first = connect_client(&server, "alice").await;
        assert!(pump_until(&mut server, &mut first, |_, c| c.is_connected()).await);

        let mut second = connect_client(&server, "bob").await;
        assert!(
            pump_until(&mut server, &mut second, |_, c| {
                c.last_reject() == Some(RejectReason::ServerFull)
            })
            .await
        );
        assert_eq!(second.state(), ConnectionState::Disconnected);

        // The occupant is untouched.
        assert_eq!(server.clients().connected_count(), 1);
        assert!(first.is_connected());
    }
}

/// SESSION TESTS
mod session_tests {
    use super::*;

    /// Inputs flow from the client queue through the simulation and come
    /// back as a changed snapshot.
    #[tokio::test]
    async fn inputs_move_the_world_and_return_in_state() {
        let mut server = spawn_server(2).await;
        let mut client = connect_client(&server, "alice").await;
        assert!(pump_until(&mut server, &mut client, |_, c| c.is_connected()).await);

        client.queue_input(NetPlayerInput::new(shared::input::KEY_RIGHT, 0.5));
        client.flush_inputs().await;
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;
        assert_eq!(server.clients().get(0).unwrap().pending_inputs.len(), 1);

        server.simulate(1.0 / 60.0);
        let (x, _) = server.simulation().position(0).unwrap();
        assert!(x > 0.0);

        server.network_tick().await;
        assert!(
            pump_until(&mut server, &mut client, |_, c| {
                // Snapshot layout: count, actor id, then x as f32 bits.
                // The actor is off the origin once the input is folded in.
                c.latest_snapshot()
                    .map_or(false, |s| s.len() == 10 && s[2..6] != [0, 0, 0, 0])
            })
            .await
        );
    }

    /// A replayed INPUT datagram must not double-apply.
    #[tokio::test]
    async fn replayed_input_datagram_is_discarded() {
        let mut server = spawn_server(2).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        // Manual handshake so the raw socket controls sequence ids.
        let client_salt = [0x11; SALT_LEN];
        let request = Message::ConnectRequest {
            client_salt,
            name: "raw".into(),
        };
        socket
            .send_to(&raw_packet(0, &request, None), server_addr)
            .await
            .unwrap();
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;

        let challenge = recv_packet(&socket).await.expect("challenge");
        let token = match Message::decode(PacketType::ConnectChallenge, &challenge.data).unwrap() {
            Message::ConnectChallenge {
                client_salt: echo,
                server_salt,
            } => {
                assert_eq!(echo, client_salt);
                shared::xor_salts(&echo, &server_salt)
            }
            other => panic!("expected challenge, got {:?}", other),
        };

        let response = Message::ConnectChallengeResp { xor_salts: token };
        socket
            .send_to(&raw_packet(1, &response, None), server_addr)
            .await
            .unwrap();
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;
        assert_eq!(server.clients().connected_count(), 1);

        let input = Message::Input {
            inputs: vec![NetPlayerInput::new(1, 0.016)],
        };
        let wire = raw_packet(2, &input, Some(&token));
        socket.send_to(&wire, server_addr).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;
        assert_eq!(server.clients().get(0).unwrap().pending_inputs.len(), 1);

        // Byte-identical replay: same sequence id, silently dropped.
        socket.send_to(&wire, server_addr).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;
        assert_eq!(server.clients().get(0).unwrap().pending_inputs.len(), 1);
    }

    /// An idle peer is swept on the send tick and its slot becomes
    /// reusable; the peer learns about it from the DISCONNECT notice.
    #[tokio::test]
    async fn idle_peer_is_timed_out_and_slot_reused() {
        // Shrink the silence window so the test does not wait seconds.
        let config_timeout = Duration::from_millis(50);
        let config = ServerConfig {
            max_clients: 1,
            timeout: config_timeout,
            ..ServerConfig::default()
        };
        let mut server = Server::bind("127.0.0.1:0", config, ArenaWorld::new(1))
            .await
            .unwrap();

        let mut client = connect_client(&server, "alice").await;
        assert!(pump_until(&mut server, &mut client, |_, c| c.is_connected()).await);

        // Client goes silent past the window.
        sleep(config_timeout + Duration::from_millis(20)).await;
        server.network_tick().await;
        assert_eq!(server.clients().active_count(), 0);
        assert_eq!(server.simulation().active_count(), 0);

        sleep(Duration::from_millis(10)).await;
        client.drain_socket().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // Freed slot admits the next peer.
        let mut next = connect_client(&server, "bob").await;
        assert!(pump_until(&mut server, &mut next, |_, c| c.is_connected()).await);
        assert_eq!(next.client_id(), Some(0));
    }

    #[tokio::test]
    async fn client_disconnect_frees_the_server_slot() {
        let mut server = spawn_server(2).await;
        let mut client = connect_client(&server, "alice").await;
        assert!(pump_until(&mut server, &mut client, |_, c| c.is_connected()).await);

        client.disconnect().await;
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;

        assert_eq!(server.clients().active_count(), 0);
        assert_eq!(server.simulation().active_count(), 0);
    }
}

/// PROTOCOL ROBUSTNESS TESTS
mod robustness_tests {
    use super::*;

    /// Noise aimed at the server port must neither allocate state nor
    /// crash the loop.
    #[tokio::test]
    async fn garbage_datagrams_are_inert() {
        let mut server = spawn_server(2).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let noise: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x42],
            (0..64).map(|i| (i * 37) as u8).collect(),
            vec![0xFF; 1500],
        ];
        for datagram in &noise {
            let _ = socket.send_to(datagram, server_addr).await;
        }
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;
        assert_eq!(server.clients().active_count(), 0);

        // A well-formed request still goes through afterwards.
        let request = Message::ConnectRequest {
            client_salt: [1; SALT_LEN],
            name: "alice".into(),
        };
        socket
            .send_to(&raw_packet(0, &request, None), server_addr)
            .await
            .unwrap();
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;
        assert_eq!(server.clients().active_count(), 1);
    }

    /// A short (unpadded) connect request allocates nothing.
    #[tokio::test]
    async fn short_connect_request_is_refused() {
        let mut server = spawn_server(2).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut salt_and_name = vec![0u8; 32];
        salt_and_name[..8].copy_from_slice(&[7; 8]);
        let header = PacketHeader {
            game_id: GAME_ID,
            id: 0,
            ack: 0,
            frame_no: 0,
            ptype: PacketType::ConnectRequest,
        };
        let wire = Packet::new(header, salt_and_name).encode().unwrap();
        socket.send_to(&wire, server_addr).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;
        assert_eq!(server.clients().active_count(), 0);
    }

    /// Packets with a foreign magic constant never reach a peer slot.
    #[tokio::test]
    async fn foreign_magic_is_dropped() {
        let mut server = spawn_server(2).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let msg = Message::ConnectRequest {
            client_salt: [3; SALT_LEN],
            name: "alice".into(),
        };
        let header = PacketHeader {
            game_id: 0xDEAD_0000,
            id: 0,
            ack: 0,
            frame_no: 0,
            ptype: PacketType::ConnectRequest,
        };
        let wire = Packet::new(header, msg.encode_payload(None).unwrap())
            .encode()
            .unwrap();
        socket.send_to(&wire, server_addr).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        server.drain_socket().await;
        assert_eq!(server.clients().active_count(), 0);
    }
}
