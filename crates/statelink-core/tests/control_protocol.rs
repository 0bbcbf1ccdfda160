//! Control channel scenarios over a real loopback socket.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use statelink_core::{
    Command, ControlClient, ControlConfig, ControlServer, Core, CoreConfig, FixedDetector,
    MockHost, MockLocator, OffsetTable, OffsetTableId, Request, Response,
};
use statelink_core::control::HEADER_LEN;

const BASE: u32 = 0x0040_0000;

struct Harness {
    core: Arc<Core>,
    server: ControlServer,
    host: MockHost,
}

impl Harness {
    fn start() -> Self {
        Self::with_control(ControlConfig {
            port: 0,
            max_workers: 2,
            read_timeout_ms: 50,
            idle_timeout_ms: 30_000,
        })
    }

    fn with_control(control: ControlConfig) -> Self {
        let host = MockHost::simulated(BASE, &OffsetTable::default()).unwrap();
        let config = CoreConfig::builder()
            .local_player_id(1)
            .control(control.clone())
            .build();
        let core = Arc::new(
            Core::new(
                config,
                Box::new(MockLocator::new(host.clone())),
                Box::new(FixedDetector(OffsetTableId::Retail10)),
            )
            .unwrap(),
        );
        let server = ControlServer::start(Arc::clone(&core), &control).unwrap();
        Self { core, server, host }
    }

    fn client(&self) -> ControlClient {
        ControlClient::connect(self.server.local_addr()).unwrap()
    }
}

fn player_count(client: &mut ControlClient) -> u64 {
    client.status().unwrap()["player_count"].as_u64().unwrap()
}

#[test]
fn create_player_increments_count() {
    let harness = Harness::start();
    let mut client = harness.client();
    assert!(client.init().unwrap().is_success());
    assert_eq!(player_count(&mut client), 0);

    let response = client.create_player(7, [10.0, 20.0, 30.0]).unwrap();
    assert!(response.is_success());
    assert_eq!(response.command, Command::CreatePlayer as u32);
    let address = response.payload_u32().unwrap();
    assert_ne!(address, 0);
    assert_eq!(harness.host.peek_f32(address + 0x14 + 4), 20.0);

    assert_eq!(player_count(&mut client), 1);
}

#[test]
fn duplicate_create_fails_and_keeps_count() {
    let harness = Harness::start();
    let mut client = harness.client();
    client.init().unwrap();

    let first = client.create_player(7, [10.0, 20.0, 30.0]).unwrap();
    assert!(first.is_success());
    let second = client.create_player(7, [1.0, 1.0, 1.0]).unwrap();
    assert!(!second.is_success());
    assert!(second.text().contains("already exists"));

    assert_eq!(player_count(&mut client), 1);
    // First slot untouched
    let address = first.payload_u32().unwrap();
    assert_eq!(harness.host.peek_f32(address + 0x14), 10.0);
}

#[test]
fn zero_size_read_is_rejected() {
    let harness = Harness::start();
    let mut client = harness.client();
    client.init().unwrap();

    let response = client.read_memory(0, 0).unwrap();
    assert!(!response.is_success());
    assert!(response.payload.is_empty());
}

#[test]
fn removing_unknown_player_is_a_no_op() {
    let harness = Harness::start();
    let mut client = harness.client();
    client.init().unwrap();
    client.create_player(7, [0.0; 3]).unwrap();

    let response = client.remove_player(999).unwrap();
    assert!(response.is_success());
    assert!(response.payload.is_empty());
    assert_eq!(player_count(&mut client), 1);
}

#[test]
fn truncated_request_keeps_connection_open() {
    let harness = Harness::start();
    let mut client = harness.client();
    client.init().unwrap();

    let mut truncated = (Command::CreatePlayer as u32).to_le_bytes().to_vec();
    truncated.extend_from_slice(&7u32.to_le_bytes());
    truncated.extend_from_slice(&[0, 0]);
    assert_eq!(truncated.len(), 10);

    let response = client.send_raw(&truncated).unwrap();
    assert!(!response.is_success());
    assert_eq!(response.command, Command::CreatePlayer as u32);
    assert!(response.payload.is_empty());

    // Same connection still serves requests
    assert_eq!(player_count(&mut client), 0);
    assert!(client.create_player(7, [0.0; 3]).unwrap().is_success());
}

#[test]
fn memory_round_trip_over_the_wire() {
    let harness = Harness::start();
    let mut client = harness.client();
    client.init().unwrap();

    assert!(
        client
            .write_memory(BASE + 0x200, &[0xDE, 0xAD, 0xBE, 0xEF])
            .unwrap()
            .is_success()
    );
    let read = client.read_memory(BASE + 0x200, 4).unwrap();
    assert!(read.is_success());
    assert_eq!(read.payload, vec![0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn unknown_command_answers_failure() {
    let harness = Harness::start();
    let mut client = harness.client();
    let response = client.send_raw(&77u32.to_le_bytes()).unwrap();
    assert_eq!(response.command, 77);
    assert!(!response.is_success());
    assert_eq!(response.text(), "Unknown command");
}

#[test]
fn shutdown_replies_then_signals() {
    let mut harness = Harness::start();
    let mut client = harness.client();
    let signal = harness.core.shutdown_signal();
    assert!(!signal.is_shutdown());

    assert!(client.shutdown().unwrap().is_success());
    assert!(signal.wait(Duration::from_secs(2)));

    harness.server.stop();
}

#[test]
fn several_clients_are_served() {
    let harness = Harness::start();
    let mut a = harness.client();
    let mut b = harness.client();
    a.init().unwrap();
    assert!(a.create_player(1, [0.0; 3]).unwrap().is_success());
    assert!(b.create_player(2, [0.0; 3]).unwrap().is_success());
    assert_eq!(player_count(&mut a), 2);
}

fn single_worker(idle_timeout_ms: u64) -> Harness {
    Harness::with_control(ControlConfig {
        port: 0,
        max_workers: 1,
        read_timeout_ms: 50,
        idle_timeout_ms,
    })
}

#[test]
fn idle_client_does_not_block_others() {
    let harness = single_worker(30_000);
    let mut idle = harness.client();
    assert!(idle.init().unwrap().is_success());

    // The only worker is holding the idle connection when this one arrives
    thread::sleep(Duration::from_millis(100));
    let mut active = harness.client();
    let started = Instant::now();
    assert_eq!(player_count(&mut active), 0);
    assert!(active.create_player(3, [0.0; 3]).unwrap().is_success());
    assert!(started.elapsed() < Duration::from_secs(2));

    // The idle client is still served afterwards
    assert_eq!(player_count(&mut idle), 1);
}

#[test]
fn idle_connection_is_closed() {
    let harness = single_worker(150);
    let mut stream = TcpStream::connect(harness.server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();

    let mut buf = [0u8; 1];
    let started = Instant::now();
    let closed = match stream.read(&mut buf) {
        Ok(n) => n == 0,
        Err(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
    };
    assert!(closed);
    assert!(started.elapsed() < Duration::from_secs(2));

    // Freed worker takes new connections
    assert_eq!(player_count(&mut harness.client()), 0);
}

#[test]
fn request_split_across_writes_is_reassembled() {
    let harness = Harness::start();
    harness.client().init().unwrap();

    let bytes = Request::CreatePlayer {
        player_id: 9,
        position: [1.0, 2.0, 3.0],
    }
    .encode();
    let mut stream = TcpStream::connect(harness.server.local_addr()).unwrap();
    stream.set_nodelay(true).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    stream.write_all(&bytes[..6]).unwrap();
    thread::sleep(Duration::from_millis(15));
    stream.write_all(&bytes[6..]).unwrap();

    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).unwrap();
    let (command, status, len) = Response::decode_header(&header).unwrap();
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    let response = Response {
        command,
        status,
        payload,
    };
    assert!(response.is_success(), "{}", response.text());
    assert_eq!(response.command, Command::CreatePlayer as u32);
    assert_eq!(player_count(&mut harness.client()), 1);
}
