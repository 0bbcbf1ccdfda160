//! Relay behaviour over loopback UDP.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use statelink_core::{
    Core, CoreConfig, FixedDetector, MockHost, MockLocator, NetworkPacket, OffsetTable,
    OffsetTableId, PacketKind, RelayConfig, RelayRole, SyncRelay,
};

const BASE: u32 = 0x0040_0000;
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn relay_config(role: RelayRole) -> RelayConfig {
    RelayConfig {
        role,
        port: 0,
        bind_address: LOCALHOST,
        tick_interval_ms: 10,
        recv_timeout_ms: 20,
        announce_interval_ms: 0,
        ..RelayConfig::default()
    }
}

fn detached_core(local_id: u32) -> Arc<Core> {
    Arc::new(
        Core::new(
            CoreConfig::builder().local_player_id(local_id).build(),
            Box::new(MockLocator::empty()),
            Box::new(FixedDetector(OffsetTableId::Unknown)),
        )
        .unwrap(),
    )
}

fn attached_core(local_id: u32) -> Arc<Core> {
    let host = MockHost::simulated(BASE, &OffsetTable::default()).unwrap();
    let core = Core::new(
        CoreConfig::builder().local_player_id(local_id).build(),
        Box::new(MockLocator::new(host)),
        Box::new(FixedDetector(OffsetTableId::Retail10)),
    )
    .unwrap();
    core.attach().unwrap();
    Arc::new(core)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn peer_socket() -> UdpSocket {
    let socket = UdpSocket::bind((LOCALHOST, 0)).unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(150)))
        .unwrap();
    socket
}

/// Everything currently queued on `socket`.
fn drain(socket: &UdpSocket) -> Vec<NetworkPacket> {
    let mut buf = [0u8; 128];
    let mut packets = Vec::new();
    while let Ok((len, _)) = socket.recv_from(&mut buf) {
        packets.push(NetworkPacket::decode(&buf[..len]).unwrap());
    }
    packets
}

#[test]
fn hub_relays_to_everyone_but_the_sender() {
    let hub_core = detached_core(1);
    let hub = SyncRelay::start(Arc::clone(&hub_core), relay_config(RelayRole::Hub)).unwrap();
    let hub_addr = SocketAddr::new(LOCALHOST, hub.local_addr().port());

    let peers = [peer_socket(), peer_socket(), peer_socket()];
    for (i, socket) in peers.iter().enumerate() {
        let connect = NetworkPacket::new(PacketKind::Connect, 10 + i as u32);
        socket.send_to(&connect.encode(), hub_addr).unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || hub.peer_count() == 3));
    for socket in &peers {
        drain(socket);
    }

    let mut position = NetworkPacket::new(PacketKind::Position, 10);
    position.position = [1.0, 2.0, 3.0];
    peers[0].send_to(&position.encode(), hub_addr).unwrap();

    for socket in &peers[1..] {
        let received = drain(socket);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], position);
    }
    assert!(drain(&peers[0]).is_empty());
    assert!(hub_core.relay_stats().snapshot().relayed >= 2);
}

#[test]
fn hub_forwards_disconnect_and_forgets_sender() {
    let hub_core = detached_core(1);
    let hub = SyncRelay::start(hub_core, relay_config(RelayRole::Hub)).unwrap();
    let hub_addr = SocketAddr::new(LOCALHOST, hub.local_addr().port());

    let a = peer_socket();
    let b = peer_socket();
    a.send_to(&NetworkPacket::new(PacketKind::Connect, 10).encode(), hub_addr)
        .unwrap();
    b.send_to(&NetworkPacket::new(PacketKind::Connect, 11).encode(), hub_addr)
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || hub.peer_count() == 2));
    drain(&a);
    drain(&b);

    let bye = NetworkPacket::new(PacketKind::Disconnect, 10);
    a.send_to(&bye.encode(), hub_addr).unwrap();
    assert!(wait_until(Duration::from_secs(2), || hub.peer_count() == 1));
    assert_eq!(drain(&b), vec![bye]);
}

#[test]
fn malformed_datagrams_are_dropped() {
    let hub_core = detached_core(1);
    let hub = SyncRelay::start(Arc::clone(&hub_core), relay_config(RelayRole::Hub)).unwrap();
    let hub_addr = SocketAddr::new(LOCALHOST, hub.local_addr().port());

    let socket = peer_socket();
    socket.send_to(&[1, 2, 3], hub_addr).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        hub_core.relay_stats().snapshot().dropped == 1
    }));
    assert_eq!(hub.peer_count(), 0);
}

#[test]
fn truncated_connect_is_dropped() {
    let hub_core = detached_core(1);
    let hub = SyncRelay::start(Arc::clone(&hub_core), relay_config(RelayRole::Hub)).unwrap();
    let hub_addr = SocketAddr::new(LOCALHOST, hub.local_addr().port());

    let socket = peer_socket();
    let connect = NetworkPacket::new(PacketKind::Connect, 10).encode();
    socket.send_to(&connect[..50], hub_addr).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        hub_core.relay_stats().snapshot().dropped == 1
    }));
    assert_eq!(hub.peer_count(), 0);
    assert!(drain(&socket).is_empty());
}

#[test]
fn extreme_values_are_relayed_unchanged() {
    let hub_core = detached_core(1);
    let hub = SyncRelay::start(hub_core, relay_config(RelayRole::Hub)).unwrap();
    let hub_addr = SocketAddr::new(LOCALHOST, hub.local_addr().port());

    let sender = peer_socket();
    let listener = peer_socket();
    sender
        .send_to(&NetworkPacket::new(PacketKind::Connect, u32::MAX).encode(), hub_addr)
        .unwrap();
    listener
        .send_to(&NetworkPacket::new(PacketKind::Connect, 20).encode(), hub_addr)
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || hub.peer_count() == 2));
    drain(&listener);

    let mut position = NetworkPacket::new(PacketKind::Position, u32::MAX);
    position.position = [f32::INFINITY, f32::NEG_INFINITY, f32::from_bits(0x7FC0_0001)];
    position.timestamp = u32::MAX;
    sender.send_to(&position.encode(), hub_addr).unwrap();

    let received = drain(&listener);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].player_id, u32::MAX);
    assert_eq!(received[0].timestamp, u32::MAX);
    assert_eq!(received[0].encode(), position.encode());
}

#[test]
fn hub_and_peer_mirror_each_other() {
    let hub_core = attached_core(1);
    let hub = SyncRelay::start(Arc::clone(&hub_core), relay_config(RelayRole::Hub)).unwrap();

    let peer_core = attached_core(2);
    let mut peer_config = relay_config(RelayRole::Peer);
    peer_config.hub_address = Some(SocketAddr::new(LOCALHOST, hub.local_addr().port()));
    let mut peer = SyncRelay::start(Arc::clone(&peer_core), peer_config).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        hub_core.player_slot(2).is_some() && peer_core.player_slot(1).is_some()
    }));
    assert_eq!(hub.peer_count(), 1);

    // Position ticks keep arriving and are applied as updates
    let applied = hub_core.relay_stats().snapshot().applied;
    assert!(wait_until(Duration::from_secs(2), || {
        hub_core.relay_stats().snapshot().applied > applied
    }));

    peer.stop();
    assert!(wait_until(Duration::from_secs(2), || {
        hub_core.player_slot(2).is_none()
    }));
    assert_eq!(hub.peer_count(), 0);
}

/// Connect packets from `player_id` heard on `socket` until `want` arrive or
/// the timeout passes.
fn connects_from(socket: &UdpSocket, player_id: u32, want: usize, timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 128];
    let mut count = 0;
    while count < want && Instant::now() < deadline {
        if let Ok((len, _)) = socket.recv_from(&mut buf)
            && let Ok(packet) = NetworkPacket::decode(&buf[..len])
            && packet.kind == PacketKind::Connect
            && packet.player_id == player_id
        {
            count += 1;
        }
    }
    count
}

#[test]
fn peer_answers_every_hub_announcement() {
    let peer_core = attached_core(2);
    let mut config = relay_config(RelayRole::Peer);
    config.discovery_port = 0;
    let peer = SyncRelay::start(Arc::clone(&peer_core), config).unwrap();
    let listener = peer.discovery_addr().unwrap();

    let hub = peer_socket();
    let mut announcement = NetworkPacket::new(PacketKind::Connect, 50);
    announcement.position = [5.0, 6.0, 7.0];
    for _ in 0..3 {
        hub.send_to(&announcement.encode(), listener).unwrap();
        thread::sleep(Duration::from_millis(50));
    }

    assert_eq!(connects_from(&hub, 2, 3, Duration::from_secs(2)), 3);
    assert_eq!(peer.hub_address(), Some(hub.local_addr().unwrap()));
    assert!(peer_core.player_slot(50).is_some());
}

#[test]
fn hub_announces_on_the_discovery_port() {
    let listener = peer_socket();
    let mut config = relay_config(RelayRole::Hub);
    config.announce_interval_ms = 20;
    config.broadcast_address = Ipv4Addr::LOCALHOST;
    config.discovery_port = listener.local_addr().unwrap().port();
    let _hub = SyncRelay::start(detached_core(1), config).unwrap();

    assert_eq!(connects_from(&listener, 1, 3, Duration::from_secs(2)), 3);
}

#[test]
fn hub_and_discovering_peer_share_a_host() {
    let peer_core = attached_core(2);
    let mut peer_config = relay_config(RelayRole::Peer);
    peer_config.discovery_port = 0;
    let peer = SyncRelay::start(Arc::clone(&peer_core), peer_config).unwrap();

    let hub_core = attached_core(1);
    let mut hub_config = relay_config(RelayRole::Hub);
    hub_config.announce_interval_ms = 20;
    hub_config.broadcast_address = Ipv4Addr::LOCALHOST;
    hub_config.discovery_port = peer.discovery_addr().unwrap().port();
    let hub = SyncRelay::start(Arc::clone(&hub_core), hub_config).unwrap();
    let hub_addr = SocketAddr::new(LOCALHOST, hub.local_addr().port());

    assert!(wait_until(Duration::from_secs(2), || {
        peer.hub_address() == Some(hub_addr)
            && hub_core.player_slot(2).is_some()
            && peer_core.player_slot(1).is_some()
    }));
    assert_eq!(hub.peer_count(), 1);
}

#[test]
fn configured_peer_repeats_its_connect() {
    let hub = peer_socket();
    let mut config = relay_config(RelayRole::Peer);
    config.hub_address = Some(hub.local_addr().unwrap());
    config.announce_interval_ms = 30;
    let _peer = SyncRelay::start(detached_core(2), config).unwrap();

    // The first Connect comes from start, the rest from the tick loop
    assert_eq!(connects_from(&hub, 2, 3, Duration::from_secs(2)), 3);
}
