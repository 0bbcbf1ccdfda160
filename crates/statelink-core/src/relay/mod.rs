//! Best-effort peer relay over UDP.
//!
//! A hub binds the relay port, keeps an address book of connected peers and
//! forwards every datagram to everyone but its sender. A peer talks to one hub,
//! found either from configuration or from the hub's periodic Connect
//! broadcast on the discovery port. Both roles tick local host state out at a
//! fixed rate and apply inbound state to mirrored slots.

mod packet;
mod peers;
mod stats;

pub use packet::{NetworkPacket, PacketKind, WIRE_SIZE};
pub use stats::{RelayStats, RelayStatsSnapshot};

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{RelayConfig, RelayRole};
use crate::context::Core;
use crate::entity::EntityRecord;
use crate::error::{Error, Result};
use crate::shutdown::ShutdownSignal;

use peers::PeerBook;

// Large enough to see oversized datagrams so they can be rejected by length.
const RECV_BUFFER: usize = 512;

struct RelayShared {
    core: Arc<Core>,
    config: RelayConfig,
    local_id: u32,
    socket: UdpSocket,
    peers: Mutex<PeerBook>,
    hub: Mutex<Option<SocketAddr>>,
    last_timestamp: Mutex<HashMap<u32, u32>>,
    stop: ShutdownSignal,
    started: Instant,
}

/// Handle to a running relay. Stopping joins every relay thread.
pub struct SyncRelay {
    shared: Arc<RelayShared>,
    threads: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
    discovery_addr: Option<SocketAddr>,
}

impl SyncRelay {
    /// Bind sockets for the configured role and start the relay threads.
    pub fn start(core: Arc<Core>, config: RelayConfig) -> Result<Self> {
        let recv_timeout = Duration::from_millis(config.recv_timeout_ms.max(1));
        let local_id = core.local_player_id();

        if config.role == RelayRole::Hub
            && config.announce_interval_ms > 0
            && config.discovery_port == config.port
        {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "discovery port {} must differ from the relay port",
                    config.discovery_port
                ),
            )));
        }

        let (socket, discovery) = match config.role {
            RelayRole::Hub => {
                let socket = UdpSocket::bind((config.bind_address, config.port))?;
                socket.set_broadcast(true)?;
                (socket, None)
            }
            RelayRole::Peer => {
                let socket = UdpSocket::bind((config.bind_address, 0))?;
                let discovery = match config.hub_address {
                    Some(_) => None,
                    None => {
                        let listener =
                            UdpSocket::bind((config.bind_address, config.discovery_port))?;
                        listener.set_read_timeout(Some(recv_timeout))?;
                        Some(listener)
                    }
                };
                (socket, discovery)
            }
        };
        socket.set_read_timeout(Some(recv_timeout))?;
        let local_addr = socket.local_addr()?;
        let discovery_addr = discovery.as_ref().map(UdpSocket::local_addr).transpose()?;

        let shared = Arc::new(RelayShared {
            core,
            hub: Mutex::new(None),
            config,
            local_id,
            socket,
            peers: Mutex::new(PeerBook::new()),
            last_timestamp: Mutex::new(HashMap::new()),
            stop: ShutdownSignal::new(),
            started: Instant::now(),
        });

        info!(
            "Relay started as {} on {} (player id {})",
            shared.config.role, local_addr, local_id
        );

        if let Some(hub) = shared.config.hub_address {
            shared.join_hub(hub);
        }

        let mut threads = Vec::new();
        let recv = Arc::clone(&shared);
        threads.push(spawn("relay-recv", move || {
            recv.recv_loop(&recv.socket, Inbound::Direct)
        })?);
        let tick = Arc::clone(&shared);
        threads.push(spawn("relay-tick", move || tick.tick_loop())?);
        if let Some(listener) = discovery {
            info!("Listening for hub announcements on {}", listener.local_addr()?);
            let disc = Arc::clone(&shared);
            threads.push(spawn("relay-discovery", move || {
                disc.recv_loop(&listener, Inbound::Discovery)
            })?);
        }

        Ok(Self {
            shared,
            threads,
            local_addr,
            discovery_addr,
        })
    }

    pub fn role(&self) -> RelayRole {
        self.shared.config.role
    }

    /// Address of the socket that carries relay traffic.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Listener for hub announcements, on a peer without a configured hub.
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.discovery_addr
    }

    /// Hub this peer is talking to, if one is known.
    pub fn hub_address(&self) -> Option<SocketAddr> {
        *self.shared.hub.lock()
    }

    /// Number of peers registered with this hub.
    pub fn peer_count(&self) -> usize {
        self.shared.peers.lock().len()
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    /// Say goodbye, stop the loops and join their threads.
    pub fn stop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.farewell();
        self.shared.stop.trigger();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("Relay thread panicked");
            }
        }
        info!("Relay stopped");
    }
}

impl Drop for SyncRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    Ok(thread::Builder::new().name(name.to_string()).spawn(f)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound {
    /// The relay socket: peer traffic on a hub, hub traffic on a peer
    Direct,
    /// The peer's listener for hub announcements
    Discovery,
}

impl RelayShared {
    fn recv_loop(&self, socket: &UdpSocket, inbound: Inbound) {
        let mut buf = [0u8; RECV_BUFFER];
        while !self.stop.is_shutdown() {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => self.on_datagram(&buf[..len], from, inbound),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) => {
                    // Includes ICMP-driven resets on Windows; the socket stays usable.
                    self.core.relay_stats().record_recv_error();
                    debug!("Relay receive error: {}", e);
                }
            }
        }
        debug!("Relay receive loop ({:?}) exiting", inbound);
    }

    fn on_datagram(&self, bytes: &[u8], from: SocketAddr, inbound: Inbound) {
        let stats = self.core.relay_stats();
        stats.record_received();

        let packet = match NetworkPacket::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                stats.record_dropped();
                debug!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };

        // Routing keys on addresses only; our own id is filtered in `apply`.
        match (self.config.role, inbound) {
            (RelayRole::Hub, _) => self.route(&packet, from),
            (RelayRole::Peer, Inbound::Discovery) => self.discover(&packet, from),
            (RelayRole::Peer, Inbound::Direct) => {}
        }
        self.apply(&packet);
    }

    /// Hub routing: maintain the address book, then forward to everyone else.
    fn route(&self, packet: &NetworkPacket, from: SocketAddr) {
        let (targets, newcomer) = {
            let mut peers = self.peers.lock();
            let mut newcomer = false;
            match packet.kind {
                PacketKind::Connect => {
                    newcomer = peers.register(packet.player_id, from);
                    if newcomer {
                        info!("Player {} connected from {}", packet.player_id, from);
                    }
                }
                PacketKind::Disconnect => {
                    for id in peers.deregister(from) {
                        info!("Player {} disconnected ({})", id, from);
                    }
                }
                _ => {}
            }
            (peers.targets(Some(from)), newcomer)
        };

        // Introduce ourselves so the newcomer mirrors the hub's player
        if newcomer {
            self.send(&self.hello(PacketKind::Connect), from);
        }

        let bytes = packet.encode();
        let mut relayed = 0;
        for target in targets {
            match self.socket.send_to(&bytes, target) {
                Ok(_) => relayed += 1,
                Err(e) => debug!("Relay to {} failed: {}", target, e),
            }
        }
        self.core.relay_stats().record_relayed(relayed);
    }

    /// Peer discovery: any Connect heard on the listener names the hub, and
    /// every announcement is answered so a restarted hub learns us again.
    fn discover(&self, packet: &NetworkPacket, from: SocketAddr) {
        if packet.kind != PacketKind::Connect {
            return;
        }
        let previous = self.hub.lock().replace(from);
        if previous != Some(from) {
            info!("Discovered hub at {}", from);
        }
        self.send(&self.hello(PacketKind::Connect), from);
    }

    fn join_hub(&self, hub: SocketAddr) {
        *self.hub.lock() = Some(hub);
        info!("Connecting to hub at {}", hub);
        self.send(&self.hello(PacketKind::Connect), hub);
    }

    /// Dispatch inbound state to the allocator. Our own id is never applied.
    fn apply(&self, packet: &NetworkPacket) {
        let stats = self.core.relay_stats();
        if packet.player_id == self.local_id {
            stats.record_dropped();
            return;
        }
        if self.config.drop_stale && packet.kind.is_state() && self.is_stale(packet) {
            stats.record_dropped();
            debug!(
                "Stale {} from player {} dropped (ts {})",
                packet.kind, packet.player_id, packet.timestamp
            );
            return;
        }

        let allocator = self.core.allocator();
        let result = match packet.kind {
            PacketKind::Connect => allocator
                .create_player(packet.player_id, packet.position)
                .map(|_| true),
            PacketKind::Disconnect => {
                self.last_timestamp.lock().remove(&packet.player_id);
                allocator.remove_player(packet.player_id)
            }
            _ => allocator.update_player(packet.player_id, &packet.to_update()),
        };

        match result {
            Ok(true) => stats.record_applied(),
            Ok(false) => {}
            Err(Error::AlreadyExists(id)) => debug!("Player {} already mirrored", id),
            Err(Error::NotAttached) => {
                debug!("Not attached; {} from {} ignored", packet.kind, packet.player_id)
            }
            Err(e) if e.is_partial() => debug!(
                "Partial transfer applying {} from player {}: {}",
                packet.kind, packet.player_id, e
            ),
            Err(e) => warn!(
                "Failed to apply {} from player {}: {}",
                packet.kind, packet.player_id, e
            ),
        }
    }

    fn is_stale(&self, packet: &NetworkPacket) -> bool {
        let mut last = self.last_timestamp.lock();
        match last.get(&packet.player_id) {
            Some(&prev) if packet.timestamp < prev => true,
            _ => {
                last.insert(packet.player_id, packet.timestamp);
                false
            }
        }
    }

    fn tick_loop(&self) {
        let interval = Duration::from_millis(self.config.tick_interval_ms.max(1));
        let hello_every = Duration::from_millis(self.config.announce_interval_ms);
        let periodic = self.config.announce_interval_ms > 0
            && (self.config.role == RelayRole::Hub || self.config.hub_address.is_some());
        // A configured peer has just sent its first Connect from `start`.
        let mut last_hello = match self.config.role {
            RelayRole::Hub => None,
            RelayRole::Peer => Some(Instant::now()),
        };

        loop {
            if periodic && last_hello.is_none_or(|t| t.elapsed() >= hello_every) {
                match self.config.role {
                    RelayRole::Hub => self.announce(),
                    RelayRole::Peer => self.rejoin(),
                }
                last_hello = Some(Instant::now());
            }
            self.tick();
            if self.stop.wait(interval) {
                break;
            }
        }
        debug!("Relay tick loop exiting");
    }

    /// Read the local player once and send it as a Position packet.
    fn tick(&self) {
        let record = match self.core.allocator().local_player() {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                debug!("Tick skipped: {}", e);
                return;
            }
        };
        let packet = self.position_packet(&record);
        for target in self.outbound_targets() {
            self.send(&packet, target);
        }
    }

    fn position_packet(&self, record: &EntityRecord) -> NetworkPacket {
        NetworkPacket {
            position: record.position,
            rotation: record.rotation,
            velocity: record.velocity,
            animation: record.animation as u16,
            health: record.health.min(u8::MAX as u32) as u8,
            armor: record.armor.min(u8::MAX as u32) as u8,
            ..self.hello(PacketKind::Position)
        }
    }

    fn hello(&self, kind: PacketKind) -> NetworkPacket {
        let mut packet = NetworkPacket::new(kind, self.local_id);
        packet.timestamp = self.timestamp();
        packet
    }

    fn timestamp(&self) -> u32 {
        // Wraps after ~49 days; only compared per sender.
        self.started.elapsed().as_millis() as u32
    }

    fn outbound_targets(&self) -> Vec<SocketAddr> {
        match self.config.role {
            RelayRole::Hub => self.peers.lock().targets(None),
            RelayRole::Peer => self.hub.lock().iter().copied().collect(),
        }
    }

    fn announce(&self) {
        let target = SocketAddr::from((self.config.broadcast_address, self.config.discovery_port));
        self.send(&self.hello(PacketKind::Connect), target);
    }

    /// Repeat the Connect to a configured hub; registration there is idempotent.
    fn rejoin(&self) {
        if let Some(hub) = self.config.hub_address {
            self.send(&self.hello(PacketKind::Connect), hub);
        }
    }

    fn farewell(&self) {
        let packet = self.hello(PacketKind::Disconnect);
        for target in self.outbound_targets() {
            self.send(&packet, target);
        }
    }

    fn send(&self, packet: &NetworkPacket, target: SocketAddr) {
        if let Err(e) = self.socket.send_to(&packet.encode(), target) {
            debug!("Send {} to {} failed: {}", packet.kind, target, e);
        }
    }
}
