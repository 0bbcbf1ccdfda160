//! Peer wire packet.
//!
//! Fixed 51-byte little-endian layout:
//!
//! ```text
//! [tag:u8][playerId:u32][pos:3xf32][rot:3xf32][vel:3xf32]
//! [animation:u16][weapon:u8][health:u8][armor:u8][vehicleModel:u8][timestamp:u32]
//! ```

use serde::Serialize;
use strum::{Display, FromRepr};

use crate::entity::{PlayerUpdate, Vec3};
use crate::error::{Error, Result};

/// Encoded size of every packet on the wire.
pub const WIRE_SIZE: usize = 51;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display, Serialize)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum PacketKind {
    Connect = 1,
    Disconnect = 2,
    Position = 3,
    Vehicle = 4,
    Shoot = 5,
    Chat = 6,
    Sync = 7,
}

impl PacketKind {
    /// Kinds that carry player state and are applied as updates.
    pub fn is_state(&self) -> bool {
        !matches!(self, PacketKind::Connect | PacketKind::Disconnect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NetworkPacket {
    pub kind: PacketKind,
    pub player_id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub animation: u16,
    pub weapon: u8,
    pub health: u8,
    pub armor: u8,
    pub vehicle_model: u8,
    pub timestamp: u32,
}

impl NetworkPacket {
    /// A packet of `kind` with every other field zeroed.
    pub fn new(kind: PacketKind, player_id: u32) -> Self {
        Self {
            kind,
            player_id,
            position: [0.0; 3],
            rotation: [0.0; 3],
            velocity: [0.0; 3],
            animation: 0,
            weapon: 0,
            health: 0,
            armor: 0,
            vehicle_model: 0,
            timestamp: 0,
        }
    }

    pub fn encode(&self) -> [u8; WIRE_SIZE] {
        let mut out = [0u8; WIRE_SIZE];
        let mut w = Writer::new(&mut out);
        w.u8(self.kind as u8);
        w.u32(self.player_id);
        w.vec3(self.position);
        w.vec3(self.rotation);
        w.vec3(self.velocity);
        w.u16(self.animation);
        w.u8(self.weapon);
        w.u8(self.health);
        w.u8(self.armor);
        w.u8(self.vehicle_model);
        w.u32(self.timestamp);
        out
    }

    /// Decode a datagram. Anything but exactly `WIRE_SIZE` bytes, or an
    /// unknown tag, is rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != WIRE_SIZE {
            return Err(Error::Malformed(format!(
                "packet is {} bytes, expected {}",
                bytes.len(),
                WIRE_SIZE
            )));
        }
        let mut r = Reader::new(bytes);
        let tag = r.u8();
        let kind = PacketKind::from_repr(tag)
            .ok_or_else(|| Error::Malformed(format!("unknown packet tag {}", tag)))?;
        Ok(Self {
            kind,
            player_id: r.u32(),
            position: r.vec3(),
            rotation: r.vec3(),
            velocity: r.vec3(),
            animation: r.u16(),
            weapon: r.u8(),
            health: r.u8(),
            armor: r.u8(),
            vehicle_model: r.u8(),
            timestamp: r.u32(),
        })
    }

    /// State carried by this packet, as applied to a mirrored slot.
    pub fn to_update(&self) -> PlayerUpdate {
        PlayerUpdate {
            position: self.position,
            rotation: self.rotation,
            velocity: Some(self.velocity),
            animation: Some(self.animation),
            health: Some(self.health),
            armor: Some(self.armor),
        }
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    fn u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn vec3(&mut self, v: Vec3) {
        for f in v {
            self.put(&f.to_le_bytes());
        }
    }
}

// Callers guarantee the length up front, so reads never run past the end.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn vec3(&mut self) -> Vec3 {
        [
            f32::from_le_bytes(self.take()),
            f32::from_le_bytes(self.take()),
            f32::from_le_bytes(self.take()),
        ]
    }
}
