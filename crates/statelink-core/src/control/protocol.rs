//! Control channel framing.
//!
//! Request: `[command:u32][fields...]`.
//! Response: `[command:u32][status:u32][len:u32][data:len]`, all little-endian.

use serde::Serialize;
use strum::{Display, FromRepr};

use crate::entity::Vec3;
use crate::error::{Error, Result};

/// Largest request read in one go, and largest encoded response.
pub const MAX_MESSAGE: usize = 4096;
pub const HEADER_LEN: usize = 12;
pub const MAX_PAYLOAD: usize = MAX_MESSAGE - HEADER_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display, Serialize)]
#[repr(u32)]
pub enum Command {
    Init = 1,
    Shutdown = 2,
    UpdateConfig = 3,
    SendChat = 4,
    GetStatus = 5,
    CreatePlayer = 6,
    RemovePlayer = 7,
    UpdatePlayer = 8,
    ReadMemory = 9,
    WriteMemory = 10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display, Serialize)]
#[repr(u32)]
pub enum Status {
    Failure = 0,
    Success = 1,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Init,
    Shutdown,
    UpdateConfig,
    SendChat,
    GetStatus,
    CreatePlayer { player_id: u32, position: Vec3 },
    RemovePlayer { player_id: u32 },
    UpdatePlayer { player_id: u32, position: Vec3, rotation: Vec3 },
    ReadMemory { address: u32, size: u32 },
    WriteMemory { address: u32, data: Vec<u8> },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Init => Command::Init,
            Request::Shutdown => Command::Shutdown,
            Request::UpdateConfig => Command::UpdateConfig,
            Request::SendChat => Command::SendChat,
            Request::GetStatus => Command::GetStatus,
            Request::CreatePlayer { .. } => Command::CreatePlayer,
            Request::RemovePlayer { .. } => Command::RemovePlayer,
            Request::UpdatePlayer { .. } => Command::UpdatePlayer,
            Request::ReadMemory { .. } => Command::ReadMemory,
            Request::WriteMemory { .. } => Command::WriteMemory,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        put_u32(&mut out, self.command() as u32);
        match self {
            Request::CreatePlayer {
                player_id,
                position,
            } => {
                put_u32(&mut out, *player_id);
                put_vec3(&mut out, *position);
            }
            Request::RemovePlayer { player_id } => put_u32(&mut out, *player_id),
            Request::UpdatePlayer {
                player_id,
                position,
                rotation,
            } => {
                put_u32(&mut out, *player_id);
                put_vec3(&mut out, *position);
                put_vec3(&mut out, *rotation);
            }
            Request::ReadMemory { address, size } => {
                put_u32(&mut out, *address);
                put_u32(&mut out, *size);
            }
            Request::WriteMemory { address, data } => {
                put_u32(&mut out, *address);
                put_u32(&mut out, data.len() as u32);
                out.extend_from_slice(data);
            }
            _ => {}
        }
        out
    }

    /// Total length of the request that `prefix` starts, as far as the prefix
    /// tells. `None` for an unknown command, whose length cannot be known.
    /// Lengths are capped at `MAX_MESSAGE`.
    pub fn expected_len(prefix: &[u8]) -> Option<usize> {
        let Some(word) = prefix.get(..4) else {
            return Some(4);
        };
        let command = Command::from_repr(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))?;
        let len = match command {
            Command::Init
            | Command::Shutdown
            | Command::UpdateConfig
            | Command::SendChat
            | Command::GetStatus => 4,
            Command::RemovePlayer => 8,
            Command::ReadMemory => 12,
            Command::CreatePlayer => 20,
            Command::UpdatePlayer => 32,
            Command::WriteMemory => match prefix.get(8..12) {
                Some(size) => 12usize.saturating_add(
                    u32::from_le_bytes([size[0], size[1], size[2], size[3]]) as usize,
                ),
                None => 12,
            },
        };
        Some(len.min(MAX_MESSAGE))
    }

    /// Parse the fields following the command word. Trailing bytes after a
    /// fixed-size request are ignored; a short request is `Malformed`.
    pub fn parse(command: Command, body: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(command, body);
        let request = match command {
            Command::Init => Request::Init,
            Command::Shutdown => Request::Shutdown,
            Command::UpdateConfig => Request::UpdateConfig,
            Command::SendChat => Request::SendChat,
            Command::GetStatus => Request::GetStatus,
            Command::CreatePlayer => Request::CreatePlayer {
                player_id: r.u32()?,
                position: r.vec3()?,
            },
            Command::RemovePlayer => Request::RemovePlayer {
                player_id: r.u32()?,
            },
            Command::UpdatePlayer => Request::UpdatePlayer {
                player_id: r.u32()?,
                position: r.vec3()?,
                rotation: r.vec3()?,
            },
            Command::ReadMemory => Request::ReadMemory {
                address: r.u32()?,
                size: r.u32()?,
            },
            Command::WriteMemory => {
                let address = r.u32()?;
                let size = r.u32()? as usize;
                let data = r.rest();
                if size == 0 || size != data.len() {
                    return Err(Error::Malformed(format!(
                        "WriteMemory declares {} bytes but carries {}",
                        size,
                        data.len()
                    )));
                }
                Request::WriteMemory {
                    address,
                    data: data.to_vec(),
                }
            }
        };
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Echo of the request's command word; 0 when none could be read
    pub command: u32,
    pub status: Status,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn success(command: u32, payload: Vec<u8>) -> Self {
        Self {
            command,
            status: Status::Success,
            payload,
        }
    }

    pub fn failure(command: u32, payload: Vec<u8>) -> Self {
        Self {
            command,
            status: Status::Failure,
            payload,
        }
    }

    pub fn message(command: u32, status: Status, text: &str) -> Self {
        Self {
            command,
            status,
            payload: text.as_bytes().to_vec(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Payload as text, without any trailing NULs.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload)
            .trim_end_matches('\0')
            .to_string()
    }

    /// First payload word, for responses that carry an address.
    pub fn payload_u32(&self) -> Option<u32> {
        let bytes = self.payload.get(..4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Encode for the wire. A payload over `MAX_PAYLOAD` is refused rather
    /// than cut short.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        put_u32(&mut out, self.command);
        put_u32(&mut out, self.status as u32);
        put_u32(&mut out, self.payload.len() as u32);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Split a response header into `(command, status, payload length)`.
    pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(u32, Status, usize)> {
        let word = |i: usize| {
            u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]])
        };
        let status = Status::from_repr(word(4))
            .ok_or_else(|| Error::Malformed(format!("unknown status {}", word(4))))?;
        let len = word(8) as usize;
        if len > MAX_PAYLOAD {
            return Err(Error::Malformed(format!("payload length {} too large", len)));
        }
        Ok((word(0), status, len))
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_vec3(out: &mut Vec<u8>, value: Vec3) {
    for v in value {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

struct FieldReader<'a> {
    command: Command,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(command: Command, buf: &'a [u8]) -> Self {
        Self {
            command,
            buf,
            pos: 0,
        }
    }

    fn take4(&mut self) -> Result<[u8; 4]> {
        let bytes = self.buf.get(self.pos..self.pos + 4).ok_or_else(|| {
            Error::Malformed(format!(
                "{} request truncated at {} bytes",
                self.command,
                self.buf.len() + 4
            ))
        })?;
        self.pos += 4;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn u32(&mut self) -> Result<u32> {
        self.take4().map(u32::from_le_bytes)
    }

    fn vec3(&mut self) -> Result<Vec3> {
        Ok([
            f32::from_le_bytes(self.take4()?),
            f32::from_le_bytes(self.take4()?),
            f32::from_le_bytes(self.take4()?),
        ])
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}
