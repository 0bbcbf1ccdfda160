use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use super::protocol::{HEADER_LEN, Request, Response};
use crate::entity::Vec3;
use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking client for the control channel.
pub struct ControlClient {
    stream: TcpStream,
}

impl ControlClient {
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, DEFAULT_TIMEOUT)?;
        stream.set_read_timeout(Some(DEFAULT_TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    pub fn request(&mut self, request: &Request) -> Result<Response> {
        self.send_raw(&request.encode())
    }

    /// Send arbitrary bytes as one request and read back one response.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<Response> {
        self.stream.write_all(bytes)?;

        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header)?;
        let (command, status, len) = Response::decode_header(&header)?;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;

        Ok(Response {
            command,
            status,
            payload,
        })
    }

    pub fn init(&mut self) -> Result<Response> {
        self.request(&Request::Init)
    }

    pub fn shutdown(&mut self) -> Result<Response> {
        self.request(&Request::Shutdown)
    }

    /// Fetch and parse the JSON status document.
    pub fn status(&mut self) -> Result<serde_json::Value> {
        let response = self.request(&Request::GetStatus)?;
        if !response.is_success() {
            return Err(Error::Malformed("GetStatus failed".to_string()));
        }
        Ok(serde_json::from_slice(&response.payload)?)
    }

    pub fn create_player(&mut self, player_id: u32, position: Vec3) -> Result<Response> {
        self.request(&Request::CreatePlayer {
            player_id,
            position,
        })
    }

    pub fn update_player(
        &mut self,
        player_id: u32,
        position: Vec3,
        rotation: Vec3,
    ) -> Result<Response> {
        self.request(&Request::UpdatePlayer {
            player_id,
            position,
            rotation,
        })
    }

    pub fn remove_player(&mut self, player_id: u32) -> Result<Response> {
        self.request(&Request::RemovePlayer { player_id })
    }

    pub fn read_memory(&mut self, address: u32, size: u32) -> Result<Response> {
        self.request(&Request::ReadMemory { address, size })
    }

    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<Response> {
        self.request(&Request::WriteMemory {
            address,
            data: data.to_vec(),
        })
    }
}
