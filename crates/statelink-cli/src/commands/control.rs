//! Control channel client command.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Result, bail};
use clap::Subcommand;
use statelink_core::{ControlClient, Response};

#[derive(Subcommand)]
pub enum Action {
    /// Print the status document
    Status,
    /// Attach to the host
    Init,
    /// Stop the node
    Shutdown,
    /// Read bytes from host memory
    Read {
        #[arg(value_parser = parse_hex_address)]
        address: u32,
        size: u32,
    },
    /// Write hex bytes to host memory
    Write {
        #[arg(value_parser = parse_hex_address)]
        address: u32,
        bytes: String,
    },
    /// Mirror a remote player at a position
    Create { id: u32, x: f32, y: f32, z: f32 },
    /// Move a mirrored player
    Update {
        id: u32,
        x: f32,
        y: f32,
        z: f32,
        #[arg(default_value_t = 0.0)]
        heading: f32,
    },
    /// Release a mirrored player's slot
    Remove { id: u32 },
}

/// Parse a hex address string (with or without 0x prefix)
pub fn parse_hex_address(s: &str) -> Result<u32, String> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16).map_err(|e| format!("Invalid hex address: {}", e))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        bail!("Expected an even number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map_err(Into::into))
        .collect()
}

fn hex_line(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn run(port: u16, action: Action) -> Result<()> {
    let mut client = ControlClient::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;

    let response = match action {
        Action::Status => {
            let status = client.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }
        Action::Init => client.init()?,
        Action::Shutdown => client.shutdown()?,
        Action::Read { address, size } => {
            let response = client.read_memory(address, size)?;
            if response.is_success() {
                for (i, chunk) in response.payload.chunks(16).enumerate() {
                    println!("{:08X}  {}", address as usize + i * 16, hex_line(chunk));
                }
                return Ok(());
            }
            response
        }
        Action::Write { address, bytes } => {
            let data = parse_hex_bytes(&bytes)?;
            client.write_memory(address, &data)?
        }
        Action::Create { id, x, y, z } => {
            let response = client.create_player(id, [x, y, z])?;
            if let Some(slot) = response.payload_u32().filter(|_| response.is_success()) {
                println!("Player {} mirrored at 0x{:08X}", id, slot);
                return Ok(());
            }
            response
        }
        Action::Update {
            id,
            x,
            y,
            z,
            heading,
        } => client.update_player(id, [x, y, z], [0.0, 0.0, heading])?,
        Action::Remove { id } => client.remove_player(id)?,
    };

    report(&response)
}

fn report(response: &Response) -> Result<()> {
    let text = response.text();
    if response.is_success() {
        println!("OK{}", if text.is_empty() { String::new() } else { format!(": {}", text) });
        Ok(())
    } else if text.is_empty() {
        bail!("Request failed")
    } else {
        bail!("Request failed: {}", text)
    }
}
