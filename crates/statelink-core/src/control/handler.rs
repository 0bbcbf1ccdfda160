use tracing::{debug, info, warn};

use super::protocol::{Command, MAX_PAYLOAD, Request, Response, Status};
use crate::context::{AttachOutcome, Core};
use crate::entity::PlayerUpdate;
use crate::error::Error;

/// Turn one raw request into exactly one response.
pub fn handle_message(core: &Core, message: &[u8]) -> Response {
    let Some(word) = message.get(..4) else {
        debug!("Request of {} bytes has no command word", message.len());
        return Response::failure(0, Vec::new());
    };
    let command_id = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);

    let Some(command) = Command::from_repr(command_id) else {
        debug!("Unknown command {}", command_id);
        return Response::message(command_id, Status::Failure, "Unknown command");
    };

    match Request::parse(command, &message[4..]) {
        Ok(request) => dispatch(core, request),
        Err(e) => {
            debug!("Malformed {} request: {}", command, e);
            Response::failure(command_id, Vec::new())
        }
    }
}

/// Run one parsed request. A response too large for the wire becomes a
/// failure that says so.
pub fn dispatch(core: &Core, request: Request) -> Response {
    let response = respond(core, request);
    if response.payload.len() > MAX_PAYLOAD {
        let error = Error::PayloadTooLarge {
            len: response.payload.len(),
            max: MAX_PAYLOAD,
        };
        warn!("Command {} failed: {}", response.command, error);
        return Response::message(response.command, Status::Failure, &error.to_string());
    }
    response
}

fn respond(core: &Core, request: Request) -> Response {
    let command = request.command() as u32;
    match request {
        Request::Init => init(core, command),
        // The server triggers shutdown once this response is on the wire
        Request::Shutdown => Response::success(command, Vec::new()),
        Request::UpdateConfig | Request::SendChat => {
            Response::message(command, Status::Failure, "Command not supported")
        }
        Request::GetStatus => match serde_json::to_vec(&core.status()) {
            Ok(json) => Response::success(command, json),
            Err(e) => {
                warn!("Failed to serialize status: {}", e);
                Response::failure(command, Vec::new())
            }
        },
        Request::CreatePlayer {
            player_id,
            position,
        } => match core.allocator().create_player(player_id, position) {
            Ok(address) => Response::success(command, address.to_le_bytes().to_vec()),
            Err(e) => Response::message(command, Status::Failure, &e.to_string()),
        },
        Request::RemovePlayer { player_id } => match core.allocator().remove_player(player_id) {
            Ok(_) => Response::success(command, Vec::new()),
            Err(e) => Response::message(command, Status::Failure, &e.to_string()),
        },
        Request::UpdatePlayer {
            player_id,
            position,
            rotation,
        } => {
            let update = PlayerUpdate::pose(position, rotation);
            match core.allocator().update_player(player_id, &update) {
                Ok(_) => Response::success(command, Vec::new()),
                Err(e) => Response::message(command, Status::Failure, &e.to_string()),
            }
        }
        Request::ReadMemory { address, size } => {
            let size = size as usize;
            if size == 0 || size > MAX_PAYLOAD {
                return Response::failure(command, Vec::new());
            }
            match core.bridge().read(address, size) {
                Ok(bytes) => Response::success(command, bytes),
                Err(e) => {
                    debug!("ReadMemory at {:#x} failed: {}", address, e);
                    Response::failure(command, Vec::new())
                }
            }
        }
        Request::WriteMemory { address, data } => match core.bridge().write(address, &data) {
            Ok(_) => Response::success(command, Vec::new()),
            Err(e) => {
                debug!("WriteMemory at {:#x} failed: {}", address, e);
                Response::failure(command, Vec::new())
            }
        },
    }
}

fn init(core: &Core, command: u32) -> Response {
    match core.attach() {
        Ok(AttachOutcome::Attached(version)) => {
            info!("Attached via control channel ({})", version);
            Response::message(
                command,
                Status::Success,
                &format!("Attached to {} ({})", core.config().process_name, version),
            )
        }
        Ok(AttachOutcome::AlreadyAttached) => {
            Response::message(command, Status::Success, "Already attached")
        }
        Err(e) => {
            warn!("Init failed: {}", e);
            Response::message(
                command,
                Status::Failure,
                &format!("Failed to attach to {}: {}", core.config().process_name, e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::memory::{MockHost, MockLocator};
    use crate::offset::{FixedDetector, OffsetTable, OffsetTableId};

    const BASE: u32 = 0x0040_0000;

    fn core(attached: bool) -> (Core, MockHost) {
        let host = MockHost::simulated(BASE, &OffsetTable::default()).unwrap();
        let core = Core::new(
            CoreConfig::default(),
            Box::new(MockLocator::new(host.clone())),
            Box::new(FixedDetector(OffsetTableId::Retail10)),
        )
        .unwrap();
        if attached {
            core.attach().unwrap();
        }
        (core, host)
    }

    #[test]
    fn test_short_message_has_zero_command() {
        let (core, _) = core(true);
        let response = handle_message(&core, &[6, 0]);
        assert_eq!(response.command, 0);
        assert!(!response.is_success());
        assert!(response.payload.is_empty());
    }

    #[test]
    fn test_unknown_command() {
        let (core, _) = core(true);
        let response = handle_message(&core, &99u32.to_le_bytes());
        assert_eq!(response.command, 99);
        assert!(!response.is_success());
        assert_eq!(response.text(), "Unknown command");
    }

    #[test]
    fn test_unsupported_commands_fail() {
        let (core, _) = core(true);
        assert!(!dispatch(&core, Request::UpdateConfig).is_success());
        assert!(!dispatch(&core, Request::SendChat).is_success());
    }

    #[test]
    fn test_init_attaches_once() {
        let (core, _) = core(false);
        let first = dispatch(&core, Request::Init);
        assert!(first.is_success());
        assert!(first.text().contains("retail10"));
        assert_eq!(dispatch(&core, Request::Init).text(), "Already attached");
    }

    #[test]
    fn test_init_failure_is_reported() {
        let core = Core::new(
            CoreConfig::default(),
            Box::new(MockLocator::empty()),
            Box::new(FixedDetector(OffsetTableId::Unknown)),
        )
        .unwrap();
        let response = dispatch(&core, Request::Init);
        assert!(!response.is_success());
        assert!(response.text().starts_with("Failed to attach"));
    }

    #[test]
    fn test_read_memory_bounds() {
        let (core, _) = core(true);
        let zero = dispatch(&core, Request::ReadMemory { address: 0, size: 0 });
        assert!(!zero.is_success());
        assert!(zero.payload.is_empty());

        let huge = dispatch(
            &core,
            Request::ReadMemory {
                address: BASE,
                size: (MAX_PAYLOAD + 1) as u32,
            },
        );
        assert!(!huge.is_success());

        let header = dispatch(&core, Request::ReadMemory { address: BASE, size: 2 });
        assert!(header.is_success());
        assert_eq!(header.payload, b"MZ");
    }

    #[test]
    fn test_write_then_read_memory() {
        let (core, host) = core(true);
        let write = dispatch(
            &core,
            Request::WriteMemory {
                address: BASE + 0x100,
                data: vec![1, 2, 3, 4],
            },
        );
        assert!(write.is_success());
        assert_eq!(host.peek_u32(BASE + 0x100), 0x0403_0201);
    }

    #[test]
    fn test_memory_commands_fail_when_detached() {
        let (core, _) = core(false);
        let response = dispatch(&core, Request::ReadMemory { address: BASE, size: 4 });
        assert!(!response.is_success());
        assert!(response.payload.is_empty());
    }

    #[test]
    fn test_oversized_status_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");
        let mut table = OffsetTable::default();
        for i in 0..200 {
            table.set_offset(&format!("extraPointer{:03}", i), 0x1000 + i);
        }
        crate::offset::save_offsets(&path, &table).unwrap();

        let host = MockHost::simulated(BASE, &OffsetTable::default()).unwrap();
        let core = Core::new(
            CoreConfig::builder().offsets_path(&path).build(),
            Box::new(MockLocator::new(host)),
            Box::new(FixedDetector(OffsetTableId::Retail10)),
        )
        .unwrap();
        core.attach().unwrap();

        let response = dispatch(&core, Request::GetStatus);
        assert!(!response.is_success());
        assert!(response.text().contains("exceeds"));
        assert!(response.encode().is_ok());
    }

    #[test]
    fn test_status_within_limit_is_valid_json() {
        let (core, _) = core(true);
        let response = dispatch(&core, Request::GetStatus);
        assert!(response.is_success());
        let json: serde_json::Value = serde_json::from_slice(&response.payload).unwrap();
        assert_eq!(json["attached"], true);
    }

    #[test]
    fn test_create_returns_slot_address() {
        let (core, _) = core(true);
        let response = dispatch(
            &core,
            Request::CreatePlayer {
                player_id: 7,
                position: [1.0, 2.0, 3.0],
            },
        );
        assert!(response.is_success());
        assert_eq!(response.payload_u32(), core.player_slot(7));
    }
}
