//! Request/response control channel on a loopback TCP port.

mod client;
mod handler;
mod protocol;
mod server;

pub use client::ControlClient;
pub use handler::{dispatch, handle_message};
pub use protocol::{Command, HEADER_LEN, MAX_MESSAGE, MAX_PAYLOAD, Request, Response, Status};
pub use server::ControlServer;
