//! # statelink-core
//!
//! Mirrors live entity state between a host process and remote peers.
//!
//! This crate provides:
//! - Checked host memory access through a swappable `HostHandle`
//! - Versioned offset tables with header-signature detection
//! - Slot allocation inside the host's fixed entity array
//! - A UDP hub/peer relay that ticks local state out and applies remote state in
//! - A loopback TCP control channel with a bounded worker pool
//!
//! Everything hangs off a [`Core`] value created by the caller; there is no
//! global state.

pub mod config;
pub mod context;
pub mod control;
pub mod entity;
pub mod error;
pub mod memory;
pub mod offset;
pub mod relay;
pub mod shutdown;

pub use config::{ControlConfig, CoreConfig, CoreConfigBuilder, RelayConfig, RelayRole};
pub use context::{AttachOutcome, Core, StatusReport};
pub use control::{Command, ControlClient, ControlServer, Request, Response, Status};
pub use entity::{EntityRecord, EntitySlotAllocator, PlayerUpdate, RemotePlayerDirectory};
pub use error::{Error, Result};
pub use memory::{
    HostHandle, MemoryBridge, MockHost, MockHostBuilder, MockLocator, ProcessLocator,
    WindowsProcessLocator,
};
pub use offset::{
    FixedDetector, OffsetEntry, OffsetTable, OffsetTableId, SignatureDetector, VersionDetector,
    load_offsets, save_offsets,
};
pub use relay::{NetworkPacket, PacketKind, RelayStatsSnapshot, SyncRelay};
pub use shutdown::ShutdownSignal;
