//! Memory layout constants for host-resident structures
//!
//! This module centralizes the byte offsets used when reading and writing
//! entity records inside the host's entity array. Constants are organized by
//! structure type.

/// Memory layout of a single entity record.
///
/// Only the fields this crate touches are listed; the remainder of each slot
/// (up to the table's `entitySize`) belongs to the host and is never written.
pub mod entity {
    /// Word size (4 bytes / 32-bit integer)
    pub const WORD: u32 = 4;
    /// Three packed f32 values
    pub const VEC3: u32 = 12;

    pub const TYPE_TAG: u32 = 0x00;
    pub const HANDLE: u32 = 0x04;
    pub const FLAGS: u32 = 0x08;

    pub const POSITION: u32 = 0x14;
    pub const ROTATION: u32 = 0x20;
    pub const VELOCITY: u32 = 0x30;

    pub const MODEL_ID: u32 = 0x50;
    pub const PLAYER_ID: u32 = 0x5C;
    pub const ANIMATION: u32 = 0x60;
    pub const AI_STATE: u32 = 0x64;
    pub const HEALTH: u32 = 0x68;
    pub const ARMOR: u32 = 0x6C;

    // Byte-sized fields
    pub const PED_TYPE: u32 = 0x70;
    pub const IN_VEHICLE: u32 = 0x71;

    pub const VEHICLE_PTR: u32 = 0x74;

    /// Bytes covered by an encoded record (must not exceed `entitySize`)
    pub const RECORD_LEN: usize = 0x78;

    /// Type tag of a free slot
    pub const TAG_FREE: u32 = 0;
    /// Type tag written for mirrored remote players (pedestrian)
    pub const TAG_PED: u32 = 1;
    /// Pedestrian class used for remote players (civilian)
    pub const PED_TYPE_CIVILIAN: u8 = 6;
    /// AI state that disables host-side behaviour for a slot
    pub const AI_DISABLED: u32 = 0;
    /// Health assigned to freshly created remote players
    pub const DEFAULT_HEALTH: u32 = 100;
}

/// Header probed by the version detector
pub mod signature {
    /// Bytes read from the host base address for detection
    pub const PROBE_LEN: usize = 0x210;
    /// Executable image magic ("MZ")
    pub const MZ: [u8; 2] = [0x4D, 0x5A];

    /// Retail 1.0 marker window and pattern
    pub const RETAIL_WINDOW: std::ops::Range<usize> = 0x100..0x110;
    pub const RETAIL_PATTERN: &[u8] = &[0x90, 0x90, 0x90, 0x90];

    /// Steam edition marker window and pattern
    pub const STEAM_WINDOW: std::ops::Range<usize> = 0x200..0x210;
    pub const STEAM_PATTERN: &[u8] = &[0xE8];
}

/// Timing constants for the relay and control loops
pub mod timing {
    /// Period of the local state tick (20 Hz)
    pub const TICK_INTERVAL_MS: u64 = 50;

    /// Socket read timeout so receive loops observe the stop flag
    pub const RECV_TIMEOUT_MS: u64 = 250;

    /// Interval between hub announcements
    pub const ANNOUNCE_INTERVAL_MS: u64 = 1000;

    /// Poll interval of the non-blocking control accept loop
    pub const ACCEPT_POLL_MS: u64 = 20;

    /// Control connections idle this long are closed
    pub const CONTROL_IDLE_MS: u64 = 30_000;
}
