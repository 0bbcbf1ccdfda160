use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not attached to a host process")]
    NotAttached,

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to open process: {0}")]
    ProcessOpenFailed(String),

    #[error("Partial read at {address:#x}: requested {requested} bytes, got {read}")]
    PartialRead {
        address: u32,
        requested: usize,
        read: usize,
    },

    #[error("Partial write at {address:#x}: requested {requested} bytes, wrote {written}")]
    PartialWrite {
        address: u32,
        requested: usize,
        written: usize,
    },

    #[error("Unknown offset: {0}")]
    UnknownOffset(String),

    #[error("Invalid entity layout: {0}")]
    InvalidLayout(String),

    #[error("No free entity slots available")]
    SlotsExhausted,

    #[error("Player {0} already exists")]
    AlreadyExists(u32),

    #[error("Slot {0:#x} is already owned by another player")]
    SlotInUse(u32),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Partial transfers that the caller may choose to retry.
    pub fn is_partial(&self) -> bool {
        matches!(self, Error::PartialRead { .. } | Error::PartialWrite { .. })
    }
}
