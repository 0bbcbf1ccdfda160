//! Host build detection by header signature.

use memchr::memmem;
use tracing::{debug, info};

use super::OffsetTableId;
use crate::error::Result;
use crate::memory::HostHandle;
use crate::memory::layout::signature;

/// Decides which offset table applies to an attached host.
pub trait VersionDetector: Send + Sync {
    fn detect(&self, handle: &dyn HostHandle) -> Result<OffsetTableId>;
}

/// Reads the executable header at the host base and matches build markers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureDetector;

impl SignatureDetector {
    /// Classify a header dump. Shorter dumps only match the markers they cover.
    pub fn classify(header: &[u8]) -> OffsetTableId {
        if !header.starts_with(&signature::MZ) {
            return OffsetTableId::Unknown;
        }
        if window_contains(header, signature::RETAIL_WINDOW, signature::RETAIL_PATTERN) {
            return OffsetTableId::Retail10;
        }
        if window_contains(header, signature::STEAM_WINDOW, signature::STEAM_PATTERN) {
            return OffsetTableId::Steam;
        }
        OffsetTableId::Unknown
    }
}

fn window_contains(header: &[u8], window: std::ops::Range<usize>, pattern: &[u8]) -> bool {
    header
        .get(window)
        .is_some_and(|bytes| memmem::find(bytes, pattern).is_some())
}

impl VersionDetector for SignatureDetector {
    fn detect(&self, handle: &dyn HostHandle) -> Result<OffsetTableId> {
        let mut header = vec![0u8; signature::PROBE_LEN];
        let read = handle.read_into(handle.base_address(), &mut header)?;
        header.truncate(read);
        debug!("Read {} header bytes for version detection", read);

        let id = Self::classify(&header);
        info!("Detected host build: {}", id);
        Ok(id)
    }
}

/// Detector that always answers the same build.
#[derive(Debug, Clone, Copy)]
pub struct FixedDetector(pub OffsetTableId);

impl VersionDetector for FixedDetector {
    fn detect(&self, _handle: &dyn HostHandle) -> Result<OffsetTableId> {
        Ok(self.0)
    }
}
