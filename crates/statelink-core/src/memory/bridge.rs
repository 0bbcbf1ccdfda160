//! Checked read/write access to host memory.

use parking_lot::Mutex;
use tracing::{debug, info};

use super::host::HostHandle;
use crate::error::{Error, Result};
use crate::offset::OffsetTable;

/// Sole owner of the host handle.
///
/// Every transfer is checked for completeness: a short read or write surfaces
/// as `PartialRead`/`PartialWrite` and is never retried here.
pub struct MemoryBridge {
    handle: Mutex<Option<Box<dyn HostHandle>>>,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    /// Install a handle, closing any previous one.
    pub fn attach(&self, handle: Box<dyn HostHandle>) {
        let mut slot = self.handle.lock();
        if let Some(mut old) = slot.take() {
            old.close();
        }
        info!("Attached to host (base: {:#x})", handle.base_address());
        *slot = Some(handle);
    }

    /// Close and drop the handle. Subsequent operations fail with `NotAttached`.
    pub fn detach(&self) {
        if let Some(mut handle) = self.handle.lock().take() {
            handle.close();
            info!("Detached from host");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| h.is_valid())
    }

    pub fn base_address(&self) -> Result<u32> {
        self.with_handle(|h| Ok(h.base_address()))
    }

    fn with_handle<T>(&self, f: impl FnOnce(&dyn HostHandle) -> Result<T>) -> Result<T> {
        let guard = self.handle.lock();
        match guard.as_deref() {
            Some(handle) if handle.is_valid() => f(handle),
            _ => Err(Error::NotAttached),
        }
    }

    /// Read exactly `size` bytes at `address`.
    pub fn read(&self, address: u32, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let read = self.with_handle(|h| h.read_into(address, &mut buf))?;
        if read < size {
            debug!("Short read at {:#x}: {}/{} bytes", address, read, size);
            return Err(Error::PartialRead {
                address,
                requested: size,
                read,
            });
        }
        Ok(buf)
    }

    /// Write all of `bytes` at `address`, returning the byte count.
    pub fn write(&self, address: u32, bytes: &[u8]) -> Result<usize> {
        let written = self.with_handle(|h| h.write_from(address, bytes))?;
        if written < bytes.len() {
            debug!(
                "Short write at {:#x}: {}/{} bytes",
                address,
                written,
                bytes.len()
            );
            return Err(Error::PartialWrite {
                address,
                requested: bytes.len(),
                written,
            });
        }
        Ok(written)
    }

    pub fn read_u32(&self, address: u32) -> Result<u32> {
        let bytes = self.read(address, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn write_u32(&self, address: u32, value: u32) -> Result<()> {
        self.write(address, &value.to_le_bytes()).map(|_| ())
    }

    /// `base + table[name].offset`.
    pub fn resolve(&self, table: &OffsetTable, name: &str) -> Result<u32> {
        let offset = table.offset(name)?;
        Ok(self.base_address()?.wrapping_add(offset))
    }
}

impl Default for MemoryBridge {
    fn default() -> Self {
        Self::new()
    }
}
