//! Capability traits for talking to a host process.

use crate::error::Result;

/// Opaque capability to read and write one host address space.
///
/// Implementations report how many bytes were actually transferred; deciding
/// whether a short transfer is an error is left to [`MemoryBridge`].
///
/// [`MemoryBridge`]: super::MemoryBridge
pub trait HostHandle: Send + Sync {
    /// Load address of the host's main module.
    fn base_address(&self) -> u32;

    /// Read up to `buf.len()` bytes at `address`, returning the count read.
    fn read_into(&self, address: u32, buf: &mut [u8]) -> Result<usize>;

    /// Write `bytes` at `address`, returning the count written.
    fn write_from(&self, address: u32, bytes: &[u8]) -> Result<usize>;

    /// False once the handle has been closed or the host went away.
    fn is_valid(&self) -> bool;

    /// Release the underlying OS resource. Further calls fail with `NotAttached`.
    fn close(&mut self);
}

/// Finds a host process by name and opens a handle to it.
pub trait ProcessLocator: Send + Sync {
    fn locate(&self, name: &str) -> Result<Box<dyn HostHandle>>;
}
