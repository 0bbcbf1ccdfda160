//! In-process fake host backed by byte arrays.
//!
//! Satisfies the same [`HostHandle`] contract as a real process handle, so the
//! allocator, directory and control channel run without any external process.
//! Memory is a set of mapped regions; reads and writes that run past the end
//! of a region are cut short, which is how partial transfers are simulated.
//! Regions are searched in insertion order, so an earlier region shadows a
//! later one that overlaps it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::host::{HostHandle, ProcessLocator};
use super::layout::entity;
use crate::error::{Error, Result};
use crate::offset::{OffsetTable, names};

struct Region {
    start: u32,
    data: Vec<u8>,
}

impl Region {
    fn end(&self) -> u64 {
        self.start as u64 + self.data.len() as u64
    }

    fn contains(&self, address: u32) -> bool {
        address >= self.start && (address as u64) < self.end()
    }
}

/// Shared fake address space. Clones refer to the same memory.
#[derive(Clone)]
pub struct MockHost {
    base: u32,
    regions: Arc<Mutex<Vec<Region>>>,
}

impl MockHost {
    pub fn builder(base: u32) -> MockHostBuilder {
        MockHostBuilder::new(base)
    }

    /// A host laid out for `table`: the entity array and the local player
    /// pointer are mapped, and a local player record sits right after the
    /// array with its pointer filled in.
    pub fn simulated(base: u32, table: &OffsetTable) -> Result<Self> {
        let array = base.wrapping_add(table.offset(names::ENTITY_LIST_BASE)?);
        let slots = table.max_entities()? as usize;
        let size = table.entity_size()? as usize;
        let array_len = slots * size;
        let local = array + array_len as u32;
        let ped_ptr = base.wrapping_add(table.offset(names::PLAYER_PED_POINTER)?);

        Ok(Self::builder(base)
            .region(base, 0x400)
            .u32_at(base, u32::from_le_bytes([0x4D, 0x5A, 0x90, 0x00]))
            .region(ped_ptr, entity::WORD as usize)
            .region(array, array_len + size)
            .u32_at(ped_ptr, local)
            .u32_at(local + entity::TYPE_TAG, entity::TAG_PED)
            .u32_at(local + entity::HEALTH, entity::DEFAULT_HEALTH)
            .build())
    }

    pub fn base_address(&self) -> u32 {
        self.base
    }

    /// Open a fresh handle onto this memory.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            host: self.clone(),
            open: AtomicBool::new(true),
        }
    }

    /// Copy bytes out, stopping at the end of the mapped region.
    pub fn peek(&self, address: u32, buf: &mut [u8]) -> usize {
        let regions = self.regions.lock();
        let Some(region) = regions.iter().find(|r| r.contains(address)) else {
            return 0;
        };
        let offset = (address - region.start) as usize;
        let n = buf.len().min(region.data.len() - offset);
        buf[..n].copy_from_slice(&region.data[offset..offset + n]);
        n
    }

    /// Copy bytes in, stopping at the end of the mapped region.
    pub fn poke(&self, address: u32, bytes: &[u8]) -> usize {
        let mut regions = self.regions.lock();
        let Some(region) = regions.iter_mut().find(|r| r.contains(address)) else {
            return 0;
        };
        let offset = (address - region.start) as usize;
        let n = bytes.len().min(region.data.len() - offset);
        region.data[offset..offset + n].copy_from_slice(&bytes[..n]);
        n
    }

    pub fn peek_u32(&self, address: u32) -> u32 {
        let mut buf = [0u8; 4];
        self.peek(address, &mut buf);
        u32::from_le_bytes(buf)
    }

    pub fn peek_f32(&self, address: u32) -> f32 {
        f32::from_bits(self.peek_u32(address))
    }

    pub fn poke_u32(&self, address: u32, value: u32) {
        self.poke(address, &value.to_le_bytes());
    }
}

/// Builder for [`MockHost`] memory maps.
pub struct MockHostBuilder {
    base: u32,
    regions: Vec<Region>,
    writes: Vec<(u32, Vec<u8>)>,
}

impl MockHostBuilder {
    pub fn new(base: u32) -> Self {
        Self {
            base,
            regions: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Map `len` zeroed bytes at `start`.
    pub fn region(mut self, start: u32, len: usize) -> Self {
        self.regions.push(Region {
            start,
            data: vec![0; len],
        });
        self
    }

    pub fn bytes_at(mut self, address: u32, bytes: &[u8]) -> Self {
        self.writes.push((address, bytes.to_vec()));
        self
    }

    pub fn u32_at(self, address: u32, value: u32) -> Self {
        self.bytes_at(address, &value.to_le_bytes())
    }

    pub fn build(self) -> MockHost {
        let host = MockHost {
            base: self.base,
            regions: Arc::new(Mutex::new(self.regions)),
        };
        for (address, bytes) in &self.writes {
            host.poke(*address, bytes);
        }
        host
    }
}

/// A handle onto a [`MockHost`]; closing it does not affect other handles.
pub struct MockHandle {
    host: MockHost,
    open: AtomicBool,
}

impl MockHandle {
    fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotAttached)
        }
    }
}

impl HostHandle for MockHandle {
    fn base_address(&self) -> u32 {
        self.host.base
    }

    fn read_into(&self, address: u32, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        Ok(self.host.peek(address, buf))
    }

    fn write_from(&self, address: u32, bytes: &[u8]) -> Result<usize> {
        self.check_open()?;
        Ok(self.host.poke(address, bytes))
    }

    fn is_valid(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Locator that always finds the wrapped [`MockHost`].
pub struct MockLocator {
    host: Option<MockHost>,
}

impl MockLocator {
    pub fn new(host: MockHost) -> Self {
        Self { host: Some(host) }
    }

    /// A locator that never finds anything.
    pub fn empty() -> Self {
        Self { host: None }
    }
}

impl ProcessLocator for MockLocator {
    fn locate(&self, name: &str) -> Result<Box<dyn HostHandle>> {
        match &self.host {
            Some(host) => Ok(Box::new(host.handle())),
            None => Err(Error::ProcessNotFound(name.to_string())),
        }
    }
}
