//! The `Core` context value that owns every shared component.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::config::CoreConfig;
use crate::entity::{EntitySlotAllocator, RemotePlayerDirectory};
use crate::error::Result;
use crate::memory::{MemoryBridge, ProcessLocator};
use crate::offset::{OffsetTable, OffsetTableId, VersionDetector, load_offsets};
use crate::relay::{RelayStats, RelayStatsSnapshot};
use crate::shutdown::ShutdownSignal;

/// Result of a successful attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached(OffsetTableId),
    AlreadyAttached,
}

#[derive(Debug, Clone, Serialize)]
pub struct OffsetReport {
    pub offset: String,
    pub size: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub cached_value: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub attached: bool,
    pub player_count: usize,
    pub local_player_id: u32,
    pub version: OffsetTableId,
    pub offsets: BTreeMap<String, OffsetReport>,
    pub relay: RelayStatsSnapshot,
}

/// Owns the bridge, the offset table and the player directory, each behind
/// its own lock, plus the shutdown signal shared by every loop.
///
/// Constructed once by the caller and shared as `Arc<Core>` with the relay and
/// the control server.
pub struct Core {
    config: CoreConfig,
    bridge: MemoryBridge,
    offsets: Mutex<OffsetTable>,
    directory: Mutex<RemotePlayerDirectory>,
    shutdown: Arc<ShutdownSignal>,
    relay_stats: RelayStats,
    locator: Box<dyn ProcessLocator>,
    detector: Box<dyn VersionDetector>,
    offsets_override: Option<OffsetTable>,
    // Serializes attach/detach so two Init requests cannot race.
    lifecycle: Mutex<()>,
}

impl Core {
    /// Build a detached core. Loads the offset override named in the config, if any.
    pub fn new(
        config: CoreConfig,
        locator: Box<dyn ProcessLocator>,
        detector: Box<dyn VersionDetector>,
    ) -> Result<Self> {
        let offsets_override = match &config.offsets_path {
            Some(path) => {
                let table = load_offsets(path)?;
                info!(
                    "Loaded offset override from {} ({} entries)",
                    path.display(),
                    table.len()
                );
                Some(table)
            }
            None => None,
        };

        Ok(Self {
            config,
            bridge: MemoryBridge::new(),
            offsets: Mutex::new(OffsetTable::default()),
            directory: Mutex::new(RemotePlayerDirectory::new()),
            shutdown: Arc::new(ShutdownSignal::new()),
            relay_stats: RelayStats::new(),
            locator,
            detector,
            offsets_override,
            lifecycle: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn local_player_id(&self) -> u32 {
        self.config.local_player_id()
    }

    pub fn bridge(&self) -> &MemoryBridge {
        &self.bridge
    }

    pub fn allocator(&self) -> EntitySlotAllocator<'_> {
        EntitySlotAllocator::new(&self.bridge, &self.offsets, &self.directory)
    }

    pub fn offsets(&self) -> OffsetTable {
        self.offsets.lock().clone()
    }

    pub fn player_count(&self) -> usize {
        self.directory.lock().len()
    }

    /// Slot address mirrored for `player_id`.
    pub fn player_slot(&self, player_id: u32) -> Option<u32> {
        self.directory.lock().get(player_id)
    }

    pub fn relay_stats(&self) -> &RelayStats {
        &self.relay_stats
    }

    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_attached(&self) -> bool {
        self.bridge.is_attached()
    }

    /// Locate the host, detect its version and install the matching offsets.
    pub fn attach(&self) -> Result<AttachOutcome> {
        let _lifecycle = self.lifecycle.lock();
        if self.bridge.is_attached() {
            return Ok(AttachOutcome::AlreadyAttached);
        }

        let handle = self.locator.locate(&self.config.process_name)?;
        let version = self.detector.detect(handle.as_ref())?;
        let table = match &self.offsets_override {
            Some(table) => table.clone(),
            None => OffsetTable::for_version(version),
        };
        info!(
            "Detected host version {} (offsets: {})",
            version, table.version
        );

        *self.offsets.lock() = table;
        self.bridge.attach(handle);
        Ok(AttachOutcome::Attached(version))
    }

    /// Release every mirrored slot, then the host handle.
    pub fn detach(&self) {
        let _lifecycle = self.lifecycle.lock();
        if !self.bridge.is_attached() {
            self.directory.lock().drain();
            return;
        }
        self.allocator().release_and_detach();
    }

    pub fn status(&self) -> StatusReport {
        let table = self.offsets();
        let offsets = table
            .entries()
            .map(|e| {
                (
                    e.name.clone(),
                    OffsetReport {
                        offset: format!("{:#010x}", e.offset),
                        size: e.size,
                        cached_value: e.cached_value,
                    },
                )
            })
            .collect();

        StatusReport {
            attached: self.is_attached(),
            player_count: self.player_count(),
            local_player_id: self.local_player_id(),
            version: table.version,
            offsets,
            relay: self.relay_stats.snapshot(),
        }
    }
}
