use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};

/// Symbolic offset names
pub mod names {
    pub const PLAYER_PED_POINTER: &str = "playerPedPointer";
    pub const ENTITY_LIST_BASE: &str = "entityListBase";
    pub const VEHICLE_ARRAY_BASE: &str = "vehicleArrayBase";
    pub const WORLD_POINTER: &str = "worldPointer";
    pub const GAME_STATE_POINTER: &str = "gameStatePointer";
    pub const MAX_ENTITIES: &str = "maxEntities";
    pub const ENTITY_SIZE: &str = "entitySize";
}

/// Which host build an offset table belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum OffsetTableId {
    #[strum(to_string = "retail10", serialize = "retail")]
    Retail10,
    #[strum(serialize = "steam")]
    Steam,
    #[default]
    #[strum(serialize = "unknown")]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetEntry {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    /// Configuration-like scalar (slot count, slot size); 0 for addresses.
    #[serde(default)]
    pub cached_value: u32,
}

impl OffsetEntry {
    pub fn new(name: &str, offset: u32, size: u32, cached_value: u32) -> Self {
        Self {
            name: name.to_string(),
            offset,
            size,
            cached_value,
        }
    }
}

/// Named symbolic addresses into host memory, for one host version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetTable {
    pub version: OffsetTableId,
    entries: BTreeMap<String, OffsetEntry>,
}

impl Default for OffsetTable {
    fn default() -> Self {
        let mut table = Self {
            version: OffsetTableId::Unknown,
            entries: BTreeMap::new(),
        };
        table.set(OffsetEntry::new(names::PLAYER_PED_POINTER, 0x00B7_CD98, 4, 0));
        table.set(OffsetEntry::new(names::ENTITY_LIST_BASE, 0x00B7_4490, 4, 0));
        table.set(OffsetEntry::new(names::VEHICLE_ARRAY_BASE, 0x00B7_4494, 4, 0));
        table.set(OffsetEntry::new(names::WORLD_POINTER, 0x00B7_9594, 4, 0));
        table.set(OffsetEntry::new(names::GAME_STATE_POINTER, 0x00B7_CB54, 4, 0));
        table.set(OffsetEntry::new(names::MAX_ENTITIES, 0x0000_0190, 4, 400));
        table.set(OffsetEntry::new(names::ENTITY_SIZE, 0x0000_0198, 4, 0x198));
        table
    }
}

impl OffsetTable {
    /// Default table adjusted for a detected host build.
    pub fn for_version(id: OffsetTableId) -> Self {
        let mut table = Self::default();
        table.version = id;
        if id == OffsetTableId::Steam {
            table.set_offset(names::PLAYER_PED_POINTER, 0x00C1_D0F8);
            table.set_offset(names::ENTITY_LIST_BASE, 0x00C1_C690);
            table.set_offset(names::VEHICLE_ARRAY_BASE, 0x00C1_C694);
        }
        table
    }

    pub fn get(&self, name: &str) -> Result<&OffsetEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::UnknownOffset(name.to_string()))
    }

    pub fn offset(&self, name: &str) -> Result<u32> {
        self.get(name).map(|e| e.offset)
    }

    pub fn cached_value(&self, name: &str) -> Result<u32> {
        self.get(name).map(|e| e.cached_value)
    }

    /// Insert or replace an entry; keys stay unique.
    pub fn set(&mut self, entry: OffsetEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Change the offset of an existing entry, keeping its size and cached value.
    pub fn set_offset(&mut self, name: &str, offset: u32) {
        self.entries
            .entry(name.to_string())
            .and_modify(|e| e.offset = offset)
            .or_insert_with(|| OffsetEntry::new(name, offset, 4, 0));
    }

    pub fn max_entities(&self) -> Result<u32> {
        self.cached_value(names::MAX_ENTITIES)
    }

    pub fn entity_size(&self) -> Result<u32> {
        self.cached_value(names::ENTITY_SIZE)
    }

    pub fn entries(&self) -> impl Iterator<Item = &OffsetEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
