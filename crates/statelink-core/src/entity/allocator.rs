//! Slot allocation inside the host's entity array.
//!
//! The host array has no free-list: a slot is free iff its type tag reads 0,
//! and allocation is a linear scan that always returns the lowest free index.
//! The directory lock is held for the whole of a create or remove so that two
//! callers can never claim the same slot.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::directory::RemotePlayerDirectory;
use super::record::{EntityRecord, PlayerUpdate, Vec3, vec3_bytes};
use crate::error::{Error, Result};
use crate::memory::MemoryBridge;
use crate::memory::layout::entity as layout;
use crate::offset::{OffsetTable, names};

/// Resolved position and shape of the host entity array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGeometry {
    pub base: u32,
    pub max_entities: u32,
    pub entity_size: u32,
}

impl SlotGeometry {
    pub fn resolve(bridge: &MemoryBridge, table: &OffsetTable) -> Result<Self> {
        let base = bridge.resolve(table, names::ENTITY_LIST_BASE)?;
        let max_entities = table.max_entities()?;
        let entity_size = table.entity_size()?;
        if (entity_size as usize) < layout::RECORD_LEN {
            return Err(Error::InvalidLayout(format!(
                "entitySize {:#x} is smaller than a record ({:#x})",
                entity_size,
                layout::RECORD_LEN
            )));
        }
        Ok(Self {
            base,
            max_entities,
            entity_size,
        })
    }

    pub fn slot_address(&self, index: u32) -> u32 {
        self.base.wrapping_add(index.wrapping_mul(self.entity_size))
    }
}

/// Borrowing view over the bridge, offset table and directory.
pub struct EntitySlotAllocator<'a> {
    bridge: &'a MemoryBridge,
    offsets: &'a Mutex<OffsetTable>,
    directory: &'a Mutex<RemotePlayerDirectory>,
}

impl<'a> EntitySlotAllocator<'a> {
    pub fn new(
        bridge: &'a MemoryBridge,
        offsets: &'a Mutex<OffsetTable>,
        directory: &'a Mutex<RemotePlayerDirectory>,
    ) -> Self {
        Self {
            bridge,
            offsets,
            directory,
        }
    }

    fn geometry(&self) -> Result<SlotGeometry> {
        // Copy out under the offsets lock; memory reads happen after it is released.
        let table = self.offsets.lock().clone();
        SlotGeometry::resolve(self.bridge, &table)
    }

    /// A slot is free when its tag reads 0 and no mirrored player owns it.
    /// The host may zero a tag we still track; such a slot is skipped.
    fn scan(
        &self,
        geometry: &SlotGeometry,
        directory: &RemotePlayerDirectory,
    ) -> Result<Option<u32>> {
        for index in 0..geometry.max_entities {
            let address = geometry.slot_address(index);
            if directory.owner_of(address).is_none()
                && self.bridge.read_u32(address + layout::TYPE_TAG)? == layout::TAG_FREE
            {
                return Ok(Some(address));
            }
        }
        Ok(None)
    }

    /// Lowest-indexed free slot, or `None` when the array is full.
    pub fn find_free_slot(&self) -> Result<Option<u32>> {
        let geometry = self.geometry()?;
        let directory = self.directory.lock();
        self.scan(&geometry, &directory)
    }

    /// Claim a slot for `player_id` and write a minimal record into it.
    pub fn create_player(&self, player_id: u32, position: Vec3) -> Result<u32> {
        let mut directory = self.directory.lock();
        if directory.contains(player_id) {
            return Err(Error::AlreadyExists(player_id));
        }

        let geometry = self.geometry()?;
        let address = self.scan(&geometry, &directory)?.ok_or_else(|| {
            warn!("No free entity slots for player {}", player_id);
            Error::SlotsExhausted
        })?;

        let record = EntityRecord::remote_player(player_id, position);
        self.bridge.write(address, &record.encode())?;
        if let Err(e) = directory.insert(player_id, address) {
            // Never leave an occupied slot that no entry points at
            self.bridge
                .write_u32(address + layout::TYPE_TAG, layout::TAG_FREE)?;
            return Err(e);
        }

        info!("Created remote player {} at {:#010x}", player_id, address);
        Ok(address)
    }

    /// Release the player's slot. Unknown ids are a no-op; returns whether
    /// anything was removed.
    pub fn remove_player(&self, player_id: u32) -> Result<bool> {
        let mut directory = self.directory.lock();
        let Some(address) = directory.get(player_id) else {
            debug!("Remove for unknown player {} ignored", player_id);
            return Ok(false);
        };

        self.bridge
            .write_u32(address + layout::TYPE_TAG, layout::TAG_FREE)?;
        directory.remove(player_id);

        info!("Removed remote player {}", player_id);
        Ok(true)
    }

    /// Overwrite the pose and state fields of a known player. Updates for
    /// unknown ids are dropped and not replayed later.
    pub fn update_player(&self, player_id: u32, update: &PlayerUpdate) -> Result<bool> {
        let directory = self.directory.lock();
        let Some(address) = directory.get(player_id) else {
            debug!("Update for unknown player {} dropped", player_id);
            return Ok(false);
        };

        let mut pose = [0u8; 2 * layout::VEC3 as usize];
        pose[..layout::VEC3 as usize].copy_from_slice(&vec3_bytes(update.position));
        pose[layout::VEC3 as usize..].copy_from_slice(&vec3_bytes(update.rotation));
        self.bridge.write(address + layout::POSITION, &pose)?;

        if let Some(velocity) = update.velocity {
            self.bridge
                .write(address + layout::VELOCITY, &vec3_bytes(velocity))?;
        }
        if let Some(animation) = update.animation {
            self.bridge
                .write_u32(address + layout::ANIMATION, animation as u32)?;
        }
        if let Some(health) = update.health {
            self.bridge.write_u32(address + layout::HEALTH, health as u32)?;
        }
        if let Some(armor) = update.armor {
            self.bridge.write_u32(address + layout::ARMOR, armor as u32)?;
        }
        Ok(true)
    }

    /// Read the local player's record through the player pointer.
    /// A null pointer (no player spawned yet) yields `None`.
    pub fn local_player(&self) -> Result<Option<EntityRecord>> {
        let pointer = {
            let table = self.offsets.lock();
            self.bridge.resolve(&table, names::PLAYER_PED_POINTER)?
        };
        let address = self.bridge.read_u32(pointer)?;
        if address == 0 {
            return Ok(None);
        }
        let bytes = self.bridge.read(address, layout::RECORD_LEN)?;
        Ok(EntityRecord::decode(&bytes))
    }

    /// Free every directory slot, clear the directory and drop the host handle.
    /// The directory lock is held throughout, so no create can slip in between
    /// the release and the detach. Write failures are logged; entries are
    /// dropped regardless. Returns the number of slots released.
    pub fn release_and_detach(&self) -> usize {
        let mut directory = self.directory.lock();
        let released = self.release_entries(&mut directory);
        self.bridge.detach();
        released
    }

    fn release_entries(&self, directory: &mut RemotePlayerDirectory) -> usize {
        let entries = directory.drain();
        for (player_id, address) in &entries {
            if let Err(e) = self
                .bridge
                .write_u32(address + layout::TYPE_TAG, layout::TAG_FREE)
            {
                warn!(
                    "Failed to release slot {:#010x} of player {}: {}",
                    address, player_id, e
                );
            }
        }
        if !entries.is_empty() {
            info!("Released {} remote player slots", entries.len());
        }
        entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MockHost;
    use crate::offset::OffsetEntry;

    const BASE: u32 = 0x0040_0000;
    const ARRAY: u32 = 0x1000;
    const SLOTS: u32 = 4;
    const SIZE: u32 = 0x80;

    struct Fixture {
        host: MockHost,
        bridge: MemoryBridge,
        offsets: Mutex<OffsetTable>,
        directory: Mutex<RemotePlayerDirectory>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut table = OffsetTable::default();
            table.set_offset(names::ENTITY_LIST_BASE, ARRAY);
            table.set_offset(names::PLAYER_PED_POINTER, 0x10);
            table.set(OffsetEntry::new(names::MAX_ENTITIES, 0, 4, SLOTS));
            table.set(OffsetEntry::new(names::ENTITY_SIZE, 0, 4, SIZE));

            let host = MockHost::builder(BASE)
                .region(BASE, 0x20)
                .region(BASE + ARRAY, (SLOTS * SIZE) as usize + SIZE as usize)
                .build();
            let bridge = MemoryBridge::new();
            bridge.attach(Box::new(host.handle()));

            Self {
                host,
                bridge,
                offsets: Mutex::new(table),
                directory: Mutex::new(RemotePlayerDirectory::new()),
            }
        }

        fn allocator(&self) -> EntitySlotAllocator<'_> {
            EntitySlotAllocator::new(&self.bridge, &self.offsets, &self.directory)
        }

        fn slot(&self, index: u32) -> u32 {
            BASE + ARRAY + index * SIZE
        }
    }

    #[test]
    fn test_find_free_slot_returns_lowest_index() {
        let fx = Fixture::new();
        fx.host.poke_u32(fx.slot(0), 1);
        fx.host.poke_u32(fx.slot(2), 1);
        assert_eq!(fx.allocator().find_free_slot().unwrap(), Some(fx.slot(1)));
    }

    #[test]
    fn test_fill_all_slots_then_exhausted() {
        let fx = Fixture::new();
        let alloc = fx.allocator();
        for i in 0..SLOTS {
            let address = alloc.create_player(100 + i, [0.0; 3]).unwrap();
            assert_eq!(address, fx.slot(i));
        }
        assert_eq!(alloc.find_free_slot().unwrap(), None);
        assert!(matches!(
            alloc.create_player(999, [0.0; 3]),
            Err(Error::SlotsExhausted)
        ));
        assert_eq!(fx.directory.lock().len(), SLOTS as usize);
    }

    #[test]
    fn test_create_writes_record() {
        let fx = Fixture::new();
        let address = fx.allocator().create_player(7, [10.0, 20.0, 30.0]).unwrap();
        assert_eq!(fx.host.peek_u32(address), layout::TAG_PED);
        assert_eq!(fx.host.peek_u32(address + layout::PLAYER_ID), 7);
        assert_eq!(fx.host.peek_f32(address + layout::POSITION + 8), 30.0);
        assert_eq!(fx.host.peek_u32(address + layout::HEALTH), 100);
    }

    #[test]
    fn test_duplicate_create_leaves_prior_slot() {
        let fx = Fixture::new();
        let alloc = fx.allocator();
        let first = alloc.create_player(7, [1.0, 1.0, 1.0]).unwrap();
        assert!(matches!(
            alloc.create_player(7, [2.0, 2.0, 2.0]),
            Err(Error::AlreadyExists(7))
        ));
        assert_eq!(fx.host.peek_f32(first + layout::POSITION), 1.0);
        // Next slot was not claimed
        assert_eq!(alloc.find_free_slot().unwrap(), Some(fx.slot(1)));
    }

    #[test]
    fn test_remove_frees_slot_and_is_idempotent() {
        let fx = Fixture::new();
        let alloc = fx.allocator();
        let address = alloc.create_player(7, [0.0; 3]).unwrap();
        assert!(alloc.remove_player(7).unwrap());
        assert_eq!(fx.host.peek_u32(address), layout::TAG_FREE);
        assert!(!alloc.remove_player(7).unwrap());
        assert!(!alloc.remove_player(999).unwrap());
        assert_eq!(alloc.find_free_slot().unwrap(), Some(fx.slot(0)));
    }

    #[test]
    fn test_update_touches_only_state_fields() {
        let fx = Fixture::new();
        let alloc = fx.allocator();
        let address = alloc.create_player(7, [0.0; 3]).unwrap();
        fx.host.poke_u32(address + layout::MODEL_ID, 42);

        let update = PlayerUpdate {
            position: [5.0, 6.0, 7.0],
            rotation: [0.5, 0.0, 1.5],
            velocity: Some([1.0, 0.0, 0.0]),
            animation: Some(3),
            health: Some(80),
            armor: Some(25),
        };
        assert!(alloc.update_player(7, &update).unwrap());

        assert_eq!(fx.host.peek_f32(address + layout::POSITION + 4), 6.0);
        assert_eq!(fx.host.peek_f32(address + layout::ROTATION + 8), 1.5);
        assert_eq!(fx.host.peek_f32(address + layout::VELOCITY), 1.0);
        assert_eq!(fx.host.peek_u32(address + layout::ANIMATION), 3);
        assert_eq!(fx.host.peek_u32(address + layout::HEALTH), 80);
        assert_eq!(fx.host.peek_u32(address + layout::ARMOR), 25);
        assert_eq!(fx.host.peek_u32(address + layout::TYPE_TAG), layout::TAG_PED);
        assert_eq!(fx.host.peek_u32(address + layout::MODEL_ID), 42);
        assert_eq!(fx.host.peek_u32(address + layout::PLAYER_ID), 7);
    }

    #[test]
    fn test_update_unknown_player_is_dropped() {
        let fx = Fixture::new();
        let alloc = fx.allocator();
        let update = PlayerUpdate::pose([1.0; 3], [0.0; 3]);
        assert!(!alloc.update_player(5, &update).unwrap());
        // Creating later does not replay the dropped state
        let address = alloc.create_player(5, [9.0; 3]).unwrap();
        assert_eq!(fx.host.peek_f32(address + layout::POSITION), 9.0);
    }

    #[test]
    fn test_local_player_follows_pointer() {
        let fx = Fixture::new();
        assert_eq!(fx.allocator().local_player().unwrap(), None);

        let local = fx.slot(SLOTS);
        let record = EntityRecord {
            type_tag: layout::TAG_PED,
            position: [1.0, 2.0, 3.0],
            health: 55,
            ..Default::default()
        };
        fx.host.poke(local, &record.encode());
        fx.host.poke_u32(BASE + 0x10, local);

        let read = fx.allocator().local_player().unwrap().unwrap();
        assert_eq!(read.position, [1.0, 2.0, 3.0]);
        assert_eq!(read.health, 55);
    }

    #[test]
    fn test_entity_size_smaller_than_record_rejected() {
        let fx = Fixture::new();
        fx.offsets
            .lock()
            .set(OffsetEntry::new(names::ENTITY_SIZE, 0, 4, 0x10));
        assert!(matches!(
            fx.allocator().find_free_slot(),
            Err(Error::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_release_and_detach_frees_every_slot() {
        let fx = Fixture::new();
        let alloc = fx.allocator();
        let a = alloc.create_player(1, [0.0; 3]).unwrap();
        let b = alloc.create_player(2, [0.0; 3]).unwrap();
        assert_eq!(alloc.release_and_detach(), 2);
        assert_eq!(fx.host.peek_u32(a), layout::TAG_FREE);
        assert_eq!(fx.host.peek_u32(b), layout::TAG_FREE);
        assert!(fx.directory.lock().is_empty());
        assert!(!fx.bridge.is_attached());
    }

    #[test]
    fn test_no_slot_survives_a_concurrent_detach() {
        let fx = Fixture::new();
        std::thread::scope(|scope| {
            let creator = scope.spawn(|| {
                let alloc = fx.allocator();
                for player_id in 0.. {
                    match alloc.create_player(player_id, [0.0; 3]) {
                        Ok(_) => {
                            alloc.remove_player(player_id).unwrap();
                        }
                        Err(Error::NotAttached) => break,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            });
            std::thread::sleep(std::time::Duration::from_millis(5));
            fx.allocator().release_and_detach();
            creator.join().unwrap();
        });

        assert!(fx.directory.lock().is_empty());
        for index in 0..SLOTS {
            assert_eq!(fx.host.peek_u32(fx.slot(index)), layout::TAG_FREE);
        }
    }

    #[test]
    fn test_slot_zeroed_by_host_is_not_reused_while_owned() {
        let fx = Fixture::new();
        let alloc = fx.allocator();
        let first = alloc.create_player(1, [1.0; 3]).unwrap();
        assert_eq!(first, fx.slot(0));

        // The host clears the tag of a slot we still mirror into
        fx.host.poke_u32(first + layout::TYPE_TAG, layout::TAG_FREE);

        let second = alloc.create_player(2, [2.0; 3]).unwrap();
        assert_eq!(second, fx.slot(1));
        assert_eq!(fx.host.peek_u32(first + layout::PLAYER_ID), 1);
        assert_eq!(fx.directory.lock().owner_of(first), Some(1));
        assert_eq!(fx.allocator().find_free_slot().unwrap(), Some(fx.slot(2)));
    }

    #[test]
    fn test_not_attached_propagates() {
        let fx = Fixture::new();
        fx.bridge.detach();
        assert!(matches!(
            fx.allocator().create_player(1, [0.0; 3]),
            Err(Error::NotAttached)
        ));
        assert!(fx.directory.lock().is_empty());
    }
}
