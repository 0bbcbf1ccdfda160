use std::collections::HashMap;

use crate::error::{Error, Result};

/// Logical peer id to host slot address.
///
/// Both directions are indexed so that neither a player nor a slot can appear
/// in more than one entry.
#[derive(Debug, Default)]
pub struct RemotePlayerDirectory {
    by_player: HashMap<u32, u32>,
    by_slot: HashMap<u32, u32>,
}

impl RemotePlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, player_id: u32, address: u32) -> Result<()> {
        if self.by_player.contains_key(&player_id) {
            return Err(Error::AlreadyExists(player_id));
        }
        if self.by_slot.contains_key(&address) {
            return Err(Error::SlotInUse(address));
        }
        self.by_player.insert(player_id, address);
        self.by_slot.insert(address, player_id);
        Ok(())
    }

    pub fn remove(&mut self, player_id: u32) -> Option<u32> {
        let address = self.by_player.remove(&player_id)?;
        self.by_slot.remove(&address);
        Some(address)
    }

    pub fn get(&self, player_id: u32) -> Option<u32> {
        self.by_player.get(&player_id).copied()
    }

    pub fn owner_of(&self, address: u32) -> Option<u32> {
        self.by_slot.get(&address).copied()
    }

    pub fn contains(&self, player_id: u32) -> bool {
        self.by_player.contains_key(&player_id)
    }

    pub fn len(&self) -> usize {
        self.by_player.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_player.is_empty()
    }

    /// Entries sorted by player id.
    pub fn entries(&self) -> Vec<(u32, u32)> {
        let mut entries: Vec<_> = self.by_player.iter().map(|(&p, &a)| (p, a)).collect();
        entries.sort_unstable();
        entries
    }

    /// Remove and return every entry.
    pub fn drain(&mut self) -> Vec<(u32, u32)> {
        let entries = self.entries();
        self.by_player.clear();
        self.by_slot.clear();
        entries
    }
}
