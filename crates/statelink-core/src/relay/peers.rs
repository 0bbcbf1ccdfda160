use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Hub-side address book: player id to the transport address it connected from.
#[derive(Debug, Default)]
pub struct PeerBook {
    peers: BTreeMap<u32, SocketAddr>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address` under `player_id`, replacing any earlier address.
    /// Returns `true` if the address was not known before.
    pub fn register(&mut self, player_id: u32, address: SocketAddr) -> bool {
        let is_new = !self.contains_address(address);
        self.peers.insert(player_id, address);
        is_new
    }

    /// Drop every entry that points at `address`, returning the removed ids.
    pub fn deregister(&mut self, address: SocketAddr) -> Vec<u32> {
        let removed: Vec<u32> = self
            .peers
            .iter()
            .filter(|(_, a)| **a == address)
            .map(|(&id, _)| id)
            .collect();
        for id in &removed {
            self.peers.remove(id);
        }
        removed
    }

    pub fn contains_address(&self, address: SocketAddr) -> bool {
        self.peers.values().any(|a| *a == address)
    }

    /// Every distinct registered address except `exclude`.
    pub fn targets(&self, exclude: Option<SocketAddr>) -> Vec<SocketAddr> {
        let mut targets: Vec<SocketAddr> = self
            .peers
            .values()
            .copied()
            .filter(|a| Some(*a) != exclude)
            .collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_targets_exclude_sender() {
        let mut book = PeerBook::new();
        book.register(1, addr(1001));
        book.register(2, addr(1002));
        book.register(3, addr(1003));

        let targets = book.targets(Some(addr(1001)));
        assert_eq!(targets, vec![addr(1002), addr(1003)]);
        assert_eq!(book.targets(None).len(), 3);
    }

    #[test]
    fn test_exclusion_compares_addresses_not_ids() {
        let mut book = PeerBook::new();
        book.register(1, addr(1001));
        book.register(2, addr(1002));
        // Same id from a different port is another transport endpoint
        let targets = book.targets(Some(SocketAddr::from(([127, 0, 0, 2], 1001))));
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_reconnect_replaces_address() {
        let mut book = PeerBook::new();
        assert!(book.register(1, addr(1001)));
        assert!(!book.register(1, addr(1001)));
        assert!(book.register(1, addr(2001)));
        assert_eq!(book.len(), 1);
        assert!(!book.contains_address(addr(1001)));
    }

    #[test]
    fn test_deregister_by_address() {
        let mut book = PeerBook::new();
        book.register(1, addr(1001));
        book.register(2, addr(1002));
        assert_eq!(book.deregister(addr(1001)), vec![1]);
        assert!(book.deregister(addr(1001)).is_empty());
        assert_eq!(book.targets(None), vec![addr(1002)]);
    }
}
