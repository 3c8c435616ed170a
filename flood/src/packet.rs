//! The unit of work flowing through a flood.

use crate::{ledger::Ledger, LinkId, RouterId};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

/// Routers touched by any copy of one flood generation.
///
/// Clones share the same set.
#[derive(Clone, Debug, Default)]
pub struct Visited(Arc<Mutex<BTreeSet<RouterId>>>);

impl Visited {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `router` as touched. Returns `false` if it already was.
    pub fn insert(&self, router: RouterId) -> bool {
        self.0.lock().unwrap().insert(router)
    }

    pub fn contains(&self, router: RouterId) -> bool {
        self.0.lock().unwrap().contains(&router)
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }

    /// Copy of the routers touched so far.
    pub fn snapshot(&self) -> BTreeSet<RouterId> {
        self.0.lock().unwrap().clone()
    }
}

/// One copy of a flooded packet.
///
/// A packet is identified by `(origin, sequence)`. Cloning a packet yields an independent
/// copy that shares the [Visited] set and the origin's [Ledger] with its siblings but owns
/// its own `path`.
#[derive(Clone, Debug)]
pub struct Packet {
    pub origin: RouterId,
    pub sequence: u64,

    /// Virtual time at which the origin created the packet.
    pub created: SystemTime,

    pub visited: Visited,

    /// Routers traversed by this copy, in order.
    pub path: Vec<RouterId>,

    /// Link this copy arrived on (`None` at the origin).
    pub previous: Option<LinkId>,

    /// Sum of the propagation delays traversed by this copy.
    pub cost: Duration,

    ledger: Ledger,
}

impl Packet {
    /// Originate a packet that reports its completion to `ledger`.
    pub fn new(origin: RouterId, sequence: u64, created: SystemTime, ledger: Ledger) -> Self {
        Self {
            origin,
            sequence,
            created,
            visited: Visited::new(),
            path: Vec::new(),
            previous: None,
            cost: Duration::ZERO,
            ledger,
        }
    }

    /// Create the copy sent out on `link`.
    pub fn forward(&self, link: LinkId) -> Self {
        let mut copy = self.clone();
        copy.previous = Some(link);
        copy
    }

    /// Router this copy was relayed by before reaching the last router in `path`.
    pub fn predecessor(&self) -> Option<RouterId> {
        self.path.iter().rev().nth(1).copied()
    }

    /// Report that the flood covered every router at `now`.
    ///
    /// Returns `false` if another branch already completed the flood.
    pub fn complete(&self, now: SystemTime) -> bool {
        let transit = now.duration_since(self.created).unwrap_or_default();
        self.ledger.record(self.sequence, transit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticks;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_copies_share_visited_but_not_path() {
        let mut packet = Packet::new(0, 1, UNIX_EPOCH, Ledger::new());
        packet.visited.insert(0);
        packet.path.push(0);

        let mut left = packet.forward(3);
        let right = packet.forward(4);
        assert_eq!(left.previous, Some(3));
        assert_eq!(right.previous, Some(4));

        // Touching a router on one branch is observed by every sibling
        left.visited.insert(6);
        assert!(right.visited.contains(6));
        assert!(packet.visited.contains(6));
        assert_eq!(right.visited.len(), 2);

        // Extending one branch's path is not
        left.path.push(6);
        assert_eq!(left.path, vec![0, 6]);
        assert_eq!(right.path, vec![0]);
        assert_eq!(packet.path, vec![0]);
    }

    #[test]
    fn test_predecessor() {
        let mut packet = Packet::new(2, 1, UNIX_EPOCH, Ledger::new());
        assert_eq!(packet.predecessor(), None);
        packet.path.push(2);
        assert_eq!(packet.predecessor(), None);
        packet.path.push(5);
        assert_eq!(packet.predecessor(), Some(2));
        packet.path.push(6);
        assert_eq!(packet.predecessor(), Some(5));
    }

    #[test]
    fn test_complete_once() {
        let ledger = Ledger::new();
        let packet = Packet::new(0, 3, UNIX_EPOCH + ticks(10), ledger.clone());
        let sibling = packet.forward(1);
        assert!(packet.complete(UNIX_EPOCH + ticks(15)));
        assert!(!sibling.complete(UNIX_EPOCH + ticks(20)));
        assert_eq!(ledger.transits().get(&3), Some(&ticks(5)));
        assert_eq!(ledger.delivered(), 1);
    }
}
