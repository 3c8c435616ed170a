//! Per-router bookkeeping of completed floods.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug, Default)]
struct Inner {
    transits: BTreeMap<u64, Duration>,
    delivered: u64,
}

/// Records, for each packet a router originated, how long its flood took to cover the network.
///
/// A flood may complete on several branches. Only the first completion of a sequence is
/// recorded.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    inner: Arc<Mutex<Inner>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the transit time of `sequence`. Returns `false` if it was already recorded.
    pub fn record(&self, sequence: u64, transit: Duration) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.transits.contains_key(&sequence) {
            return false;
        }
        inner.transits.insert(sequence, transit);
        inner.delivered += 1;
        true
    }

    /// Number of packets delivered to every router.
    pub fn delivered(&self) -> u64 {
        self.inner.lock().unwrap().delivered
    }

    /// Transit time of each delivered packet, by sequence.
    pub fn transits(&self) -> BTreeMap<u64, Duration> {
        self.inner.lock().unwrap().transits.clone()
    }

    /// Mean transit time in ticks, or `None` if nothing was delivered.
    pub fn mean(&self) -> Option<f64> {
        let inner = self.inner.lock().unwrap();
        if inner.transits.is_empty() {
            return None;
        }
        let total: Duration = inner.transits.values().sum();
        Some(total.as_secs_f64() * 1_000.0 / inner.transits.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticks;

    #[test]
    fn test_first_completion_wins() {
        let ledger = Ledger::new();
        assert!(ledger.record(1, ticks(5)));
        assert!(!ledger.record(1, ticks(9)));
        assert!(ledger.record(2, ticks(7)));
        assert_eq!(ledger.delivered(), 2);
        assert_eq!(ledger.transits().get(&1), Some(&ticks(5)));
        assert_eq!(ledger.mean(), Some(6.0));
    }

    #[test]
    fn test_empty_mean() {
        let ledger = Ledger::new();
        assert_eq!(ledger.delivered(), 0);
        assert_eq!(ledger.mean(), None);
    }

    #[test]
    fn test_clones_share_state() {
        let ledger = Ledger::new();
        let other = ledger.clone();
        assert!(other.record(4, ticks(1)));
        assert!(!ledger.record(4, ticks(1)));
        assert_eq!(ledger.delivered(), 1);
    }
}
