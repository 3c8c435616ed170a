//! Precomputed shortest paths consulted by the RPF check.

use crate::RouterId;
use std::{collections::BTreeMap, time::Duration};

/// The last hop and total cost of the shortest path from a source to an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    /// Router that precedes the observer on the shortest path.
    pub predecessor: RouterId,

    /// Sum of the propagation delays along the shortest path.
    pub cost: Duration,
}

/// Answers shortest-path queries for pairs of routers.
pub trait Oracle: Send + Sync + 'static {
    /// Returns the shortest route from `source` as observed at `observer`, if one is known.
    fn route(&self, source: RouterId, observer: RouterId) -> Option<Route>;
}

/// A static, in-memory routing table.
#[derive(Clone, Debug, Default)]
pub struct Table {
    routes: BTreeMap<(RouterId, RouterId), Route>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the route from `source` as observed at `observer`.
    pub fn insert(&mut self, source: RouterId, observer: RouterId, route: Route) -> Option<Route> {
        self.routes.insert((source, observer), route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Oracle for Table {
    fn route(&self, source: RouterId, observer: RouterId) -> Option<Route> {
        self.routes.get(&(source, observer)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticks;

    #[test]
    fn test_table_is_directional() {
        let mut table = Table::new();
        assert!(table.is_empty());
        let route = Route {
            predecessor: 8,
            cost: ticks(6),
        };
        assert_eq!(table.insert(1, 0, route), None);
        assert_eq!(table.route(1, 0), Some(route));
        assert_eq!(table.route(0, 1), None);
        assert_eq!(table.len(), 1);
    }
}
