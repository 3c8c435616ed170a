//! Describe a topology (routers, links, and shortest routes) and validate it.

use crate::{
    oracle::{Route, Table},
    ticks, Error, LinkId, RouterId,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    time::Duration,
};

/// Bundled 10-router topology with its complete routing table.
const REFERENCE: &str = include_str!("../assets/reference.json");

/// A router and its traffic profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub id: RouterId,

    /// Mean delay between originated packets, in ticks.
    pub mean: f64,

    /// Number of packets to originate.
    pub packets: u64,

    /// Attached links, in forwarding order.
    ///
    /// If omitted, every link touching the router is attached in link order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<LinkId>>,
}

/// An undirected link between two routers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub id: LinkId,
    pub endpoints: [RouterId; 2],

    /// Propagation delay, in ticks.
    pub delay: i64,
}

impl LinkConfig {
    fn touches(&self, router: RouterId) -> bool {
        self.endpoints.contains(&router)
    }
}

/// Entry of the routing table: the shortest path from `source` as seen by `observer`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub source: RouterId,
    pub observer: RouterId,
    pub predecessor: RouterId,

    /// Cost of the path, in ticks.
    pub cost: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub routers: Vec<RouterConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Topology {
    /// Parse a topology from JSON (without validating it).
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a topology from a JSON file (without validating it).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// The bundled reference topology: 10 routers and 14 links, each router originating
    /// 10 packets with a mean inter-arrival time of 20 ticks.
    pub fn reference() -> Self {
        Self::from_json(REFERENCE).expect("reference topology is malformed")
    }

    /// Replace the packet budget of every router.
    pub fn with_packets(mut self, packets: u64) -> Self {
        for router in self.routers.iter_mut() {
            router.packets = packets;
        }
        self
    }

    /// Replace the mean inter-arrival time of every router.
    pub fn with_mean(mut self, mean: f64) -> Self {
        for router in self.routers.iter_mut() {
            router.mean = mean;
        }
        self
    }

    /// Links attached to `router`, in forwarding order.
    pub fn adjacency(&self, router: &RouterConfig) -> Vec<LinkId> {
        match &router.links {
            Some(links) => links.clone(),
            None => self
                .links
                .iter()
                .filter(|link| link.touches(router.id))
                .map(|link| link.id)
                .collect(),
        }
    }

    /// Routing table described by `routes`.
    pub fn oracle(&self) -> Table {
        let mut table = Table::new();
        for route in &self.routes {
            table.insert(
                route.source,
                route.observer,
                Route {
                    predecessor: route.predecessor,
                    cost: ticks(route.cost.max(0) as u64),
                },
            );
        }
        table
    }

    /// Ensure the topology is well-formed and its routing table covers every pair of
    /// connected routers.
    pub fn validate(&self) -> Result<(), Error> {
        // Routers
        if self.routers.is_empty() {
            return Err(Error::NoRouters);
        }
        let mut routers = BTreeSet::new();
        for router in &self.routers {
            if !routers.insert(router.id) {
                return Err(Error::DuplicateRouter(router.id));
            }
            if !router.mean.is_finite() || router.mean < 0.0 {
                return Err(Error::InvalidMean(router.id, router.mean));
            }
        }

        // With no duplicates, any id at or beyond the router count leaves a gap
        let count = self.routers.len();
        if let Some(id) = routers.iter().find(|id| **id as usize >= count) {
            return Err(Error::RouterOutOfRange(count, *id));
        }

        // Links
        let mut links = BTreeMap::new();
        for link in &self.links {
            if links.insert(link.id, link).is_some() {
                return Err(Error::DuplicateLink(link.id));
            }
            for endpoint in link.endpoints {
                if !routers.contains(&endpoint) {
                    return Err(Error::UnknownEndpoint(link.id, endpoint));
                }
            }
            let [a, b] = link.endpoints;
            if a == b {
                return Err(Error::SelfLoop(link.id, a));
            }
            if link.delay < 0 {
                return Err(Error::NegativeDelay(link.id, link.delay));
            }
        }

        // Adjacency
        for router in &self.routers {
            let Some(adjacency) = &router.links else {
                continue;
            };
            let mut seen = BTreeSet::new();
            for id in adjacency {
                let Some(link) = links.get(id) else {
                    return Err(Error::UnknownLink(router.id, *id));
                };
                if !link.touches(router.id) {
                    return Err(Error::ForeignLink(router.id, *id));
                }
                if !seen.insert(*id) {
                    return Err(Error::DuplicateAdjacency(router.id, *id));
                }
            }
        }

        // Routes
        let mut routes = BTreeSet::new();
        for route in &self.routes {
            for router in [route.source, route.observer, route.predecessor] {
                if !routers.contains(&router) {
                    return Err(Error::UnknownRouteRouter(
                        route.source,
                        route.observer,
                        router,
                    ));
                }
            }
            if route.cost < 0 {
                return Err(Error::NegativeCost(
                    route.source,
                    route.observer,
                    route.cost,
                ));
            }
            if !routes.insert((route.source, route.observer)) {
                return Err(Error::DuplicateRoute(route.source, route.observer));
            }
        }

        // Every pair of connected routers must have a route
        let components = self.components();
        for source in &routers {
            for observer in &routers {
                if source == observer || components[source] != components[observer] {
                    continue;
                }
                if !routes.contains(&(*source, *observer)) {
                    return Err(Error::MissingRoute(*source, *observer));
                }
            }
        }
        Ok(())
    }

    /// Label each router with the smallest router id it is connected to.
    fn components(&self) -> BTreeMap<RouterId, RouterId> {
        let mut components: BTreeMap<RouterId, RouterId> =
            self.routers.iter().map(|router| (router.id, router.id)).collect();

        // Relax until no label changes (topologies are small)
        let mut changed = true;
        while changed {
            changed = false;
            for link in &self.links {
                let [a, b] = link.endpoints;
                let (Some(&la), Some(&lb)) = (components.get(&a), components.get(&b)) else {
                    continue;
                };
                let label = la.min(lb);
                for router in [a, b] {
                    if components[&router] != label {
                        components.insert(router, label);
                        changed = true;
                    }
                }
            }
        }
        components
    }

    /// Propagation delay of a link, in virtual time.
    pub(crate) fn delay(link: &LinkConfig) -> Duration {
        ticks(link.delay.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> Topology {
        Topology::from_json(
            r#"{
                "routers": [
                    { "id": 0, "mean": 1.0, "packets": 1 },
                    { "id": 1, "mean": 1.0, "packets": 1 }
                ],
                "links": [{ "id": 7, "endpoints": [0, 1], "delay": 5 }],
                "routes": [
                    { "source": 0, "observer": 1, "predecessor": 0, "cost": 5 },
                    { "source": 1, "observer": 0, "predecessor": 1, "cost": 5 }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_reference() {
        let topology = Topology::reference();
        topology.validate().unwrap();
        assert_eq!(topology.routers.len(), 10);
        assert_eq!(topology.links.len(), 14);
        assert_eq!(topology.routes.len(), 90);
        assert!(topology.routers.iter().all(|r| r.packets == 10));
        assert!(topology.routers.iter().all(|r| r.mean == 20.0));
        assert_eq!(topology.adjacency(&topology.routers[8]), vec![1, 13, 11]);
        assert_eq!(
            topology.oracle().len(),
            topology.routes.len(),
            "routes should be unique"
        );
    }

    #[test]
    fn test_overrides() {
        let topology = Topology::reference().with_packets(3).with_mean(0.0);
        assert!(topology.routers.iter().all(|r| r.packets == 3));
        assert!(topology.routers.iter().all(|r| r.mean == 0.0));
        topology.validate().unwrap();
    }

    #[test]
    fn test_default_adjacency() {
        let mut topology = line();
        topology.validate().unwrap();
        assert_eq!(topology.adjacency(&topology.routers[0]), vec![7]);
        topology.routers[0].links = Some(Vec::new());
        assert!(topology.adjacency(&topology.routers[0]).is_empty());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            Topology::from_json("{ \"routers\": 3 }"),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            Topology::load("/nonexistent/topology.json"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_invalid_routers() {
        let mut topology = line();
        topology.routers.clear();
        assert!(matches!(topology.validate(), Err(Error::NoRouters)));

        let mut topology = line();
        topology.routers[1].id = 0;
        assert!(matches!(
            topology.validate(),
            Err(Error::DuplicateRouter(0))
        ));

        let mut topology = line();
        topology.routers[1].id = 2;
        topology.links.clear();
        topology.routes.clear();
        assert!(matches!(
            topology.validate(),
            Err(Error::RouterOutOfRange(2, 2))
        ));

        let mut topology = line();
        topology.routers[0].mean = -1.0;
        assert!(matches!(
            topology.validate(),
            Err(Error::InvalidMean(0, _))
        ));

        let mut topology = line();
        topology.routers[1].mean = f64::NAN;
        assert!(matches!(
            topology.validate(),
            Err(Error::InvalidMean(1, _))
        ));
    }

    #[test]
    fn test_invalid_links() {
        let mut topology = line();
        topology.links.push(topology.links[0].clone());
        assert!(matches!(topology.validate(), Err(Error::DuplicateLink(7))));

        let mut topology = line();
        topology.links[0].endpoints = [0, 4];
        assert!(matches!(
            topology.validate(),
            Err(Error::UnknownEndpoint(7, 4))
        ));

        let mut topology = line();
        topology.links[0].endpoints = [1, 1];
        assert!(matches!(topology.validate(), Err(Error::SelfLoop(7, 1))));

        let mut topology = line();
        topology.links[0].delay = -5;
        assert!(matches!(
            topology.validate(),
            Err(Error::NegativeDelay(7, -5))
        ));
    }

    #[test]
    fn test_invalid_adjacency() {
        let mut topology = line();
        topology.routers[0].links = Some(vec![3]);
        assert!(matches!(topology.validate(), Err(Error::UnknownLink(0, 3))));

        let mut topology = line();
        topology.routers.push(RouterConfig {
            id: 2,
            mean: 1.0,
            packets: 0,
            links: Some(vec![7]),
        });
        assert!(matches!(topology.validate(), Err(Error::ForeignLink(2, 7))));

        let mut topology = line();
        topology.routers[1].links = Some(vec![7, 7]);
        assert!(matches!(
            topology.validate(),
            Err(Error::DuplicateAdjacency(1, 7))
        ));
    }

    #[test]
    fn test_invalid_routes() {
        let mut topology = line();
        topology.routes[0].predecessor = 9;
        assert!(matches!(
            topology.validate(),
            Err(Error::UnknownRouteRouter(0, 1, 9))
        ));

        let mut topology = line();
        topology.routes[1].cost = -2;
        assert!(matches!(
            topology.validate(),
            Err(Error::NegativeCost(1, 0, -2))
        ));

        let mut topology = line();
        topology.routes.push(topology.routes[0].clone());
        assert!(matches!(
            topology.validate(),
            Err(Error::DuplicateRoute(0, 1))
        ));

        let mut topology = line();
        topology.routes.pop();
        assert!(matches!(
            topology.validate(),
            Err(Error::MissingRoute(1, 0))
        ));
    }

    #[test]
    fn test_disconnected_routers_need_no_route() {
        let mut topology = line();
        topology.routers.push(RouterConfig {
            id: 2,
            mean: 1.0,
            packets: 1,
            links: None,
        });
        topology.validate().unwrap();

        // Connecting the router requires routes to and from it
        topology.links.push(LinkConfig {
            id: 8,
            endpoints: [1, 2],
            delay: 1,
        });
        assert!(matches!(
            topology.validate(),
            Err(Error::MissingRoute(0, 2))
        ));
    }
}
