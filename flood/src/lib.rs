//! Flood packets across a router topology, pruning copies with Reverse Path Forwarding (RPF).
//!
//! Every router periodically originates packets that must reach every other router. A router
//! relays a packet on all of its links except the one it arrived on, but only accepts (and
//! relays) a copy that arrived over the precomputed shortest path from the packet's origin.
//! Copies that arrive any other way are pruned, which bounds the flood to (approximately) the
//! shortest-path tree of its origin while still reaching every router.
//!
//! The protocol runs on top of [rpfsim_runtime]: links and routers are modeled as tasks that
//! suspend on the runtime's clock and on single-slot [rpfsim_runtime::Resource]s, so a run
//! on the deterministic runtime is fully reproducible.
//!
//! # Example
//!
//! ```rust
//! use rpfsim_flood::{config::Topology, network::Network};
//! use rpfsim_runtime::{deterministic, Runner};
//!
//! let topology = Topology::reference().with_packets(2);
//! let network = Network::new(&topology).expect("reference topology is valid");
//! let executor = deterministic::Runner::seeded(0);
//! let simulation = executor.start(|context| async move { network.start(context) });
//! println!("{}", simulation.report());
//! ```

use std::time::Duration;
use thiserror::Error;

pub mod arrivals;
pub mod config;
pub mod journal;
pub mod ledger;
mod link;
mod metrics;
pub mod network;
pub mod oracle;
pub mod packet;
pub mod report;
mod router;

/// Identity of a router. Routers of a topology are numbered `0..N`.
pub type RouterId = u32;

/// Identity of a link.
pub type LinkId = u32;

/// Converts a number of topology ticks into virtual time (one tick is one millisecond).
pub fn ticks(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Errors that can occur when loading or validating a topology.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read topology: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse topology: {0}")]
    Json(#[from] serde_json::Error),
    #[error("topology has no routers")]
    NoRouters,
    #[error("duplicate router: {0}")]
    DuplicateRouter(RouterId),
    #[error("router ids must be 0..{0}, found {1}")]
    RouterOutOfRange(usize, RouterId),
    #[error("invalid mean for router {0}: {1}")]
    InvalidMean(RouterId, f64),
    #[error("duplicate link: {0}")]
    DuplicateLink(LinkId),
    #[error("link {0} references unknown router {1}")]
    UnknownEndpoint(LinkId, RouterId),
    #[error("link {0} connects router {1} to itself")]
    SelfLoop(LinkId, RouterId),
    #[error("link {0} has negative delay: {1}")]
    NegativeDelay(LinkId, i64),
    #[error("router {0} lists unknown link {1}")]
    UnknownLink(RouterId, LinkId),
    #[error("router {0} lists link {1} which does not touch it")]
    ForeignLink(RouterId, LinkId),
    #[error("router {0} lists link {1} more than once")]
    DuplicateAdjacency(RouterId, LinkId),
    #[error("route from {0} observed at {1} references unknown router {2}")]
    UnknownRouteRouter(RouterId, RouterId, RouterId),
    #[error("route from {0} observed at {1} has negative cost: {2}")]
    NegativeCost(RouterId, RouterId, i64),
    #[error("duplicate route from {0} observed at {1}")]
    DuplicateRoute(RouterId, RouterId),
    #[error("missing route from {0} observed at {1}")]
    MissingRoute(RouterId, RouterId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks() {
        assert_eq!(ticks(0), Duration::ZERO);
        assert_eq!(ticks(1), Duration::from_millis(1));
        assert_eq!(ticks(250), Duration::from_millis(250));
    }
}
