//! Wire routers and links into a network and run floods over it.

use crate::{
    arrivals::{Arrivals, Poisson},
    config::Topology,
    journal::{Decision, Journal, Verdict},
    ledger::Ledger,
    link::Link,
    metrics::Metrics,
    oracle::Oracle,
    packet::Packet,
    report::{Delivery, Report},
    router::{generate, Router},
    Error, LinkId, RouterId,
};
use rand::RngCore;
use rpfsim_runtime::{Clock, Spawner, SystemTimeExt};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};
use tracing::debug;

/// State shared by every task of a running network.
pub(crate) struct Shared {
    pub routers: Vec<Router>,
    pub links: BTreeMap<LinkId, Link>,
    pub oracle: Box<dyn Oracle>,
    pub metrics: Metrics,
    pub journal: Option<Mutex<Journal>>,
}

impl Shared {
    pub fn router(&self, id: RouterId) -> Option<&Router> {
        self.routers.get(id as usize)
    }

    /// Returns true if `packet` reached `observer` over the shortest path from its origin.
    ///
    /// A missing route is treated as a mismatch.
    pub fn shortest(&self, packet: &Packet, observer: RouterId) -> bool {
        let Some(route) = self.oracle.route(packet.origin, observer) else {
            return false;
        };
        packet.predecessor() == Some(route.predecessor) && packet.cost == route.cost
    }

    /// Append a decision to the journal (if enabled).
    pub fn record<E: Clock>(
        &self,
        context: &E,
        router: RouterId,
        packet: &Packet,
        verdict: Verdict,
        forwarded: Vec<LinkId>,
    ) {
        let Some(journal) = &self.journal else {
            return;
        };
        journal.lock().unwrap().decisions.push(Decision {
            at: context.current().epoch(),
            router,
            origin: packet.origin,
            sequence: packet.sequence,
            path: packet.path.clone(),
            cost: packet.cost,
            arrival: packet.previous,
            verdict,
            forwarded,
        });
    }
}

/// A validated topology, ready to be started on a runtime.
pub struct Network {
    routers: Vec<Router>,
    links: BTreeMap<LinkId, Link>,
    oracle: Box<dyn Oracle>,
    journal: bool,
    arrivals: BTreeMap<RouterId, Box<dyn Arrivals>>,
}

impl Network {
    /// Build a network from a topology, using its routing table as the oracle.
    pub fn new(topology: &Topology) -> Result<Self, Error> {
        topology.validate()?;

        // Routers are numbered 0..N
        let mut routers: Vec<_> = topology
            .routers
            .iter()
            .map(|router| {
                Router::new(
                    router.id,
                    router.mean,
                    router.packets,
                    topology.adjacency(router),
                )
            })
            .collect();
        routers.sort_by_key(|router| router.id);
        let links = topology
            .links
            .iter()
            .map(|link| {
                (
                    link.id,
                    Link::new(link.id, link.endpoints, Topology::delay(link)),
                )
            })
            .collect();
        Ok(Self {
            routers,
            links,
            oracle: Box::new(topology.oracle()),
            journal: false,
            arrivals: BTreeMap::new(),
        })
    }

    /// Replace the routing table with another oracle.
    pub fn with_oracle(mut self, oracle: impl Oracle) -> Self {
        self.oracle = Box::new(oracle);
        self
    }

    /// Record every decision and transmission (see [Simulation::journal]).
    pub fn with_journal(mut self) -> Self {
        self.journal = true;
        self
    }

    /// Sample the originations of `router` from `arrivals` instead of the runtime's
    /// Poisson sampler.
    pub fn with_arrivals(mut self, router: RouterId, arrivals: impl Arrivals) -> Self {
        self.arrivals.insert(router, Box::new(arrivals));
        self
    }

    /// Register metrics and spawn the packet generator of every router.
    ///
    /// Returns immediately: the floods run as the runtime processes its events.
    pub fn start<E>(mut self, context: E) -> Simulation
    where
        E: Spawner + Clock + rpfsim_runtime::Metrics + RngCore,
    {
        let metrics = Metrics::init(&context);
        let shared = Arc::new(Shared {
            routers: self.routers,
            links: self.links,
            oracle: self.oracle,
            metrics,
            journal: self.journal.then(|| Mutex::new(Journal::default())),
        });
        debug!(
            routers = shared.routers.len(),
            links = shared.links.len(),
            "starting network"
        );
        for router in &shared.routers {
            let id = router.id;
            let arrivals = self.arrivals.remove(&id).unwrap_or_else(|| {
                Box::new(Poisson::new(context.clone())) as Box<dyn Arrivals>
            });
            let shared = shared.clone();
            context
                .with_label(&format!("router_{}", id))
                .spawn(move |context| generate(context, shared, id, arrivals));
        }
        Simulation { shared }
    }
}

/// Handle to the floods of a started [Network].
///
/// Read it once the runtime has stopped to collect the outcome of the run.
pub struct Simulation {
    shared: Arc<Shared>,
}

impl Simulation {
    /// Completion ledger of the floods `router` originated.
    pub fn ledger(&self, router: RouterId) -> Option<Ledger> {
        self.shared.router(router).map(|router| router.ledger.clone())
    }

    /// Per-router delivery counts and mean transit times.
    pub fn report(&self) -> Report {
        Report::new(
            self.shared
                .routers
                .iter()
                .map(|router| Delivery {
                    router: router.id,
                    delivered: router.ledger.delivered(),
                    mean: router.ledger.mean(),
                })
                .collect(),
        )
    }

    /// Decisions and transmissions recorded so far (if the journal was enabled).
    pub fn journal(&self) -> Option<Journal> {
        self.shared
            .journal
            .as_ref()
            .map(|journal| journal.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arrivals::{Fixed, Scripted},
        config::{LinkConfig, RouteConfig, RouterConfig},
        oracle::Table,
        ticks,
    };
    use commonware_macros::test_traced;
    use rpfsim_runtime::{deterministic, Runner};
    use std::time::Duration;

    /// Hub 0 with leaves 1, 2 and 3, whose copies all reach the hub at tick 15.
    ///
    /// The empty oracle makes the hub prune every copy, so nothing travels back.
    fn hub() -> Network {
        let delays = [(1, 5), (2, 4), (3, 3)];
        let mut routes = Vec::new();
        for (leaf, delay) in delays {
            routes.push(RouteConfig {
                source: 0,
                observer: leaf,
                predecessor: 0,
                cost: delay,
            });
            routes.push(RouteConfig {
                source: leaf,
                observer: 0,
                predecessor: leaf,
                cost: delay,
            });
            for (other, other_delay) in delays {
                if other != leaf {
                    routes.push(RouteConfig {
                        source: leaf,
                        observer: other,
                        predecessor: 0,
                        cost: delay + other_delay,
                    });
                }
            }
        }
        let topology = Topology {
            routers: [0, 3, 2, 1]
                .into_iter()
                .enumerate()
                .map(|(id, packets)| RouterConfig {
                    id: id as RouterId,
                    mean: 0.0,
                    packets,
                    links: None,
                })
                .collect(),
            links: delays
                .into_iter()
                .map(|(leaf, delay)| LinkConfig {
                    id: leaf - 1,
                    endpoints: [0, leaf],
                    delay,
                })
                .collect(),
            routes,
        };
        Network::new(&topology)
            .unwrap()
            .with_oracle(Table::new())
            .with_journal()
            .with_arrivals(0, Fixed(Duration::ZERO))
            .with_arrivals(1, Scripted::new(vec![ticks(0), ticks(5)]))
            .with_arrivals(2, Scripted::new(vec![ticks(0), ticks(11)]))
            .with_arrivals(3, Scripted::new(vec![ticks(12)]))
    }

    #[test_traced]
    fn test_busy_processor_admits_by_sequence() {
        let executor = deterministic::Runner::default();
        let (simulation, held) = executor.start(|context| async move {
            let simulation = hub().start(context.clone());
            let processor = simulation.shared.router(0).unwrap().processor.clone();

            // Occupy the hub across the simultaneous arrivals
            context.sleep(ticks(14)).await;
            let guard = processor.acquire(0).await;
            context.sleep(ticks(2)).await;
            let held = (processor.in_use(), processor.waiting());
            context.sleep(ticks(4)).await;
            drop(guard);
            (simulation, held)
        });

        // One holder, three queued copies
        assert_eq!(held, (1, 3));
        let router = simulation.shared.router(0).unwrap();
        assert_eq!(router.processor.in_use(), 0);
        assert_eq!(router.processor.waiting(), 0);

        // Once released, the queued copies are handled in sequence order
        let journal = simulation.journal().unwrap();
        let handled: Vec<_> = journal
            .at(0)
            .filter(|d| d.at >= ticks(15))
            .map(|d| (d.at, d.origin, d.sequence))
            .collect();
        assert_eq!(
            handled,
            vec![(ticks(20), 3, 1), (ticks(20), 2, 2), (ticks(20), 1, 3)]
        );
    }
}
