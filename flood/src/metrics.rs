use crate::RouterId;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Router {
    pub router: String,
}

impl Router {
    pub fn new(router: RouterId) -> Self {
        Self {
            router: router.to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Prune {
    pub router: String,
    pub reason: String,
}

impl Prune {
    pub fn looped(router: RouterId) -> Self {
        Self {
            router: router.to_string(),
            reason: "loop".to_string(),
        }
    }

    pub fn rpf(router: RouterId) -> Self {
        Self {
            router: router.to_string(),
            reason: "rpf".to_string(),
        }
    }
}

pub struct Metrics {
    pub generated: Family<Router, Counter>,
    pub accepted: Family<Router, Counter>,
    pub pruned: Family<Prune, Counter>,
    pub transmitted: Family<Router, Counter>,
    pub completed: Family<Router, Counter>,
}

impl Metrics {
    pub fn init<E: rpfsim_runtime::Metrics>(context: &E) -> Self {
        let metrics = Self {
            generated: Family::default(),
            accepted: Family::default(),
            pruned: Family::default(),
            transmitted: Family::default(),
            completed: Family::default(),
        };
        context.register(
            "packets_generated",
            "Packets originated by a router",
            metrics.generated.clone(),
        );
        context.register(
            "packets_accepted",
            "Packet copies accepted by a router",
            metrics.accepted.clone(),
        );
        context.register(
            "packets_pruned",
            "Packet copies dropped by a router",
            metrics.pruned.clone(),
        );
        context.register(
            "packets_transmitted",
            "Packet copies delivered over a link by a sender",
            metrics.transmitted.clone(),
        );
        context.register(
            "floods_completed",
            "Packets of an origin that reached every router",
            metrics.completed.clone(),
        );
        metrics
    }
}
