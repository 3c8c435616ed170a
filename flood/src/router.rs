use crate::{
    arrivals::Arrivals,
    journal::Verdict,
    ledger::Ledger,
    link::transmit,
    metrics::{Prune, Router as Label},
    network::Shared,
    packet::Packet,
    LinkId, RouterId,
};
use futures::{future::BoxFuture, FutureExt as _};
use rpfsim_runtime::{Clock, Resource, Spawner, SystemTimeExt};
use std::{sync::Arc, time::Duration};
use tracing::{debug, trace};

pub struct Router {
    pub id: RouterId,
    pub mean: f64,
    pub packets: u64,

    /// Attached links, in forwarding order.
    pub links: Vec<LinkId>,

    /// Handles one packet at a time.
    pub processor: Resource,

    /// Completions of the floods this router originated.
    pub ledger: Ledger,
}

impl Router {
    pub fn new(id: RouterId, mean: f64, packets: u64, links: Vec<LinkId>) -> Self {
        Self {
            id,
            mean,
            packets,
            links,
            processor: Resource::new(),
            ledger: Ledger::new(),
        }
    }
}

/// Originate the router's packet budget, one packet per sampled delay.
pub async fn generate<E: Spawner + Clock>(
    context: E,
    shared: Arc<Shared>,
    id: RouterId,
    mut arrivals: Box<dyn Arrivals>,
) {
    let Some(router) = shared.router(id) else {
        return;
    };
    for sequence in 1..=router.packets {
        context.sleep(arrivals.next(router.mean)).await;
        let packet = Packet::new(id, sequence, context.current(), router.ledger.clone());
        debug!(router = id, sequence, "generated packet");
        shared.metrics.generated.get_or_create(&Label::new(id)).inc();

        // Handle the packet like any other arrival
        let shared = shared.clone();
        context
            .clone()
            .spawn(move |context| handle(context, shared, id, packet));
    }
}

/// Handle an arriving copy at router `id`, one copy at a time.
///
/// Copies that become runnable at the same instant are handled in order of their
/// sequence number, then of their arrival.
pub fn handle<E: Spawner + Clock>(
    context: E,
    shared: Arc<Shared>,
    id: RouterId,
    packet: Packet,
) -> BoxFuture<'static, ()> {
    async move {
        let Some(router) = shared.router(id) else {
            return;
        };

        // Let every simultaneous copy with a lower sequence go first
        context
            .sleep_prioritized(Duration::ZERO, packet.sequence)
            .await;
        let _processor = router.processor.acquire(packet.sequence).await;

        // Drop copies that already passed through this router
        if packet.path.contains(&id) {
            trace!(
                router = id,
                origin = packet.origin,
                sequence = packet.sequence,
                path = ?packet.path,
                "dropping looped packet"
            );
            shared.metrics.pruned.get_or_create(&Prune::looped(id)).inc();
            shared.record(&context, id, &packet, Verdict::Looped, Vec::new());
            return;
        }
        process(&context, &shared, router, packet);
    }
    .boxed()
}

/// Apply the RPF rule to a copy and, if it is accepted, relay it (or complete its flood).
///
/// No virtual time passes while processing.
fn process<E: Spawner + Clock>(
    context: &E,
    shared: &Arc<Shared>,
    router: &Router,
    mut packet: Packet,
) {
    let id = router.id;
    let origin = packet.origin == id;
    packet.visited.insert(id);
    packet.path.push(id);

    // Only accept copies that arrived over the shortest path from their origin
    if !origin && !shared.shortest(&packet, id) {
        trace!(
            router = id,
            origin = packet.origin,
            sequence = packet.sequence,
            path = ?packet.path,
            cost = packet.cost.as_millis(),
            "pruning packet"
        );
        shared.metrics.pruned.get_or_create(&Prune::rpf(id)).inc();
        shared.record(context, id, &packet, Verdict::Pruned, Vec::new());
        return;
    }
    shared.metrics.accepted.get_or_create(&Label::new(id)).inc();

    // Complete the flood once every router was touched
    if packet.visited.len() == shared.routers.len() {
        let now = context.current();
        if packet.complete(now) {
            debug!(
                router = id,
                origin = packet.origin,
                sequence = packet.sequence,
                transit = now.epoch_millis() - packet.created.epoch_millis(),
                "flood completed"
            );
            shared
                .metrics
                .completed
                .get_or_create(&Label::new(packet.origin))
                .inc();
        }
        shared.record(context, id, &packet, Verdict::Completed, Vec::new());
        return;
    }

    // Relay on every link but the one the copy arrived on
    let mut forwarded = Vec::new();
    for link in router.links.iter().copied() {
        if Some(link) == packet.previous {
            continue;
        }
        let copy = packet.forward(link);
        let shared = shared.clone();
        context
            .clone()
            .spawn(move |context| transmit(context, shared, link, id, copy));
        forwarded.push(link);
    }
    trace!(
        router = id,
        origin = packet.origin,
        sequence = packet.sequence,
        links = ?forwarded,
        "forwarding packet"
    );
    shared.record(context, id, &packet, Verdict::Accepted, forwarded);
}
