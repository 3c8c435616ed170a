use crate::{
    journal::Transmission,
    metrics::Router as Label,
    network::Shared,
    packet::Packet,
    router::handle,
    LinkId, RouterId,
};
use rpfsim_runtime::{Clock, Resource, Spawner, SystemTimeExt, DEFAULT_PRIORITY};
use std::{sync::Arc, time::Duration};
use tracing::trace;

/// A half-duplex wire between two routers.
pub struct Link {
    pub id: LinkId,
    pub endpoints: [RouterId; 2],
    pub delay: Duration,

    /// Carries one packet at a time, in either direction.
    pub line: Resource,
}

impl Link {
    pub fn new(id: LinkId, endpoints: [RouterId; 2], delay: Duration) -> Self {
        Self {
            id,
            endpoints,
            delay,
            line: Resource::new(),
        }
    }

    /// The endpoint that is not `sender`.
    pub fn peer(&self, sender: RouterId) -> RouterId {
        let [a, b] = self.endpoints;
        if sender == a {
            b
        } else {
            a
        }
    }
}

/// Carry `packet` from `sender` across `link` and hand it to the router on the other end.
pub async fn transmit<E: Spawner + Clock>(
    context: E,
    shared: Arc<Shared>,
    link: LinkId,
    sender: RouterId,
    mut packet: Packet,
) {
    let Some(link) = shared.links.get(&link) else {
        return;
    };

    // Wait for the line (the guard is dropped on every exit path)
    let _line = link.line.acquire(DEFAULT_PRIORITY).await;
    let receiver = link.peer(sender);
    let start = context.current().epoch();
    context.sleep(link.delay).await;
    packet.cost += link.delay;
    trace!(
        link = link.id,
        sender,
        receiver,
        origin = packet.origin,
        sequence = packet.sequence,
        "transmitted packet"
    );
    shared
        .metrics
        .transmitted
        .get_or_create(&Label::new(sender))
        .inc();
    if let Some(journal) = &shared.journal {
        journal.lock().unwrap().transmissions.push(Transmission {
            link: link.id,
            sender,
            receiver,
            origin: packet.origin,
            sequence: packet.sequence,
            start,
            end: context.current().epoch(),
        });
    }

    // Do not wait for the receiver to finish handling the packet
    let shared = shared.clone();
    context.spawn(move |context| handle(context, shared, receiver, packet));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticks;

    #[test]
    fn test_peer() {
        let link = Link::new(4, [1, 4], ticks(2));
        assert_eq!(link.peer(1), 4);
        assert_eq!(link.peer(4), 1);
    }
}
