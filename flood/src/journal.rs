//! Record of every handling decision and link transmission in a run.

use crate::{LinkId, RouterId};
use std::{fmt, time::Duration};

/// Outcome of a router handling a packet copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The router already appears in the copy's path.
    Looped,
    /// The copy did not arrive over the shortest path from its origin.
    Pruned,
    /// The copy was accepted and relayed.
    Accepted,
    /// The copy was accepted and its flood has touched every router.
    Completed,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self {
            Verdict::Looped => "looped",
            Verdict::Pruned => "pruned",
            Verdict::Accepted => "accepted",
            Verdict::Completed => "completed",
        };
        f.write_str(verdict)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Time since the start of the run.
    pub at: Duration,
    pub router: RouterId,
    pub origin: RouterId,
    pub sequence: u64,

    /// Path of the copy, including `router` unless the copy looped.
    pub path: Vec<RouterId>,
    pub cost: Duration,
    pub arrival: Option<LinkId>,
    pub verdict: Verdict,

    /// Links a copy was sent out on (empty unless accepted).
    pub forwarded: Vec<LinkId>,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>6}] router {} {} packet {}/{} path={:?} cost={}",
            self.at.as_millis(),
            self.router,
            self.verdict,
            self.origin,
            self.sequence,
            self.path,
            self.cost.as_millis()
        )?;
        if let Some(arrival) = self.arrival {
            write!(f, " via={}", arrival)?;
        }
        if !self.forwarded.is_empty() {
            write!(f, " forwarded={:?}", self.forwarded)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transmission {
    pub link: LinkId,
    pub sender: RouterId,
    pub receiver: RouterId,
    pub origin: RouterId,
    pub sequence: u64,

    /// Time the link was acquired.
    pub start: Duration,

    /// Time the packet reached `receiver`.
    pub end: Duration,
}

impl fmt::Display for Transmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>6}] link {} carried packet {}/{} from {} to {} (started {})",
            self.end.as_millis(),
            self.link,
            self.origin,
            self.sequence,
            self.sender,
            self.receiver,
            self.start.as_millis()
        )
    }
}

/// Decisions and transmissions in the order they happened.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    pub decisions: Vec<Decision>,
    pub transmissions: Vec<Transmission>,
}

impl Journal {
    /// Decisions taken at `router`.
    pub fn at(&self, router: RouterId) -> impl Iterator<Item = &Decision> {
        self.decisions.iter().filter(move |d| d.router == router)
    }

    /// Transmissions carried by `link`.
    pub fn on(&self, link: LinkId) -> impl Iterator<Item = &Transmission> {
        self.transmissions.iter().filter(move |t| t.link == link)
    }

    /// Number of decisions with the given verdict.
    pub fn count(&self, verdict: Verdict) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.verdict == verdict)
            .count()
    }
}
