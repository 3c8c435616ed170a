//! Summarize how long floods took to cover the network.

use crate::RouterId;
use std::fmt;

/// Delivery statistics of the packets one router originated.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub router: RouterId,

    /// Packets that reached every router.
    pub delivered: u64,

    /// Mean transit time in ticks (`None` if nothing was delivered).
    pub mean: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub deliveries: Vec<Delivery>,

    /// Mean of the per-router means (`None` if no router has one).
    pub overall: Option<f64>,
}

impl Report {
    pub fn new(deliveries: Vec<Delivery>) -> Self {
        let means: Vec<f64> = deliveries.iter().filter_map(|d| d.mean).collect();
        let overall = if means.is_empty() {
            None
        } else {
            Some(means.iter().sum::<f64>() / means.len() as f64)
        };
        Self {
            deliveries,
            overall,
        }
    }

    /// Total number of delivered packets.
    pub fn delivered(&self) -> u64 {
        self.deliveries.iter().map(|d| d.delivered).sum()
    }

    pub fn get(&self, router: RouterId) -> Option<&Delivery> {
        self.deliveries.iter().find(|d| d.router == router)
    }
}

struct Mean(Option<f64>);

impl fmt::Display for Mean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(mean) => write!(f, "{:.2}", mean),
            None => f.write_str("n/a"),
        }
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Router {}: mean transit {}, delivered {}",
            self.router,
            Mean(self.mean),
            self.delivered
        )
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for delivery in &self.deliveries {
            writeln!(f, "{}", delivery)?;
        }
        write!(f, "Overall mean transit {}", Mean(self.overall))
    }
}
