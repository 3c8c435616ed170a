//! Inter-arrival delays between the packets a router originates.

use crate::ticks;
use rand::RngCore;
use rand_distr::{Distribution, Poisson as Distr};
use std::time::Duration;

/// Samples the delay before a router originates its next packet.
pub trait Arrivals: Send + 'static {
    /// Returns the next delay for a router configured with the given mean (in ticks).
    fn next(&mut self, mean: f64) -> Duration;
}

/// Poisson-distributed delays (rounded to whole ticks).
///
/// When driven by a runtime context, every draw is seeded (and audited) by the runtime.
pub struct Poisson<R: RngCore> {
    rng: R,
}

impl<R: RngCore> Poisson<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore + Send + 'static> Arrivals for Poisson<R> {
    fn next(&mut self, mean: f64) -> Duration {
        // A non-positive mean has no distribution: every packet is due immediately
        let Ok(distr) = Distr::new(mean) else {
            return Duration::ZERO;
        };
        let sample: f64 = distr.sample(&mut self.rng);
        ticks(sample as u64)
    }
}

/// Always returns the same delay, regardless of the mean.
#[derive(Clone, Copy, Debug)]
pub struct Fixed(pub Duration);

impl Arrivals for Fixed {
    fn next(&mut self, _: f64) -> Duration {
        self.0
    }
}

/// Replays a list of delays and then repeats the last one (or zero if empty).
#[derive(Clone, Debug)]
pub struct Scripted {
    delays: Vec<Duration>,
    index: usize,
}

impl Scripted {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays, index: 0 }
    }
}

impl Arrivals for Scripted {
    fn next(&mut self, _: f64) -> Duration {
        let Some(last) = self.delays.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let delay = self.delays[self.index.min(last)];
        self.index = self.index.saturating_add(1);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_fixed() {
        let mut fixed = Fixed(ticks(7));
        assert_eq!(fixed.next(20.0), ticks(7));
        assert_eq!(fixed.next(0.0), ticks(7));
    }

    #[test]
    fn test_scripted_repeats_last() {
        let mut scripted = Scripted::new(vec![ticks(1), ticks(5), ticks(2)]);
        let delays: Vec<_> = (0..5).map(|_| scripted.next(20.0)).collect();
        assert_eq!(delays, vec![ticks(1), ticks(5), ticks(2), ticks(2), ticks(2)]);
    }

    #[test]
    fn test_scripted_empty() {
        let mut scripted = Scripted::new(Vec::new());
        assert_eq!(scripted.next(20.0), Duration::ZERO);
    }

    #[test]
    fn test_poisson_zero_mean() {
        let mut poisson = Poisson::new(StdRng::seed_from_u64(0));
        assert_eq!(poisson.next(0.0), Duration::ZERO);
    }

    #[test]
    fn test_poisson_seeded() {
        let draw = |seed| {
            let mut poisson = Poisson::new(StdRng::seed_from_u64(seed));
            (0..50).map(|_| poisson.next(20.0)).collect::<Vec<_>>()
        };
        assert_eq!(draw(3), draw(3));

        // The sample mean should land near the configured mean
        let delays = draw(3);
        let total: Duration = delays.iter().sum();
        let mean = total.as_millis() as f64 / delays.len() as f64;
        assert!((10.0..30.0).contains(&mean), "mean {mean}");
    }
}
