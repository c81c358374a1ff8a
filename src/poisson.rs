use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::time::Duration;

/// Source of exponentially distributed delays, i.e. the gaps of a Poisson process.
pub struct Poisson<R: Rng + ?Sized> {
    pub rng: Box<R>,
    pub rate: f64,
}

impl Poisson<SmallRng> {
    /// Function that creates a source with `rate` events per second.
    pub fn new(rate: f64, seed: &[u8; 32]) -> Self {
        Self {
            rng: Box::new(SmallRng::from_seed(*seed)),
            rate,
        }
    }

    pub fn from_entropy(rate: f64) -> Self {
        Self {
            rng: Box::new(SmallRng::from_rng(&mut rand::rng())),
            rate,
        }
    }

    /// Seconds until the next event.
    pub fn time_for_next_event(&mut self) -> f64 {
        -(1.0f64 - self.rng.random::<f64>()).ln() / self.rate
    }

    /// Delay until the next event, saturating at `Duration::MAX`.
    pub fn next_delay(&mut self) -> Duration {
        Duration::try_from_secs_f64(self.time_for_next_event()).unwrap_or(Duration::MAX)
    }
}
