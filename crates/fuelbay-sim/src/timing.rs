//! Randomized travel and service delays.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use fuelbay_core::{CancelToken, Interrupted};

/// Inclusive range of delays in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    /// Shortest delay.
    pub min: u64,
    /// Longest delay.
    pub max: u64,
}

impl DelayRange {
    /// Create a delay range.
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// A range that never delays.
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// A fixed delay.
    pub const fn fixed(millis: u64) -> Self {
        Self::new(millis, millis)
    }

    /// Check that the bounds are ordered.
    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    /// Draw a delay from the range.
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        if self.max <= self.min {
            return Duration::from_millis(self.min);
        }
        Duration::from_millis(rng.gen_range(self.min..=self.max))
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self::zero()
    }
}

/// Delays that shape one vehicle's trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Travel before each arrival at the station.
    pub travel: DelayRange,
    /// Time spent docked between grant and settlement.
    pub service: DelayRange,
    /// Pause after a deposit before the return-leg request.
    pub turnaround: DelayRange,
}

impl TimingConfig {
    /// No delays at all, handy for tests.
    pub fn instant() -> Self {
        Self::default()
    }

    /// Check every range.
    pub fn is_valid(&self) -> bool {
        self.travel.is_valid() && self.service.is_valid() && self.turnaround.is_valid()
    }
}

/// Per-vehicle delay source.
///
/// Sleeps are cut short when the run is cancelled.
pub struct Clock {
    timing: TimingConfig,
    rng: StdRng,
    cancel: CancelToken,
}

impl Clock {
    /// Create a clock seeded with `seed`, or from entropy when `None`.
    pub fn new(timing: TimingConfig, seed: Option<u64>, cancel: CancelToken) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { timing, rng, cancel }
    }

    /// The cancellation token shared with the run.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Travel to the station.
    pub fn travel(&mut self) -> Result<(), Interrupted> {
        self.pause(self.timing.travel)
    }

    /// Stay docked while being served.
    pub fn service(&mut self) -> Result<(), Interrupted> {
        self.pause(self.timing.service)
    }

    /// Turn around after a deposit.
    pub fn turnaround(&mut self) -> Result<(), Interrupted> {
        self.pause(self.timing.turnaround)
    }

    fn pause(&mut self, range: DelayRange) -> Result<(), Interrupted> {
        let delay = range.sample(&mut self.rng);
        if delay.is_zero() {
            return if self.cancel.is_cancelled() {
                Err(Interrupted)
            } else {
                Ok(())
            };
        }
        self.cancel.sleep(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let range = DelayRange::new(5, 15);
        for _ in 0..100 {
            let delay = range.sample(&mut rng);
            assert!(delay >= Duration::from_millis(5));
            assert!(delay <= Duration::from_millis(15));
        }
        assert_eq!(DelayRange::fixed(3).sample(&mut rng), Duration::from_millis(3));
    }

    #[test]
    fn test_seeded_samples_repeat() {
        let range = DelayRange::new(0, 1_000);
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let left: Vec<_> = (0..10).map(|_| range.sample(&mut a)).collect();
        let right: Vec<_> = (0..10).map(|_| range.sample(&mut b)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_invalid_range() {
        assert!(!DelayRange::new(10, 5).is_valid());
        let timing = TimingConfig {
            service: DelayRange::new(10, 5),
            ..TimingConfig::instant()
        };
        assert!(!timing.is_valid());
    }

    #[test]
    fn test_clock_interrupted_by_cancel() {
        let token = CancelToken::new();
        let timing = TimingConfig {
            travel: DelayRange::fixed(10),
            ..TimingConfig::instant()
        };
        let mut clock = Clock::new(timing, Some(1), token.clone());
        assert_eq!(clock.travel(), Ok(()));
        assert_eq!(clock.service(), Ok(()));

        token.cancel();
        assert_eq!(clock.travel(), Err(Interrupted));
        assert_eq!(clock.turnaround(), Err(Interrupted));
    }
}
