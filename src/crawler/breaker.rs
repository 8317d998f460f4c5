//! Degraded-connectivity circuit breaker
//!
//! Tracks detail fetch outcomes. When the run of consecutive failures exceeds
//! the threshold and the rolling success rate is below the floor, the breaker
//! opens and dispatch pauses until the cooldown passes.

use crate::config::BreakerConfig;
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::warn;

/// Why the breaker opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripReason {
    /// Too many consecutive failures with a low rolling success rate
    Degraded,
    /// A fetch reported that connectivity is gone
    NetworkDown,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    window: VecDeque<bool>,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    trips: u32,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window),
            config,
            consecutive_failures: 0,
            open_until: None,
            trips: 0,
        }
    }

    /// Records one outcome
    ///
    /// Returns the resume instant if this outcome tripped the breaker. Outcomes
    /// that arrive while the breaker is already open are counted but never
    /// extend the cooldown.
    pub fn record(&mut self, success: bool, now: Instant) -> Option<Instant> {
        if self.window.len() == self.config.window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(success);

        if success {
            self.consecutive_failures = 0;
            return None;
        }
        self.consecutive_failures += 1;

        if self.is_open(now) {
            return None;
        }

        let degraded = self.consecutive_failures > self.config.failure_threshold
            && self.success_rate() < self.config.success_floor;
        degraded.then(|| self.trip(TripReason::Degraded, now))
    }

    /// Opens the breaker for the network-down cooldown
    ///
    /// An already open breaker is extended when the network-down window ends later.
    pub fn network_down(&mut self, now: Instant) -> Instant {
        let until = now + self.config.network_down_cooldown();
        match self.open_until {
            Some(current) if current > now && current >= until => current,
            _ => self.trip(TripReason::NetworkDown, now),
        }
    }

    fn trip(&mut self, reason: TripReason, now: Instant) -> Instant {
        let cooldown = match reason {
            TripReason::Degraded => self.config.cooldown(),
            TripReason::NetworkDown => self.config.network_down_cooldown(),
        };
        let until = now + cooldown;

        warn!(
            ?reason,
            consecutive_failures = self.consecutive_failures,
            success_rate = format!("{:.2}", self.success_rate()),
            "Circuit breaker open for {:?}",
            cooldown
        );

        self.open_until = Some(until);
        self.consecutive_failures = 0;
        self.trips += 1;
        until
    }

    pub fn is_open(&self, now: Instant) -> bool {
        self.open_until.map_or(false, |until| now < until)
    }

    /// When dispatch may resume, if the breaker is currently open
    pub fn resume_at(&self, now: Instant) -> Option<Instant> {
        self.open_until.filter(|until| now < *until)
    }

    /// Successes over the rolling window; 1.0 with no outcomes yet
    pub fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let successes = self.window.iter().filter(|s| **s).count();
        successes as f64 / self.window.len() as f64
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn trips(&self) -> u32 {
        self.trips
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 5,
            success_floor: 0.3,
            window: 10,
            cooldown_secs: 60,
            network_down_cooldown_secs: 120,
        })
    }

    #[test]
    fn test_trips_after_threshold_with_low_rate() {
        let mut b = breaker();
        let now = Instant::now();

        // Reaching the threshold is not enough; it has to be exceeded
        for _ in 0..5 {
            assert!(b.record(false, now).is_none());
        }
        let until = b.record(false, now).unwrap();

        assert_eq!(until, now + Duration::from_secs(60));
        assert!(b.is_open(now));
        assert!(!b.is_open(until));
        assert_eq!(b.consecutive_failures(), 0);
        assert_eq!(b.trips(), 1);
    }

    #[test]
    fn test_healthy_rate_does_not_trip() {
        let mut b = breaker();
        let now = Instant::now();

        for _ in 0..5 {
            b.record(true, now);
        }
        // 5 failures against 5 successes keeps the rate at 0.5
        for _ in 0..5 {
            assert!(b.record(false, now).is_none());
        }
        assert_eq!(b.consecutive_failures(), 5);
        assert!(!b.is_open(now));
    }

    #[test]
    fn test_success_resets_consecutive() {
        let mut b = breaker();
        let now = Instant::now();

        for _ in 0..4 {
            b.record(false, now);
        }
        b.record(true, now);
        assert_eq!(b.consecutive_failures(), 0);
        assert!(b.record(false, now).is_none());
    }

    #[test]
    fn test_failures_while_open_do_not_extend() {
        let mut b = breaker();
        let now = Instant::now();
        for _ in 0..6 {
            b.record(false, now);
        }
        let later = now + Duration::from_secs(10);
        for _ in 0..10 {
            assert!(b.record(false, later).is_none());
        }
        assert_eq!(b.resume_at(later), Some(now + Duration::from_secs(60)));
        assert_eq!(b.trips(), 1);
    }

    #[test]
    fn test_default_config_trips_on_ninth_consecutive_failure() {
        let mut b = CircuitBreaker::new(BreakerConfig::default());
        let now = Instant::now();

        let tripped: Vec<bool> = (0..10).map(|_| b.record(false, now).is_some()).collect();

        assert_eq!(tripped.iter().position(|t| *t), Some(8));
        assert_eq!(tripped.iter().filter(|t| **t).count(), 1);
        assert_eq!(b.resume_at(now), Some(now + Duration::from_secs(90)));
        assert_eq!(b.trips(), 1);
    }

    #[test]
    fn test_default_config_holds_while_rate_is_above_floor() {
        let mut b = CircuitBreaker::new(BreakerConfig::default());
        let now = Instant::now();

        for _ in 0..10 {
            b.record(true, now);
        }
        // 10 failures in a window of 20 leave the rate at 0.5
        for _ in 0..10 {
            assert!(b.record(false, now).is_none());
        }
        assert_eq!(b.consecutive_failures(), 10);
        assert!(!b.is_open(now));
    }

    #[test]
    fn test_network_down_uses_longer_cooldown() {
        let mut b = breaker();
        let now = Instant::now();

        let until = b.network_down(now);
        assert_eq!(until, now + Duration::from_secs(120));

        // A later report pushes the deadline out
        assert_eq!(b.network_down(now + Duration::from_secs(1)), now + Duration::from_secs(121));
        assert_eq!(b.trips(), 2);
    }

    #[test]
    fn test_rate_window_rolls() {
        let mut b = breaker();
        let now = Instant::now();
        for _ in 0..10 {
            b.record(false, now);
        }
        for _ in 0..10 {
            b.record(true, now);
        }
        assert_eq!(b.success_rate(), 1.0);
    }
}
