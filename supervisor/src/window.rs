//! The restart-frequency sliding window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Tracks the `N` most recent restart timestamps; rejects a restart once
/// the oldest and newest entries in a full window fall within `period` of
/// each other.
pub struct RestartWindow {
    times: VecDeque<Instant>,
    size: usize,
    period: Duration,
}

impl RestartWindow {
    /// Build an empty window of capacity `size` over `period`.
    pub fn new(size: usize, period: Duration) -> Self {
        Self {
            times: VecDeque::with_capacity(size.max(1)),
            size,
            period,
        }
    }

    /// Record a restart at `now`. Returns `Err((count, elapsed))` if this
    /// restart exceeds the frequency budget, in which case the caller
    /// should treat the supervisor itself as failed rather than restart.
    pub fn record(&mut self, now: Instant) -> Result<(), (usize, Duration)> {
        self.times.push_back(now);
        while self.times.len() > self.size {
            self.times.pop_front();
        }
        if self.times.len() == self.size && self.size > 0 {
            let elapsed = *self.times.back().unwrap() - *self.times.front().unwrap();
            if elapsed <= self.period {
                return Err((self.times.len(), elapsed));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_restarts_spread_outside_the_window() {
        let mut window = RestartWindow::new(2, Duration::from_millis(10));
        let t0 = Instant::now();
        assert!(window.record(t0).is_ok());
        assert!(window.record(t0 + Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn rejects_restarts_clustered_within_the_window() {
        let mut window = RestartWindow::new(3, Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(window.record(t0).is_ok());
        assert!(window.record(t0 + Duration::from_millis(10)).is_ok());
        let result = window.record(t0 + Duration::from_millis(20));
        assert!(matches!(result, Err((3, _))));
    }

    #[test]
    fn zero_size_window_never_rejects() {
        let mut window = RestartWindow::new(0, Duration::from_millis(10));
        let t0 = Instant::now();
        assert!(window.record(t0).is_ok());
        assert!(window.record(t0).is_ok());
    }
}
