//! Sliding-window error budget

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_THRESHOLD: usize = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Count of transient adapter errors within a sliding window
#[derive(Debug, Clone)]
pub struct ErrorBudget {
    errors: VecDeque<Instant>,
    threshold: usize,
    window: Duration,
}

impl Default for ErrorBudget {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_WINDOW)
    }
}

impl ErrorBudget {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            errors: VecDeque::new(),
            threshold: threshold.max(1),
            window,
        }
    }

    /// Record an error at `now`; true once the window holds `threshold` errors
    pub fn record(&mut self, now: Instant) -> bool {
        self.expire(now);
        self.errors.push_back(now);
        self.is_exceeded()
    }

    pub fn record_now(&mut self) -> bool {
        self.record(Instant::now())
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.errors.front() {
            if now.duration_since(*oldest) >= self.window {
                self.errors.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn is_exceeded(&self) -> bool {
        self.errors.len() >= self.threshold
    }

    pub fn count(&self) -> usize {
        self.errors.len()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_within_window() {
        let mut budget = ErrorBudget::default();
        let start = Instant::now();
        for i in 0..9 {
            assert!(!budget.record(start + Duration::from_secs(i * 60)));
        }
        assert!(budget.record(start + Duration::from_secs(3000)));
    }

    #[test]
    fn test_old_errors_expire() {
        let mut budget = ErrorBudget::new(3, Duration::from_secs(3600));
        let start = Instant::now();
        budget.record(start);
        budget.record(start + Duration::from_secs(10));
        // First error left the window
        assert!(!budget.record(start + Duration::from_secs(3600)));
        assert_eq!(budget.count(), 2);
        assert!(budget.record(start + Duration::from_secs(3605)));

        budget.reset();
        assert_eq!(budget.count(), 0);
    }
}
