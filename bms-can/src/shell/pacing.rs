//! Periodic request pacing

use std::time::{Duration, Instant};

/// Minimum spacing of periodic requests
pub const MIN_INTERVAL: Duration = Duration::from_millis(95);

/// Rate limiter for a periodic transmission
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(MIN_INTERVAL)
    }
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// True and marks the emission if the last one is at least one interval old
    pub fn try_emit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_emissions_within_interval() {
        let mut pacer = Pacer::default();
        let start = Instant::now();
        assert!(pacer.try_emit(start));
        assert!(!pacer.try_emit(start + Duration::from_millis(50)));
        assert!(!pacer.try_emit(start + Duration::from_millis(94)));
        assert!(pacer.try_emit(start + Duration::from_millis(100)));
        assert!(!pacer.try_emit(start + Duration::from_millis(150)));
    }
}
