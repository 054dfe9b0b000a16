//! Saturating backoff schedule for status polling.
//!
//! The schedule ramps up quickly for short jobs and then holds at its last
//! value forever, so long-running computations are re-checked at a constant
//! rate without hammering the server.

use std::time::Duration;

/// Default ramp, in seconds.
pub const DEFAULT_RAMP_SECONDS: [u64; 9] = [0, 1, 1, 2, 3, 5, 8, 13, 21];

/// An infinite iterator of wait durations: yields the configured ramp once,
/// then repeats the final element forever.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
    index: usize,
}

impl BackoffSchedule {
    /// Build a schedule from a ramp of whole seconds. An empty ramp is
    /// replaced by the default one.
    pub fn from_seconds(ramp: &[u64]) -> Self {
        let steps = if ramp.is_empty() {
            DEFAULT_RAMP_SECONDS.to_vec()
        } else {
            ramp.to_vec()
        };
        BackoffSchedule {
            steps: steps.into_iter().map(Duration::from_secs).collect(),
            index: 0,
        }
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        BackoffSchedule::from_seconds(&DEFAULT_RAMP_SECONDS)
    }
}

impl Iterator for BackoffSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let step = self.steps[self.index.min(self.steps.len() - 1)];
        self.index = self.index.saturating_add(1);
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_then_saturation() {
        let schedule = BackoffSchedule::default();
        let secs: Vec<u64> = schedule.take(12).map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 21, 21, 21]);
    }

    #[test]
    fn test_custom_ramp() {
        let schedule = BackoffSchedule::from_seconds(&[10, 10]);
        let secs: Vec<u64> = schedule.take(4).map(|d| d.as_secs()).collect();
        assert_eq!(secs, vec![10, 10, 10, 10]);
    }

    #[test]
    fn test_empty_ramp_falls_back_to_default() {
        let mut schedule = BackoffSchedule::from_seconds(&[]);
        assert_eq!(schedule.next(), Some(Duration::from_secs(0)));
        assert_eq!(schedule.next(), Some(Duration::from_secs(1)));
    }
}
