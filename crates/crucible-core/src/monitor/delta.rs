//! Derived metrics from consecutive snapshots

use std::time::{Duration, Instant};

/// Keeps the previous raw snapshot of a cumulative counter source
///
/// The first observation has nothing to compare against and yields 0.
#[derive(Debug, Clone)]
pub struct DeltaTracker<S> {
    previous: Option<(S, Instant)>,
}

impl<S> Default for DeltaTracker<S> {
    fn default() -> Self {
        Self { previous: None }
    }
}

impl<S> DeltaTracker<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `current` and derive a value from the previous snapshot
    pub fn observe<F>(&mut self, current: S, derive: F) -> f64
    where
        F: FnOnce(&S, &S, Duration) -> f64,
    {
        self.observe_at(current, Instant::now(), derive)
    }

    /// Same as [`DeltaTracker::observe`] with an explicit capture time
    pub fn observe_at<F>(&mut self, current: S, at: Instant, derive: F) -> f64
    where
        F: FnOnce(&S, &S, Duration) -> f64,
    {
        let value = match &self.previous {
            Some((previous, then)) => {
                let value = derive(previous, &current, at.saturating_duration_since(*then));
                if value.is_finite() {
                    value
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.previous = Some((current, at));
        value
    }
}

/// Per-second rate of a monotonically increasing counter
///
/// Counter resets and zero-length intervals yield 0.
pub fn rate(previous: u64, current: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 || current < previous {
        return 0.0;
    }
    (current - previous) as f64 / secs
}
