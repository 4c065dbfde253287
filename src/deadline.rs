//! Wall-clock budget for a server run.

use std::time::{Duration, Instant};

/// Tracks elapsed time against a fixed run duration.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineClock {
    start: Instant,
    run_duration: Duration,
}

impl DeadlineClock {
    /// Start the clock now.
    pub fn start(run_duration: Duration) -> Self {
        Self::starting_at(Instant::now(), run_duration)
    }

    pub fn starting_at(start: Instant, run_duration: Duration) -> Self {
        Self {
            start,
            run_duration,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.remaining_at(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// How long a poll may block: never past the deadline, never longer
    /// than `quantum`.
    pub fn poll_timeout(&self, quantum: Duration) -> Duration {
        self.remaining().min(quantum)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn remaining_at(&self, now: Instant) -> Duration {
        self.run_duration
            .saturating_sub(now.saturating_duration_since(self.start))
    }
}
