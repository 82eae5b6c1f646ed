//! Deadline timer used by every bounded wait on the bus

use std::time::Duration;

use tokio::time::Instant;

/// Tracks whether a fixed duration has elapsed since it was (re)started
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
    timeout: Duration,
    on: bool,
}

impl Timer {
    /// Start a timer that finishes after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
            on: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// True while the timer is on and the timeout has not elapsed
    pub fn running(&self) -> bool {
        self.on && self.elapsed() < self.timeout
    }

    /// True once the timeout has elapsed; a stopped timer never finishes
    pub fn finished(&self) -> bool {
        self.on && self.elapsed() >= self.timeout
    }

    /// Time left before the timer finishes (zero once finished or stopped)
    pub fn remaining(&self) -> Duration {
        if !self.on {
            return Duration::ZERO;
        }
        self.timeout.saturating_sub(self.elapsed())
    }

    /// Restart from now
    pub fn reset(&mut self) {
        self.start = Instant::now();
        self.on = true;
    }

    pub fn stop(&mut self) {
        self.on = false;
    }
}
