//! Wall-clock budget tracking for time-boxed work

use std::time::{Duration, Instant};

/// Tracks elapsed time against a fixed per-call budget.
///
/// Started at the top of a unit of incremental work; the worker checks
/// [`FrameBudget::exceeded`] between items and yields once it returns true.
#[derive(Clone, Copy, Debug)]
pub struct FrameBudget {
    start: Instant,
    budget: Duration,
}

impl FrameBudget {
    /// Start a new budget window now
    pub fn start(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// Start a new budget window from a millisecond count
    pub fn from_millis(budget_ms: u64) -> Self {
        Self::start(Duration::from_millis(budget_ms))
    }

    /// Configured budget
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time spent since the window started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> f32 {
        self.elapsed().as_secs_f32() * 1000.0
    }

    /// Time left before the budget runs out (zero once exceeded)
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// True once elapsed time is strictly greater than the budget
    pub fn exceeded(&self) -> bool {
        self.elapsed() > self.budget
    }
}
