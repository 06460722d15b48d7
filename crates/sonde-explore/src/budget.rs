//! Step and wall-clock budgets.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Why the exploration loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// `max_steps` fuzz steps were issued.
    StepBudget,
    /// The running time reached `running_minutes`.
    TimeBudget,
    /// The agent closed the connection after exiting cleanly, which it
    /// does once its own time budget runs out.
    AgentFinished,
}

/// Polled once per loop iteration; never preempts a running script.
#[derive(Debug, Clone)]
pub struct BudgetChecker {
    max_steps: Option<u64>,
    running: Option<Duration>,
    started: Instant,
}

impl BudgetChecker {
    pub fn new(max_steps: Option<u64>, running: Option<Duration>) -> Self {
        Self {
            max_steps,
            running,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn time_exceeded(&self) -> bool {
        self.time_exceeded_at(self.elapsed())
    }

    pub fn time_exceeded_at(&self, elapsed: Duration) -> bool {
        self.running.is_some_and(|limit| elapsed >= limit)
    }

    /// Whether issuing another fuzz step would exceed `max_steps`.
    pub fn steps_exhausted(&self, steps_count: u64) -> bool {
        self.max_steps.is_some_and(|max| steps_count >= max)
    }

    /// Progress label for step logs, e.g. `(3 / 10)`.
    pub fn progress(&self, steps_count: u64) -> String {
        match self.max_steps {
            Some(max) => format!("({steps_count} / {max})"),
            None => format!("({steps_count})"),
        }
    }
}
