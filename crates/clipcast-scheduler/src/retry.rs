//! Retry policy: a pure decision over a finished execution attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{Job, advance};

/// Shape of the delay between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed,
    /// Delay doubles with each failed attempt, up to `cap`.
    Exponential { cap: Duration },
}

/// What happens to a job after an execution attempt finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The upload went through; the job is done.
    Completed,
    /// Failed with attempts remaining; run again no earlier than `at`.
    Retry { at: DateTime<Utc> },
    /// Failed with no attempts left.
    Exhausted,
}

/// Decides job outcomes from attempt results. Holds no clock and mutates
/// nothing, so the same inputs always produce the same outcome.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    delay: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(delay: Duration, backoff: Backoff) -> Self {
        Self { delay, backoff }
    }

    /// Outcome of the attempt that just finished. `job.attempt` is that
    /// attempt's number, starting at 1 for the first execution.
    pub fn decide(&self, job: &Job, succeeded: bool, now: DateTime<Utc>) -> Outcome {
        if succeeded {
            return Outcome::Completed;
        }
        if job.attempt >= job.max_attempts {
            return Outcome::Exhausted;
        }
        Outcome::Retry {
            at: advance(now, self.delay_for(job.attempt)),
        }
    }

    /// Delay before the next attempt, given the attempt number that failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { cap } => {
                let doublings = attempt.saturating_sub(1).min(4);
                self.delay
                    .checked_mul(1u32 << doublings)
                    .map_or(cap, |delay| delay.min(cap))
            }
        }
    }
}
