use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rand::Rng;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);
const MAX_JITTER_MS: u64 = 10;

/// Which HTTP statuses are worth retrying.
///
/// The default treats every 5xx status as transient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    retryable: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retryable: (500..=599).collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries on status.
    pub fn none() -> Self {
        Self {
            retryable: BTreeSet::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.retryable.insert(status);
        self
    }

    pub fn without_status(mut self, status: u16) -> Self {
        self.retryable.remove(&status);
        self
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable.contains(&status)
    }
}

/// Exponential backoff bounded by an overall retry budget.
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
    deadline: Instant,
}

impl Backoff {
    pub fn new(retry_timeout: Duration) -> Self {
        Self {
            next: INITIAL_BACKOFF,
            deadline: Instant::now() + retry_timeout,
        }
    }

    /// Pause before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS));
        let delay = self.next + jitter;
        if Instant::now() + delay > self.deadline {
            return None;
        }
        self.next = (self.next * 2).min(MAX_BACKOFF);
        Some(delay)
    }
}
