//! Retry policy and the per-fetch retry state machine
//!
//! Consecutive failures are counted inside a window. Each failure short of
//! `max_retries` is followed by `retry_delay`; the failure that completes the
//! window is followed by `backoff_wait`, after which the counter resets and a
//! new window starts. The loop ends when the [`RetryLimit`] is reached.

use std::time::Duration;

/// When a fetch stops retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    /// Keep going until the caller cancels
    Forever,
    /// Stop at whichever bound is hit first
    Bounded {
        max_attempts: Option<u32>,
        deadline: Option<Duration>,
    },
}

impl RetryLimit {
    pub fn attempts(max_attempts: u32) -> Self {
        Self::Bounded {
            max_attempts: Some(max_attempts),
            deadline: None,
        }
    }

    pub fn deadline(deadline: Duration) -> Self {
        Self::Bounded {
            max_attempts: None,
            deadline: Some(deadline),
        }
    }

    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            Self::Forever => None,
            Self::Bounded { max_attempts, .. } => *max_attempts,
        }
    }

    pub fn deadline_duration(&self) -> Option<Duration> {
        match self {
            Self::Forever => None,
            Self::Bounded { deadline, .. } => *deadline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_wait: Duration,
    pub limit: RetryLimit,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        use crate::infrastructure::config::defaults;
        Self {
            max_retries: defaults::MAX_RETRIES,
            retry_delay: Duration::from_secs(defaults::RETRY_DELAY_SECONDS),
            backoff_wait: Duration::from_secs(defaults::BACKOFF_WAIT_SECONDS),
            limit: RetryLimit::attempts(defaults::MAX_TOTAL_ATTEMPTS),
        }
    }
}

/// Where a fetch currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Ready to issue the next request; `consecutive_failures` in this window
    Attempting { consecutive_failures: u32 },
    /// Waiting before the next request; the counter resumes at
    /// `consecutive_failures` (zero once a full window has elapsed)
    BackingOff {
        wait: Duration,
        consecutive_failures: u32,
    },
    /// No more requests will be made
    Exhausted,
}

/// What the fetch loop should do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Wait(Duration),
    GiveUp,
}

/// Drives one fetch through its retry states. Pure: time is not read here,
/// the fetcher enforces the deadline half of the limit.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    total_attempts: u32,
    windows_completed: u32,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempting {
                consecutive_failures: 0,
            },
            total_attempts: 0,
            windows_completed: 0,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    /// Full backoff windows that have elapsed
    pub fn windows_completed(&self) -> u32 {
        self.windows_completed
    }

    /// Record that a request is being issued
    pub fn begin_attempt(&mut self) {
        self.total_attempts += 1;
    }

    /// Record a failed request and decide what comes next
    pub fn on_failure(&mut self) -> RetryDecision {
        let failures = match self.state {
            RetryState::Attempting {
                consecutive_failures,
            } => consecutive_failures + 1,
            RetryState::BackingOff { .. } | RetryState::Exhausted => {
                self.state = RetryState::Exhausted;
                return RetryDecision::GiveUp;
            }
        };

        if let Some(max_attempts) = self.policy.limit.max_attempts() {
            if self.total_attempts >= max_attempts {
                self.state = RetryState::Exhausted;
                return RetryDecision::GiveUp;
            }
        }

        let (wait, consecutive_failures) = if failures < self.policy.max_retries {
            (self.policy.retry_delay, failures)
        } else {
            self.windows_completed += 1;
            (self.policy.backoff_wait, 0)
        };

        self.state = RetryState::BackingOff {
            wait,
            consecutive_failures,
        };
        RetryDecision::Wait(wait)
    }

    /// The wait finished; go back to attempting
    pub fn resume(&mut self) {
        if let RetryState::BackingOff {
            consecutive_failures,
            ..
        } = self.state
        {
            self.state = RetryState::Attempting {
                consecutive_failures,
            };
        }
    }

    /// Give up regardless of the remaining budget (deadline or cancellation)
    pub fn exhaust(&mut self) {
        self.state = RetryState::Exhausted;
    }
}
