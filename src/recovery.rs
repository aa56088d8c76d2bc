use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Delay growth between successive retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// base * attempt
    Linear,
    /// base * 2^(attempt - 1)
    Exponential,
}

/// Bounded-retry policy shared by credential discovery, observer setup
/// and metadata fetches, parameterized per call site from config
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one; never zero
    pub max_attempts: u32,

    /// Base delay fed into the backoff formula
    pub base_delay: Duration,

    /// Delay growth mode
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff,
        }
    }

    /// Delay to wait after the given 1-based attempt has failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Linear => self.base_delay * attempt,
            Backoff::Exponential => self.base_delay * 2u32.saturating_pow(attempt - 1),
        }
    }
}

/// Attempt bookkeeping for a retried operation.
///
/// The next-attempt deadline is computed from the instant of the last
/// attempt, so external re-entry does not reset the backoff clock.
#[derive(Debug, Default)]
pub struct RecoveryState {
    attempts: u32,
    last_attempt: Option<Instant>,
}

impl RecoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1-based count of attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.attempts += 1;
        self.last_attempt = Some(now);
    }

    pub fn exhausted(&self, policy: &RetryPolicy) -> bool {
        self.attempts >= policy.max_attempts
    }

    /// Earliest instant the next attempt may run, anchored to the last
    /// attempt rather than to the caller's current time
    pub fn next_attempt_at(&self, policy: &RetryPolicy) -> Instant {
        match self.last_attempt {
            Some(last) => last + policy.delay_for(self.attempts),
            None => Instant::now(),
        }
    }
}

/// Drive a fallible async operation to first success or bounded exhaustion.
///
/// The closure receives the 1-based attempt number. After the final failed
/// attempt the last error is surfaced unchanged.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut state = RecoveryState::new();

    loop {
        state.record_attempt(Instant::now());
        match op(state.attempts()).await {
            Ok(value) => return Ok(value),
            Err(err) if state.exhausted(policy) => {
                warn!(
                    "Operation failed after {} attempt(s): {}",
                    state.attempts(),
                    err
                );
                return Err(err);
            }
            Err(err) => {
                let resume_at = state.next_attempt_at(policy);
                debug!(
                    "Attempt {}/{} failed ({}), retrying in {:?}",
                    state.attempts(),
                    policy.max_attempts,
                    err,
                    resume_at.saturating_duration_since(Instant::now())
                );
                tokio::time::sleep_until(resume_at).await;
            }
        }
    }
}
