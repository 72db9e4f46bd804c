use crate::context::Context;
use crate::errors::BizResult;
use rand::{thread_rng, Rng};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    Linear,
    Exponential,
}

/// Backoff schedule for caller-level retries.
///
/// The allocator itself never retries. Repositories wrap each allocation in
/// [retry_transient], which re-issues the call only while the error is
/// transient, the policy has attempts left and the caller's deadline has
/// not passed.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter_fraction: f64,
    time_budget: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::exponential(5, Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(0.2)
    }
}

impl RetryPolicy {
    pub fn linear(max_attempts: usize, base_delay: Duration) -> Self {
        Self::new(RetryStrategy::Linear, max_attempts, base_delay)
    }

    pub fn exponential(max_attempts: usize, base_delay: Duration) -> Self {
        Self::new(RetryStrategy::Exponential, max_attempts, base_delay)
    }

    /// A policy that issues the call exactly once.
    pub fn never() -> Self {
        Self::new(RetryStrategy::Linear, 1, Duration::ZERO)
    }

    fn new(strategy: RetryStrategy, max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            strategy,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: None,
            jitter_fraction: 0.0,
            time_budget: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = if max_delay.is_zero() {
            None
        } else {
            Some(max_delay)
        };
        self
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.max(0.0);
        self
    }

    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget.filter(|duration| !duration.is_zero());
        self
    }

    pub fn strategy(&self) -> RetryStrategy {
        self.strategy
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn handle(&self) -> RetryHandle {
        let deadline = self
            .time_budget
            .and_then(|budget| Instant::now().checked_add(budget));
        RetryHandle {
            policy: self.clone(),
            attempts: 0,
            deadline,
        }
    }

    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let raw = match self.strategy {
            RetryStrategy::Linear => self.base_delay.saturating_mul(attempt as u32),
            RetryStrategy::Exponential => {
                let shift = attempt.saturating_sub(1).min(31);
                let scaled = self.base_delay.as_millis().saturating_mul(1u128 << shift);
                Duration::from_millis(scaled.min(u128::from(u64::MAX)) as u64)
            }
        };
        let bounded = match self.max_delay {
            Some(max) => raw.min(max),
            None => raw,
        };
        if bounded.is_zero() || self.jitter_fraction <= 0.0 {
            return bounded;
        }

        let jitter = self.jitter_fraction.min(1.0);
        let factor = thread_rng().gen_range((1.0 - jitter).max(0.0)..=1.0 + jitter);
        let jittered = (bounded.as_millis() as f64 * factor).round().max(0.0);
        Duration::from_millis(jittered as u64)
    }
}

/// Per-call retry state produced by [RetryPolicy::handle].
pub struct RetryHandle {
    policy: RetryPolicy,
    attempts: usize,
    deadline: Option<Instant>,
}

impl RetryHandle {
    /// Returns the delay before the next attempt, or `None` once the
    /// attempts or the time budget are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts + 1 >= self.policy.max_attempts {
            return None;
        }
        let next = self.attempts + 1;
        let delay = self.policy.delay_for_attempt(next);
        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            match now.checked_add(delay) {
                Some(at) if at <= deadline => {}
                _ => return None,
            }
        }
        self.attempts = next;
        Some(delay)
    }

    /// Number of retries granted so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

/// Runs `op` and re-runs it with backoff while it fails with a transient
/// error. A non-transient error, an exhausted policy or an expired `ctx`
/// returns the last error unchanged.
pub fn retry_transient<T>(
    policy: &RetryPolicy,
    ctx: &Context,
    mut op: impl FnMut() -> BizResult<T>,
) -> BizResult<T> {
    let mut handle = policy.handle();
    loop {
        let err = match op() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_transient() {
            return Err(err);
        }

        let delay = match handle.next_delay() {
            Some(delay) => delay,
            None => {
                log::warn!(
                    "Giving up after {} retries: {}",
                    handle.attempts(),
                    err
                );
                return Err(err);
            }
        };
        if let Some(remaining) = ctx.remaining() {
            if remaining <= delay {
                log::warn!("Deadline leaves no room for another attempt: {}", err);
                return Err(err);
            }
        }

        log::debug!(
            "Transient failure ({}), retry {} in {:?}",
            err.kind(),
            handle.attempts(),
            delay
        );
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}
