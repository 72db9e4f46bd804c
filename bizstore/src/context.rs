use crate::errors::{BizError, BizResult, ErrorKind};
use std::time::{Duration, Instant};

/// Per-request execution context carrying an optional deadline.
///
/// Every gateway operation takes a `Context` and checks it inside its
/// critical section right before mutating, so an expired deadline fails with
/// [ErrorKind::DeadlineExceeded] and leaves the store untouched.
///
/// # Examples
///
/// ```rust
/// use bizstore::context::Context;
/// use std::time::Duration;
///
/// let ctx = Context::with_timeout(Duration::from_secs(5));
/// assert!(ctx.check().is_ok());
/// assert!(Context::background().remaining().is_none());
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
}

impl Context {
    /// A context without a deadline.
    pub fn background() -> Self {
        Context { deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Context {
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Context {
            deadline: Some(deadline),
        }
    }

    /// Returns a context whose deadline is the earlier of this one's and
    /// `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Context { deadline }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Fails with `DeadlineExceeded` once the deadline has passed.
    pub fn check(&self) -> BizResult<()> {
        if self.is_expired() {
            log::error!("Deadline exceeded");
            return Err(BizError::new("Deadline exceeded", ErrorKind::DeadlineExceeded));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_never_expires() {
        let ctx = Context::background();
        assert!(!ctx.is_expired());
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn past_deadline_fails_check() {
        let ctx = Context::with_deadline(Instant::now());
        let err = ctx.check().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DeadlineExceeded);
        assert!(err.is_transient());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn child_keeps_earlier_deadline() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let child = Context::background().child_with_timeout(Duration::from_secs(1));
        assert!(child.deadline().is_some());
    }
}
