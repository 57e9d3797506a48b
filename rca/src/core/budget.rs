//! Shared wall-clock budget helpers for the diagnosis session.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Result;

/// Raised when the session deadline has passed.
///
/// Orchestration code checks for it with `err.downcast_ref::<DeadlineExceeded>()`
/// so local fallbacks never swallow a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineExceeded;

impl fmt::Display for DeadlineExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("session deadline exceeded")
    }
}

impl std::error::Error for DeadlineExceeded {}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(DeadlineExceeded.into());
    }
    Ok(remaining)
}

/// Clamp a per-call timeout to whatever is left of the session budget.
pub fn call_budget(deadline: Instant, per_call: Duration) -> Result<Duration> {
    Ok(remaining_budget(deadline)?.min(per_call))
}

/// True if `err` (or anything in its chain) is a [`DeadlineExceeded`].
pub fn is_deadline(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<DeadlineExceeded>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn expired_deadline_is_typed() {
        let err = remaining_budget(Instant::now()).expect_err("expired");
        assert!(err.downcast_ref::<DeadlineExceeded>().is_some());
    }

    #[test]
    fn call_budget_never_exceeds_per_call_timeout() {
        let deadline = Instant::now() + Duration::from_secs(3600);
        let budget = call_budget(deadline, Duration::from_secs(5)).expect("budget");
        assert_eq!(budget, Duration::from_secs(5));
    }

    #[test]
    fn deadline_detected_through_context() {
        let err = remaining_budget(Instant::now())
            .context("run explorer")
            .expect_err("expired");
        assert!(is_deadline(&err));
        assert!(!is_deadline(&anyhow::anyhow!("model failed")));
    }
}
