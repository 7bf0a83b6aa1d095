use std::future::Future;
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::errors::{GuiPilotError, GuiPilotResult};

/// Bounded attempts with a per-attempt deadline, applied at every external call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_session(cfg: &SessionConfig) -> Self {
        Self {
            max_attempts: cfg.max_retries.max(1),
            call_timeout: Duration::from_secs(cfg.call_timeout_secs.max(1)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_session(&SessionConfig::default())
    }
}

/// Run `call` until it succeeds, a non-retryable error occurs, or the attempts run out.
/// Exhaustion is reported as [`GuiPilotError::Exhausted`].
pub async fn retry_call<T, F, Fut>(what: &str, policy: &RetryPolicy, mut call: F) -> GuiPilotResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = GuiPilotResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(policy.call_timeout, call(attempt)).await {
            Ok(r) => r,
            Err(_) => Err(GuiPilotError::Timeout(policy.call_timeout.as_secs())),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                tracing::warn!(what, attempt, max_attempts = attempts, error = %e, "call failed, retrying");
                last_error = e.to_string();
            }
            Err(e) => return Err(e),
        }
    }

    tracing::error!(what, attempts, error = %last_error, "retry budget exhausted");
    Err(GuiPilotError::Exhausted {
        what: what.to_string(),
        attempts,
        last_error,
    })
}

/// Why the loop controller stopped the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    IterationLimit(u32),
    TimeLimit(u32),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::IterationLimit(n) => write!(f, "iteration limit of {n} reached"),
            StopReason::TimeLimit(m) => write!(f, "time limit of {m} minutes reached"),
        }
    }
}

/// Iteration and wall-clock budget of one session.
pub struct LoopController {
    max_iterations: u32,
    max_duration: Option<Duration>,
    start_time: Instant,
    iterations: u32,
}

impl LoopController {
    pub fn new(cfg: &SessionConfig) -> Self {
        let max_duration = (cfg.max_duration_minutes > 0)
            .then(|| Duration::from_secs(u64::from(cfg.max_duration_minutes) * 60));
        Self {
            max_iterations: cfg.max_iterations,
            max_duration,
            start_time: Instant::now(),
            iterations: 0,
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Count one more iteration, or report why the budget does not allow it.
    pub fn begin_iteration(&mut self) -> Result<u32, StopReason> {
        if self.iterations >= self.max_iterations {
            return Err(StopReason::IterationLimit(self.max_iterations));
        }
        if let Some(max) = self.max_duration {
            if self.start_time.elapsed() >= max {
                return Err(StopReason::TimeLimit((max.as_secs() / 60) as u32));
            }
        }
        self.iterations += 1;
        Ok(self.iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            call_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_call("perception", &policy(3), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(GuiPilotError::Perception("503".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = retry_call::<(), _, _>("perception", &policy(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GuiPilotError::Perception("unreachable".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, GuiPilotError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = retry_call::<(), _, _>("planning", &policy(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GuiPilotError::Config("bad key".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, GuiPilotError::Config(_)));
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let p = RetryPolicy {
            max_attempts: 2,
            call_timeout: Duration::from_millis(20),
        };
        let err = retry_call::<(), _, _>("reflection", &p, |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        match err {
            GuiPilotError::Exhausted { last_error, .. } => assert!(last_error.contains("timed out")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn iteration_budget() {
        let cfg = SessionConfig {
            max_iterations: 2,
            ..SessionConfig::default()
        };
        let mut ctrl = LoopController::new(&cfg);
        assert_eq!(ctrl.begin_iteration(), Ok(1));
        assert_eq!(ctrl.begin_iteration(), Ok(2));
        assert_eq!(ctrl.begin_iteration(), Err(StopReason::IterationLimit(2)));
        assert_eq!(ctrl.iterations(), 2);
    }

    #[test]
    fn time_budget() {
        let cfg = SessionConfig {
            max_iterations: 10,
            max_duration_minutes: 3,
            ..SessionConfig::default()
        };
        let mut ctrl = LoopController::new(&cfg);
        assert_eq!(ctrl.max_duration, Some(Duration::from_secs(180)));
        assert_eq!(ctrl.begin_iteration(), Ok(1));

        // A budget that is already used up.
        ctrl.max_duration = Some(Duration::ZERO);
        assert_eq!(ctrl.begin_iteration(), Err(StopReason::TimeLimit(0)));
        assert_eq!(ctrl.iterations(), 1);
        assert_eq!(StopReason::TimeLimit(3).to_string(), "time limit of 3 minutes reached");
    }

    #[test]
    fn zero_minutes_means_no_time_budget() {
        let ctrl = LoopController::new(&SessionConfig::default());
        assert!(ctrl.max_duration.is_none());
    }
}
