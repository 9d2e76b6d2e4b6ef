//! Bounded Poller
//!
//! Retry-until-converged-or-timeout primitive used by every asynchronous
//! step of the operator. Every error the operation returns is treated as
//! transient: it is logged and the poll keeps going until the budget runs
//! out.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =============================================================================
// Poll Spec
// =============================================================================

/// Interval and overall budget of one bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSpec {
    /// Build a spec, rejecting a zero interval or `interval >= timeout`.
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Configuration("poll interval must be non-zero".into()));
        }
        if interval >= timeout {
            return Err(Error::Configuration(format!(
                "poll interval {:?} must be shorter than timeout {:?}",
                interval, timeout
            )));
        }
        Ok(Self { interval, timeout })
    }

    pub fn from_secs(interval_secs: u64, timeout_secs: u64) -> Result<Self> {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }
}

// =============================================================================
// Poll
// =============================================================================

/// Poll `op` until it reports done, the timeout elapses, or `cancel` fires.
///
/// `op` runs immediately and then every `spec.interval`. The last attempt is
/// made at the deadline, so a non-converging poll returns no earlier than
/// `spec.timeout` and no later than `spec.timeout + spec.interval`.
pub async fn poll<F, Fut>(
    cancel: &CancellationToken,
    spec: PollSpec,
    target: &str,
    mut op: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + spec.timeout;
    let mut last_error: Option<Error> = None;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(target)),
            outcome = op() => outcome,
        };

        match outcome {
            Ok(true) => {
                debug!(target = %target, attempt, "Poll converged");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(target = %target, attempt, error = %e, "Poll attempt failed, retrying");
                last_error = Some(e);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                target: target.to_string(),
                timeout: spec.timeout,
                last_error: last_error.map(Box::new),
            });
        }

        let wait = spec.interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(target)),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Run a single API call, aborting promptly if `cancel` fires first.
pub async fn with_cancel<T, Fut>(cancel: &CancellationToken, target: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled(target)),
        result = fut => result,
    }
}

fn cancelled(target: &str) -> Error {
    Error::Cancelled {
        target: target.to_string(),
    }
}
