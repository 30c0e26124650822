//! Bounded polling of instance state.
//!
//! Cloud state transitions take anywhere from seconds to minutes, so every
//! lifecycle operation that needs a transition polls with a fixed cadence
//! and a hard attempt ceiling. The poller never interprets provider status
//! strings itself; callers supply a predicate built on
//! [`CloudConnection::classify`].

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

use crate::cancel::CancelToken;
use crate::connection::{CloudConnection, Instance};

/// Default spacing between successive state checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default check ceiling: 120 checks at 5 s spacing, 600 s overall.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;

/// Polling cadence and budget for one state wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Pause between checks.
    pub interval: Duration,
    /// Number of checks performed before giving up.
    pub max_attempts: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Errors raised while waiting for a state change.
#[derive(Debug, Error)]
pub enum WaitError<E>
where
    E: std::error::Error + 'static,
{
    /// Indicates the predicate did not hold within the check budget.
    #[error("state wait exhausted after {attempts} checks")]
    Timeout {
        /// Checks performed before giving up.
        attempts: u32,
    },
    /// Indicates the caller's cancellation token fired.
    #[error("state wait cancelled")]
    Cancelled,
    /// Surfaces a provider failure raised while describing the instance.
    #[error("provider error during state wait")]
    Provider(#[source] E),
}

/// Polls `instance_id` until `predicate` holds for its latest snapshot.
///
/// The predicate receives `None` once the provider no longer knows the
/// identifier, which lets destruction waits treat a vanished record as
/// success. Exactly `policy.max_attempts` checks are made, with
/// `policy.interval` of sleep between consecutive checks, before the wait
/// times out. The cancellation token is consulted ahead of every check.
///
/// # Errors
///
/// Returns [`WaitError::Timeout`] when the budget is exhausted,
/// [`WaitError::Cancelled`] when `cancel` fired, and
/// [`WaitError::Provider`] for a failed describe call.
pub async fn wait_until<C, F>(
    conn: &C,
    instance_id: &str,
    predicate: F,
    policy: &WaitPolicy,
    cancel: &CancelToken,
) -> Result<Option<Instance>, WaitError<C::Error>>
where
    C: CloudConnection,
    F: Fn(Option<&Instance>) -> bool,
{
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        let snapshot = conn
            .describe_instance(instance_id)
            .await
            .map_err(WaitError::Provider)?;
        if predicate(snapshot.as_ref()) {
            tracing::debug!(instance_id, attempt, "state wait satisfied");
            return Ok(snapshot);
        }
        if attempt < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }
    Err(WaitError::Timeout {
        attempts: policy.max_attempts,
    })
}
