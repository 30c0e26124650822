//! Session abstraction over the remote execution transport.
//!
//! Tasks never touch the transport directly. They obtain a
//! [`RemoteSession`] from a [`SessionDialer`], usually through
//! [`dial_with_retry`], which absorbs the connection refusals and timeouts
//! a freshly booted machine produces before its login service is up.

use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;

use super::{StreamKind, TaskError};
use crate::cancel::CancelToken;
use crate::server::Credential;

/// Default pause between connection attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Default connection attempt budget.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 50;

/// Network location and login user of a session target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    /// Target address.
    pub host: std::net::IpAddr,
    /// Target TCP port.
    pub port: u16,
    /// Login user.
    pub user: String,
}

/// Connection retry cadence and budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Pause between consecutive attempts.
    pub backoff: Duration,
    /// Attempts made before the host is declared unreachable.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RETRY_BACKOFF,
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

/// Classified failure of a single connection attempt.
///
/// A machine that has just been powered on commonly refuses connections,
/// times out, or rejects authentication while its accounts are still being
/// seeded. Those outcomes are retried; anything else is fatal.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DialError {
    /// The remote service refused the connection.
    #[error("connection refused")]
    Refused,
    /// The connection attempt timed out.
    #[error("connection timed out")]
    TimedOut,
    /// The transport reached the host but authentication failed.
    #[error("authentication failed: {message}")]
    AuthFailed {
        /// Transport-reported reason.
        message: String,
    },
    /// Unrecoverable failure; retrying would not help.
    #[error("{message}")]
    Fatal {
        /// Transport-reported reason.
        message: String,
    },
}

/// Transport-level failure inside an established session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct SessionError {
    /// Transport-reported reason.
    pub message: String,
}

impl SessionError {
    /// Builds an error from any displayable transport failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Established interactive session with a remote host.
pub trait RemoteSession {
    /// Executes `command`, streaming output chunks into `on_chunk`.
    ///
    /// The transport reports stream data, not exit codes; a non-zero remote
    /// exit status is not an error at this level.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] for transport failures.
    fn run(
        &mut self,
        command: &str,
        on_chunk: &mut dyn FnMut(StreamKind, &str),
    ) -> Result<(), SessionError>;

    /// Opens a pty-backed shell, writes `input` line by line, then `exit`.
    ///
    /// Every output chunk is passed to `on_chunk`; when the closure returns
    /// a string it is written back to the shell, which lets callers answer
    /// interactive prompts mid-stream.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] for transport failures.
    fn run_shell(
        &mut self,
        input: &[String],
        on_chunk: &mut dyn FnMut(StreamKind, &str) -> Option<String>,
    ) -> Result<(), SessionError>;

    /// Uploads the local file at `local` to `remote` on the host.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] when the local file cannot be read or the
    /// transfer fails.
    fn upload(&mut self, local: &Utf8Path, remote: &Utf8Path) -> Result<(), SessionError>;
}

/// Establishes sessions; the seam between tasks and the real transport.
pub trait SessionDialer {
    /// Attempts one connection to `endpoint` using `credential`.
    ///
    /// # Errors
    ///
    /// Returns a [`DialError`] classifying the failure for the retry loop.
    fn dial(
        &self,
        endpoint: &Endpoint,
        credential: &Credential,
    ) -> Result<Box<dyn RemoteSession>, DialError>;
}

/// Dials `endpoint` with a bounded retry loop.
///
/// Refused, timed-out, and authentication-rejected attempts are retried
/// with `policy.backoff` of sleep between consecutive attempts, up to
/// `policy.max_attempts` in total. The cancellation token is consulted
/// ahead of every attempt.
///
/// # Errors
///
/// Returns [`TaskError::Unreachable`] once the budget is exhausted,
/// [`TaskError::Execution`] immediately for a fatal dial failure, and
/// [`TaskError::Cancelled`] when `cancel` fired.
pub fn dial_with_retry(
    dialer: &dyn SessionDialer,
    endpoint: &Endpoint,
    credential: &Credential,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<Box<dyn RemoteSession>, TaskError> {
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        match dialer.dial(endpoint, credential) {
            Ok(session) => {
                tracing::debug!(host = %endpoint.host, attempt, "session established");
                return Ok(session);
            }
            Err(DialError::Fatal { message }) => {
                return Err(TaskError::Execution { message });
            }
            Err(err) => {
                tracing::debug!(
                    host = %endpoint.host,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "connection attempt failed; server may still be booting"
                );
                if attempt < policy.max_attempts {
                    thread::sleep(policy.backoff);
                }
            }
        }
    }
    Err(TaskError::Unreachable {
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    struct NoopSession;

    impl RemoteSession for NoopSession {
        fn run(
            &mut self,
            _command: &str,
            _on_chunk: &mut dyn FnMut(StreamKind, &str),
        ) -> Result<(), SessionError> {
            Ok(())
        }

        fn run_shell(
            &mut self,
            _input: &[String],
            _on_chunk: &mut dyn FnMut(StreamKind, &str) -> Option<String>,
        ) -> Result<(), SessionError> {
            Ok(())
        }

        fn upload(&mut self, _local: &Utf8Path, _remote: &Utf8Path) -> Result<(), SessionError> {
            Ok(())
        }
    }

    struct FlakyDialer {
        attempts: Cell<u32>,
        failures_before_success: u32,
        failure: DialError,
    }

    impl FlakyDialer {
        fn new(failures_before_success: u32, failure: DialError) -> Self {
            Self {
                attempts: Cell::new(0),
                failures_before_success,
                failure,
            }
        }
    }

    impl SessionDialer for FlakyDialer {
        fn dial(
            &self,
            _endpoint: &Endpoint,
            _credential: &Credential,
        ) -> Result<Box<dyn RemoteSession>, DialError> {
            let attempt = self.attempts.get() + 1;
            self.attempts.set(attempt);
            if attempt > self.failures_before_success {
                Ok(Box::new(NoopSession))
            } else {
                Err(self.failure.clone())
            }
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint {
            host: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10)),
            port: 22,
            user: String::from("ubuntu"),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_millis(1),
            max_attempts,
        }
    }

    #[test]
    fn succeeds_on_the_final_attempt() {
        let dialer = FlakyDialer::new(49, DialError::Refused);
        let credential = Credential::Password(String::from("pw"));
        dial_with_retry(
            &dialer,
            &endpoint(),
            &credential,
            &fast_policy(50),
            &CancelToken::new(),
        )
        .unwrap_or_else(|err| panic!("final attempt should succeed: {err}"));
        assert_eq!(dialer.attempts.get(), 50);
    }

    #[test]
    fn exhausts_the_budget_and_reports_unreachable() {
        let dialer = FlakyDialer::new(u32::MAX, DialError::TimedOut);
        let credential = Credential::Password(String::from("pw"));
        let Err(err) = dial_with_retry(
            &dialer,
            &endpoint(),
            &credential,
            &fast_policy(50),
            &CancelToken::new(),
        ) else {
            panic!("dial should fail");
        };
        assert!(matches!(err, TaskError::Unreachable { attempts: 50 }));
        assert_eq!(dialer.attempts.get(), 50);
    }

    #[test]
    fn fatal_failures_are_not_retried() {
        let dialer = FlakyDialer::new(
            u32::MAX,
            DialError::Fatal {
                message: String::from("host key mismatch"),
            },
        );
        let credential = Credential::Password(String::from("pw"));
        let Err(err) = dial_with_retry(
            &dialer,
            &endpoint(),
            &credential,
            &fast_policy(50),
            &CancelToken::new(),
        ) else {
            panic!("dial should fail");
        };
        assert!(matches!(err, TaskError::Execution { .. }));
        assert_eq!(dialer.attempts.get(), 1);
    }

    #[test]
    fn cancelled_token_prevents_any_attempt() {
        let dialer = FlakyDialer::new(0, DialError::Refused);
        let credential = Credential::Password(String::from("pw"));
        let cancel = CancelToken::new();
        cancel.cancel();
        let Err(err) =
            dial_with_retry(&dialer, &endpoint(), &credential, &fast_policy(50), &cancel)
        else {
            panic!("dial should be cancelled");
        };
        assert!(matches!(err, TaskError::Cancelled));
        assert_eq!(dialer.attempts.get(), 0);
    }
}
