//! Ordered remote task execution against a managed server.
//!
//! Bootstrap, provisioning, and cleanup are each a fixed sequence of
//! [`RemoteTask`]s run by [`run_tasks`]. The runner checks the server's
//! access fields before any network attempt, consults the cancellation
//! token between tasks, and stops at the first failure. Retry exists only
//! inside connection establishment; a task that fails is never re-run.

pub mod session;
pub mod ssh;
pub mod tasks;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::deploy::DeployError;
use crate::server::ManagedServer;
use session::{RetryPolicy, SessionDialer};

/// Identifies which remote output stream produced a chunk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Logging behaviour shared by all tasks in one pipeline run.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOptions {
    /// Forward remote output chunks to structured logging.
    pub remote_debug: bool,
    /// Render credentials in clear text instead of masking them.
    pub reveal_secrets: bool,
}

/// Errors raised by remote pipeline tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Raised before any network attempt when the server lacks an access
    /// field.
    #[error("server is missing {field}; remote tasks cannot run")]
    MissingCredentials {
        /// The absent access field.
        field: &'static str,
    },
    /// Raised once the connection retry budget is exhausted.
    #[error("failed to reach server after {attempts} connection attempts")]
    Unreachable {
        /// Connection attempts made before giving up.
        attempts: u32,
    },
    /// Raised when the caller's cancellation token fired.
    #[error("remote pipeline cancelled")]
    Cancelled,
    /// Transport-level failure while executing on the remote host.
    #[error("remote execution failed: {message}")]
    Execution {
        /// Transport-reported reason.
        message: String,
    },
    /// Raised when a file transfer fails. Later uploads are not attempted.
    #[error("failed to upload {local} to {remote}: {message}")]
    Transfer {
        /// Local source path of the failed entry.
        local: Utf8PathBuf,
        /// Remote destination path of the failed entry.
        remote: Utf8PathBuf,
        /// Transport-reported reason.
        message: String,
    },
    /// Failure reported by, or while preparing for, the deployment
    /// collaborator.
    #[error("deployment failed")]
    Deploy(#[source] DeployError),
}

/// Shared execution context threaded through every task in one run.
pub struct TaskContext<'a> {
    /// Session factory, the seam between tasks and the real transport.
    pub dialer: &'a dyn SessionDialer,
    /// Connection retry cadence and budget.
    pub retry: RetryPolicy,
    /// TCP port of the remote login service.
    pub ssh_port: u16,
    /// External cancellation signal.
    pub cancel: &'a CancelToken,
    /// Logging behaviour.
    pub log: LogOptions,
}

/// One step of a bootstrap, provisioning, or cleanup pipeline.
pub trait RemoteTask {
    /// Short name used in log events.
    fn name(&self) -> &'static str;

    /// Executes the task against `server`.
    ///
    /// # Errors
    ///
    /// Returns a [`TaskError`] describing the failure; the runner stops the
    /// pipeline on the first one.
    fn execute(&self, server: &ManagedServer, ctx: &TaskContext<'_>) -> Result<(), TaskError>;
}

/// Runs `tasks` in order, stopping at the first failure.
///
/// The access precondition is checked up front so that no connection
/// attempt is ever made against a server missing its address, user, or
/// credential.
///
/// # Errors
///
/// Returns [`TaskError::MissingCredentials`] before any task runs,
/// [`TaskError::Cancelled`] when the token fires between tasks, otherwise
/// the first failing task's error unchanged.
pub fn run_tasks(
    server: &ManagedServer,
    tasks: &[&dyn RemoteTask],
    ctx: &TaskContext<'_>,
) -> Result<(), TaskError> {
    server.access()?;
    for task in tasks {
        if ctx.cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        tracing::debug!(
            server = server.name.as_str(),
            task = task.name(),
            "running remote task"
        );
        task.execute(server, ctx)?;
    }
    Ok(())
}
