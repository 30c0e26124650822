//! The remote task set: readiness wait, privilege fix, command batches,
//! file uploads, and the deployment handoff.

use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;

use super::session::{Endpoint, RemoteSession, SessionError, dial_with_retry};
use super::{LogOptions, RemoteTask, StreamKind, TaskContext, TaskError};
use crate::deploy::{DeployRequest, DeploySpec, Deployer, IncompleteDeploySpec};
use crate::server::ManagedServer;

/// Dials the server named in `ctx`, going through the bounded retry loop.
fn connect(
    server: &ManagedServer,
    ctx: &TaskContext<'_>,
) -> Result<Box<dyn RemoteSession>, TaskError> {
    let (ip, user, credential) = server.access()?;
    let endpoint = Endpoint {
        host: ip,
        port: ctx.ssh_port,
        user: user.to_owned(),
    };
    tracing::debug!(
        user,
        host = %ip,
        credential = credential.display(ctx.log.reveal_secrets).as_str(),
        "establishing remote session"
    );
    dial_with_retry(ctx.dialer, &endpoint, credential, &ctx.retry, ctx.cancel)
}

fn forward_output(log: LogOptions, kind: StreamKind, chunk: &str) {
    if log.remote_debug {
        tracing::debug!(stream = ?kind, chunk, "remote output");
    }
}

fn execution(err: SessionError) -> TaskError {
    TaskError::Execution {
        message: err.message,
    }
}

/// Wraps a command so it executes with elevated privilege.
fn elevate(command: &str) -> String {
    format!("sudo su -c {}", escape(command.into()))
}

/// Heuristic for interactive password prompts emitted mid-stream.
pub(crate) fn is_password_prompt(chunk: &str) -> bool {
    let trimmed = chunk.trim_end();
    trimmed.ends_with("assword:") || chunk.contains("[sudo] password for")
}

/// Establishes the first session, proving the login service is live.
///
/// Runs a trivial shell command so the task also confirms the account can
/// open a pty, not just complete the handshake.
#[derive(Clone, Copy, Debug, Default)]
pub struct WaitUntilReady;

impl WaitUntilReady {
    /// Creates the task.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl RemoteTask for WaitUntilReady {
    fn name(&self) -> &'static str {
        "wait-until-ready"
    }

    fn execute(&self, server: &ManagedServer, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let mut session = connect(server, ctx)?;
        let log = ctx.log;
        session
            .run_shell(&[String::from("echo ready")], &mut |kind, chunk| {
                forward_output(log, kind, chunk);
                None
            })
            .map_err(execution)
    }
}

/// Removes the `requiretty` constraint for the access user so privileged
/// commands can run without an attached terminal, optionally granting
/// passwordless elevation as well. Both sudoers edits are guarded by a
/// grep, so re-running the task is a no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrivilegeFix {
    grant_passwordless: bool,
}

impl PrivilegeFix {
    /// Creates the task; `grant_passwordless` additionally adds a
    /// `NOPASSWD:ALL` rule for the access user.
    #[must_use]
    pub const fn new(grant_passwordless: bool) -> Self {
        Self { grant_passwordless }
    }

    fn sudoers_lines(user: &str, grant_passwordless: bool) -> Vec<String> {
        let mut lines = vec![guarded_sudoers_append(&format!(
            "Defaults:{user} !requiretty"
        ))];
        if grant_passwordless {
            lines.push(guarded_sudoers_append(&format!(
                "{user} ALL=(ALL) NOPASSWD:ALL"
            )));
        }
        lines
    }
}

fn guarded_sudoers_append(entry: &str) -> String {
    let quoted = escape(entry.into());
    elevate(&format!(
        "grep -qF {quoted} /etc/sudoers || echo {quoted} >> /etc/sudoers"
    ))
}

impl RemoteTask for PrivilegeFix {
    fn name(&self) -> &'static str {
        "privilege-fix"
    }

    fn execute(&self, server: &ManagedServer, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let (_, user, credential) = server.access()?;
        let reply = credential.secret().to_owned();
        let lines = Self::sudoers_lines(user, self.grant_passwordless);
        let mut session = connect(server, ctx)?;
        let log = ctx.log;
        session
            .run_shell(&lines, &mut |kind, chunk| {
                forward_output(log, kind, chunk);
                is_password_prompt(chunk).then(|| reply.clone())
            })
            .map_err(execution)
    }
}

/// Ordered shell commands, each wrapped to run with elevated privilege.
///
/// Blank entries are skipped; when every entry is blank no session is
/// opened at all.
#[derive(Clone, Debug, Default)]
pub struct CommandBatch {
    commands: Vec<String>,
}

impl CommandBatch {
    /// Creates a batch running `commands` in order.
    #[must_use]
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }
}

impl RemoteTask for CommandBatch {
    fn name(&self) -> &'static str {
        "command-batch"
    }

    fn execute(&self, server: &ManagedServer, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let runnable: Vec<&str> = self
            .commands
            .iter()
            .map(|command| command.trim())
            .filter(|command| !command.is_empty())
            .collect();
        if runnable.is_empty() {
            return Ok(());
        }
        let mut session = connect(server, ctx)?;
        let log = ctx.log;
        for command in runnable {
            if ctx.cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            let wrapped = elevate(command);
            tracing::debug!(command = wrapped.as_str(), "running command on server as root");
            let started = Instant::now();
            session
                .run(&wrapped, &mut |kind, chunk| forward_output(log, kind, chunk))
                .map_err(execution)?;
            tracing::debug!(elapsed = ?started.elapsed(), "command finished");
        }
        Ok(())
    }
}

/// Ordered local-to-remote file uploads over one transfer session.
///
/// Entries upload in the order given; the first failure aborts the rest.
#[derive(Clone, Debug, Default)]
pub struct FileUpload {
    files: Vec<(Utf8PathBuf, Utf8PathBuf)>,
}

impl FileUpload {
    /// Creates an upload task for `files` as `(local, remote)` pairs.
    #[must_use]
    pub fn new(files: Vec<(Utf8PathBuf, Utf8PathBuf)>) -> Self {
        Self { files }
    }
}

impl RemoteTask for FileUpload {
    fn name(&self) -> &'static str {
        "file-upload"
    }

    fn execute(&self, server: &ManagedServer, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        if self.files.is_empty() {
            return Ok(());
        }
        let mut session = connect(server, ctx)?;
        for (local, remote) in &self.files {
            if ctx.cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            tracing::debug!(
                local = local.as_str(),
                remote = remote.as_str(),
                "uploading file"
            );
            session
                .upload(local, remote)
                .map_err(|err| TaskError::Transfer {
                    local: local.clone(),
                    remote: remote.clone(),
                    message: err.message,
                })?;
        }
        Ok(())
    }
}

/// Builds the post-provision cleanup batch for `os`: package-cache cleanup
/// for the detected family, then removal of the scratch directory.
#[must_use]
pub fn cleanup_commands(os: &str, tmp_dir: &Utf8Path) -> Vec<String> {
    let mut commands = Vec::new();
    let label = os.to_ascii_lowercase();
    if label.contains("ubuntu") || label.contains("debian") {
        commands.push(String::from("apt-get clean"));
    } else if label.contains("centos") || label.contains("redhat") {
        commands.push(String::from("yum clean all"));
    }
    commands.push(format!("rm -rf {}", escape(tmp_dir.as_str().into())));
    commands
}

/// Hands the assembled deployment parameters to the external collaborator.
pub struct DeployHandoff<'a> {
    deployer: &'a dyn Deployer,
    spec: &'a DeploySpec,
}

impl<'a> DeployHandoff<'a> {
    /// Creates the handoff task, rejecting an incomplete deploy spec before
    /// the pipeline starts.
    ///
    /// # Errors
    ///
    /// Returns [`IncompleteDeploySpec`] when the git URL or both branch and
    /// reference are missing.
    pub fn new(
        deployer: &'a dyn Deployer,
        spec: &'a DeploySpec,
    ) -> Result<Self, IncompleteDeploySpec> {
        spec.validate()?;
        Ok(Self { deployer, spec })
    }
}

impl RemoteTask for DeployHandoff<'_> {
    fn name(&self) -> &'static str {
        "deploy-handoff"
    }

    fn execute(&self, server: &ManagedServer, _ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let (ip, user, credential) = server.access()?;
        let request = DeployRequest::new(self.spec, &server.name, ip, user, credential);
        tracing::info!(
            server = server.name.as_str(),
            git_url = request.git_url.as_str(),
            "handing off to deployment collaborator"
        );
        self.deployer.deploy(&request).map_err(TaskError::Deploy)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::login_prompt("Password:", true)]
    #[case::lowercase("user@host's password: ", true)]
    #[case::sudo_prompt("[sudo] password for admin: ", true)]
    #[case::ordinary_output("checking out manifests", false)]
    #[case::mentions_password("password rotation complete", false)]
    fn password_prompt_detection(#[case] chunk: &str, #[case] expected: bool) {
        assert_eq!(is_password_prompt(chunk), expected);
    }

    #[test]
    fn elevate_quotes_the_command() {
        assert_eq!(elevate("echo ok"), "sudo su -c 'echo ok'");
    }

    #[test]
    fn sudoers_lines_are_guarded_and_optional() {
        let lines = PrivilegeFix::sudoers_lines("deploy", false);
        assert_eq!(lines.len(), 1);
        let first = lines.first().map_or("", String::as_str);
        assert!(first.contains("grep -qF"));
        assert!(first.contains("!requiretty"));

        let granted = PrivilegeFix::sudoers_lines("deploy", true);
        assert_eq!(granted.len(), 2);
        let second = granted.get(1).map_or("", String::as_str);
        assert!(second.contains("NOPASSWD:ALL"));
    }

    #[rstest]
    #[case::ubuntu("ubuntu-14", Some("apt-get clean"))]
    #[case::debian("debian-12", Some("apt-get clean"))]
    #[case::centos("centos-7", Some("yum clean all"))]
    #[case::unknown("arch", None)]
    fn cleanup_commands_follow_the_os_family(
        #[case] os: &str,
        #[case] package_cleanup: Option<&str>,
    ) {
        let commands = cleanup_commands(os, Utf8Path::new("/tmp/stratus-run"));
        match package_cleanup {
            Some(expected) => {
                assert_eq!(commands.first().map(String::as_str), Some(expected));
            }
            None => assert_eq!(commands.len(), 1),
        }
        assert!(
            commands
                .last()
                .is_some_and(|command| command.starts_with("rm -rf"))
        );
    }
}
