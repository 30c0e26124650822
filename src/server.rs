//! The normalized view of one provisioned machine.
//!
//! A [`ManagedServer`] pairs the provider's instance snapshot with the
//! access metadata remote tasks need. It also carries the fixed pipeline
//! entry points: bootstrap, provisioning handoff, and post-provision
//! cleanup.

use std::fmt;
use std::net::IpAddr;

use camino::Utf8PathBuf;

use crate::connection::Instance;
use crate::deploy::{DeploySpec, Deployer};
use crate::remote::tasks::{
    CommandBatch, DeployHandoff, FileUpload, PrivilegeFix, WaitUntilReady, cleanup_commands,
};
use crate::remote::{TaskContext, TaskError, run_tasks};
use crate::secret::masked;

/// Access credential used both to authenticate sessions and to answer
/// interactive password prompts.
#[derive(Clone, Eq, PartialEq)]
pub enum Credential {
    /// Login password.
    Password(String),
    /// Path to a local private key file.
    KeyFile(Utf8PathBuf),
}

impl Credential {
    /// String sent in reply to an interactive password prompt.
    ///
    /// For key-file credentials this is the key path. Hosts that prompt for
    /// a password despite key authentication receive the path, which fails
    /// the prompt rather than hanging it.
    #[must_use]
    pub fn secret(&self) -> &str {
        match self {
            Self::Password(value) => value,
            Self::KeyFile(path) => path.as_str(),
        }
    }

    /// Renders the credential for log output. Passwords are masked unless
    /// `reveal_secrets` is set; key paths are never sensitive.
    #[must_use]
    pub fn display(&self, reveal_secrets: bool) -> String {
        match self {
            Self::Password(value) => masked(value, reveal_secrets).to_string(),
            Self::KeyFile(path) => path.to_string(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(*****)"),
            Self::KeyFile(path) => write!(f, "KeyFile({path})"),
        }
    }
}

/// Inputs for the fixed bootstrap pipeline.
#[derive(Clone, Debug, Default)]
pub struct BootstrapPlan {
    /// Commands executed before any file upload.
    pub pre_commands: Vec<String>,
    /// Ordered local-to-remote upload pairs.
    pub uploads: Vec<(Utf8PathBuf, Utf8PathBuf)>,
    /// Commands executed after all uploads complete.
    pub post_commands: Vec<String>,
    /// Additionally grant the access user passwordless privilege elevation.
    pub grant_passwordless: bool,
}

/// One provisioned machine plus the access metadata remote tasks need.
#[derive(Clone, Debug)]
pub struct ManagedServer {
    /// Logical server name, shared with the provider name tag.
    pub name: String,
    /// Address learned once the instance reported ready.
    pub ip_address: Option<IpAddr>,
    /// Remote login user.
    pub access_user: Option<String>,
    /// Credential used to reach the machine.
    pub access_credential: Option<Credential>,
    /// Snapshot of the underlying provider record.
    pub instance: Instance,
}

impl ManagedServer {
    /// Builds a server with no access metadata attached yet.
    #[must_use]
    pub fn new(name: impl Into<String>, instance: Instance) -> Self {
        Self {
            name: name.into(),
            ip_address: None,
            access_user: None,
            access_credential: None,
            instance,
        }
    }

    /// Raw provider status string from the last snapshot.
    #[must_use]
    pub fn raw_state(&self) -> &str {
        &self.instance.raw_state
    }

    /// Address, user, and credential, or the first missing field.
    ///
    /// Checked before any network attempt so a misconfigured server fails
    /// fast instead of burning the connection retry budget.
    pub(crate) fn access(&self) -> Result<(IpAddr, &str, &Credential), TaskError> {
        let ip = self.ip_address.ok_or(TaskError::MissingCredentials {
            field: "ip_address",
        })?;
        let user = self
            .access_user
            .as_deref()
            .filter(|user| !user.trim().is_empty())
            .ok_or(TaskError::MissingCredentials {
                field: "access_user",
            })?;
        let credential =
            self.access_credential
                .as_ref()
                .ok_or(TaskError::MissingCredentials {
                    field: "access_credential",
                })?;
        Ok((ip, user, credential))
    }

    /// Runs the fixed bootstrap sequence: readiness wait, privilege fix,
    /// pre-upload commands, file uploads, post-upload commands.
    ///
    /// # Errors
    ///
    /// Returns the first failing task's [`TaskError`] unchanged; later
    /// tasks are not attempted.
    pub fn bootstrap(&self, plan: &BootstrapPlan, ctx: &TaskContext<'_>) -> Result<(), TaskError> {
        let ready = WaitUntilReady::new();
        let privilege = PrivilegeFix::new(plan.grant_passwordless);
        let pre = CommandBatch::new(plan.pre_commands.clone());
        let uploads = FileUpload::new(plan.uploads.clone());
        let post = CommandBatch::new(plan.post_commands.clone());
        run_tasks(self, &[&ready, &privilege, &pre, &uploads, &post], ctx)
    }

    /// Waits for readiness, then hands the assembled deployment parameters
    /// to `deployer`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Deploy`] for an incomplete deploy spec or a
    /// collaborator failure, otherwise the first failing task's error.
    pub fn provision(
        &self,
        deployer: &dyn Deployer,
        spec: &DeploySpec,
        ctx: &TaskContext<'_>,
    ) -> Result<(), TaskError> {
        let handoff = DeployHandoff::new(deployer, spec)
            .map_err(|err| TaskError::Deploy(Box::new(err)))?;
        let ready = WaitUntilReady::new();
        run_tasks(self, &[&ready, &handoff], ctx)
    }

    /// Runs the post-provision cleanup batch: OS package-cache cleanup,
    /// scratch directory removal, then any caller-supplied commands.
    ///
    /// # Errors
    ///
    /// Returns the first failing task's [`TaskError`] unchanged.
    pub fn cleanup(
        &self,
        os: &str,
        tmp_dir: &Utf8PathBuf,
        custom_commands: &[String],
        ctx: &TaskContext<'_>,
    ) -> Result<(), TaskError> {
        let ready = WaitUntilReady::new();
        let os_cleanup = CommandBatch::new(cleanup_commands(os, tmp_dir));
        let custom = CommandBatch::new(custom_commands.to_vec());
        run_tasks(self, &[&ready, &os_cleanup, &custom], ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_debug_output_is_masked() {
        let rendered = format!("{:?}", Credential::Password(String::from("hunter2")));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("*****"));
    }

    #[test]
    fn key_file_debug_output_keeps_the_path() {
        let rendered = format!(
            "{:?}",
            Credential::KeyFile(Utf8PathBuf::from("/home/ci/.ssh/id_rsa"))
        );
        assert!(rendered.contains("/home/ci/.ssh/id_rsa"));
    }

    #[test]
    fn password_display_honours_reveal_flag() {
        let credential = Credential::Password(String::from("hunter2"));
        assert_eq!(credential.display(false), "*****");
        assert_eq!(credential.display(true), "hunter2");
    }

    #[test]
    fn access_reports_first_missing_field() {
        let server = ManagedServer::new("web", Instance::new("i-1", "web", "running"));
        let err = server.access().expect_err("server has no address");
        assert!(matches!(
            err,
            TaskError::MissingCredentials {
                field: "ip_address"
            }
        ));
    }
}
