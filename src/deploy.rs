//! Handoff of provisioning parameters to an external deployment tool.
//!
//! The pipeline does not run deployments itself. It assembles a fixed
//! parameter set describing the target machine and the source to deploy,
//! then delegates to a [`Deployer`] collaborator. Collaborator failures
//! propagate uninterpreted.

use std::net::IpAddr;

use camino::Utf8PathBuf;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::server::Credential;

/// Failure type surfaced by deployment collaborators.
pub type DeployError = Box<dyn std::error::Error + Send + Sync>;

/// Default remote directory receiving the deployed tree.
pub const DEFAULT_DESTINATION: &str = "/var/opt/puppet";

/// External collaborator that provisions a target host from a git source.
pub trait Deployer {
    /// Runs the deployment described by `request` against the target host.
    ///
    /// # Errors
    ///
    /// Returns the collaborator's own failure, which the pipeline wraps
    /// without interpreting.
    fn deploy(&self, request: &DeployRequest) -> Result<(), DeployError>;
}

/// Raised when a deploy spec lacks its git source coordinates.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("deploy spec requires a git URL and a branch or reference")]
pub struct IncompleteDeploySpec;

/// Deployment inputs fixed ahead of provisioning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploySpec {
    /// Git repository URL handed to the deployment tool.
    pub git_url: String,
    /// Branch to deploy. At least one of branch and reference is required.
    pub branch: Option<String>,
    /// Tag or commit to deploy instead of a branch head.
    pub reference: Option<String>,
    /// Remote directory receiving the deployed tree.
    pub destination_path: Utf8PathBuf,
    /// Commands the collaborator runs before the deployment proper.
    pub pre_commands: Vec<String>,
    /// Commands the collaborator runs after the deployment proper.
    pub post_commands: Vec<String>,
    /// Scratch directory on the target host.
    pub tmp_dir: Utf8PathBuf,
}

impl DeploySpec {
    /// Builds a spec for `git_url` with the default destination and a fresh
    /// scratch directory.
    #[must_use]
    pub fn new(git_url: impl Into<String>) -> Self {
        Self {
            git_url: git_url.into(),
            branch: None,
            reference: None,
            destination_path: Utf8PathBuf::from(DEFAULT_DESTINATION),
            pre_commands: Vec::new(),
            post_commands: Vec::new(),
            tmp_dir: default_tmp_dir(),
        }
    }

    /// Checks that the git source coordinates are complete.
    ///
    /// # Errors
    ///
    /// Returns [`IncompleteDeploySpec`] when the URL is blank or neither a
    /// branch nor a reference is given.
    pub fn validate(&self) -> Result<(), IncompleteDeploySpec> {
        fn non_blank(value: Option<&str>) -> bool {
            value.is_some_and(|revision| !revision.trim().is_empty())
        }
        let has_source = !self.git_url.trim().is_empty();
        let has_revision = non_blank(self.branch.as_deref()) || non_blank(self.reference.as_deref());
        if has_source && has_revision {
            Ok(())
        } else {
            Err(IncompleteDeploySpec)
        }
    }
}

/// Fresh per-run scratch directory path on the target host.
#[must_use]
pub fn default_tmp_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(format!("/tmp/stratus-{}", Uuid::new_v4().simple()))
}

/// Full parameter set handed to a [`Deployer`].
///
/// All fields are plain strings so the request can be serialized for
/// collaborators invoked as external processes. The credential field
/// carries the password, or the key path for key-file access, mirroring
/// how the credential doubles as a prompt reply.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DeployRequest {
    /// Git repository URL.
    pub git_url: String,
    /// Branch to deploy, when given.
    pub branch: Option<String>,
    /// Tag or commit to deploy, when given.
    pub reference: Option<String>,
    /// Address of the machine being provisioned.
    pub target_ip: String,
    /// Login user on the target machine.
    pub access_user: String,
    /// Password or key path used to authenticate.
    pub access_credential: String,
    /// Logical server name, for the collaborator's own reporting.
    pub server_name: String,
    /// Remote directory receiving the deployed tree.
    pub destination_path: String,
    /// Commands run before the deployment proper.
    pub pre_commands: Vec<String>,
    /// Commands run after the deployment proper.
    pub post_commands: Vec<String>,
    /// Scratch directory on the target host.
    pub tmp_dir: String,
}

impl DeployRequest {
    /// Assembles the handoff parameter set for one target machine.
    #[must_use]
    pub fn new(
        spec: &DeploySpec,
        server_name: &str,
        target_ip: IpAddr,
        access_user: &str,
        credential: &Credential,
    ) -> Self {
        Self {
            git_url: spec.git_url.clone(),
            branch: spec.branch.clone(),
            reference: spec.reference.clone(),
            target_ip: target_ip.to_string(),
            access_user: access_user.to_owned(),
            access_credential: credential.secret().to_owned(),
            server_name: server_name.to_owned(),
            destination_path: spec.destination_path.to_string(),
            pre_commands: spec.pre_commands.clone(),
            post_commands: spec.post_commands.clone(),
            tmp_dir: spec.tmp_dir.to_string(),
        }
    }

    /// Serializes the request for collaborators invoked out of process.
    ///
    /// # Errors
    ///
    /// Returns the underlying serialization error.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
