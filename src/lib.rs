//! Multi-cloud server provisioning and remote bootstrap.
//!
//! The crate provisions, recovers, and decommissions virtual machines
//! across AWS, Azure (classic and Resource Manager), GCP, and Rackspace
//! behind one uniform connection abstraction, then bootstraps the machine
//! over SSH with an ordered, retrying remote task pipeline and hands off
//! to an external deployment tool.

pub mod cancel;
pub mod config;
pub mod connection;
pub mod deploy;
pub mod providers;
pub mod reconcile;
pub mod remote;
pub mod secret;
pub mod server;
pub mod wait;

pub use cancel::CancelToken;
pub use config::{ConfigError, RemoteConfig};
pub use connection::{
    ApiError, CloudConnection, ComputeApi, ConnectionFuture, Instance, InstanceSpec,
    ProviderError, StateBucket,
};
pub use deploy::{DeployError, DeployRequest, DeploySpec, Deployer, IncompleteDeploySpec};
pub use reconcile::{
    ProvisionError, create_or_recover, destroy_server, lookup, server_statuses, start_server,
    stop_server,
};
pub use remote::session::{
    DialError, Endpoint, RemoteSession, RetryPolicy, SessionDialer, SessionError, dial_with_retry,
};
pub use remote::ssh::SshDialer;
pub use remote::tasks::{
    CommandBatch, DeployHandoff, FileUpload, PrivilegeFix, WaitUntilReady, cleanup_commands,
};
pub use remote::{LogOptions, RemoteTask, StreamKind, TaskContext, TaskError, run_tasks};
pub use server::{BootstrapPlan, Credential, ManagedServer};
pub use wait::{WaitError, WaitPolicy, wait_until};
