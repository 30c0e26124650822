//! Provider-neutral connection abstraction over cloud compute services.
//!
//! Each supported cloud exposes its own resource model and status
//! vocabulary. The traits here reduce that variety to a uniform surface:
//! raw SDK calls sit behind [`ComputeApi`], and the lifecycle layer talks
//! only to [`CloudConnection`], which adds per-provider state
//! classification, address resolution, and login-user defaults.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

/// Snapshot of one compute resource as reported by a provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Provider-assigned identifier.
    pub id: String,
    /// Name tag shared by all instances provisioned under one logical name.
    pub name: String,
    /// Raw provider status string, for example `running` or `ReadyRole`.
    pub raw_state: String,
    /// Public address, when one is assigned.
    pub public_ip: Option<String>,
    /// Private address on the attached network interface, when known.
    pub private_ip: Option<String>,
    /// Generated root password some providers return on creation.
    pub admin_password: Option<String>,
}

impl Instance {
    /// Builds a snapshot with no addresses or generated password.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        raw_state: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_state: raw_state.into(),
            public_ip: None,
            private_ip: None,
            admin_password: None,
        }
    }
}

/// Universal lifecycle classification of a raw provider status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StateBucket {
    /// Running or on its way up; blocks creation under the same name.
    Active,
    /// Stopped or suspended; eligible for restart instead of recreation.
    Recoverable,
    /// Terminated or deleted; never blocks creation nor satisfies a lookup.
    Terminal,
}

/// Error reported by a provider SDK adapter.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("provider API error: {message}")]
pub struct ApiError {
    /// Message returned by the underlying SDK or transport.
    pub message: String,
}

impl ApiError {
    /// Builds an error from any displayable SDK failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised by provider connections.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Indicates a creation spec or request argument failed validation.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Surfaces a failure from the provider SDK adapter.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Future returned by connection and adapter operations.
pub type ConnectionFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Raw compute calls implemented by a provider SDK adapter.
///
/// Adapters translate between these operations and the concrete SDK; they
/// hold no lifecycle policy. `Spec` is the provider's creation request type.
pub trait ComputeApi<Spec>: Send + Sync {
    /// Lists every instance carrying `name` as its name tag, in any state.
    fn list_by_name<'a>(&'a self, name: &'a str) -> ConnectionFuture<'a, Vec<Instance>, ApiError>;

    /// Creates an instance named `name` from `spec`.
    fn create<'a>(&'a self, name: &'a str, spec: &'a Spec)
    -> ConnectionFuture<'a, Instance, ApiError>;

    /// Powers on a stopped instance.
    fn power_on<'a>(&'a self, instance_id: &'a str) -> ConnectionFuture<'a, (), ApiError>;

    /// Powers off a running instance.
    fn power_off<'a>(&'a self, instance_id: &'a str) -> ConnectionFuture<'a, (), ApiError>;

    /// Destroys an instance and its provider-managed resources.
    fn destroy<'a>(&'a self, instance_id: &'a str) -> ConnectionFuture<'a, (), ApiError>;

    /// Fetches the current snapshot of an instance, or `None` once the
    /// provider no longer knows the identifier.
    fn describe<'a>(&'a self, instance_id: &'a str)
    -> ConnectionFuture<'a, Option<Instance>, ApiError>;
}

/// Uniform hooks implemented by each provider's creation spec.
pub trait InstanceSpec {
    /// Checks the spec before any provider call is made.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] describing the first problem
    /// found.
    fn validate(&self) -> Result<(), ProviderError>;

    /// Operating system label used to derive a default login user, when the
    /// provider exposes one.
    fn os_label(&self) -> Option<&str>;
}

/// One provider account, seen through the uniform lifecycle surface.
///
/// Implementations wrap a [`ComputeApi`] adapter and add the pieces the
/// lifecycle layer needs but the raw API does not carry: status
/// classification, address selection, and login-user defaults.
pub trait CloudConnection {
    /// Provider-specific creation request.
    type CreateSpec: InstanceSpec + Send + Sync;
    /// Error type surfaced by lifecycle operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Short provider label used in log events.
    fn provider(&self) -> &'static str;

    /// Lists every instance carrying `name` as its name tag, in any state.
    fn find_by_name<'a>(&'a self, name: &'a str)
    -> ConnectionFuture<'a, Vec<Instance>, Self::Error>;

    /// Validates `spec` and creates an instance named `name`.
    fn create_instance<'a>(
        &'a self,
        name: &'a str,
        spec: &'a Self::CreateSpec,
    ) -> ConnectionFuture<'a, Instance, Self::Error>;

    /// Powers on a stopped instance.
    fn start_instance<'a>(&'a self, instance_id: &'a str) -> ConnectionFuture<'a, (), Self::Error>;

    /// Powers off a running instance.
    fn stop_instance<'a>(&'a self, instance_id: &'a str) -> ConnectionFuture<'a, (), Self::Error>;

    /// Destroys an instance.
    fn destroy_instance<'a>(&'a self, instance_id: &'a str)
    -> ConnectionFuture<'a, (), Self::Error>;

    /// Fetches the current snapshot of an instance, or `None` once the
    /// provider no longer knows the identifier.
    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ConnectionFuture<'a, Option<Instance>, Self::Error>;

    /// Maps a raw provider status string onto the universal buckets.
    ///
    /// Unrecognized statuses land in [`StateBucket::Active`]: treating an
    /// unknown state as running refuses creation under that name rather
    /// than risking a duplicate.
    fn classify(&self, raw_state: &str) -> StateBucket;

    /// Picks the address remote sessions should use for `instance`.
    fn resolve_address(&self, instance: &Instance) -> Option<IpAddr>;

    /// Default login user for an instance, derived from `os` where the
    /// provider has a convention for it.
    fn default_access_user(&self, os: Option<&str>) -> Option<String>;
}
