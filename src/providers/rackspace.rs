//! Rackspace Cloud Servers connection variant.

use std::net::IpAddr;
use std::sync::OnceLock;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{ConfigError, FieldMetadata, require_field};
use crate::connection::{
    CloudConnection, ComputeApi, ConnectionFuture, Instance, InstanceSpec, ProviderError,
    StateBucket,
};

/// Rackspace account credentials, derived from `RACKSPACE_*` environment
/// variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "RACKSPACE")]
pub struct RackspaceCredentials {
    /// Account username.
    pub username: String,
    /// Account API key.
    pub api_key: String,
    /// Region hosting the instances. Defaults to `lon`.
    #[ortho_config(default = "lon".to_owned())]
    pub region: String,
}

impl RackspaceCredentials {
    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.username,
            &FieldMetadata::new(
                "Rackspace username",
                "RACKSPACE_USERNAME",
                "username",
                "rackspace",
            ),
        )?;
        require_field(
            &self.api_key,
            &FieldMetadata::new(
                "Rackspace API key",
                "RACKSPACE_API_KEY",
                "api_key",
                "rackspace",
            ),
        )?;
        require_field(
            &self.region,
            &FieldMetadata::new("Rackspace region", "RACKSPACE_REGION", "region", "rackspace"),
        )
    }
}

/// Fields required to create a Cloud Servers instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RackspaceCreateSpec {
    /// Image id to boot from.
    pub image_id: String,
    /// Flavour id. Defaults to `4` (2 GB).
    pub flavor_id: String,
}

impl Default for RackspaceCreateSpec {
    fn default() -> Self {
        Self {
            image_id: String::new(),
            flavor_id: String::from("4"),
        }
    }
}

impl InstanceSpec for RackspaceCreateSpec {
    fn validate(&self) -> Result<(), ProviderError> {
        if self.image_id.trim().is_empty() {
            return Err(ProviderError::Validation(String::from(
                "an image id is required to create a Rackspace server",
            )));
        }
        Ok(())
    }

    fn os_label(&self) -> Option<&str> {
        None
    }
}

/// Maps a raw Cloud Servers state onto the universal buckets.
#[must_use]
pub fn classify(raw_state: &str) -> StateBucket {
    match raw_state {
        "SHUTOFF" => StateBucket::Recoverable,
        "DELETED" => StateBucket::Terminal,
        _ => StateBucket::Active,
    }
}

/// Factory building the SDK adapter from credentials on first use.
pub type RackspaceApiFactory =
    Box<dyn Fn(&RackspaceCredentials) -> Box<dyn ComputeApi<RackspaceCreateSpec>> + Send + Sync>;

/// Connection to one Rackspace account and region.
///
/// Powering on a `SHUTOFF` server is implemented by the adapter as a hard
/// reboot; the Cloud Servers API has no separate start call.
pub struct RackspaceConnection {
    credentials: RackspaceCredentials,
    factory: RackspaceApiFactory,
    api: OnceLock<Box<dyn ComputeApi<RackspaceCreateSpec>>>,
}

impl RackspaceConnection {
    /// Creates a connection; the SDK adapter is built lazily on first use
    /// and reused afterwards.
    #[must_use]
    pub fn new(
        credentials: RackspaceCredentials,
        factory: impl Fn(&RackspaceCredentials) -> Box<dyn ComputeApi<RackspaceCreateSpec>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            credentials,
            factory: Box::new(factory),
            api: OnceLock::new(),
        }
    }

    fn api(&self) -> &dyn ComputeApi<RackspaceCreateSpec> {
        self.api
            .get_or_init(|| {
                tracing::debug!(
                    region = self.credentials.region.as_str(),
                    "creating new connection to Rackspace"
                );
                (self.factory)(&self.credentials)
            })
            .as_ref()
    }
}

impl CloudConnection for RackspaceConnection {
    type CreateSpec = RackspaceCreateSpec;
    type Error = ProviderError;

    fn provider(&self) -> &'static str {
        "rackspace"
    }

    fn find_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> ConnectionFuture<'a, Vec<Instance>, ProviderError> {
        Box::pin(async move { Ok(self.api().list_by_name(name).await?) })
    }

    fn create_instance<'a>(
        &'a self,
        name: &'a str,
        spec: &'a RackspaceCreateSpec,
    ) -> ConnectionFuture<'a, Instance, ProviderError> {
        Box::pin(async move {
            spec.validate()?;
            tracing::info!(
                name,
                image = spec.image_id.as_str(),
                flavor = spec.flavor_id.as_str(),
                region = self.credentials.region.as_str(),
                "creating Rackspace server"
            );
            Ok(self.api().create(name, spec).await?)
        })
    }

    fn start_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ConnectionFuture<'a, (), ProviderError> {
        Box::pin(async move { Ok(self.api().power_on(instance_id).await?) })
    }

    fn stop_instance<'a>(&'a self, instance_id: &'a str) -> ConnectionFuture<'a, (), ProviderError> {
        Box::pin(async move { Ok(self.api().power_off(instance_id).await?) })
    }

    fn destroy_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ConnectionFuture<'a, (), ProviderError> {
        Box::pin(async move { Ok(self.api().destroy(instance_id).await?) })
    }

    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ConnectionFuture<'a, Option<Instance>, ProviderError> {
        Box::pin(async move { Ok(self.api().describe(instance_id).await?) })
    }

    fn classify(&self, raw_state: &str) -> StateBucket {
        classify(raw_state)
    }

    fn resolve_address(&self, instance: &Instance) -> Option<IpAddr> {
        instance.public_ip.as_deref().and_then(|ip| ip.parse().ok())
    }

    fn default_access_user(&self, _os: Option<&str>) -> Option<String> {
        Some(String::from("root"))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::active("ACTIVE", StateBucket::Active)]
    #[case::build("BUILD", StateBucket::Active)]
    #[case::shutoff("SHUTOFF", StateBucket::Recoverable)]
    #[case::deleted("DELETED", StateBucket::Terminal)]
    fn classification_follows_cloud_servers_states(
        #[case] raw: &str,
        #[case] expected: StateBucket,
    ) {
        assert_eq!(classify(raw), expected);
    }

    #[test]
    fn spec_validation_requires_an_image() {
        let err = RackspaceCreateSpec::default()
            .validate()
            .expect_err("blank image id should be rejected");
        assert!(matches!(err, ProviderError::Validation(_)));
    }
}
