//! Google Compute Engine connection variant.

use std::net::IpAddr;
use std::sync::OnceLock;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{ConfigError, FieldMetadata, require_field};
use crate::connection::{
    CloudConnection, ComputeApi, ConnectionFuture, Instance, InstanceSpec, ProviderError,
    StateBucket,
};

/// GCP project credentials, derived from `GCP_*` environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "GCP")]
pub struct GcpCredentials {
    /// Project hosting the instances.
    pub project: String,
    /// Service account client email.
    pub client_email: String,
    /// Path to the service account JSON key file.
    pub json_key: String,
}

impl GcpCredentials {
    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.project,
            &FieldMetadata::new("GCP project", "GCP_PROJECT", "project", "gcp"),
        )?;
        require_field(
            &self.client_email,
            &FieldMetadata::new("GCP client email", "GCP_CLIENT_EMAIL", "client_email", "gcp"),
        )?;
        require_field(
            &self.json_key,
            &FieldMetadata::new("GCP JSON key path", "GCP_JSON_KEY", "json_key", "gcp"),
        )
    }
}

/// One additional persistent disk attached at creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GcpDisk {
    /// Disk size in GB.
    pub size_gb: u32,
    /// Disk type label, for example `pd-standard` or `pd-ssd`.
    pub disk_type: String,
    /// Delete the disk together with the instance.
    pub delete_with_vm: bool,
}

/// Fields required to create a Compute Engine instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GcpCreateSpec {
    /// Machine type.
    pub flavour: String,
    /// OS label used for tagging.
    pub os: String,
    /// Source image name.
    pub image: String,
    /// Zone receiving the instance.
    pub availability_zone: String,
    /// Public key uploaded into instance metadata.
    pub ssh_public_key: Utf8PathBuf,
    /// Matching local private key used to reach the instance.
    pub ssh_private_key: Utf8PathBuf,
    /// Root disk size in GB.
    pub root_disk_size_gb: u32,
    /// Root disk type label.
    pub root_disk_type: String,
    /// Delete the root disk together with the instance.
    pub delete_root_disk: bool,
    /// Additional persistent disks attached at creation.
    pub additional_disks: Vec<GcpDisk>,
    /// Subnetwork receiving the primary interface.
    pub subnet: String,
    /// Network the subnetwork belongs to.
    pub vpc: String,
    /// Network tags applied to the instance.
    pub custom_tags: Vec<String>,
}

impl Default for GcpCreateSpec {
    fn default() -> Self {
        Self {
            flavour: String::from("g1-small"),
            os: String::from("centos-7"),
            image: String::from("centos-7-v20190312"),
            availability_zone: String::from("europe-west1-b"),
            ssh_public_key: Utf8PathBuf::new(),
            ssh_private_key: Utf8PathBuf::new(),
            root_disk_size_gb: 10,
            root_disk_type: String::from("pd-standard"),
            delete_root_disk: true,
            additional_disks: Vec::new(),
            subnet: String::from("default"),
            vpc: String::from("default"),
            custom_tags: Vec::new(),
        }
    }
}

impl InstanceSpec for GcpCreateSpec {
    fn validate(&self) -> Result<(), ProviderError> {
        if !self.ssh_public_key.as_std_path().is_file() {
            return Err(ProviderError::Validation(format!(
                "could not find local SSH public key '{}'",
                self.ssh_public_key
            )));
        }
        if !self.ssh_private_key.as_std_path().is_file() {
            return Err(ProviderError::Validation(format!(
                "could not find local SSH private key '{}'",
                self.ssh_private_key
            )));
        }
        Ok(())
    }

    fn os_label(&self) -> Option<&str> {
        Some(&self.os)
    }
}

/// Maps a raw Compute Engine status onto the universal buckets.
///
/// `TERMINATED` is Compute Engine's name for a stopped instance, so it
/// lands in the recoverable bucket rather than the terminal one.
#[must_use]
pub fn classify(raw_state: &str) -> StateBucket {
    match raw_state {
        "TERMINATED" => StateBucket::Recoverable,
        "DELETED" => StateBucket::Terminal,
        _ => StateBucket::Active,
    }
}

/// Factory building the SDK adapter from credentials on first use.
pub type GcpApiFactory =
    Box<dyn Fn(&GcpCredentials) -> Box<dyn ComputeApi<GcpCreateSpec>> + Send + Sync>;

/// Connection to one GCP project.
pub struct GcpConnection {
    credentials: GcpCredentials,
    factory: GcpApiFactory,
    api: OnceLock<Box<dyn ComputeApi<GcpCreateSpec>>>,
}

impl GcpConnection {
    /// Creates a connection; the SDK adapter is built lazily on first use
    /// and reused afterwards.
    #[must_use]
    pub fn new(
        credentials: GcpCredentials,
        factory: impl Fn(&GcpCredentials) -> Box<dyn ComputeApi<GcpCreateSpec>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            credentials,
            factory: Box::new(factory),
            api: OnceLock::new(),
        }
    }

    fn api(&self) -> &dyn ComputeApi<GcpCreateSpec> {
        self.api
            .get_or_init(|| {
                tracing::debug!(
                    project = self.credentials.project.as_str(),
                    "creating new connection to GCP"
                );
                (self.factory)(&self.credentials)
            })
            .as_ref()
    }
}

impl CloudConnection for GcpConnection {
    type CreateSpec = GcpCreateSpec;
    type Error = ProviderError;

    fn provider(&self) -> &'static str {
        "gcp"
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
        spec: &'a GcpCreateSpec,
    ) -> ConnectionFuture<'a, Instance, ProviderError> {
        Box::pin(async move {
            spec.validate()?;
            tracing::info!(
                name,
                flavour = spec.flavour.as_str(),
                image = spec.image.as_str(),
                zone = spec.availability_zone.as_str(),
                "creating Compute Engine server"
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

    // Compute Engine derives login users from key metadata, so there is no
    // OS-based convention to fall back on.
    fn default_access_user(&self, _os: Option<&str>) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::running("RUNNING", StateBucket::Active)]
    #[case::provisioning("PROVISIONING", StateBucket::Active)]
    #[case::stopped("TERMINATED", StateBucket::Recoverable)]
    #[case::deleted("DELETED", StateBucket::Terminal)]
    fn classification_follows_compute_engine_states(
        #[case] raw: &str,
        #[case] expected: StateBucket,
    ) {
        assert_eq!(classify(raw), expected);
    }

    #[test]
    fn spec_validation_requires_both_key_files() {
        let public_key = tempfile::NamedTempFile::new()
            .unwrap_or_else(|err| panic!("failed to create temp key: {err}"));
        let public_path = Utf8PathBuf::from_path_buf(public_key.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-UTF-8 temp path: {}", path.display()));
        let spec = GcpCreateSpec {
            ssh_public_key: public_path,
            ssh_private_key: Utf8PathBuf::from("/nonexistent/id_rsa"),
            ..GcpCreateSpec::default()
        };
        let err = spec
            .validate()
            .expect_err("missing private key should be rejected");
        assert!(err.to_string().contains("private key"));
    }
}
