//! AWS EC2 connection variant.

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

/// AWS account credentials and region, derived from `AWS_*` environment
/// variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "AWS")]
pub struct AwsCredentials {
    /// IAM access key id.
    pub access_key_id: String,
    /// IAM secret access key.
    pub secret_access_key: String,
    /// Region hosting the instances. Defaults to `eu-west-1`.
    #[ortho_config(default = "eu-west-1".to_owned())]
    pub region: String,
}

impl AwsCredentials {
    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.access_key_id,
            &FieldMetadata::new("AWS access key id", "AWS_ACCESS_KEY_ID", "access_key_id", "aws"),
        )?;
        require_field(
            &self.secret_access_key,
            &FieldMetadata::new(
                "AWS secret access key",
                "AWS_SECRET_ACCESS_KEY",
                "secret_access_key",
                "aws",
            ),
        )?;
        require_field(
            &self.region,
            &FieldMetadata::new("AWS region", "AWS_REGION", "region", "aws"),
        )
    }
}

/// Fields required to create an EC2 instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AwsCreateSpec {
    /// Instance type.
    pub flavour: String,
    /// OS label used for tagging and to derive the default login user.
    pub os: String,
    /// AMI image id.
    pub ami_image_id: String,
    /// Name of the key pair registered with the provider.
    pub key_name: String,
    /// Local private key used to reach the instance afterwards.
    pub ssh_key: Utf8PathBuf,
    /// Subnet receiving the primary network interface.
    pub subnet_id: Option<String>,
    /// Security groups attached to the instance.
    pub security_group_ids: Vec<String>,
    /// Root volume size in GB, when overriding the image default.
    pub ebs_size: Option<u32>,
    /// Device path of the root volume.
    pub hdd_device_path: String,
    /// Availability zone override.
    pub availability_zone: Option<String>,
    /// `created_by` tag value.
    pub created_by: Option<String>,
    /// Additional tags applied at creation.
    pub custom_tags: Vec<(String, String)>,
}

impl Default for AwsCreateSpec {
    fn default() -> Self {
        Self {
            flavour: String::from("t2.micro"),
            os: String::from("ubuntu-14"),
            ami_image_id: String::from("ami-f0b11187"),
            key_name: String::new(),
            ssh_key: Utf8PathBuf::new(),
            subnet_id: None,
            security_group_ids: Vec::new(),
            ebs_size: None,
            hdd_device_path: String::from("/dev/sda1"),
            availability_zone: None,
            created_by: None,
            custom_tags: Vec::new(),
        }
    }
}

impl InstanceSpec for AwsCreateSpec {
    fn validate(&self) -> Result<(), ProviderError> {
        if !self.ssh_key.as_std_path().is_file() {
            return Err(ProviderError::Validation(format!(
                "could not find local SSH key '{}'",
                self.ssh_key
            )));
        }
        Ok(())
    }

    fn os_label(&self) -> Option<&str> {
        Some(&self.os)
    }
}

/// Maps a raw EC2 state onto the universal buckets.
#[must_use]
pub fn classify(raw_state: &str) -> StateBucket {
    match raw_state {
        "stopped" => StateBucket::Recoverable,
        "terminated" => StateBucket::Terminal,
        _ => StateBucket::Active,
    }
}

/// Factory building the SDK adapter from credentials on first use.
pub type AwsApiFactory =
    Box<dyn Fn(&AwsCredentials) -> Box<dyn ComputeApi<AwsCreateSpec>> + Send + Sync>;

/// Connection to one AWS account and region.
pub struct AwsConnection {
    credentials: AwsCredentials,
    factory: AwsApiFactory,
    api: OnceLock<Box<dyn ComputeApi<AwsCreateSpec>>>,
}

impl AwsConnection {
    /// Creates a connection; the SDK adapter is built lazily on first use
    /// and reused afterwards.
    #[must_use]
    pub fn new(
        credentials: AwsCredentials,
        factory: impl Fn(&AwsCredentials) -> Box<dyn ComputeApi<AwsCreateSpec>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            credentials,
            factory: Box::new(factory),
            api: OnceLock::new(),
        }
    }

    fn api(&self) -> &dyn ComputeApi<AwsCreateSpec> {
        self.api
            .get_or_init(|| {
                tracing::debug!(
                    region = self.credentials.region.as_str(),
                    "creating new connection to AWS"
                );
                (self.factory)(&self.credentials)
            })
            .as_ref()
    }
}

impl CloudConnection for AwsConnection {
    type CreateSpec = AwsCreateSpec;
    type Error = ProviderError;

    fn provider(&self) -> &'static str {
        "aws"
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
        spec: &'a AwsCreateSpec,
    ) -> ConnectionFuture<'a, Instance, ProviderError> {
        Box::pin(async move {
            spec.validate()?;
            tracing::info!(
                name,
                flavour = spec.flavour.as_str(),
                image = spec.ami_image_id.as_str(),
                region = self.credentials.region.as_str(),
                "creating EC2 server"
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

    fn default_access_user(&self, os: Option<&str>) -> Option<String> {
        let label = os?;
        let user = if label.starts_with("ubuntu") {
            "ubuntu"
        } else if label.starts_with("debian") {
            "admin"
        } else if label.starts_with("centos") || label.starts_with("redhat") {
            "ec2-user"
        } else {
            "root"
        };
        Some(String::from(user))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::running("running", StateBucket::Active)]
    #[case::pending("pending", StateBucket::Active)]
    #[case::stopping("stopping", StateBucket::Active)]
    #[case::stopped("stopped", StateBucket::Recoverable)]
    #[case::terminated("terminated", StateBucket::Terminal)]
    fn classification_follows_ec2_states(#[case] raw: &str, #[case] expected: StateBucket) {
        assert_eq!(classify(raw), expected);
    }

    #[test]
    fn spec_validation_requires_an_existing_key_file() {
        let spec = AwsCreateSpec {
            ssh_key: Utf8PathBuf::from("/nonexistent/id_rsa"),
            ..AwsCreateSpec::default()
        };
        let err = spec.validate().expect_err("missing key should be rejected");
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[test]
    fn credentials_validation_names_the_missing_field() {
        let credentials = AwsCredentials {
            access_key_id: String::new(),
            secret_access_key: String::from("secret"),
            region: String::from("eu-west-1"),
        };
        let err = credentials
            .validate()
            .expect_err("blank access key should be rejected");
        assert!(err.to_string().contains("AWS_ACCESS_KEY_ID"));
    }

    #[rstest]
    #[case::ubuntu(Some("ubuntu-14"), Some("ubuntu"))]
    #[case::debian(Some("debian-12"), Some("admin"))]
    #[case::centos(Some("centos-7"), Some("ec2-user"))]
    #[case::redhat(Some("redhat-9"), Some("ec2-user"))]
    #[case::other(Some("alpine"), Some("root"))]
    #[case::unknown(None, None)]
    fn default_user_follows_the_os_label(#[case] os: Option<&str>, #[case] expected: Option<&str>) {
        let conn = AwsConnection::new(
            AwsCredentials {
                access_key_id: String::from("key"),
                secret_access_key: String::from("secret"),
                region: String::from("eu-west-1"),
            },
            |_| unreachable_api(),
        );
        assert_eq!(conn.default_access_user(os).as_deref(), expected);
    }

    fn unreachable_api() -> Box<dyn ComputeApi<AwsCreateSpec>> {
        panic!("adapter must not be built for this test");
    }
}
