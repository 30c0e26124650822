//! Azure classic (Service Management) connection variant.

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

/// Azure classic subscription credentials, derived from `AZURE_*`
/// environment variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "AZURE")]
pub struct AzureCredentials {
    /// Subscription identifier.
    pub subscription_id: String,
    /// Path to the management certificate.
    pub management_certificate: String,
    /// Service Management endpoint.
    #[ortho_config(default = "https://management.core.windows.net".to_owned())]
    pub management_endpoint: String,
}

impl AzureCredentials {
    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.subscription_id,
            &FieldMetadata::new(
                "Azure subscription id",
                "AZURE_SUBSCRIPTION_ID",
                "subscription_id",
                "azure",
            ),
        )?;
        require_field(
            &self.management_certificate,
            &FieldMetadata::new(
                "Azure management certificate path",
                "AZURE_MANAGEMENT_CERTIFICATE",
                "management_certificate",
                "azure",
            ),
        )
    }
}

/// Fields required to create a classic virtual machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AzureCreateSpec {
    /// Image name to boot from.
    pub image_id: String,
    /// Deployment location.
    pub location: String,
    /// Virtual machine size.
    pub vm_size: String,
    /// Storage account backing the OS disk. Generated when absent.
    pub storage_account_name: Option<String>,
    /// Cloud service name. Defaults to the server name when absent.
    pub cloud_service_name: Option<String>,
    /// Local private key used to reach the machine afterwards.
    pub private_key_file: Utf8PathBuf,
    /// Matching certificate uploaded to the machine.
    pub certificate_file: Utf8PathBuf,
}

impl Default for AzureCreateSpec {
    fn default() -> Self {
        Self {
            image_id: String::new(),
            location: String::from("West Europe"),
            vm_size: String::from("Small"),
            storage_account_name: None,
            cloud_service_name: None,
            private_key_file: Utf8PathBuf::from("~/.ssh/id_rsa"),
            certificate_file: Utf8PathBuf::from("~/.ssh/id_rsa.pem"),
        }
    }
}

impl InstanceSpec for AzureCreateSpec {
    fn validate(&self) -> Result<(), ProviderError> {
        if self.image_id.trim().is_empty() {
            return Err(ProviderError::Validation(String::from(
                "an image id is required to create an Azure server",
            )));
        }
        Ok(())
    }

    fn os_label(&self) -> Option<&str> {
        None
    }
}

/// Maps a raw Service Management deployment status onto the universal
/// buckets.
#[must_use]
pub fn classify(raw_state: &str) -> StateBucket {
    match raw_state {
        "Suspended" | "StoppedVM" | "StoppedDeallocated" => StateBucket::Recoverable,
        "DeletingVM" => StateBucket::Terminal,
        _ => StateBucket::Active,
    }
}

/// Factory building the SDK adapter from credentials on first use.
pub type AzureApiFactory =
    Box<dyn Fn(&AzureCredentials) -> Box<dyn ComputeApi<AzureCreateSpec>> + Send + Sync>;

/// Connection to one Azure classic subscription.
pub struct AzureConnection {
    credentials: AzureCredentials,
    factory: AzureApiFactory,
    api: OnceLock<Box<dyn ComputeApi<AzureCreateSpec>>>,
}

impl AzureConnection {
    /// Creates a connection; the SDK adapter is built lazily on first use
    /// and reused afterwards.
    #[must_use]
    pub fn new(
        credentials: AzureCredentials,
        factory: impl Fn(&AzureCredentials) -> Box<dyn ComputeApi<AzureCreateSpec>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            credentials,
            factory: Box::new(factory),
            api: OnceLock::new(),
        }
    }

    fn api(&self) -> &dyn ComputeApi<AzureCreateSpec> {
        self.api
            .get_or_init(|| {
                tracing::debug!(
                    subscription = self.credentials.subscription_id.as_str(),
                    "creating new connection to Azure"
                );
                (self.factory)(&self.credentials)
            })
            .as_ref()
    }
}

impl CloudConnection for AzureConnection {
    type CreateSpec = AzureCreateSpec;
    type Error = ProviderError;

    fn provider(&self) -> &'static str {
        "azure"
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
        spec: &'a AzureCreateSpec,
    ) -> ConnectionFuture<'a, Instance, ProviderError> {
        Box::pin(async move {
            spec.validate()?;
            tracing::info!(
                name,
                image = spec.image_id.as_str(),
                location = spec.location.as_str(),
                size = spec.vm_size.as_str(),
                "creating Azure server"
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
        Some(String::from("azureuser"))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::ready("ReadyRole", StateBucket::Active)]
    #[case::provisioning("Provisioning", StateBucket::Active)]
    #[case::suspended("Suspended", StateBucket::Recoverable)]
    #[case::stopped("StoppedVM", StateBucket::Recoverable)]
    #[case::deallocated("StoppedDeallocated", StateBucket::Recoverable)]
    #[case::deleting("DeletingVM", StateBucket::Terminal)]
    fn classification_follows_deployment_statuses(
        #[case] raw: &str,
        #[case] expected: StateBucket,
    ) {
        assert_eq!(classify(raw), expected);
    }

    #[test]
    fn spec_validation_requires_an_image() {
        let err = AzureCreateSpec::default()
            .validate()
            .expect_err("blank image id should be rejected");
        assert!(matches!(err, ProviderError::Validation(_)));
    }
}
