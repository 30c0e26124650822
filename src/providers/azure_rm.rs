//! Azure Resource Manager connection variant.

use std::net::IpAddr;
use std::sync::OnceLock;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{ConfigError, FieldMetadata, require_field};
use crate::connection::{
    CloudConnection, ComputeApi, ConnectionFuture, Instance, InstanceSpec, ProviderError,
    StateBucket,
};

/// Azure Resource Manager service principal credentials, derived from
/// `AZURE_RM_*` environment variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "AZURE_RM")]
pub struct AzureRmCredentials {
    /// Active Directory tenant identifier.
    pub tenant_id: String,
    /// Service principal client identifier.
    pub client_id: String,
    /// Service principal client secret.
    pub client_secret: String,
    /// Subscription identifier.
    pub subscription_id: String,
}

impl AzureRmCredentials {
    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.tenant_id,
            &FieldMetadata::new("Azure tenant id", "AZURE_RM_TENANT_ID", "tenant_id", "azure_rm"),
        )?;
        require_field(
            &self.client_id,
            &FieldMetadata::new("Azure client id", "AZURE_RM_CLIENT_ID", "client_id", "azure_rm"),
        )?;
        require_field(
            &self.client_secret,
            &FieldMetadata::new(
                "Azure client secret",
                "AZURE_RM_CLIENT_SECRET",
                "client_secret",
                "azure_rm",
            ),
        )?;
        require_field(
            &self.subscription_id,
            &FieldMetadata::new(
                "Azure subscription id",
                "AZURE_RM_SUBSCRIPTION_ID",
                "subscription_id",
                "azure_rm",
            ),
        )
    }
}

/// Fields required to create a Resource Manager virtual machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AzureRmCreateSpec {
    /// Resource group receiving the machine and its network resources.
    pub resource_group: String,
    /// Deployment location.
    pub location: String,
    /// Virtual machine size.
    pub vm_size: String,
    /// Image publisher.
    pub publisher: String,
    /// Image offer.
    pub offer: String,
    /// Image SKU.
    pub sku: String,
    /// Image version.
    pub version: String,
    /// Storage account backing the OS disk.
    pub storage_account_name: Option<String>,
    /// Virtual network the primary interface joins.
    pub virtual_network_name: Option<String>,
    /// Subnet within the virtual network.
    pub subnet_name: Option<String>,
    /// Private address allocation method, `Dynamic` or `Static`.
    pub private_ip_allocation: String,
    /// Public address allocation method, `Dynamic` or `Static`.
    pub public_ip_allocation: String,
}

impl Default for AzureRmCreateSpec {
    fn default() -> Self {
        Self {
            resource_group: String::new(),
            location: String::from("West Europe"),
            vm_size: String::from("Basic_A0"),
            publisher: String::from("Canonical"),
            offer: String::from("UbuntuServer"),
            sku: String::from("16.04-LTS"),
            version: String::from("latest"),
            storage_account_name: None,
            virtual_network_name: None,
            subnet_name: None,
            private_ip_allocation: String::from("Dynamic"),
            public_ip_allocation: String::from("Static"),
        }
    }
}

impl InstanceSpec for AzureRmCreateSpec {
    fn validate(&self) -> Result<(), ProviderError> {
        if self.resource_group.trim().is_empty() {
            return Err(ProviderError::Validation(String::from(
                "a resource group is required to create an Azure RM server",
            )));
        }
        Ok(())
    }

    fn os_label(&self) -> Option<&str> {
        None
    }
}

/// Maps a raw Resource Manager power state onto the universal buckets.
///
/// Resource Manager reports composite strings such as
/// `PowerState/deallocated`, so matching is by fragment rather than whole
/// status.
#[must_use]
pub fn classify(raw_state: &str) -> StateBucket {
    let lowered = raw_state.to_ascii_lowercase();
    if lowered.contains("deallocat") && !lowered.contains("deallocating") {
        StateBucket::Recoverable
    } else if lowered.contains("stopped") {
        StateBucket::Recoverable
    } else if lowered.contains("deleting") {
        StateBucket::Terminal
    } else {
        StateBucket::Active
    }
}

/// Factory building the SDK adapter from credentials on first use.
pub type AzureRmApiFactory =
    Box<dyn Fn(&AzureRmCredentials) -> Box<dyn ComputeApi<AzureRmCreateSpec>> + Send + Sync>;

/// Connection to one Resource Manager subscription.
pub struct AzureRmConnection {
    credentials: AzureRmCredentials,
    factory: AzureRmApiFactory,
    api: OnceLock<Box<dyn ComputeApi<AzureRmCreateSpec>>>,
    use_public_ip: bool,
}

impl AzureRmConnection {
    /// Creates a connection; the SDK adapter is built lazily on first use
    /// and reused afterwards. Remote sessions use the machine's public
    /// address by default.
    #[must_use]
    pub fn new(
        credentials: AzureRmCredentials,
        factory: impl Fn(&AzureRmCredentials) -> Box<dyn ComputeApi<AzureRmCreateSpec>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            credentials,
            factory: Box::new(factory),
            api: OnceLock::new(),
            use_public_ip: true,
        }
    }

    /// Prefer the private interface address for remote sessions, for
    /// machines reached over a peered network.
    #[must_use]
    pub const fn with_private_addresses(mut self) -> Self {
        self.use_public_ip = false;
        self
    }

    fn api(&self) -> &dyn ComputeApi<AzureRmCreateSpec> {
        self.api
            .get_or_init(|| {
                tracing::debug!(
                    subscription = self.credentials.subscription_id.as_str(),
                    "creating new connection to Azure RM"
                );
                (self.factory)(&self.credentials)
            })
            .as_ref()
    }
}

impl CloudConnection for AzureRmConnection {
    type CreateSpec = AzureRmCreateSpec;
    type Error = ProviderError;

    fn provider(&self) -> &'static str {
        "azure-rm"
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
        spec: &'a AzureRmCreateSpec,
    ) -> ConnectionFuture<'a, Instance, ProviderError> {
        Box::pin(async move {
            spec.validate()?;
            tracing::info!(
                name,
                resource_group = spec.resource_group.as_str(),
                location = spec.location.as_str(),
                size = spec.vm_size.as_str(),
                "creating Azure RM server"
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
        let preferred = if self.use_public_ip {
            instance.public_ip.as_deref()
        } else {
            instance.private_ip.as_deref()
        };
        preferred.and_then(|ip| ip.parse().ok())
    }

    fn default_access_user(&self, _os: Option<&str>) -> Option<String> {
        Some(String::from("azureuser"))
    }
}
