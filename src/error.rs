//! Error taxonomy for the provider.

use thiserror::Error;

use crate::config::ConfigError;
use crate::descriptor::DescriptorError;
use crate::instance::RegistryError;

/// Errors surfaced by the provider facade, the registry, and workflows.
///
/// Every variant is fatal for the call that raised it: the whole batch is
/// abandoned and no partial results are returned. Remote tasks that finish
/// with an error status are not represented here; they count as progress.
#[derive(Debug, Error)]
pub enum ProviderError<InfraError>
where
    InfraError: std::error::Error + 'static,
{
    /// Raised when credentials or the endpoint cannot be resolved.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Raised when a descriptor lacks a required property.
    #[error("invalid instance descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
    /// Raised when the clone source does not exist.
    #[error("base VM {base_vm_name} not found, check the cloud.base_vm_name property for {vm_name}")]
    BaseImageNotFound {
        /// Base image that was looked up.
        base_vm_name: String,
        /// Instance being cloned.
        vm_name: String,
    },
    /// Raised when a resource the instance state says must exist is missing.
    #[error("VM {vm_name} not found in vSphere")]
    ResourceNotFound {
        /// Resource name that was looked up.
        vm_name: String,
    },
    /// Raised when a workflow is resumed after an earlier fatal error.
    #[error("workflow for {vm_name} was aborted by an earlier error")]
    Aborted {
        /// Resource the workflow was driving.
        vm_name: String,
    },
    /// Raised when the registry rejects an update.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Raised by `get_instance_status`, which concrete targets must supply.
    #[error("instance status is not implemented by the vSphere provider")]
    StatusUnsupported,
    /// Wrapper for failed calls to the remote API.
    #[error("infrastructure call {action} failed: {source}")]
    Infrastructure {
        /// Operation that failed.
        action: &'static str,
        /// Client specific error.
        #[source]
        source: InfraError,
    },
}

impl<InfraError> ProviderError<InfraError>
where
    InfraError: std::error::Error + 'static,
{
    /// Returns a closure wrapping a client error for `action`, for use with
    /// `map_err`.
    pub(crate) fn infra(action: &'static str) -> impl FnOnce(InfraError) -> Self {
        move |source| Self::Infrastructure { action, source }
    }
}
