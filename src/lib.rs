//! vSphere instance provider built around a cooperative job scheduler.
//!
//! Instances are brought up by cloning a base image or reverting to a
//! `pristine` snapshot, refreshed by re-reading the guest address, and torn
//! down by powering off and deleting. Every lifecycle action is a resumable
//! [`Workflow`]; the [`Scheduler`] drives any number of them at once and
//! observes all outstanding remote tasks with a single batched refresh per
//! tick instead of one blocking wait per instance.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod image_cache;
pub mod infra;
pub mod instance;
pub mod provider;
pub mod scheduler;
#[cfg(test)]
pub mod test_helpers;
pub mod test_support;
pub mod workflow;

pub use config::{ConfigError, VsphereConfig};
pub use descriptor::{CloudProperties, DescriptorError};
pub use error::ProviderError;
pub use image_cache::BaseImageCache;
pub use infra::{
    Credentials, InfraFuture, Infrastructure, PRISTINE_SNAPSHOT, PowerState, Resource,
    ResourceHandle, Task, TaskState, Tracked,
};
pub use instance::{Instance, InstanceState, Registry, RegistryError};
pub use provider::{InstanceAddress, PROVIDER_KEY, PrivateAddress, TargetState, VsphereProvider};
pub use scheduler::{DEFAULT_POLL_INTERVAL, Scheduler};
pub use workflow::{Outcome, Progress, Workflow, WorkflowKind};
