//! Provider facade exposed to the host orchestrator.
//!
//! The facade resolves descriptors through the [`Registry`], picks a
//! workflow per instance, and hands the batch to the [`Scheduler`].

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::VsphereConfig;
use crate::descriptor::CloudProperties;
use crate::error::ProviderError;
use crate::image_cache::BaseImageCache;
use crate::infra::Infrastructure;
use crate::instance::{Instance, InstanceState, Registry};
use crate::scheduler::Scheduler;
use crate::workflow::{Outcome, Workflow};

/// Key the host orchestrator registers this provider under.
pub const PROVIDER_KEY: &str = "vSphere";

/// State requested from [`VsphereProvider::wait_instances`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TargetState {
    /// Bring instances up from whatever state they are in.
    Running,
    /// Re-read the address of instances that are already running.
    Refresh,
}

impl TargetState {
    /// Maps the orchestrator's state label: `"running"` brings instances up,
    /// anything else refreshes.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        if label == "running" {
            Self::Running
        } else {
            Self::Refresh
        }
    }
}

/// Private-network view of an instance.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct PrivateAddress {
    /// Private IP address.
    pub ip: IpAddr,
    /// Private DNS name; the address itself, rendered.
    pub dns: String,
}

/// Updated properties returned for an instance that finished a workflow.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct InstanceAddress {
    /// Routable host address.
    pub host: IpAddr,
    /// Private-network descriptor.
    pub private: PrivateAddress,
}

impl From<IpAddr> for InstanceAddress {
    fn from(address: IpAddr) -> Self {
        Self {
            host: address,
            private: PrivateAddress {
                ip: address,
                dns: address.to_string(),
            },
        }
    }
}

/// vSphere cloud provider.
#[derive(Debug)]
pub struct VsphereProvider<I> {
    infra: I,
    registry: Registry,
    images: BaseImageCache,
    scheduler: Scheduler,
}

impl<I: Infrastructure> VsphereProvider<I> {
    /// Resolves credentials, logs in, and returns a provider with an empty
    /// registry and base-image cache.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] when the endpoint or a credential is
    /// missing from both `config` and `props`, and
    /// [`ProviderError::Infrastructure`] when login fails.
    pub async fn connect(
        infra: I,
        config: &VsphereConfig,
        props: &CloudProperties,
    ) -> Result<Self, ProviderError<I::Error>> {
        let credentials = config.credentials(props)?;
        infra
            .login(&credentials)
            .await
            .map_err(ProviderError::infra("login"))?;
        debug!(endpoint = %credentials.endpoint, "logged in");
        Ok(Self {
            infra,
            registry: Registry::new(),
            images: BaseImageCache::new(),
            scheduler: Scheduler::new().with_poll_interval(config.poll_interval()),
        })
    }

    /// Loads [`VsphereConfig`] from the environment and configuration files,
    /// then connects.
    ///
    /// # Errors
    ///
    /// See [`VsphereProvider::connect`]; also returns
    /// [`ProviderError::Config`] when the configuration cannot be loaded.
    pub async fn from_sources(
        infra: I,
        props: &CloudProperties,
    ) -> Result<Self, ProviderError<I::Error>> {
        let config = VsphereConfig::load_without_cli_args()?;
        Self::connect(infra, &config, props).await
    }

    /// Overrides the pause between scheduler ticks.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.scheduler = self.scheduler.with_poll_interval(interval);
        self
    }

    /// Key the host orchestrator registers this provider under.
    #[must_use]
    pub const fn provider_key() -> &'static str {
        PROVIDER_KEY
    }

    /// Instances resolved so far.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The underlying client.
    #[must_use]
    pub const fn infrastructure(&self) -> &I {
        &self.infra
    }

    /// Resolves the instance, caps a running instance at `Clean` so the next
    /// bring-up reverts it, and returns `props` with `instance` set.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Descriptor`] for incomplete descriptors and
    /// [`ProviderError::Infrastructure`] when the lookup fails.
    pub async fn init_instance(
        &mut self,
        props: &CloudProperties,
    ) -> Result<CloudProperties, ProviderError<I::Error>> {
        let id = self.registry.resolve(&self.infra, props).await?.id.clone();
        let state = self.registry.downgrade_running(&id)?;
        debug!(instance = %id, %state, "instance initialised");
        let mut updated = props.clone();
        updated.instance = Some(id);
        Ok(updated)
    }

    /// Instance status is not tracked by this provider.
    ///
    /// # Errors
    ///
    /// Always returns [`ProviderError::StatusUnsupported`].
    pub const fn get_instance_status(
        &self,
        _props: &CloudProperties,
    ) -> Result<InstanceState, ProviderError<I::Error>> {
        Err(ProviderError::StatusUnsupported)
    }

    /// Deletes every listed instance that exists and waits for all deletions
    /// to finish.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProviderError`] raised while resolving or
    /// deleting; the remaining deletions are abandoned.
    pub async fn terminate_instances(
        &mut self,
        props: &[CloudProperties],
    ) -> Result<(), ProviderError<I::Error>> {
        let mut workflows = Vec::new();
        for prop in props {
            let instance = self.registry.resolve(&self.infra, prop).await?;
            if instance.state != InstanceState::NonExistent {
                workflows.push(Workflow::delete(instance));
            }
        }
        self.scheduler
            .run(
                &self.infra,
                &mut self.images,
                &mut self.registry,
                workflows,
                "being terminated",
            )
            .await?;
        Ok(())
    }

    /// Drives every listed instance towards `target` and returns the
    /// address of each instance that completed a workflow.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProviderError`] raised; no partial results are
    /// returned.
    pub async fn wait_instances(
        &mut self,
        props: &[CloudProperties],
        target: TargetState,
    ) -> Result<BTreeMap<String, InstanceAddress>, ProviderError<I::Error>> {
        let mut workflows = Vec::new();
        for prop in props {
            let instance = self.registry.resolve(&self.infra, prop).await?;
            if let Some(workflow) = plan(instance, target) {
                debug!(instance = %instance.id, kind = %workflow.kind(), "scheduling workflow");
                workflows.push(workflow);
            }
        }

        let activity = match target {
            TargetState::Running => "starting",
            TargetState::Refresh => "refreshing",
        };
        let outcomes = self
            .scheduler
            .run(
                &self.infra,
                &mut self.images,
                &mut self.registry,
                workflows,
                activity,
            )
            .await?;

        Ok(outcomes
            .into_iter()
            .filter_map(|(id, outcome)| {
                let address = match outcome {
                    Outcome::Running { address, .. } | Outcome::Refreshed { address } => address,
                    Outcome::Removed => return None,
                };
                debug!(instance = %id, ?target, "instance entered state");
                Some((id, InstanceAddress::from(address)))
            })
            .collect())
    }
}

/// Chooses the workflow that moves `instance` towards `target`, if any.
fn plan(instance: &Instance, target: TargetState) -> Option<Workflow> {
    match (target, instance.state) {
        (TargetState::Running, InstanceState::Clean) => Some(Workflow::revert(instance)),
        (TargetState::Running, InstanceState::NonExistent) => {
            Some(Workflow::clone_from_base(instance, false))
        }
        (TargetState::Running, InstanceState::Dirty) => {
            Some(Workflow::clone_from_base(instance, true))
        }
        (TargetState::Refresh, InstanceState::Running) => Some(Workflow::update(instance)),
        (TargetState::Running, InstanceState::Running) | (TargetState::Refresh, _) => None,
    }
}
