//! Instance records, state derivation, and the in-memory registry.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::net::IpAddr;

use thiserror::Error;
use tracing::{debug, warn};

use crate::descriptor::CloudProperties;
use crate::error::ProviderError;
use crate::infra::{Infrastructure, PRISTINE_SNAPSHOT, PowerState, Resource, ResourceHandle};

/// Lifecycle state of a managed instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// No resource with the instance name exists.
    NonExistent,
    /// A resource exists but has no usable `pristine` root snapshot.
    Dirty,
    /// The resource has a `pristine` snapshot and is powered off, or a
    /// running resource has been downgraded for re-provisioning.
    Clean,
    /// The resource has a `pristine` snapshot and is powered on.
    Running,
}

impl InstanceState {
    /// Derives the state of an existing resource.
    ///
    /// A resource is managed when its first root snapshot is `pristine`.
    /// Managed resources are expected to carry no other root snapshot; extra
    /// roots are reported but do not change the classification.
    #[must_use]
    pub fn derive(resource: &Resource) -> Self {
        match resource.root_snapshots.as_slice() {
            [first, rest @ ..] if first == PRISTINE_SNAPSHOT => {
                if !rest.is_empty() {
                    warn!(
                        vm = %resource.handle.name,
                        extra_roots = rest.len(),
                        "resource has more than one root snapshot"
                    );
                }
                if resource.power_state == PowerState::PoweredOn {
                    Self::Running
                } else {
                    Self::Clean
                }
            }
            _ => Self::Dirty,
        }
    }

    /// Returns `true` when a completed workflow may move an instance from
    /// `self` to `next`. Only moves towards `Running` (or staying put) are
    /// allowed.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next == Self::Running || next == self
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NonExistent => "VM_NON_EXISTENT",
            Self::Dirty => "VM_DIRTY",
            Self::Clean => "VM_CLEAN",
            Self::Running => "VM_RUNNING",
        };
        f.write_str(label)
    }
}

/// A managed instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Instance identifier; equal to the resource name.
    pub id: String,
    /// Remote resource name.
    pub name: String,
    /// Resource to clone from.
    pub base_image_name: String,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Guest address, once known.
    pub ipv4: Option<IpAddr>,
    /// Remote handle, once resolved.
    pub remote_handle: Option<ResourceHandle>,
}

/// Errors raised when the registry rejects an update.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when an update targets an instance that was never resolved.
    #[error("instance {instance_id} is not registered")]
    UnknownInstance {
        /// Instance identifier.
        instance_id: String,
    },
    /// Raised when an update would move an instance backwards.
    #[error("instance {instance_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Instance identifier.
        instance_id: String,
        /// Current state.
        from: InstanceState,
        /// Requested state.
        to: InstanceState,
    },
}

/// In-memory map from instance id to instance record.
///
/// State is derived from the remote API once, on first resolution, and
/// afterwards only moves when a workflow completes.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    instances: BTreeMap<String, Instance>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance for `props`, deriving its state from the remote
    /// API on first access.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Descriptor`] when `vm_name` or
    /// `base_vm_name` is missing and [`ProviderError::Infrastructure`] when
    /// the lookup fails.
    pub async fn resolve<I: Infrastructure>(
        &mut self,
        infra: &I,
        props: &CloudProperties,
    ) -> Result<&Instance, ProviderError<I::Error>> {
        let vm_name = props.require_vm_name()?;
        let base_image_name = props.require_base_vm_name()?;

        match self.instances.entry(vm_name.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let found = infra
                    .find_resource(vm_name)
                    .await
                    .map_err(ProviderError::infra("find_resource"))?;
                let state = found
                    .as_ref()
                    .map_or(InstanceState::NonExistent, InstanceState::derive);
                debug!(vm = vm_name, %state, "derived instance state");
                Ok(entry.insert(Instance {
                    id: vm_name.to_owned(),
                    name: vm_name.to_owned(),
                    base_image_name: base_image_name.to_owned(),
                    state,
                    ipv4: None,
                    remote_handle: found.map(|resource| resource.handle),
                }))
            }
        }
    }

    /// Looks up an already resolved instance.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.instances.get(id)
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` when no instance is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Caps a `Running` instance at `Clean` so the next bring-up reverts to
    /// the pristine snapshot instead of trusting live state.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] for unregistered ids.
    pub fn downgrade_running(&mut self, id: &str) -> Result<InstanceState, RegistryError> {
        let instance = self.get_mut(id)?;
        if instance.state == InstanceState::Running {
            instance.state = InstanceState::Clean;
        }
        Ok(instance.state)
    }

    /// Moves an instance forward after a workflow completes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidTransition`] when the move is not
    /// allowed and [`RegistryError::UnknownInstance`] for unregistered ids.
    pub fn advance(&mut self, id: &str, next: InstanceState) -> Result<(), RegistryError> {
        let instance = self.get_mut(id)?;
        if !instance.state.can_advance_to(next) {
            return Err(RegistryError::InvalidTransition {
                instance_id: id.to_owned(),
                from: instance.state,
                to: next,
            });
        }
        instance.state = next;
        Ok(())
    }

    /// Records the guest address and, when known, the remote handle.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] for unregistered ids.
    pub fn record(
        &mut self,
        id: &str,
        address: IpAddr,
        handle: Option<ResourceHandle>,
    ) -> Result<(), RegistryError> {
        let instance = self.get_mut(id)?;
        instance.ipv4 = Some(address);
        if handle.is_some() {
            instance.remote_handle = handle;
        }
        Ok(())
    }

    /// Forgets an instance after its resource has been deleted.
    pub fn remove(&mut self, id: &str) -> Option<Instance> {
        self.instances.remove(id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Instance, RegistryError> {
        self.instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownInstance {
                instance_id: id.to_owned(),
            })
    }
}
