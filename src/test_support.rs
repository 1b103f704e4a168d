//! Test support utilities shared across unit and integration tests.
//!
//! [`SimulatedInfrastructure`] is a deterministic, in-memory stand-in for the
//! remote API. Tasks complete after a configurable number of batched
//! refreshes, guests report their address a configurable number of polls
//! after power-on, and every call is journalled for assertions.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use uuid::Uuid;

use crate::infra::{
    Credentials, InfraFuture, Infrastructure, PowerState, Resource, ResourceHandle, Task,
    TaskState, Tracked,
};

/// Remote operations that can be scripted to fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Operation {
    /// Power off.
    PowerOff,
    /// Power on.
    PowerOn,
    /// Delete.
    Delete,
    /// Clone.
    Clone,
    /// Snapshot.
    Snapshot,
    /// Revert to the current snapshot.
    Revert,
}

/// A call recorded by [`SimulatedInfrastructure`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    /// Session login.
    Login {
        /// Endpoint used.
        endpoint: String,
        /// Login name used.
        username: String,
    },
    /// Lookup by name.
    Find(String),
    /// Power state query.
    PowerState(String),
    /// Power-off submitted.
    PowerOff(String),
    /// Power-on submitted.
    PowerOn(String),
    /// Delete submitted.
    Delete(String),
    /// Clone submitted.
    Clone {
        /// Source resource name.
        source: String,
        /// Name of the new resource.
        name: String,
        /// Whether a linked clone was requested.
        linked: bool,
    },
    /// Snapshot submitted.
    Snapshot {
        /// Resource name.
        vm: String,
        /// Snapshot name.
        name: String,
        /// Whether memory state was included.
        include_memory: bool,
    },
    /// Revert submitted.
    Revert(String),
    /// Batched refresh with the given number of entries.
    Refresh(usize),
}

impl Call {
    /// Returns `true` for calls that submit a remote task.
    #[must_use]
    pub const fn is_submission(&self) -> bool {
        matches!(
            self,
            Self::PowerOff(_)
                | Self::PowerOn(_)
                | Self::Delete(_)
                | Self::Clone { .. }
                | Self::Snapshot { .. }
                | Self::Revert(_)
        )
    }
}

/// Errors raised by the simulated client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SimulatedError {
    /// Raised when an operation targets a resource that does not exist.
    #[error("no such resource: {0}")]
    UnknownResource(String),
    /// Raised when a call was scripted to be rejected.
    #[error("operation {0:?} rejected")]
    Rejected(Operation),
}

/// Fixture describing a pre-existing resource.
#[derive(Clone, Debug)]
pub struct SimResource {
    name: String,
    power: PowerState,
    root_snapshots: Vec<String>,
    address: Option<IpAddr>,
}

impl SimResource {
    /// A powered-off resource with no snapshots and no guest address.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            power: PowerState::PoweredOff,
            root_snapshots: Vec::new(),
            address: None,
        }
    }

    /// Marks the resource as powered on.
    #[must_use]
    pub const fn powered_on(mut self) -> Self {
        self.power = PowerState::PoweredOn;
        self
    }

    /// Sets the root snapshot names.
    #[must_use]
    pub fn with_root_snapshots<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.root_snapshots = names.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single `pristine` root snapshot.
    #[must_use]
    pub fn pristine(self) -> Self {
        self.with_root_snapshots([crate::infra::PRISTINE_SNAPSHOT])
    }

    /// Sets the address the guest reports while powered on.
    #[must_use]
    pub const fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }
}

#[derive(Clone, Debug)]
struct SimVm {
    id: String,
    power: PowerState,
    root_snapshots: Vec<String>,
    address: IpAddr,
    address_countdown: u32,
}

#[derive(Clone, Debug)]
enum Effect {
    PowerOff(String),
    PowerOn(String),
    Delete(String),
    Clone(String),
    Snapshot { vm: String, name: String },
    Revert(String),
}

#[derive(Clone, Debug)]
struct SimTask {
    remaining: u32,
    effect: Effect,
    fails: bool,
    state: TaskState,
}

#[derive(Debug)]
struct SimState {
    vms: BTreeMap<String, SimVm>,
    tasks: BTreeMap<String, SimTask>,
    calls: Vec<Call>,
    task_latency: u32,
    address_latency: u32,
    failing: BTreeSet<Operation>,
    rejected: BTreeSet<Operation>,
    next_host: u8,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            vms: BTreeMap::new(),
            tasks: BTreeMap::new(),
            calls: Vec::new(),
            task_latency: 1,
            address_latency: 1,
            failing: BTreeSet::new(),
            rejected: BTreeSet::new(),
            next_host: 100,
        }
    }
}

impl SimState {
    fn allocate_address(&mut self) -> IpAddr {
        let host = self.next_host;
        self.next_host = self.next_host.wrapping_add(1);
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, host))
    }

    fn vm_by_id(&self, handle: &ResourceHandle) -> Option<(&String, &SimVm)> {
        self.vms.iter().find(|(_, vm)| vm.id == handle.id)
    }

    fn name_for(&self, handle: &ResourceHandle) -> Result<String, SimulatedError> {
        self.vm_by_id(handle)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| SimulatedError::UnknownResource(handle.name.clone()))
    }

    fn submit(&mut self, operation: Operation, effect: Effect) -> Result<Task, SimulatedError> {
        if self.rejected.contains(&operation) {
            return Err(SimulatedError::Rejected(operation));
        }
        let id = format!("task-{}", Uuid::new_v4());
        let mut task = SimTask {
            remaining: self.task_latency,
            effect,
            fails: self.failing.contains(&operation),
            state: TaskState::Queued,
        };
        if task.remaining == 0 {
            self.finish(&mut task);
        }
        let state = task.state;
        self.tasks.insert(id.clone(), task);
        Ok(Task { id, state })
    }

    fn finish(&mut self, task: &mut SimTask) {
        if task.fails {
            task.state = TaskState::Error;
            return;
        }
        task.state = TaskState::Success;
        let address_latency = self.address_latency;
        match &task.effect {
            Effect::PowerOff(name) => {
                if let Some(vm) = self.vms.get_mut(name) {
                    vm.power = PowerState::PoweredOff;
                }
            }
            Effect::PowerOn(name) | Effect::Revert(name) => {
                if let Some(vm) = self.vms.get_mut(name) {
                    vm.power = PowerState::PoweredOn;
                    vm.address_countdown = address_latency;
                }
            }
            Effect::Delete(name) => {
                self.vms.remove(name);
            }
            Effect::Clone(name) => {
                let address = self.allocate_address();
                self.vms.insert(
                    name.clone(),
                    SimVm {
                        id: format!("vm-{}", Uuid::new_v4()),
                        power: PowerState::PoweredOff,
                        root_snapshots: Vec::new(),
                        address,
                        address_countdown: 0,
                    },
                );
            }
            Effect::Snapshot { vm, name } => {
                if let Some(target) = self.vms.get_mut(vm) {
                    if target.root_snapshots.is_empty() {
                        target.root_snapshots.push(name.clone());
                    }
                }
            }
        }
    }

    fn refresh_task(&mut self, task: &Task) -> Task {
        let Some(mut sim) = self.tasks.remove(&task.id) else {
            return task.clone();
        };
        if !sim.state.is_terminal() {
            sim.remaining = sim.remaining.saturating_sub(1);
            if sim.remaining == 0 {
                self.finish(&mut sim);
            } else {
                sim.state = TaskState::Running;
            }
        }
        let refreshed = Task {
            id: task.id.clone(),
            state: sim.state,
        };
        self.tasks.insert(task.id.clone(), sim);
        refreshed
    }

    fn refresh_guest(&mut self, resource: &ResourceHandle) -> Option<IpAddr> {
        let vm = self.vms.values_mut().find(|vm| vm.id == resource.id)?;
        if vm.power != PowerState::PoweredOn {
            return None;
        }
        if vm.address_countdown > 0 {
            vm.address_countdown -= 1;
            return None;
        }
        Some(vm.address)
    }
}

/// Deterministic in-memory infrastructure.
///
/// Clones share state, so a test can keep one clone for assertions while the
/// provider owns another.
#[derive(Clone, Debug, Default)]
pub struct SimulatedInfrastructure {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedInfrastructure {
    /// Creates an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a pre-existing resource.
    #[must_use]
    pub fn with_resource(self, resource: SimResource) -> Self {
        {
            let mut state = self.state();
            let address = match resource.address {
                Some(address) => address,
                None => state.allocate_address(),
            };
            state.vms.insert(
                resource.name.clone(),
                SimVm {
                    id: format!("vm-{}", Uuid::new_v4()),
                    power: resource.power,
                    root_snapshots: resource.root_snapshots,
                    address,
                    address_countdown: 0,
                },
            );
        }
        self
    }

    /// Number of refreshes a task needs before it reaches a terminal status.
    /// Zero completes tasks on submission.
    #[must_use]
    pub fn with_task_latency(self, refreshes: u32) -> Self {
        self.state().task_latency = refreshes;
        self
    }

    /// Number of guest polls after power-on before the address is reported.
    #[must_use]
    pub fn with_address_latency(self, polls: u32) -> Self {
        self.state().address_latency = polls;
        self
    }

    /// Makes tasks for `operation` finish with [`TaskState::Error`] and no
    /// effect.
    #[must_use]
    pub fn failing(self, operation: Operation) -> Self {
        self.state().failing.insert(operation);
        self
    }

    /// Makes submissions of `operation` fail at call time.
    #[must_use]
    pub fn rejecting(self, operation: Operation) -> Self {
        self.state().rejected.insert(operation);
        self
    }

    /// Changes the address a resource's guest reports.
    pub fn set_address(&self, name: &str, address: IpAddr) {
        if let Some(vm) = self.state().vms.get_mut(name) {
            vm.address = address;
        }
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Returns only the task submissions, in order.
    #[must_use]
    pub fn submissions(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(Call::is_submission)
            .collect()
    }

    /// Returns the size of every batched refresh, in order.
    #[must_use]
    pub fn refresh_batches(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Refresh(size) => Some(size),
                _ => None,
            })
            .collect()
    }

    /// Clears the call journal.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Returns `true` when a resource called `name` exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.state().vms.contains_key(name)
    }

    /// Returns the power state of `name`, if it exists.
    #[must_use]
    pub fn power_of(&self, name: &str) -> Option<PowerState> {
        self.state().vms.get(name).map(|vm| vm.power)
    }

    /// Returns the root snapshot names of `name`, if it exists.
    #[must_use]
    pub fn root_snapshots_of(&self, name: &str) -> Option<Vec<String>> {
        self.state()
            .vms
            .get(name)
            .map(|vm| vm.root_snapshots.clone())
    }

    fn submit_on(
        &self,
        resource: &ResourceHandle,
        operation: Operation,
        call: impl FnOnce(String) -> Call,
        effect: impl FnOnce(String) -> Effect,
    ) -> Result<Task, SimulatedError> {
        let mut state = self.state();
        let name = state.name_for(resource)?;
        state.calls.push(call(name.clone()));
        state.submit(operation, effect(name))
    }
}

impl Infrastructure for SimulatedInfrastructure {
    type Error = SimulatedError;

    fn login<'a>(&'a self, credentials: &'a Credentials) -> InfraFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.state().calls.push(Call::Login {
                endpoint: credentials.endpoint.clone(),
                username: credentials.username.clone(),
            });
            Ok(())
        })
    }

    fn find_resource<'a>(
        &'a self,
        name: &'a str,
    ) -> InfraFuture<'a, Option<Resource>, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::Find(name.to_owned()));
            Ok(state.vms.get(name).map(|vm| Resource {
                handle: ResourceHandle {
                    id: vm.id.clone(),
                    name: name.to_owned(),
                },
                power_state: vm.power,
                root_snapshots: vm.root_snapshots.clone(),
            }))
        })
    }

    fn power_state<'a>(
        &'a self,
        resource: &'a ResourceHandle,
    ) -> InfraFuture<'a, PowerState, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            let name = state.name_for(resource)?;
            state.calls.push(Call::PowerState(name));
            state
                .vm_by_id(resource)
                .map(|(_, vm)| vm.power)
                .ok_or_else(|| SimulatedError::UnknownResource(resource.name.clone()))
        })
    }

    fn power_off<'a>(&'a self, resource: &'a ResourceHandle) -> InfraFuture<'a, Task, Self::Error> {
        Box::pin(async move {
            self.submit_on(resource, Operation::PowerOff, Call::PowerOff, Effect::PowerOff)
        })
    }

    fn power_on<'a>(&'a self, resource: &'a ResourceHandle) -> InfraFuture<'a, Task, Self::Error> {
        Box::pin(async move {
            self.submit_on(resource, Operation::PowerOn, Call::PowerOn, Effect::PowerOn)
        })
    }

    fn delete<'a>(&'a self, resource: &'a ResourceHandle) -> InfraFuture<'a, Task, Self::Error> {
        Box::pin(async move {
            self.submit_on(resource, Operation::Delete, Call::Delete, Effect::Delete)
        })
    }

    fn clone_resource<'a>(
        &'a self,
        source: &'a ResourceHandle,
        new_name: &'a str,
        linked: bool,
    ) -> InfraFuture<'a, Task, Self::Error> {
        Box::pin(async move {
            self.submit_on(
                source,
                Operation::Clone,
                |source_name| Call::Clone {
                    source: source_name,
                    name: new_name.to_owned(),
                    linked,
                },
                |_| Effect::Clone(new_name.to_owned()),
            )
        })
    }

    fn snapshot<'a>(
        &'a self,
        resource: &'a ResourceHandle,
        name: &'a str,
        include_memory: bool,
    ) -> InfraFuture<'a, Task, Self::Error> {
        Box::pin(async move {
            self.submit_on(
                resource,
                Operation::Snapshot,
                |vm| Call::Snapshot {
                    vm,
                    name: name.to_owned(),
                    include_memory,
                },
                |vm| Effect::Snapshot {
                    vm,
                    name: name.to_owned(),
                },
            )
        })
    }

    fn revert_to_current_snapshot<'a>(
        &'a self,
        resource: &'a ResourceHandle,
    ) -> InfraFuture<'a, Task, Self::Error> {
        Box::pin(async move {
            self.submit_on(resource, Operation::Revert, Call::Revert, Effect::Revert)
        })
    }

    fn refresh_many<'a>(
        &'a self,
        pending: &'a BTreeMap<String, Tracked>,
    ) -> InfraFuture<'a, BTreeMap<String, Tracked>, Self::Error> {
        Box::pin(async move {
            let mut state = self.state();
            state.calls.push(Call::Refresh(pending.len()));
            let refreshed = pending
                .iter()
                .map(|(key, tracked)| {
                    let next = match tracked {
                        Tracked::Task(task) => Tracked::Task(state.refresh_task(task)),
                        Tracked::Guest { resource, .. } => Tracked::Guest {
                            resource: resource.clone(),
                            address: state.refresh_guest(resource),
                        },
                    };
                    (key.clone(), next)
                })
                .collect();
            Ok(refreshed)
        })
    }
}
