//! Resumable lifecycle workflows.
//!
//! A [`Workflow`] is an explicit state machine bound to one instance. Each
//! step submits at most one remote operation and then suspends on the
//! returned [`Tracked`] value. The scheduler feeds refreshed values back in
//! through [`Workflow::resume`]; once the value satisfies the step (a task
//! reached a terminal status, or the guest reported an address) the workflow
//! advances and submits the next operation.
//!
//! A task finishing with [`TaskState::Error`] satisfies its step exactly like
//! a successful one. The condition is logged and otherwise ignored.

use std::fmt;
use std::net::IpAddr;

use tracing::warn;

use crate::error::ProviderError;
use crate::image_cache::BaseImageCache;
use crate::infra::{Infrastructure, ResourceHandle, Task, TaskState, Tracked};
use crate::instance::Instance;

mod clone;
mod delete;
mod revert;
mod update;

use clone::CloneSteps;
use delete::DeleteSteps;
use revert::RevertSteps;
use update::UpdateSteps;

/// Shared state a workflow step may use.
pub struct Context<'a, I> {
    /// Remote API.
    pub infra: &'a I,
    /// Base-image lookup cache.
    pub images: &'a mut BaseImageCache,
}

/// Which lifecycle action a workflow performs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkflowKind {
    /// Full clone, power-on, address wait, and pristine snapshot.
    Clone,
    /// Revert to the pristine snapshot and wait for an address.
    Revert,
    /// Power off (when needed) and delete.
    Delete,
    /// Wait for an address only.
    Update,
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Clone => "CLONE",
            Self::Revert => "REVERT",
            Self::Delete => "DELETE",
            Self::Update => "UPDATE",
        };
        f.write_str(label)
    }
}

/// Result of a completed workflow, applied to the registry by the scheduler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The instance is running with a fresh pristine state.
    Running {
        /// Address reported by the guest.
        address: IpAddr,
        /// Handle of the running resource.
        handle: ResourceHandle,
    },
    /// The address of an already running instance was re-read.
    Refreshed {
        /// Address reported by the guest.
        address: IpAddr,
    },
    /// The resource was deleted.
    Removed,
}

/// What a workflow reports after being resumed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Progress {
    /// Still suspended; poll this value next.
    Waiting(Tracked),
    /// All steps are done.
    Complete(Outcome),
}

/// What a single step transition produced.
enum Advance {
    Await(Tracked),
    Done(Outcome),
}

enum Steps {
    Clone(CloneSteps),
    Revert(RevertSteps),
    Delete(DeleteSteps),
    Update(UpdateSteps),
}

/// A resumable unit of work bound to one instance.
pub struct Workflow {
    instance_id: String,
    vm_name: String,
    steps: Steps,
    waiting: Option<Tracked>,
    finished: Option<Outcome>,
}

impl Workflow {
    fn new(instance: &Instance, steps: Steps) -> Self {
        Self {
            instance_id: instance.id.clone(),
            vm_name: instance.name.clone(),
            steps,
            waiting: None,
            finished: None,
        }
    }

    /// Clones the instance from its base image. With `force_removal`, a
    /// same-named resource is powered off and deleted first.
    #[must_use]
    pub fn clone_from_base(instance: &Instance, force_removal: bool) -> Self {
        Self::new(
            instance,
            Steps::Clone(CloneSteps::new(&instance.base_image_name, force_removal)),
        )
    }

    /// Reverts the instance to its pristine snapshot.
    #[must_use]
    pub fn revert(instance: &Instance) -> Self {
        Self::new(
            instance,
            Steps::Revert(RevertSteps::new(instance.remote_handle.clone())),
        )
    }

    /// Powers the instance off when needed and deletes it.
    #[must_use]
    pub fn delete(instance: &Instance) -> Self {
        Self::new(
            instance,
            Steps::Delete(DeleteSteps::new(instance.remote_handle.clone())),
        )
    }

    /// Re-reads the guest address of a running instance.
    #[must_use]
    pub fn update(instance: &Instance) -> Self {
        Self::new(
            instance,
            Steps::Update(UpdateSteps::new(instance.remote_handle.clone())),
        )
    }

    /// Instance this workflow drives.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Lifecycle action performed.
    #[must_use]
    pub const fn kind(&self) -> WorkflowKind {
        match self.steps {
            Steps::Clone(_) => WorkflowKind::Clone,
            Steps::Revert(_) => WorkflowKind::Revert,
            Steps::Delete(_) => WorkflowKind::Delete,
            Steps::Update(_) => WorkflowKind::Update,
        }
    }

    /// Value the workflow is currently suspended on, if any.
    #[must_use]
    pub const fn waiting_on(&self) -> Option<&Tracked> {
        self.waiting.as_ref()
    }

    /// Resumes the workflow with the latest refreshed value.
    ///
    /// `refreshed` is `None` on the first call. The workflow runs as many
    /// steps as it can without waiting and then either suspends or reports
    /// completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when a precondition fails (missing base
    /// image, missing resource) or a remote call cannot be submitted.
    pub async fn resume<I: Infrastructure>(
        &mut self,
        ctx: &mut Context<'_, I>,
        refreshed: Option<Tracked>,
    ) -> Result<Progress, ProviderError<I::Error>> {
        if let Some(outcome) = &self.finished {
            return Ok(Progress::Complete(outcome.clone()));
        }
        if let Some(tracked) = refreshed {
            self.waiting = Some(tracked);
        }

        loop {
            let observed = match self.waiting.take() {
                Some(tracked) if !satisfied(&tracked) => {
                    self.waiting = Some(tracked.clone());
                    return Ok(Progress::Waiting(tracked));
                }
                other => other,
            };
            if let Some(Tracked::Task(Task {
                id,
                state: TaskState::Error,
            })) = &observed
            {
                warn!(
                    vm = %self.vm_name,
                    workflow = %self.kind(),
                    task = %id,
                    "remote task finished with an error status, continuing"
                );
            }

            let vm_name = self.vm_name.as_str();
            let advance = match &mut self.steps {
                Steps::Clone(steps) => steps.advance(ctx, vm_name, observed).await?,
                Steps::Revert(steps) => steps.advance(ctx, vm_name, observed).await?,
                Steps::Delete(steps) => steps.advance(ctx, vm_name, observed).await?,
                Steps::Update(steps) => steps.advance(ctx, vm_name, observed).await?,
            };
            match advance {
                Advance::Await(tracked) => self.waiting = Some(tracked),
                Advance::Done(outcome) => {
                    self.finished = Some(outcome.clone());
                    return Ok(Progress::Complete(outcome));
                }
            }
        }
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("instance_id", &self.instance_id)
            .field("kind", &self.kind())
            .field("waiting", &self.waiting)
            .finish_non_exhaustive()
    }
}

/// A task step is satisfied by any terminal status; an address step by a
/// reported address.
fn satisfied(tracked: &Tracked) -> bool {
    tracked.is_finished() || tracked.guest_address().is_some()
}

/// Uses the cached handle or looks the resource up by name.
async fn resolve_handle<I: Infrastructure>(
    infra: &I,
    vm_name: &str,
    cached: Option<ResourceHandle>,
) -> Result<ResourceHandle, ProviderError<I::Error>> {
    if let Some(handle) = cached {
        return Ok(handle);
    }
    infra
        .find_resource(vm_name)
        .await
        .map_err(ProviderError::infra("find_resource"))?
        .map(|resource| resource.handle)
        .ok_or_else(|| ProviderError::ResourceNotFound {
            vm_name: vm_name.to_owned(),
        })
}

/// Extracts the reported address, falling back to another guest poll when
/// the observed value carries none.
fn address_or_poll(observed: Option<&Tracked>, vm: &ResourceHandle) -> Result<IpAddr, Tracked> {
    observed
        .and_then(Tracked::guest_address)
        .ok_or_else(|| Tracked::guest(vm.clone()))
}
