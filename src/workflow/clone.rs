//! Clone → power on → wait for address → pristine snapshot.

use std::mem;
use std::net::IpAddr;

use tracing::debug;

use super::{Advance, Context, Outcome, address_or_poll};
use crate::error::ProviderError;
use crate::infra::{Infrastructure, PRISTINE_SNAPSHOT, PowerState, ResourceHandle, Tracked};

enum CloneStep {
    Start,
    RemovingPowerOff { old: ResourceHandle },
    RemovingDelete,
    Cloning,
    PoweringOn { vm: ResourceHandle },
    AwaitingAddress { vm: ResourceHandle },
    Snapshotting { vm: ResourceHandle, address: IpAddr },
    Finished,
}

pub(super) struct CloneSteps {
    base_image_name: String,
    force_removal: bool,
    base: Option<ResourceHandle>,
    step: CloneStep,
}

impl CloneSteps {
    pub(super) fn new(base_image_name: &str, force_removal: bool) -> Self {
        Self {
            base_image_name: base_image_name.to_owned(),
            force_removal,
            base: None,
            step: CloneStep::Start,
        }
    }

    pub(super) async fn advance<I: Infrastructure>(
        &mut self,
        ctx: &mut Context<'_, I>,
        vm_name: &str,
        observed: Option<Tracked>,
    ) -> Result<Advance, ProviderError<I::Error>> {
        match mem::replace(&mut self.step, CloneStep::Finished) {
            CloneStep::Start => self.start(ctx, vm_name).await,
            CloneStep::RemovingPowerOff { old } => {
                debug!(vm = vm_name, "CLONE poweroff of old VM done");
                self.remove(ctx, vm_name, &old).await
            }
            CloneStep::RemovingDelete => {
                debug!(vm = vm_name, "CLONE delete of old VM done");
                self.submit_clone(ctx, vm_name).await
            }
            CloneStep::Cloning => {
                debug!(vm = vm_name, "CLONE clone done");
                let vm = ctx
                    .infra
                    .find_resource(vm_name)
                    .await
                    .map_err(ProviderError::infra("find_resource"))?
                    .map(|resource| resource.handle)
                    .ok_or_else(|| ProviderError::ResourceNotFound {
                        vm_name: vm_name.to_owned(),
                    })?;
                debug!(vm = vm_name, "CLONE poweron starting");
                let task = ctx
                    .infra
                    .power_on(&vm)
                    .await
                    .map_err(ProviderError::infra("power_on"))?;
                self.step = CloneStep::PoweringOn { vm };
                Ok(Advance::Await(Tracked::Task(task)))
            }
            CloneStep::PoweringOn { vm } => {
                debug!(vm = vm_name, "CLONE poweron done, waiting for address");
                let tracked = Tracked::guest(vm.clone());
                self.step = CloneStep::AwaitingAddress { vm };
                Ok(Advance::Await(tracked))
            }
            CloneStep::AwaitingAddress { vm } => {
                let address = match address_or_poll(observed.as_ref(), &vm) {
                    Ok(address) => address,
                    Err(poll) => {
                        self.step = CloneStep::AwaitingAddress { vm };
                        return Ok(Advance::Await(poll));
                    }
                };
                debug!(vm = vm_name, %address, "CLONE got address, snapshot starting");
                let task = ctx
                    .infra
                    .snapshot(&vm, PRISTINE_SNAPSHOT, true)
                    .await
                    .map_err(ProviderError::infra("snapshot"))?;
                self.step = CloneStep::Snapshotting { vm, address };
                Ok(Advance::Await(Tracked::Task(task)))
            }
            CloneStep::Snapshotting { vm, address } => {
                debug!(vm = vm_name, "CLONE snapshot done");
                Ok(Advance::Done(Outcome::Running {
                    address,
                    handle: vm,
                }))
            }
            CloneStep::Finished => Err(ProviderError::Aborted {
                vm_name: vm_name.to_owned(),
            }),
        }
    }

    /// Resolves the base image before anything destructive happens, then
    /// clears away an existing resource if asked to.
    async fn start<I: Infrastructure>(
        &mut self,
        ctx: &mut Context<'_, I>,
        vm_name: &str,
    ) -> Result<Advance, ProviderError<I::Error>> {
        let base = ctx
            .images
            .resolve(ctx.infra, &self.base_image_name)
            .await
            .map_err(ProviderError::infra("find_resource"))?
            .ok_or_else(|| ProviderError::BaseImageNotFound {
                base_vm_name: self.base_image_name.clone(),
                vm_name: vm_name.to_owned(),
            })?;
        self.base = Some(base);

        if !self.force_removal {
            return self.submit_clone(ctx, vm_name).await;
        }
        let existing = ctx
            .infra
            .find_resource(vm_name)
            .await
            .map_err(ProviderError::infra("find_resource"))?;
        match existing {
            Some(old) if old.power_state == PowerState::PoweredOn => {
                debug!(vm = vm_name, "CLONE poweroff of old VM starting");
                let task = ctx
                    .infra
                    .power_off(&old.handle)
                    .await
                    .map_err(ProviderError::infra("power_off"))?;
                self.step = CloneStep::RemovingPowerOff { old: old.handle };
                Ok(Advance::Await(Tracked::Task(task)))
            }
            Some(old) => self.remove(ctx, vm_name, &old.handle).await,
            None => self.submit_clone(ctx, vm_name).await,
        }
    }

    async fn remove<I: Infrastructure>(
        &mut self,
        ctx: &mut Context<'_, I>,
        vm_name: &str,
        old: &ResourceHandle,
    ) -> Result<Advance, ProviderError<I::Error>> {
        debug!(vm = vm_name, "CLONE delete of old VM starting");
        let task = ctx
            .infra
            .delete(old)
            .await
            .map_err(ProviderError::infra("delete"))?;
        self.step = CloneStep::RemovingDelete;
        Ok(Advance::Await(Tracked::Task(task)))
    }

    async fn submit_clone<I: Infrastructure>(
        &mut self,
        ctx: &mut Context<'_, I>,
        vm_name: &str,
    ) -> Result<Advance, ProviderError<I::Error>> {
        let Some(base) = self.base.as_ref() else {
            return Err(ProviderError::BaseImageNotFound {
                base_vm_name: self.base_image_name.clone(),
                vm_name: vm_name.to_owned(),
            });
        };
        debug!(vm = vm_name, base = %base.name, "CLONE clone starting");
        let task = ctx
            .infra
            .clone_resource(base, vm_name, false)
            .await
            .map_err(ProviderError::infra("clone_resource"))?;
        self.step = CloneStep::Cloning;
        Ok(Advance::Await(Tracked::Task(task)))
    }
}
