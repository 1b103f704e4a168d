//! Power off when needed, then delete.

use std::mem;

use tracing::debug;

use super::{Advance, Context, Outcome, resolve_handle};
use crate::error::ProviderError;
use crate::infra::{Infrastructure, PowerState, ResourceHandle, Tracked};

enum DeleteStep {
    Start { cached: Option<ResourceHandle> },
    PoweringOff { vm: ResourceHandle },
    Deleting,
    Finished,
}

pub(super) struct DeleteSteps {
    step: DeleteStep,
}

impl DeleteSteps {
    pub(super) const fn new(cached: Option<ResourceHandle>) -> Self {
        Self {
            step: DeleteStep::Start { cached },
        }
    }

    pub(super) async fn advance<I: Infrastructure>(
        &mut self,
        ctx: &mut Context<'_, I>,
        vm_name: &str,
        _observed: Option<Tracked>,
    ) -> Result<Advance, ProviderError<I::Error>> {
        match mem::replace(&mut self.step, DeleteStep::Finished) {
            DeleteStep::Start { cached } => {
                let vm = resolve_handle(ctx.infra, vm_name, cached).await?;
                let power = ctx
                    .infra
                    .power_state(&vm)
                    .await
                    .map_err(ProviderError::infra("power_state"))?;
                if power == PowerState::PoweredOn {
                    debug!(vm = vm_name, "DELETE poweroff starting");
                    let task = ctx
                        .infra
                        .power_off(&vm)
                        .await
                        .map_err(ProviderError::infra("power_off"))?;
                    self.step = DeleteStep::PoweringOff { vm };
                    return Ok(Advance::Await(Tracked::Task(task)));
                }
                self.submit_delete(ctx, vm_name, &vm).await
            }
            DeleteStep::PoweringOff { vm } => {
                debug!(vm = vm_name, "DELETE poweroff done");
                self.submit_delete(ctx, vm_name, &vm).await
            }
            DeleteStep::Deleting => {
                debug!(vm = vm_name, "DELETE done");
                Ok(Advance::Done(Outcome::Removed))
            }
            DeleteStep::Finished => Err(ProviderError::Aborted {
                vm_name: vm_name.to_owned(),
            }),
        }
    }

    async fn submit_delete<I: Infrastructure>(
        &mut self,
        ctx: &mut Context<'_, I>,
        vm_name: &str,
        vm: &ResourceHandle,
    ) -> Result<Advance, ProviderError<I::Error>> {
        debug!(vm = vm_name, "DELETE starting");
        let task = ctx
            .infra
            .delete(vm)
            .await
            .map_err(ProviderError::infra("delete"))?;
        self.step = DeleteStep::Deleting;
        Ok(Advance::Await(Tracked::Task(task)))
    }
}
