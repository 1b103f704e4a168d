//! Revert to the pristine snapshot and wait for an address.

use std::mem;

use tracing::debug;

use super::{Advance, Context, Outcome, address_or_poll, resolve_handle};
use crate::error::ProviderError;
use crate::infra::{Infrastructure, ResourceHandle, Tracked};

enum RevertStep {
    Start { cached: Option<ResourceHandle> },
    Reverting { vm: ResourceHandle },
    AwaitingAddress { vm: ResourceHandle },
    Finished,
}

pub(super) struct RevertSteps {
    step: RevertStep,
}

impl RevertSteps {
    pub(super) const fn new(cached: Option<ResourceHandle>) -> Self {
        Self {
            step: RevertStep::Start { cached },
        }
    }

    pub(super) async fn advance<I: Infrastructure>(
        &mut self,
        ctx: &mut Context<'_, I>,
        vm_name: &str,
        observed: Option<Tracked>,
    ) -> Result<Advance, ProviderError<I::Error>> {
        match mem::replace(&mut self.step, RevertStep::Finished) {
            RevertStep::Start { cached } => {
                let vm = resolve_handle(ctx.infra, vm_name, cached).await?;
                debug!(vm = vm_name, "REVERT starting");
                let task = ctx
                    .infra
                    .revert_to_current_snapshot(&vm)
                    .await
                    .map_err(ProviderError::infra("revert_to_current_snapshot"))?;
                self.step = RevertStep::Reverting { vm };
                Ok(Advance::Await(Tracked::Task(task)))
            }
            RevertStep::Reverting { vm } => {
                debug!(vm = vm_name, "REVERT done, waiting for address");
                let tracked = Tracked::guest(vm.clone());
                self.step = RevertStep::AwaitingAddress { vm };
                Ok(Advance::Await(tracked))
            }
            RevertStep::AwaitingAddress { vm } => {
                match address_or_poll(observed.as_ref(), &vm) {
                    Ok(address) => {
                        debug!(vm = vm_name, %address, "REVERT got address");
                        Ok(Advance::Done(Outcome::Running {
                            address,
                            handle: vm,
                        }))
                    }
                    Err(poll) => {
                        self.step = RevertStep::AwaitingAddress { vm };
                        Ok(Advance::Await(poll))
                    }
                }
            }
            RevertStep::Finished => Err(ProviderError::Aborted {
                vm_name: vm_name.to_owned(),
            }),
        }
    }
}
