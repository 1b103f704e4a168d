//! Re-read the guest address of a running instance.

use std::mem;

use tracing::debug;

use super::{Advance, Context, Outcome, address_or_poll, resolve_handle};
use crate::error::ProviderError;
use crate::infra::{Infrastructure, ResourceHandle, Tracked};

enum UpdateStep {
    Start { cached: Option<ResourceHandle> },
    AwaitingAddress { vm: ResourceHandle },
    Finished,
}

pub(super) struct UpdateSteps {
    step: UpdateStep,
}

impl UpdateSteps {
    pub(super) const fn new(cached: Option<ResourceHandle>) -> Self {
        Self {
            step: UpdateStep::Start { cached },
        }
    }

    pub(super) async fn advance<I: Infrastructure>(
        &mut self,
        ctx: &mut Context<'_, I>,
        vm_name: &str,
        observed: Option<Tracked>,
    ) -> Result<Advance, ProviderError<I::Error>> {
        match mem::replace(&mut self.step, UpdateStep::Finished) {
            UpdateStep::Start { cached } => {
                let vm = resolve_handle(ctx.infra, vm_name, cached).await?;
                debug!(vm = vm_name, "UPDATE waiting for address");
                let tracked = Tracked::guest(vm.clone());
                self.step = UpdateStep::AwaitingAddress { vm };
                Ok(Advance::Await(tracked))
            }
            UpdateStep::AwaitingAddress { vm } => match address_or_poll(observed.as_ref(), &vm) {
                Ok(address) => {
                    debug!(vm = vm_name, %address, "UPDATE got address");
                    Ok(Advance::Done(Outcome::Refreshed { address }))
                }
                Err(poll) => {
                    self.step = UpdateStep::AwaitingAddress { vm };
                    Ok(Advance::Await(poll))
                }
            },
            UpdateStep::Finished => Err(ProviderError::Aborted {
                vm_name: vm_name.to_owned(),
            }),
        }
    }
}
