//! Cooperative scheduler driving many workflows with batched polling.
//!
//! Each tick gathers the value every active workflow is suspended on, issues
//! one [`Infrastructure::refresh_many`] call for all of them, and resumes
//! every workflow with its refreshed value. Finished workflows are retired
//! and their outcome applied to the [`Registry`]. The loop sleeps for the
//! poll interval between ticks and has no timeout: a remote operation that
//! never reaches a terminal status keeps the loop polling.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::image_cache::BaseImageCache;
use crate::infra::{Infrastructure, Tracked};
use crate::instance::{InstanceState, Registry};
use crate::workflow::{Context, Outcome, Progress, Workflow};

/// Default pause between ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Drives workflows to completion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Scheduler {
    poll_interval: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a scheduler using [`DEFAULT_POLL_INTERVAL`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the pause between ticks.
    ///
    /// This is primarily used by tests to keep scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pause between ticks.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Runs `workflows` until all of them complete and returns each
    /// instance's outcome.
    ///
    /// Only the first workflow for a given instance id is kept. `activity`
    /// names what is happening in the progress log line.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProviderError`] raised by a workflow, by the
    /// batched refresh, or by the registry. Remaining workflows are
    /// abandoned.
    pub async fn run<I: Infrastructure>(
        &self,
        infra: &I,
        images: &mut BaseImageCache,
        registry: &mut Registry,
        workflows: impl IntoIterator<Item = Workflow>,
        activity: &str,
    ) -> Result<BTreeMap<String, Outcome>, ProviderError<I::Error>> {
        let mut active: BTreeMap<String, Workflow> = BTreeMap::new();
        for workflow in workflows {
            let id = workflow.instance_id().to_owned();
            if active.contains_key(&id) {
                debug!(instance = %id, "ignoring duplicate workflow");
                continue;
            }
            active.insert(id, workflow);
        }

        let total = active.len();
        let mut pending: BTreeMap<String, Tracked> = BTreeMap::new();
        let mut outcomes = BTreeMap::new();
        let mut ctx = Context { infra, images };

        while !active.is_empty() {
            let mut refreshed = if pending.is_empty() {
                BTreeMap::new()
            } else {
                infra
                    .refresh_many(&pending)
                    .await
                    .map_err(ProviderError::infra("refresh_many"))?
            };

            // Outcomes reach the registry as they are produced; a later
            // failure in the same tick leaves them applied.
            let mut finished = Vec::new();
            for (id, workflow) in &mut active {
                let delivered = refreshed.remove(id).or_else(|| pending.remove(id));
                match workflow.resume(&mut ctx, delivered).await? {
                    Progress::Waiting(tracked) => {
                        pending.insert(id.clone(), tracked);
                    }
                    Progress::Complete(outcome) => {
                        pending.remove(id);
                        apply(registry, id, &outcome)?;
                        debug!(instance = %id, ?outcome, "workflow finished");
                        finished.push(id.clone());
                        outcomes.insert(id.clone(), outcome);
                    }
                }
            }

            for id in finished {
                active.remove(&id);
            }

            info!(
                "[{}/{}] instances {}, waiting...",
                total - active.len(),
                total,
                activity
            );
            if !active.is_empty() {
                sleep(self.poll_interval).await;
            }
        }

        Ok(outcomes)
    }
}

fn apply<E>(registry: &mut Registry, id: &str, outcome: &Outcome) -> Result<(), ProviderError<E>>
where
    E: std::error::Error + 'static,
{
    match outcome {
        Outcome::Running { address, handle } => {
            registry.advance(id, InstanceState::Running)?;
            registry.record(id, *address, Some(handle.clone()))?;
        }
        Outcome::Refreshed { address } => registry.record(id, *address, None)?,
        Outcome::Removed => {
            registry.remove(id);
        }
    }
    Ok(())
}
