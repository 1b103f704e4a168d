//! Infrastructure abstraction consumed by the provider.
//!
//! The provider never talks to vSphere directly. Everything it needs from the
//! remote API is expressed by [`Infrastructure`]: name lookups, asynchronous
//! operations that hand back a [`Task`], and a single batched refresh call
//! that updates any number of outstanding [`Tracked`] values in one round
//! trip.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

/// Name of the snapshot every managed resource reverts to.
pub const PRISTINE_SNAPSHOT: &str = "pristine";

/// Opaque reference to a remote resource (a virtual machine).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceHandle {
    /// Provider specific identifier (for example a managed object reference).
    pub id: String,
    /// Resource name as shown in the inventory.
    pub name: String,
}

/// Power state reported for a resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerState {
    /// The resource is running.
    PoweredOn,
    /// The resource is stopped.
    PoweredOff,
    /// The resource is suspended.
    Suspended,
}

/// Result of looking a resource up by name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource {
    /// Handle used for subsequent operations.
    pub handle: ResourceHandle,
    /// Power state at lookup time.
    pub power_state: PowerState,
    /// Names of the root snapshots, in the order reported by the API.
    pub root_snapshots: Vec<String>,
}

/// Status of an asynchronous remote operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Accepted but not started yet.
    Queued,
    /// In progress.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Error,
}

impl TaskState {
    /// Returns `true` for `Success` and `Error`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Handle to an in-flight asynchronous remote operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Task {
    /// Provider specific task identifier.
    pub id: String,
    /// Last observed status.
    pub state: TaskState,
}

/// Anything a workflow can be suspended on.
///
/// Tasks are polled until they reach a terminal status; guest views are
/// polled until the guest reports a network address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Tracked {
    /// An asynchronous operation.
    Task(Task),
    /// A resource whose guest network address is being awaited.
    Guest {
        /// Resource being observed.
        resource: ResourceHandle,
        /// Address reported by the guest tools, once known.
        address: Option<IpAddr>,
    },
}

impl Tracked {
    /// Starts observing the guest of `resource` with no address known yet.
    #[must_use]
    pub const fn guest(resource: ResourceHandle) -> Self {
        Self::Guest {
            resource,
            address: None,
        }
    }

    /// Returns `true` when this is a task in a terminal status.
    ///
    /// Guest views are never "finished" in the task sense.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        match self {
            Self::Task(task) => task.state.is_terminal(),
            Self::Guest { .. } => false,
        }
    }

    /// Returns the guest network address if one has been reported.
    #[must_use]
    pub const fn guest_address(&self) -> Option<IpAddr> {
        match self {
            Self::Guest { address, .. } => *address,
            Self::Task(_) => None,
        }
    }
}

/// Credentials used to open a session against the remote API.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    /// API endpoint URL.
    pub endpoint: String,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Future returned by infrastructure operations.
pub type InfraFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Remote API required by the provider.
///
/// Operations ending in a [`Task`] are submitted asynchronously on the remote
/// side; their completion is observed exclusively through
/// [`Infrastructure::refresh_many`].
pub trait Infrastructure {
    /// Client specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a session.
    fn login<'a>(&'a self, credentials: &'a Credentials) -> InfraFuture<'a, (), Self::Error>;

    /// Looks up a resource by its inventory name.
    fn find_resource<'a>(&'a self, name: &'a str)
    -> InfraFuture<'a, Option<Resource>, Self::Error>;

    /// Queries the current power state of a resource.
    fn power_state<'a>(
        &'a self,
        resource: &'a ResourceHandle,
    ) -> InfraFuture<'a, PowerState, Self::Error>;

    /// Starts powering a resource off.
    fn power_off<'a>(&'a self, resource: &'a ResourceHandle) -> InfraFuture<'a, Task, Self::Error>;

    /// Starts powering a resource on.
    fn power_on<'a>(&'a self, resource: &'a ResourceHandle) -> InfraFuture<'a, Task, Self::Error>;

    /// Starts deleting a resource.
    fn delete<'a>(&'a self, resource: &'a ResourceHandle) -> InfraFuture<'a, Task, Self::Error>;

    /// Starts cloning `source` into a new resource called `new_name`.
    fn clone_resource<'a>(
        &'a self,
        source: &'a ResourceHandle,
        new_name: &'a str,
        linked: bool,
    ) -> InfraFuture<'a, Task, Self::Error>;

    /// Starts taking a named snapshot.
    fn snapshot<'a>(
        &'a self,
        resource: &'a ResourceHandle,
        name: &'a str,
        include_memory: bool,
    ) -> InfraFuture<'a, Task, Self::Error>;

    /// Starts reverting a resource to its current snapshot.
    fn revert_to_current_snapshot<'a>(
        &'a self,
        resource: &'a ResourceHandle,
    ) -> InfraFuture<'a, Task, Self::Error>;

    /// Refreshes every tracked value in one round trip.
    ///
    /// Keys are preserved; a key missing from the response means the value
    /// did not change.
    fn refresh_many<'a>(
        &'a self,
        pending: &'a BTreeMap<String, Tracked>,
    ) -> InfraFuture<'a, BTreeMap<String, Tracked>, Self::Error>;
}
