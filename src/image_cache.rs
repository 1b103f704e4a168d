//! Lazily populated base-image lookup cache.

use std::collections::BTreeMap;

use crate::infra::{Infrastructure, ResourceHandle};

/// Maps base-image names to resolved handles.
///
/// Entries are never invalidated: a base image that is replaced remotely
/// keeps resolving to the old handle for the lifetime of the cache. Misses
/// are not cached, so a base image created later is still found.
#[derive(Clone, Debug, Default)]
pub struct BaseImageCache {
    entries: BTreeMap<String, ResourceHandle>,
}

impl BaseImageCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `name`, looking it up on first use.
    ///
    /// # Errors
    ///
    /// Propagates the client error when the lookup fails.
    pub async fn resolve<I: Infrastructure>(
        &mut self,
        infra: &I,
        name: &str,
    ) -> Result<Option<ResourceHandle>, I::Error> {
        if let Some(handle) = self.entries.get(name) {
            return Ok(Some(handle.clone()));
        }
        let found = infra.find_resource(name).await?;
        Ok(found.map(|resource| {
            self.entries
                .insert(name.to_owned(), resource.handle.clone());
            resource.handle
        }))
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing has been cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
