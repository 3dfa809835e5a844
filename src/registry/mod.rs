//! Registry of known resources and their consumers.
//!
//! Pure bookkeeping: the registry never touches the filesystem. The scanner
//! hands it a [`Listing`] of what is on disk right now and the registry
//! reports (and applies) the difference.

use std::collections::BTreeMap;

use tracing::debug;

/// Filesystem identity of a directory entry.
///
/// Two entries with the same name but different identities are different
/// pipes: one was deleted and another created in its place. The scanner
/// keeps registered pipes pinned so their numbers are never reused while
/// the registry still refers to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    pub dev: u64,
    pub ino: u64,
}

impl EntryId {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }
}

/// Snapshot of a directory: entry name -> identity.
pub type Listing = BTreeMap<String, EntryId>;

/// Names that appeared and vanished in one reconciliation step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Error types for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Resource not found: {0}")]
    UnknownResource(String),
}

/// A known input resource.
#[derive(Debug, Clone)]
pub struct Resource {
    id: EntryId,
    consumers: BTreeMap<String, EntryId>,
}

impl Resource {
    fn new(id: EntryId) -> Self {
        Self {
            id,
            consumers: BTreeMap::new(),
        }
    }

    /// Identity of the producer pipe.
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Identity of a registered consumer pipe.
    pub fn consumer(&self, name: &str) -> Option<EntryId> {
        self.consumers.get(name).copied()
    }

    /// Names of all registered consumers, in order.
    pub fn consumer_names(&self) -> impl Iterator<Item = &str> {
        self.consumers.keys().map(String::as_str)
    }
}

/// Owner of all resource/consumer bookkeeping.
#[derive(Debug, Default)]
pub struct Registry {
    resources: BTreeMap<String, Resource>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Names of all known resources, in order.
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Reconcile resources against a listing of the input directory.
    ///
    /// Removals are applied before additions are computed, so an entry that
    /// was replaced under the same name shows up in both lists. Removing a
    /// resource drops all of its consumers with it.
    pub fn diff_resources(&mut self, listing: &Listing) -> Diff {
        let removed = diff_removed(&self.resources, listing, |r| r.id);
        for name in &removed {
            if let Some(resource) = self.resources.remove(name) {
                debug!(
                    resource = %name,
                    consumers = resource.consumers.len(),
                    "Resource removed from registry"
                );
            }
        }

        let added = diff_added(&self.resources, listing);
        for name in &added {
            self.resources
                .insert(name.clone(), Resource::new(listing[name]));
            debug!(resource = %name, "Resource added to registry");
        }

        Diff { added, removed }
    }

    /// Reconcile the consumers of one resource against a listing of its
    /// output sub-directory.
    pub fn diff_consumers(
        &mut self,
        resource: &str,
        listing: &Listing,
    ) -> Result<Diff, RegistryError> {
        let entry = self
            .resources
            .get_mut(resource)
            .ok_or_else(|| RegistryError::UnknownResource(resource.to_string()))?;

        let removed = diff_removed(&entry.consumers, listing, |id| *id);
        for name in &removed {
            entry.consumers.remove(name);
            debug!(resource = %resource, consumer = %name, "Consumer removed from registry");
        }

        let added = diff_added(&entry.consumers, listing);
        for name in &added {
            entry.consumers.insert(name.clone(), listing[name]);
            debug!(resource = %resource, consumer = %name, "Consumer added to registry");
        }

        Ok(Diff { added, removed })
    }
}

/// Known names that are absent from the listing or whose identity changed.
fn diff_removed<V>(
    known: &BTreeMap<String, V>,
    listing: &Listing,
    id_of: impl Fn(&V) -> EntryId,
) -> Vec<String> {
    known
        .iter()
        .filter(|(name, value)| listing.get(*name) != Some(&id_of(*value)))
        .map(|(name, _)| name.clone())
        .collect()
}

/// Listed names that are not known.
fn diff_added<V>(known: &BTreeMap<String, V>, listing: &Listing) -> Vec<String> {
    listing
        .keys()
        .filter(|name| !known.contains_key(*name))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests;
