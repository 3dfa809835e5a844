//! Filesystem discovery of producer and consumer pipes.
//!
//! Lists the input directory and each resource's output sub-directory and
//! feeds the listings to the [`Registry`].
//!
//! Every registered pipe stays pinned until the registry drops it. A pipe
//! deleted and recreated between two scans therefore always shows up with a
//! new identity, even on filesystems that reuse inode numbers right away.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use crate::error::{BroadcastError, Result};
use crate::pipe::{self, Pinned};
use crate::registry::{Diff, Listing, Registry};

/// Pipes found in one directory listing, by entry name.
pub type PinnedListing = BTreeMap<String, Pinned>;

/// Maps resource and consumer names onto the two directory trees.
#[derive(Debug)]
pub struct Scanner {
    input_dir: PathBuf,
    output_dir: PathBuf,
    pins: HashMap<PathBuf, Pinned>,
}

impl Scanner {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            pins: HashMap::new(),
        }
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of a resource's producer pipe.
    pub fn producer_path(&self, resource: &str) -> PathBuf {
        self.input_dir.join(resource)
    }

    /// Directory where a resource's consumers create their pipes.
    pub fn resource_dir(&self, resource: &str) -> PathBuf {
        self.output_dir.join(resource)
    }

    /// Path of a consumer pipe.
    pub fn consumer_path(&self, resource: &str, consumer: &str) -> PathBuf {
        self.resource_dir(resource).join(consumer)
    }

    /// Number of registered pipes currently pinned.
    pub fn pinned(&self) -> usize {
        self.pins.len()
    }

    /// Create both directory roots if missing.
    pub async fn prepare(&self) -> Result<()> {
        for dir in [&self.input_dir, &self.output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| BroadcastError::CreateDir {
                    path: dir.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Diff the input directory against the registry.
    ///
    /// Every newly added resource gets its output sub-directory.
    pub async fn scan_resources(&mut self, registry: &mut Registry) -> Result<Diff> {
        let mut found = list_pipes(&self.input_dir)
            .await
            .map_err(|source| BroadcastError::List {
                path: self.input_dir.clone(),
                source,
            })?;

        let diff = registry.diff_resources(&identities(&found));
        for resource in &diff.removed {
            self.unpin_resource(resource);
        }
        for resource in &diff.added {
            if let Some(pinned) = found.remove(resource) {
                self.pins.insert(self.producer_path(resource), pinned);
            }
            self.create_resource_dir(resource).await?;
        }
        Ok(diff)
    }

    /// Diff one resource's output sub-directory against the registry.
    ///
    /// A vanished sub-directory is recreated and counts as empty.
    pub async fn scan_consumers(&mut self, registry: &mut Registry, resource: &str) -> Result<Diff> {
        let dir = self.resource_dir(resource);
        let mut found = match list_pipes(&dir).await {
            Ok(found) => found,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(resource = %resource, path = %dir.display(), "Output directory vanished, recreating");
                self.create_resource_dir(resource).await?;
                PinnedListing::new()
            }
            Err(source) => return Err(BroadcastError::List { path: dir, source }),
        };

        let diff = registry.diff_consumers(resource, &identities(&found))?;
        for consumer in &diff.removed {
            self.pins.remove(&self.consumer_path(resource, consumer));
        }
        for consumer in &diff.added {
            if let Some(pinned) = found.remove(consumer) {
                self.pins.insert(self.consumer_path(resource, consumer), pinned);
            }
        }
        Ok(diff)
    }

    /// Release the producer pin and every consumer pin of a resource.
    fn unpin_resource(&mut self, resource: &str) {
        let dir = self.resource_dir(resource);
        self.pins.remove(&self.producer_path(resource));
        self.pins.retain(|path, _| !path.starts_with(&dir));
    }

    async fn create_resource_dir(&self, resource: &str) -> Result<()> {
        let path = self.resource_dir(resource);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {
                info!(resource = %resource, path = %path.display(), "Created output directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(resource = %resource, path = %path.display(), "Output directory already exists");
                Ok(())
            }
            Err(source) => Err(BroadcastError::CreateDir { path, source }),
        }
    }
}

/// List and pin the named pipes in a directory.
///
/// Entries that are not FIFOs, have non UTF-8 names, or vanish while being
/// listed are skipped.
pub async fn list_pipes(dir: &Path) -> io::Result<PinnedListing> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut listing = PinnedListing::new();

    while let Some(entry) = entries.next_entry().await? {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        if !file_type.is_fifo() {
            trace!(path = %entry.path().display(), "Skipping non-FIFO entry");
            continue;
        }

        let Ok(name) = entry.file_name().into_string() else {
            trace!(path = %entry.path().display(), "Skipping non UTF-8 entry name");
            continue;
        };

        // Removed or replaced by something else since the directory read.
        let Some(pinned) = pipe::pin(&entry.path())? else {
            continue;
        };
        listing.insert(name, pinned);
    }

    Ok(listing)
}

fn identities(found: &PinnedListing) -> Listing {
    found
        .iter()
        .map(|(name, pinned)| (name.clone(), pinned.id()))
        .collect()
}
