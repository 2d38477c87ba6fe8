//! Directory listing relative to a root alias.
//!
//! Listing is lenient: a path that is missing or is not a directory yields an
//! empty listing. Attribute lookups that fail leave an empty map on the entry
//! and the listing continues.

use std::path::Path;
use std::sync::Arc;

use protocol::{AttributeMap, DirectoryEntry, EntryType, RootAlias};
use tracing::debug;

use super::provider::FilesystemProvider;
use super::resolver::{PathResolver, ResolveError};

/// Lists directories through a [`FilesystemProvider`].
pub struct DirectoryBrowser<P: FilesystemProvider> {
    provider: Arc<P>,
    resolver: PathResolver,
}

impl<P: FilesystemProvider> DirectoryBrowser<P> {
    /// Create a browser.
    pub fn new(provider: Arc<P>, resolver: PathResolver) -> Self {
        Self { provider, resolver }
    }

    /// List the immediate children of `relative` under `root`.
    ///
    /// Only root resolution can fail; every filesystem failure degrades to
    /// fewer (or no) entries. Order is whatever the provider returns.
    pub fn list(
        &self,
        relative: &str,
        root: RootAlias,
    ) -> Result<Vec<DirectoryEntry>, ResolveError> {
        let dir = self.resolver.resolve(root, relative)?;
        Ok(self.list_absolute(&dir))
    }

    /// List an already-resolved directory.
    pub fn list_absolute(&self, dir: &Path) -> Vec<DirectoryEntry> {
        let names = match self.provider.list_children(dir) {
            Ok(names) => names,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Directory unavailable, returning empty listing");
                return Vec::new();
            }
        };

        names
            .into_iter()
            .map(|name| {
                let path = dir.join(&name);
                self.entry(name.to_string_lossy().to_string(), &path)
            })
            .collect()
    }

    fn entry(&self, name: String, path: &Path) -> DirectoryEntry {
        let entry_type = self.provider.classify(path).unwrap_or(EntryType::File);

        let attribute = match self.provider.attributes(path) {
            Ok(attribute) => attribute,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Attribute lookup failed");
                AttributeMap::new()
            }
        };

        DirectoryEntry {
            entry_type,
            name,
            path: path.to_string_lossy().to_string(),
            attribute,
        }
    }
}
