//! Filesystem provider abstraction.
//!
//! Every component that touches the filesystem goes through
//! [`FilesystemProvider`], so tests can substitute a provider whose reads
//! fail on demand. Handles are owned values: dropping one closes the file.

use std::ffi::OsString;
use std::fs;
use std::future::Future;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use protocol::{AttributeMap, EntryType};
use serde_json::Value;
use tokio::io::AsyncRead;

/// Narrow filesystem interface used by the façade.
pub trait FilesystemProvider: Send + Sync + 'static {
    /// Readable handle returned by [`open`](Self::open). Closed on drop.
    type Handle: AsyncRead + Unpin + Send + 'static;

    /// Names of the immediate children of `dir`, in provider order.
    fn list_children(&self, dir: &Path) -> io::Result<Vec<OsString>>;

    /// File-or-directory classification, following symlinks. `None` when the
    /// path cannot be inspected.
    fn classify(&self, path: &Path) -> Option<EntryType>;

    /// Attribute map for `path` (symlinks are not followed).
    fn attributes(&self, path: &Path) -> io::Result<AttributeMap>;

    /// Open `path` for reading.
    fn open(&self, path: &Path) -> impl Future<Output = io::Result<Self::Handle>> + Send;
}

/// Provider backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl FilesystemProvider for LocalFilesystem {
    type Handle = tokio::fs::File;

    fn list_children(&self, dir: &Path) -> io::Result<Vec<OsString>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            match entry {
                Ok(entry) => names.push(entry.file_name()),
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                }
            }
        }
        Ok(names)
    }

    fn classify(&self, path: &Path) -> Option<EntryType> {
        let metadata = fs::metadata(path).ok()?;
        Some(if metadata.is_dir() {
            EntryType::Directory
        } else {
            EntryType::File
        })
    }

    fn attributes(&self, path: &Path) -> io::Result<AttributeMap> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(attributes_from_metadata(&metadata))
    }

    fn open(&self, path: &Path) -> impl Future<Output = io::Result<Self::Handle>> + Send {
        let path = path.to_path_buf();
        async move { tokio::fs::File::open(path).await }
    }
}

/// Build the attribute map reported for an entry.
pub fn attributes_from_metadata(metadata: &fs::Metadata) -> AttributeMap {
    let mut attributes = AttributeMap::new();

    let file_type = metadata.file_type();
    let kind = if file_type.is_symlink() {
        "symlink"
    } else if file_type.is_dir() {
        "directory"
    } else if file_type.is_file() {
        "file"
    } else {
        "other"
    };
    attributes.insert("type".to_string(), Value::from(kind));
    attributes.insert("size".to_string(), Value::from(metadata.len()));

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        attributes.insert("mode".to_string(), Value::from(metadata.mode() & 0o7777));
        attributes.insert("uid".to_string(), Value::from(metadata.uid()));
        attributes.insert("gid".to_string(), Value::from(metadata.gid()));
        attributes.insert("inode".to_string(), Value::from(metadata.ino()));
        attributes.insert("links".to_string(), Value::from(metadata.nlink()));
    }

    let timestamps = [
        ("modified", metadata.modified()),
        ("accessed", metadata.accessed()),
        ("created", metadata.created()),
    ];
    for (name, time) in timestamps {
        if let Some(secs) = time.ok().and_then(epoch_seconds) {
            attributes.insert(name.to_string(), Value::from(secs));
        }
    }

    attributes
}

fn epoch_seconds(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// Size recorded in an attribute map, if any.
pub fn size_of(attributes: &AttributeMap) -> Option<u64> {
    attributes.get("size").and_then(Value::as_u64)
}
