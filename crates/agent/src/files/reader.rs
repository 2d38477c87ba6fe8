//! Bounded single-shot reads.
//!
//! Returns at most `cap` bytes from the head of a file. Larger files are
//! truncated silently; partial content is the defined result.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncReadExt;

use super::provider::FilesystemProvider;

/// Errors produced by bounded reads.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The file could not be opened.
    #[error("unable to open file {}: {source}", .path.display())]
    Open {
        /// Requested path.
        path: PathBuf,
        /// Underlying cause.
        source: io::Error,
    },

    /// The file opened but reading failed.
    #[error("unable to read file {}: {source}", .path.display())]
    Read {
        /// Requested path.
        path: PathBuf,
        /// Underlying cause.
        source: io::Error,
    },
}

impl ReadError {
    /// I/O error kind behind the failure.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            ReadError::Open { source, .. } | ReadError::Read { source, .. } => source.kind(),
        }
    }
}

/// Reads the head of files through a [`FilesystemProvider`].
pub struct BoundedReader<P: FilesystemProvider> {
    provider: Arc<P>,
    cap: usize,
}

impl<P: FilesystemProvider> BoundedReader<P> {
    /// Create a reader returning at most `cap` bytes per call.
    pub fn new(provider: Arc<P>, cap: usize) -> Self {
        Self { provider, cap }
    }

    /// Maximum bytes returned per read.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Read up to `cap` bytes from the start of `path`.
    ///
    /// Open and read failures both arrive through the returned future. The
    /// handle is dropped, and so closed, on every exit path.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, ReadError> {
        let handle = self
            .provider
            .open(path)
            .await
            .map_err(|source| ReadError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let mut buffer = Vec::with_capacity(self.cap.min(64 * 1024));
        handle
            .take(self.cap as u64)
            .read_to_end(&mut buffer)
            .await
            .map_err(|source| ReadError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::config::DEFAULT_READ_CAP;
    use crate::files::provider::LocalFilesystem;
    use tempfile::TempDir;

    fn reader() -> BoundedReader<LocalFilesystem> {
        BoundedReader::new(Arc::new(LocalFilesystem), DEFAULT_READ_CAP)
    }

    #[tokio::test]
    async fn test_small_file_read_fully() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("small.txt");
        fs::write(&path, "Hello, World!").unwrap();

        let data = reader().read(&path).await.unwrap();
        assert_eq!(data, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_exactly_cap() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("exact.bin");
        fs::write(&path, vec![7u8; DEFAULT_READ_CAP]).unwrap();

        let data = reader().read(&path).await.unwrap();
        assert_eq!(data.len(), DEFAULT_READ_CAP);
    }

    #[tokio::test]
    async fn test_large_file_truncated_to_cap() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("large.bin");
        let content: Vec<u8> = (0..DEFAULT_READ_CAP * 3).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();

        let data = reader().read(&path).await.unwrap();
        assert_eq!(data.len(), DEFAULT_READ_CAP);
        assert_eq!(data, content[..DEFAULT_READ_CAP]);
    }

    #[tokio::test]
    async fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty");
        fs::write(&path, b"").unwrap();

        assert!(reader().read(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_open_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.txt");

        let err = reader().read(&path).await.unwrap_err();
        assert!(matches!(err, ReadError::Open { .. }));
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("unable to open file"));
    }

    #[tokio::test]
    async fn test_directory_is_read_error() {
        let temp_dir = TempDir::new().unwrap();

        // Opening a directory succeeds on Unix; the read itself fails
        let err = reader().read(temp_dir.path()).await.unwrap_err();
        assert!(matches!(err, ReadError::Read { .. } | ReadError::Open { .. }));
    }
}
