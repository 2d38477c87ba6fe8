//! Streaming file export.
//!
//! A download is answered immediately with the file size and a fresh session
//! id, then the content follows as a sequence of push events on the message
//! channel:
//!
//! ```text
//! start, data, data, ..., data, end      (or ..., error)
//! ```
//!
//! Each `data` event carries one chunk of at most `watermark` bytes as the
//! envelope attachment. A chunk shorter than the watermark marks end of file,
//! so a file whose size is an exact multiple of the watermark finishes with a
//! zero-length chunk. Every export runs on its own task and yields between
//! reads, so concurrent exports and request handling interleave.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use protocol::TransferEvent;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::provider::{size_of, FilesystemProvider};
use super::registry::{SessionId, SessionRegistry, SessionState};
use crate::channel::{ChannelError, MessageChannel};
use crate::config::MAX_WATERMARK;

/// Errors that prevent an export from starting.
///
/// Failures after `start` has been emitted are reported in-band as `error`
/// transfer events instead.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The file could not be opened.
    #[error("unable to open file {} for export: {source}", .path.display())]
    Open {
        /// Requested path.
        path: PathBuf,
        /// Underlying cause.
        source: io::Error,
    },

    /// The channel closed before `start` could be emitted.
    #[error("unable to announce export: {0}")]
    Channel(#[from] ChannelError),
}

impl ExportError {
    /// I/O error kind behind an open failure.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            ExportError::Open { source, .. } => Some(source.kind()),
            ExportError::Channel(_) => None,
        }
    }
}

/// Immediate answer to a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportStarted {
    /// File size in bytes (0 when it could not be determined).
    pub size: u64,
    /// Session id shared by every event of this export.
    pub session: SessionId,
}

/// Streams files to the controller in watermark-sized chunks.
pub struct StreamingExporter<P: FilesystemProvider, C: MessageChannel> {
    provider: Arc<P>,
    channel: C,
    registry: Arc<SessionRegistry>,
    tracker: TaskTracker,
    watermark: usize,
}

impl<P: FilesystemProvider, C: MessageChannel> StreamingExporter<P, C> {
    /// Create an exporter emitting chunks of at most `watermark` bytes.
    ///
    /// The watermark is clamped to `1..=MAX_WATERMARK` so every `data` event
    /// fits in one frame.
    pub fn new(provider: Arc<P>, channel: C, watermark: usize) -> Self {
        let clamped = watermark.clamp(1, MAX_WATERMARK);
        if clamped != watermark {
            warn!(requested = watermark, watermark = clamped, "Watermark out of range, clamping");
        }

        Self {
            provider,
            channel,
            registry: Arc::new(SessionRegistry::new()),
            tracker: TaskTracker::new(),
            watermark: clamped,
        }
    }

    /// Chunk size in bytes.
    pub fn watermark(&self) -> usize {
        self.watermark
    }

    /// Live export sessions.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Start exporting `path`.
    ///
    /// The file is opened and `start` is emitted before this returns, so the
    /// `start` event always precedes the first `data` event on the channel.
    /// Reading continues on a background task.
    pub async fn start(&self, path: &Path) -> Result<ExportStarted, ExportError> {
        let session = Uuid::new_v4().to_string();

        let size = match self.provider.attributes(path) {
            Ok(attributes) => size_of(&attributes).unwrap_or(0),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Size unavailable, reporting 0");
                0
            }
        };

        let handle = self
            .provider
            .open(path)
            .await
            .map_err(|source| ExportError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        self.registry.open(&session, path);
        if let Err(e) = self.channel.emit(TransferEvent::start(&session), None).await {
            self.registry.finish(&session, SessionState::Failed);
            return Err(e.into());
        }

        info!(session = %session, path = %path.display(), size, "Export started");

        let stream = ExportStream {
            session: session.clone(),
            channel: self.channel.clone(),
            registry: Arc::clone(&self.registry),
            watermark: self.watermark,
        };
        self.tracker.spawn(stream.run(handle));

        Ok(ExportStarted { size, session })
    }

    /// Wait for every in-flight export to reach a terminal event.
    pub async fn drain(&self) {
        let active = self.registry.active();
        if !active.is_empty() {
            info!(count = active.len(), "Waiting for in-flight exports");
            for (session, record) in &active {
                debug!(
                    session = %session,
                    path = %record.path.display(),
                    bytes = record.bytes_sent,
                    "Export still running"
                );
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// State owned by one export task.
struct ExportStream<C: MessageChannel> {
    session: SessionId,
    channel: C,
    registry: Arc<SessionRegistry>,
    watermark: usize,
}

impl<C: MessageChannel> ExportStream<C> {
    async fn run<H>(self, mut handle: H)
    where
        H: tokio::io::AsyncRead + Unpin + Send,
    {
        let state = match self.pump(&mut handle).await {
            Ok(state) => state,
            Err(ChannelError::Closed) => {
                warn!(session = %self.session, "Channel closed mid-export, abandoning");
                SessionState::Failed
            }
        };

        // Handle closes here, after the terminal event has been queued
        drop(handle);

        if let Some(record) = self.registry.finish(&self.session, state) {
            info!(
                session = %self.session,
                state = ?state,
                bytes = record.bytes_sent,
                chunks = record.chunks,
                elapsed_ms = record.started_at.elapsed().as_millis() as u64,
                "Export finished"
            );
        }
    }

    async fn pump<H>(&self, handle: &mut H) -> Result<SessionState, ChannelError>
    where
        H: tokio::io::AsyncRead + Unpin + Send,
    {
        loop {
            tokio::task::yield_now().await;

            let mut chunk = Vec::with_capacity(self.watermark);
            let read = (&mut *handle)
                .take(self.watermark as u64)
                .read_to_end(&mut chunk)
                .await;

            match read {
                Ok(len) => {
                    self.registry.record_chunk(&self.session, len);
                    debug!(session = %self.session, len, "Emitting chunk");
                    self.channel
                        .emit(TransferEvent::data(&self.session), Some(chunk))
                        .await?;

                    if len < self.watermark {
                        self.channel
                            .emit(TransferEvent::end(&self.session), None)
                            .await?;
                        return Ok(SessionState::Completed);
                    }
                }
                Err(e) => {
                    warn!(session = %self.session, error = %e, "Export read failed");
                    self.channel
                        .emit(TransferEvent::error(&self.session, e.to_string()), None)
                        .await?;
                    return Ok(SessionState::Failed);
                }
            }
        }
    }
}
