//! Framed transport between the controller and the agent.
//!
//! A connection is any `AsyncRead`/`AsyncWrite` pair: stdio, one half of a
//! Unix socket, or an in-memory duplex in tests. Incoming frames are decoded
//! into envelopes and each request is handled on its own task. Every outbound
//! envelope, whether reply or transfer event, is queued on one bounded
//! channel and written by a single writer task, so frames never interleave.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::Arc;

use protocol::error::ProtocolError;
use protocol::messages::{ErrorCode, ErrorMessage};
use protocol::{Envelope, Frame, FrameBuffer, FrameCodec, Message, TransferEvent};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::channel::{outbound, MessageChannel};
use crate::config::TransferConfig;
use crate::files::{FilesystemProvider, PathResolver};
use crate::router::Router;

/// Read buffer size for incoming frames.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Reading or writing the stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The byte stream is not valid framing.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The writer task panicked or was cancelled.
    #[error("writer task failed: {0}")]
    Writer(String),
}

/// Counters reported when a connection ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Envelopes decoded from the controller.
    pub received: u64,
    /// Envelopes written to the controller.
    pub sent: u64,
}

/// Serves controller connections over a filesystem provider.
pub struct Server<P: FilesystemProvider> {
    provider: Arc<P>,
    resolver: PathResolver,
    transfer: TransferConfig,
}

impl<P: FilesystemProvider> Server<P> {
    /// Create a server.
    pub fn new(provider: Arc<P>, resolver: PathResolver, transfer: TransferConfig) -> Self {
        Self {
            provider,
            resolver,
            transfer,
        }
    }

    fn codec(&self) -> FrameCodec {
        if self.transfer.compression {
            FrameCodec::new()
        } else {
            FrameCodec::without_compression()
        }
    }

    /// Serve one connection until the controller closes its side.
    ///
    /// On EOF, in-flight requests and exports run to their terminal event
    /// and are flushed before this returns.
    pub async fn serve<R, W>(&self, mut reader: R, writer: W) -> Result<ConnectionStats, TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (channel, rx) = outbound(self.transfer.channel_capacity);
        let writer_task = tokio::spawn(write_loop(writer, rx, self.codec()));

        let router = Arc::new(Router::new(
            Arc::clone(&self.provider),
            self.resolver.clone(),
            channel.clone(),
            &self.transfer,
        ));
        let requests = TaskTracker::new();

        let mut frames = FrameBuffer::new(self.codec());
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut received = 0u64;

        let outcome: Result<(), TransportError> = 'read: loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!(pending = frames.pending_len(), "Controller closed input");
                    break 'read Ok(());
                }
                Ok(n) => n,
                Err(e) => break 'read Err(e.into()),
            };
            frames.extend(&buf[..n]);

            loop {
                let frame = match frames.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => break 'read Err(e.into()),
                };
                received += 1;

                let envelope = match Envelope::from_msgpack(&frame.payload) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(error = %e, "Discarding undecodable envelope");
                        let reply = Envelope::push(Message::Error(ErrorMessage {
                            code: ErrorCode::InvalidRequest,
                            message: e.to_string(),
                            context: None,
                            recoverable: false,
                        }));
                        if channel.send(reply).await.is_err() {
                            break 'read Ok(());
                        }
                        continue;
                    }
                };

                let router = Arc::clone(&router);
                let channel = channel.clone();
                requests.spawn(async move {
                    if let Some(reply) = router.route(envelope).await {
                        if channel.send(reply).await.is_err() {
                            debug!("Reply dropped, writer has stopped");
                        }
                    }
                });
            }
        };

        requests.close();
        requests.wait().await;
        router.exporter().drain().await;

        // Writer stops once every sender is gone
        drop(router);
        drop(channel);
        let sent = writer_task
            .await
            .map_err(|e| TransportError::Writer(e.to_string()))??;

        outcome?;
        Ok(ConnectionStats { received, sent })
    }

    /// Accept controller connections on a Unix socket, one at a time, until
    /// `shutdown` fires.
    pub async fn serve_unix(&self, path: &Path, shutdown: CancellationToken) -> io::Result<()> {
        let listener = bind_socket(path)?;
        info!(path = %path.display(), "Listening for controller connections");

        loop {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Socket listener received shutdown signal");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            info!("Controller connected");
            let (read_half, write_half) = tokio::io::split(stream);
            match self.serve(read_half, write_half).await {
                Ok(stats) => info!(received = stats.received, sent = stats.sent, "Controller disconnected"),
                Err(e) => error!(error = %e, "Connection ended with error"),
            }
        }

        if let Err(e) = std::fs::remove_file(path) {
            debug!(path = %path.display(), error = %e, "Socket file not removed");
        }
        Ok(())
    }
}

/// Bind a Unix socket, creating parent directories and replacing a stale
/// socket file.
fn bind_socket(path: &Path) -> io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    if path.exists() {
        std::fs::remove_file(path)?;
    }

    UnixListener::bind(path)
}

/// Write queued envelopes until every sender is gone.
///
/// An envelope that cannot be framed is replaced rather than dropped: a
/// reply becomes an `InternalError` reply with the same sequence, and a
/// transfer event becomes a terminal `error` event for its session. Later
/// events of a failed session are discarded so the controller never sees
/// `end` after a missing chunk.
async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Envelope>,
    codec: FrameCodec,
) -> Result<u64, TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut failed_sessions: HashSet<String> = HashSet::new();
    let mut sent = 0u64;

    while let Some(envelope) = rx.recv().await {
        if let Message::Transfer(event) = &envelope.payload {
            if failed_sessions.contains(&event.session) {
                debug!(session = %event.session, event = ?event.event, "Discarding event of failed export");
                if event.event.is_terminal() {
                    failed_sessions.remove(&event.session);
                }
                continue;
            }
        }

        let bytes = match encode(&codec, &envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(sequence = envelope.sequence, error = %e, "Envelope cannot be framed, replacing");
                let replacement = replacement_for(&envelope, &e);
                if let Message::Transfer(event) = &envelope.payload {
                    if !event.event.is_terminal() {
                        failed_sessions.insert(event.session.clone());
                    }
                }
                encode(&codec, &replacement)?
            }
        };

        writer.write_all(&bytes).await?;
        writer.flush().await?;
        sent += 1;
    }

    writer.shutdown().await?;
    Ok(sent)
}

fn encode(codec: &FrameCodec, envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    codec.encode(&Frame::new(envelope.to_msgpack()?))
}

fn replacement_for(envelope: &Envelope, cause: &ProtocolError) -> Envelope {
    match &envelope.payload {
        Message::Transfer(event) => Envelope::push(Message::Transfer(TransferEvent::error(
            &event.session,
            format!("chunk could not be sent: {cause}"),
        ))),
        _ => Envelope::new(
            envelope.sequence,
            Message::Error(ErrorMessage {
                code: ErrorCode::InternalError,
                message: format!("reply could not be sent: {cause}"),
                context: None,
                recoverable: true,
            }),
        ),
    }
}
