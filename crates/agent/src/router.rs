//! Request router.
//!
//! [`Router`] receives request envelopes from the controller and dispatches
//! them to the file components. Replies echo the request's sequence number;
//! every failure is turned into a [`Message::Error`] so the controller always
//! gets exactly one reply per request.

use std::path::PathBuf;
use std::sync::Arc;

use protocol::messages::{
    DownloadRequest, DownloadStarted, ErrorCode, ErrorMessage, ListRequest, ListResponse, Ping,
    PlistRequest, PlistResponse, Pong, TextRequest, TextResponse,
};
use protocol::{Envelope, Message};
use tracing::{debug, warn};

use crate::channel::MessageChannel;
use crate::config::TransferConfig;
use crate::files::{
    BoundedReader, DirectoryBrowser, ExportError, FilesystemProvider, ParseError, PathResolver,
    ReadError, ResolveError, StreamingExporter,
};

/// Result type for handlers.
pub type RouterResult = Result<Option<Reply>, RouterError>;

/// Reply payload plus optional out-of-band bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Structured reply.
    pub message: Message,
    /// Binary payload carried alongside.
    pub attachment: Option<Vec<u8>>,
}

impl From<Message> for Reply {
    fn from(message: Message) -> Self {
        Self {
            message,
            attachment: None,
        }
    }
}

/// Errors that can occur while handling a request.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Root alias could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Structured file could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Bounded read failed.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// Export could not start.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Worker task failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Convert the error to a protocol ErrorMessage.
    pub fn to_error_message(&self, context: Option<String>) -> ErrorMessage {
        let (code, recoverable) = match self {
            RouterError::Resolve(_) => (ErrorCode::Configuration, false),
            RouterError::Parse(_) => (ErrorCode::ParseFailed, false),
            RouterError::Read(e) => classify_io(e.kind()),
            RouterError::Export(e) => match e.io_kind() {
                Some(kind) => classify_io(kind),
                None => (ErrorCode::InternalError, true),
            },
            RouterError::Internal(_) => (ErrorCode::InternalError, true),
        };

        ErrorMessage {
            code,
            message: self.to_string(),
            context,
            recoverable,
        }
    }
}

fn classify_io(kind: std::io::ErrorKind) -> (ErrorCode, bool) {
    match kind {
        std::io::ErrorKind::NotFound => (ErrorCode::NotFound, false),
        std::io::ErrorKind::PermissionDenied => (ErrorCode::PermissionDenied, false),
        _ => (ErrorCode::InternalError, true),
    }
}

/// Dispatches controller requests to the file components.
pub struct Router<P: FilesystemProvider, C: MessageChannel> {
    browser: Arc<DirectoryBrowser<P>>,
    reader: BoundedReader<P>,
    exporter: StreamingExporter<P, C>,
}

impl<P: FilesystemProvider, C: MessageChannel> Router<P, C> {
    /// Create a router. Export events are pushed on `channel`.
    pub fn new(
        provider: Arc<P>,
        resolver: PathResolver,
        channel: C,
        transfer: &TransferConfig,
    ) -> Self {
        Self {
            browser: Arc::new(DirectoryBrowser::new(Arc::clone(&provider), resolver)),
            reader: BoundedReader::new(Arc::clone(&provider), transfer.read_cap),
            exporter: StreamingExporter::new(provider, channel, transfer.watermark),
        }
    }

    /// The exporter driving download sessions.
    pub fn exporter(&self) -> &StreamingExporter<P, C> {
        &self.exporter
    }

    /// Handle one incoming envelope.
    ///
    /// Returns the reply envelope, or `None` when the message is not a
    /// request.
    pub async fn route(&self, envelope: Envelope) -> Option<Envelope> {
        let sequence = envelope.sequence;
        let context = request_path(&envelope.payload);

        match self.handle(envelope.payload).await {
            Ok(Some(reply)) => {
                let mut out = Envelope::new(sequence, reply.message);
                out.attachment = reply.attachment;
                Some(out)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(sequence, error = %e, "Request failed");
                Some(Envelope::new(
                    sequence,
                    Message::Error(e.to_error_message(context)),
                ))
            }
        }
    }

    /// Dispatch a message to its handler.
    pub async fn handle(&self, message: Message) -> RouterResult {
        if !message.is_request() {
            if let Message::Error(err) = &message {
                warn!(?err, "Received error from controller");
            } else {
                // Replies and push events only flow outward
                debug!(?message, "Ignoring non-request message");
            }
            return Ok(None);
        }

        match message {
            Message::ListRequest(req) => self.handle_list(req).await,
            Message::PlistRequest(req) => self.handle_plist(req).await,
            Message::TextRequest(req) => self.handle_text(req).await,
            Message::DownloadRequest(req) => self.handle_download(req).await,
            Message::Ping(ping) => self.handle_ping(ping),
            other => Err(RouterError::Internal(format!("no handler for request {other:?}"))),
        }
    }

    async fn handle_list(&self, req: ListRequest) -> RouterResult {
        debug!(path = %req.path, root = %req.root, "Listing directory");

        let browser = Arc::clone(&self.browser);
        let entries = tokio::task::spawn_blocking(move || browser.list(&req.path, req.root))
            .await
            .map_err(|e| RouterError::Internal(e.to_string()))??;

        Ok(Some(Message::ListResponse(ListResponse { entries }).into()))
    }

    async fn handle_plist(&self, req: PlistRequest) -> RouterResult {
        debug!(path = %req.path, "Reading plist");

        let path = PathBuf::from(req.path);
        let value = tokio::task::spawn_blocking(move || crate::files::read_plist(&path))
            .await
            .map_err(|e| RouterError::Internal(e.to_string()))??;

        Ok(Some(Message::PlistResponse(PlistResponse { value }).into()))
    }

    async fn handle_text(&self, req: TextRequest) -> RouterResult {
        debug!(path = %req.path, cap = self.reader.cap(), "Reading file head");

        let bytes = self.reader.read(PathBuf::from(&req.path).as_path()).await?;

        Ok(Some(Reply {
            message: Message::TextResponse(TextResponse {
                length: bytes.len() as u64,
            }),
            attachment: Some(bytes),
        }))
    }

    async fn handle_download(&self, req: DownloadRequest) -> RouterResult {
        debug!(path = %req.path, "Starting export");

        let started = self.exporter.start(PathBuf::from(&req.path).as_path()).await?;

        Ok(Some(
            Message::DownloadStarted(DownloadStarted {
                size: started.size,
                session: started.session,
            })
            .into(),
        ))
    }

    fn handle_ping(&self, ping: Ping) -> RouterResult {
        debug!(timestamp = ping.timestamp, "Received ping");
        Ok(Some(
            Message::Pong(Pong {
                timestamp: ping.timestamp,
            })
            .into(),
        ))
    }
}

/// Path named by a request, used as error context.
fn request_path(message: &Message) -> Option<String> {
    match message {
        Message::ListRequest(req) => Some(req.path.clone()),
        Message::PlistRequest(req) => Some(req.path.clone()),
        Message::TextRequest(req) => Some(req.path.clone()),
        Message::DownloadRequest(req) => Some(req.path.clone()),
        _ => None,
    }
}
