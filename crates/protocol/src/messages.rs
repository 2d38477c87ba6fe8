//! Protocol message definitions for Sandfinder.
//!
//! This module defines the request, reply and push messages exchanged between
//! the controller and the agent. All envelopes are serialized using MessagePack.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Sequence number used for unsolicited push messages.
pub const PUSH_SEQUENCE: u64 = 0;

/// Subject shared by every transfer event.
pub const DOWNLOAD_SUBJECT: &str = "download";

/// Envelope wrapper for all protocol messages.
///
/// A reply echoes the `sequence` of the request it answers. Push messages
/// (transfer events) use [`PUSH_SEQUENCE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Correlation number.
    pub sequence: u64,
    /// The structured message.
    pub payload: Message,
    /// Binary data carried alongside the structured fields.
    #[serde(default, with = "serde_bytes")]
    pub attachment: Option<Vec<u8>>,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
            attachment: None,
        }
    }

    /// Create an unsolicited push envelope.
    pub fn push(payload: Message) -> Self {
        Self::new(PUSH_SEQUENCE, payload)
    }

    /// Attach an out-of-band binary payload.
    pub fn with_attachment(mut self, attachment: Vec<u8>) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Serialize the envelope to MessagePack bytes.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(ProtocolError::from)
    }

    /// Deserialize an envelope from MessagePack bytes, rejecting other
    /// protocol versions.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        let envelope: Self = rmp_serde::from_slice(bytes)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: envelope.version,
            });
        }
        Ok(envelope)
    }
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // Requests
    /// List the immediate children of a directory.
    ListRequest(ListRequest),
    /// Parse a property-list file.
    PlistRequest(PlistRequest),
    /// Read the head of a file.
    TextRequest(TextRequest),
    /// Start a streaming export.
    DownloadRequest(DownloadRequest),
    /// Keepalive probe.
    Ping(Ping),

    // Replies
    /// Directory listing.
    ListResponse(ListResponse),
    /// Parsed property list.
    PlistResponse(PlistResponse),
    /// Head of a file; the bytes travel in the envelope attachment.
    TextResponse(TextResponse),
    /// Export accepted; events follow under the returned session.
    DownloadStarted(DownloadStarted),
    /// Keepalive answer.
    Pong(Pong),
    /// Request failed.
    Error(ErrorMessage),

    // Push
    /// Event belonging to a streaming export.
    Transfer(TransferEvent),
}

impl Message {
    /// Whether this message is something the agent accepts as a request.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::ListRequest(_)
                | Message::PlistRequest(_)
                | Message::TextRequest(_)
                | Message::DownloadRequest(_)
                | Message::Ping(_)
        )
    }
}

// ============================================================================
// Roots and entries
// ============================================================================

/// Symbolic filesystem prefix a relative path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RootAlias {
    /// The application's installation root.
    Bundle,
    /// The process home directory.
    #[default]
    Default,
}

impl RootAlias {
    /// Parse an alias; anything other than `bundle` means the home root.
    pub fn parse(alias: &str) -> Self {
        if alias == "bundle" {
            RootAlias::Bundle
        } else {
            RootAlias::Default
        }
    }

    /// Wire name of the alias.
    pub fn as_str(self) -> &'static str {
        match self {
            RootAlias::Bundle => "bundle",
            RootAlias::Default => "default",
        }
    }
}

impl<'de> Deserialize<'de> for RootAlias {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let alias = String::deserialize(deserializer)?;
        Ok(RootAlias::parse(&alias))
    }
}

impl std::fmt::Display for RootAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute name to value mapping for a filesystem entry.
pub type AttributeMap = BTreeMap<String, serde_json::Value>;

/// Classification of a directory child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Anything that is not a directory.
    File,
    /// Directory.
    Directory,
}

/// A single child of a listed directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// File or directory.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Entry name (not full path).
    pub name: String,
    /// Absolute path.
    pub path: String,
    /// Attributes; empty when lookup failed.
    pub attribute: AttributeMap,
}

// ============================================================================
// Requests and replies
// ============================================================================

/// Request to list a directory relative to a root alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    /// Path relative to the root.
    pub path: String,
    /// Root the path is resolved against.
    #[serde(default)]
    pub root: RootAlias,
}

/// Directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Children in provider order.
    pub entries: Vec<DirectoryEntry>,
}

/// Request to parse a property list at an absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlistRequest {
    /// Absolute path.
    pub path: String,
}

/// Parsed property list as a generic tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlistResponse {
    /// Root value.
    pub value: serde_json::Value,
}

/// Request for the first bytes of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRequest {
    /// Absolute path.
    pub path: String,
}

/// Head of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextResponse {
    /// Number of bytes in the attachment.
    pub length: u64,
}

/// Request to stream a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Absolute path.
    pub path: String,
}

/// Export accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStarted {
    /// File size reported by the attribute lookup; informational only.
    pub size: u64,
    /// Session id carried by every event of this export.
    pub session: String,
}

// ============================================================================
// Transfer events
// ============================================================================

/// Kind of transfer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferEventKind {
    /// Export opened; precedes all data.
    Start,
    /// One chunk; bytes in the envelope attachment.
    Data,
    /// File exhausted. Terminal.
    End,
    /// Read failed. Terminal.
    Error,
}

impl TransferEventKind {
    /// Whether no further events follow for the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferEventKind::End | TransferEventKind::Error)
    }
}

/// Event belonging to one streaming export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Always [`DOWNLOAD_SUBJECT`].
    pub subject: String,
    /// Event kind.
    pub event: TransferEventKind,
    /// Session id.
    pub session: String,
    /// Failure message, present only on `error` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferEvent {
    fn new(event: TransferEventKind, session: &str) -> Self {
        Self {
            subject: DOWNLOAD_SUBJECT.to_string(),
            event,
            session: session.to_string(),
            error: None,
        }
    }

    /// `start` event.
    pub fn start(session: &str) -> Self {
        Self::new(TransferEventKind::Start, session)
    }

    /// `data` event; the chunk travels alongside.
    pub fn data(session: &str) -> Self {
        Self::new(TransferEventKind::Data, session)
    }

    /// `end` event.
    pub fn end(session: &str) -> Self {
        Self::new(TransferEventKind::End, session)
    }

    /// `error` event carrying a human-readable message.
    pub fn error(session: &str, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(TransferEventKind::Error, session)
        }
    }
}

// ============================================================================
// Control messages
// ============================================================================

/// Ping for keepalive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Timestamp when ping was sent.
    pub timestamp: u64,
}

/// Pong response to ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Original timestamp from ping.
    pub timestamp: u64,
}

/// Error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code for programmatic handling.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Optional context (usually the path).
    pub context: Option<String>,
    /// Whether retrying the same request may succeed.
    pub recoverable: bool,
}

/// Error codes for failed requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or unsupported request.
    InvalidRequest,
    /// Target does not exist.
    NotFound,
    /// Target exists but cannot be opened.
    PermissionDenied,
    /// Structured file could not be parsed.
    ParseFailed,
    /// Agent environment lacks a required value.
    Configuration,
    /// Any other failure.
    InternalError,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(envelope: Envelope) {
        let bytes = envelope.to_msgpack().expect("serialization failed");
        let decoded = Envelope::from_msgpack(&bytes).expect("deserialization failed");
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn test_envelope_defaults() {
        let envelope = Envelope::new(7, Message::Ping(Ping { timestamp: 1 }));
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert_eq!(envelope.sequence, 7);
        assert!(envelope.attachment.is_none());

        let push = Envelope::push(Message::Transfer(TransferEvent::end("s")));
        assert_eq!(push.sequence, PUSH_SEQUENCE);
    }

    #[test]
    fn test_data_event_attachment_roundtrip() {
        roundtrip(
            Envelope::push(Message::Transfer(TransferEvent::data("abc")))
                .with_attachment(vec![0, 1, 2, 255]),
        );
    }

    #[test]
    fn test_list_response_roundtrip() {
        let mut attribute = AttributeMap::new();
        attribute.insert("size".to_string(), serde_json::json!(12));
        attribute.insert("type".to_string(), serde_json::json!("file"));

        roundtrip(Envelope::new(
            3,
            Message::ListResponse(ListResponse {
                entries: vec![DirectoryEntry {
                    entry_type: EntryType::File,
                    name: "Info.plist".to_string(),
                    path: "/app/Info.plist".to_string(),
                    attribute,
                }],
            }),
        ));
    }

    #[test]
    fn test_transfer_event_json_shape() {
        let start = serde_json::to_value(TransferEvent::start("s-1")).unwrap();
        assert_eq!(
            start,
            serde_json::json!({"subject": "download", "event": "start", "session": "s-1"})
        );

        let error = serde_json::to_value(TransferEvent::error("s-1", "boom")).unwrap();
        assert_eq!(error["event"], "error");
        assert_eq!(error["error"], "boom");
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(!TransferEventKind::Start.is_terminal());
        assert!(!TransferEventKind::Data.is_terminal());
        assert!(TransferEventKind::End.is_terminal());
        assert!(TransferEventKind::Error.is_terminal());
    }

    #[test]
    fn test_root_alias_lenient_parse() {
        assert_eq!(RootAlias::parse("bundle"), RootAlias::Bundle);
        assert_eq!(RootAlias::parse("default"), RootAlias::Default);
        assert_eq!(RootAlias::parse("anything"), RootAlias::Default);

        let request: ListRequest =
            serde_json::from_value(serde_json::json!({"path": "Documents", "root": "sandbox"}))
                .unwrap();
        assert_eq!(request.root, RootAlias::Default);

        let request: ListRequest =
            serde_json::from_value(serde_json::json!({"path": "Documents"})).unwrap();
        assert_eq!(request.root, RootAlias::Default);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut envelope = Envelope::new(1, Message::Ping(Ping { timestamp: 0 }));
        envelope.version = PROTOCOL_VERSION + 1;
        let bytes = envelope.to_msgpack().unwrap();

        assert!(matches!(
            Envelope::from_msgpack(&bytes),
            Err(ProtocolError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_is_request() {
        assert!(Message::DownloadRequest(DownloadRequest {
            path: "/x".to_string()
        })
        .is_request());
        assert!(!Message::Transfer(TransferEvent::end("s")).is_request());
        assert!(!Message::Pong(Pong { timestamp: 0 }).is_request());
    }
}
