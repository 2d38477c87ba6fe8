//! # Sandfinder Protocol Library
//!
//! Wire definitions shared by the Sandfinder agent and its controller.
//!
//! ## Overview
//!
//! - **Message Definitions**: requests (list, plist, text, download), their
//!   replies, and the `download` transfer events pushed during an export
//! - **Envelope**: versioned MessagePack wrapper with a correlation sequence and
//!   an out-of-band binary attachment
//! - **Frame Codec**: length-prefixed framing with optional LZ4 compression
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     Envelope (fields + attachment)      │  MessagePack-encoded
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  Length-prefixed, LZ4
//! ├─────────────────────────────────────────┤
//! │      Transport (stdio / Unix socket)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, Frame, FrameCodec, Message};
//! use protocol::messages::{ListRequest, RootAlias};
//!
//! let request = Message::ListRequest(ListRequest {
//!     path: "Documents".to_string(),
//!     root: RootAlias::Default,
//! });
//! let bytes = Envelope::new(1, request).to_msgpack().unwrap();
//!
//! let codec = FrameCodec::new();
//! let frame_bytes = codec.encode(&Frame::new(bytes)).unwrap();
//! let (frame, _) = codec.decode(&frame_bytes).unwrap();
//! let envelope = Envelope::from_msgpack(&frame.payload).unwrap();
//! assert_eq!(envelope.sequence, 1);
//! ```

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{
    Frame, FrameBuffer, FrameCodec, FrameFlags, COMPRESSION_THRESHOLD, FRAME_HEADER_SIZE,
    FRAME_MAGIC, MAX_FRAME_SIZE,
};
pub use messages::{
    AttributeMap, DirectoryEntry, EntryType, Envelope, Message, RootAlias, TransferEvent,
    TransferEventKind, DOWNLOAD_SUBJECT, PROTOCOL_VERSION, PUSH_SEQUENCE,
};
