//! Frame codec for length-prefixed framing with optional LZ4 compression.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 4 bytes: magic bytes "SFND"
//! - 4 bytes: content length (big-endian, includes flags byte)
//! - 1 byte: flags (bit 0 = compressed)
//! - N bytes: payload (possibly LZ4 compressed)
//!
//! Transfer `data` events carry whole chunks, so [`MAX_FRAME_SIZE`] is the
//! ceiling for the agent's streaming watermark.

use crate::error::{ProtocolError, Result};

/// Magic bytes identifying a Sandfinder frame.
pub const FRAME_MAGIC: [u8; 4] = *b"SFND";

/// Compression threshold in bytes. Payloads larger than this are compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Maximum frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header size: 4 (magic) + 4 (length) + 1 (flags) = 9 bytes.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Magic + length prefix, without the flags byte.
const PREFIX_SIZE: usize = 8;

/// Flags indicating frame properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Flag indicating the payload is LZ4 compressed.
    pub const COMPRESSED: u8 = 0b0000_0001;

    /// Create a new empty flags set.
    #[inline]
    pub fn new() -> Self {
        Self(0)
    }

    /// Create flags from a raw byte value.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value of the flags.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if the compressed flag is set.
    #[inline]
    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    /// Return a new flags value with the compressed bit set or cleared.
    #[inline]
    pub fn with_compressed(self, compressed: bool) -> Self {
        if compressed {
            Self(self.0 | Self::COMPRESSED)
        } else {
            Self(self.0 & !Self::COMPRESSED)
        }
    }
}

/// A frame containing flags and an uncompressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame flags.
    pub flags: FrameFlags,
    /// The payload data (uncompressed form).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given payload.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            flags: FrameFlags::new(),
            payload,
        }
    }
}

/// Encoder and decoder for frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Whether to enable compression for large payloads.
    compression_enabled: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with compression enabled.
    pub fn new() -> Self {
        Self {
            compression_enabled: true,
        }
    }

    /// Create a new frame codec with compression disabled.
    pub fn without_compression() -> Self {
        Self {
            compression_enabled: false,
        }
    }

    /// Whether outbound payloads above the threshold are compressed.
    pub fn compression_enabled(&self) -> bool {
        self.compression_enabled
    }

    /// Encode a frame into bytes.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let payload = &frame.payload;

        if payload.len() > MAX_FRAME_SIZE - FRAME_HEADER_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len() + FRAME_HEADER_SIZE,
                max: MAX_FRAME_SIZE,
            });
        }

        let compressed = if self.compression_enabled && payload.len() > COMPRESSION_THRESHOLD {
            let candidate = lz4_flex::compress_prepend_size(payload);
            // Incompressible chunks (already-compressed files) go out raw
            (candidate.len() < payload.len()).then_some(candidate)
        } else {
            None
        };

        let (body, flags) = match compressed {
            Some(body) => (body, frame.flags.with_compressed(true)),
            None => (payload.clone(), frame.flags.with_compressed(false)),
        };

        let content_len = 1 + body.len();
        let mut output = Vec::with_capacity(PREFIX_SIZE + content_len);
        output.extend_from_slice(&FRAME_MAGIC);
        output.extend_from_slice(&(content_len as u32).to_be_bytes());
        output.push(flags.as_byte());
        output.extend_from_slice(&body);

        Ok(output)
    }

    /// Decode a frame from bytes.
    ///
    /// Returns the decoded frame and the number of bytes consumed.
    pub fn decode(&self, data: &[u8]) -> Result<(Frame, usize)> {
        match self.try_decode(data)? {
            Some(decoded) => Ok(decoded),
            None => Err(ProtocolError::Deserialization(format!(
                "insufficient data for frame: have {} bytes",
                data.len()
            ))),
        }
    }

    /// Try to decode a frame from bytes, returning `None` if the buffer does
    /// not yet hold a complete frame.
    pub fn try_decode(&self, data: &[u8]) -> Result<Option<(Frame, usize)>> {
        let Some(content_len) = read_prefix(data)? else {
            return Ok(None);
        };

        if content_len < 1 {
            return Err(ProtocolError::Deserialization(
                "invalid frame: content length must be at least 1 for flags byte".to_string(),
            ));
        }

        let frame_len = PREFIX_SIZE + content_len;
        if data.len() < frame_len {
            return Ok(None);
        }

        let flags = FrameFlags::from_byte(data[PREFIX_SIZE]);
        let body = &data[FRAME_HEADER_SIZE..frame_len];

        let payload = if flags.is_compressed() {
            lz4_flex::decompress_size_prepended(body).map_err(|e| {
                ProtocolError::Deserialization(format!("failed to decompress payload: {}", e))
            })?
        } else {
            body.to_vec()
        };

        let frame = Frame {
            flags: flags.with_compressed(false),
            payload,
        };

        Ok(Some((frame, frame_len)))
    }
}

/// Validate the magic and return the content length, or `None` if the
/// prefix is incomplete.
fn read_prefix(data: &[u8]) -> Result<Option<usize>> {
    if data.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let magic = [data[0], data[1], data[2], data[3]];
    if magic != FRAME_MAGIC {
        return Err(ProtocolError::InvalidFrameMagic {
            expected: u32::from_be_bytes(FRAME_MAGIC),
            got: u32::from_be_bytes(magic),
        });
    }

    let content_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
    if PREFIX_SIZE + content_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: PREFIX_SIZE + content_len,
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(Some(content_len))
}

/// Accumulates bytes read from a stream and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    codec: FrameCodec,
    pending: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer decoding with the given codec.
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            pending: Vec::new(),
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.codec.try_decode(&self.pending)? {
            Some((frame, consumed)) => {
                self.pending.drain(..consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Number of bytes held that do not yet form a frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
