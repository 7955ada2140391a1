//! Framed messages between the exporter and a runtime process
//!
//! # Protocol Design
//!
//! - Every message is a fixed 16-byte header followed by a bincode body
//! - The header carries protocol version, message id and body length
//! - Replies echo the id of the message they answer
//! - The exporter never sends the next message before the reply arrives

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Protocol version for compatibility checks
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum message body size (64 MB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Identifier used to correlate a reply with its request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    /// Create a new unique message ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Message header for framing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u32,
    pub id: MessageId,
    /// Body length in bytes (excluding header)
    pub length: u32,
}

impl MessageHeader {
    /// Header size in bytes
    pub const SIZE: usize = 16;

    /// Create a header for the current protocol version
    pub fn new(id: MessageId, length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id,
            length,
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..12].copy_from_slice(&self.id.0.to_le_bytes());
        out[12..16].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut version = [0u8; 4];
        let mut id = [0u8; 8];
        let mut length = [0u8; 4];
        version.copy_from_slice(&bytes[0..4]);
        id.copy_from_slice(&bytes[4..12]);
        length.copy_from_slice(&bytes[12..16]);

        Self {
            version: u32::from_le_bytes(version),
            id: MessageId(u64::from_le_bytes(id)),
            length: u32::from_le_bytes(length),
        }
    }
}

/// Messages the exporter sends to a runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExporterMessage {
    /// Apply an encoded manifest or update batch
    Load {
        /// Encoded stream bytes
        stream: Vec<u8>,
    },
    /// Exit after replying
    Shutdown,
}

/// Messages a runtime sends back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerMessage {
    /// The message was applied
    Ack {
        /// Number of records applied
        records: u32,
    },
    /// The message could not be applied; remote state is unchanged
    Rejected {
        /// Why the runtime refused it
        reason: String,
    },
}

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io(e.to_string()),
        }
    }
}

/// Write one framed message and flush
pub fn write_message<W: Write, M: Serialize>(
    writer: &mut W,
    id: MessageId,
    msg: &M,
) -> Result<(), FrameError> {
    let body = bincode::serialize(msg).map_err(|e| FrameError::Serialization(e.to_string()))?;

    if body.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::MessageTooLarge {
            size: body.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let header = MessageHeader::new(id, body.len() as u32);
    writer.write_all(&header.to_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;

    Ok(())
}

/// Read one framed message
pub fn read_message<R: Read, M: DeserializeOwned>(
    reader: &mut R,
) -> Result<(MessageId, M), FrameError> {
    let mut header_buf = [0u8; MessageHeader::SIZE];
    reader.read_exact(&mut header_buf)?;
    let header = MessageHeader::from_bytes(&header_buf);

    if header.version != PROTOCOL_VERSION {
        return Err(FrameError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got: header.version,
        });
    }

    if header.length as usize > MAX_MESSAGE_SIZE {
        return Err(FrameError::MessageTooLarge {
            size: header.length as usize,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body)?;

    let msg = bincode::deserialize(&body).map_err(|e| FrameError::Deserialization(e.to_string()))?;

    Ok((header.id, msg))
}
