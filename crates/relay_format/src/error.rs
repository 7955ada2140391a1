//! Error types for stream encoding and decoding

use thiserror::Error;

use crate::entity::EntityId;

/// Errors raised while encoding a stream. Any of them aborts the whole stream.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Unsupported entity kind '{kind}' for entity {id}")]
    UnsupportedEntityKind { id: EntityId, kind: String },

    #[error("Invariant violated by entity {id}: {reason}")]
    InvariantViolation { id: EntityId, reason: String },

    #[error("Failed to serialize {what}: {reason}")]
    Serialization { what: String, reason: String },

    #[error("Stream too large: {0}")]
    TooLarge(String),
}

/// Errors raised while reading a stream
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Bad magic bytes")]
    BadMagic,

    #[error("Unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Unknown stream kind {0}")]
    UnknownStreamKind(u8),

    #[error("Stream truncated at offset {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("Unknown record tag {tag} at offset {offset}")]
    UnknownRecordTag { offset: usize, tag: u8 },

    #[error("Tombstone in a full manifest at offset {0}")]
    UnexpectedTombstone(usize),

    #[error("Corrupt payload for {what}: {reason}")]
    Payload { what: String, reason: String },

    #[error("Header declares {declared} records but stream holds {found}")]
    CountMismatch { declared: u32, found: u32 },

    #[error("{0} trailing bytes after last record")]
    TrailingBytes(usize),
}

/// Errors raised while applying a stream to a [`SceneReplica`](crate::replica::SceneReplica)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplicaError {
    #[error("Update received before any manifest")]
    NoManifest,

    #[error("Removal of unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
