//! # Relay Format - Scene Streams & Runtime Messages
//!
//! Everything the exporter and the runtime must agree on byte for byte.
//!
//! ## Architecture
//!
//! ```text
//! SceneEntity[] ──► encoder ──► stream bytes ──► frame (Load) ──► runtime
//!                                                                    │
//!                                        SceneReplica ◄── decoder ◄──┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Manifest**: complete scene state; replaces whatever the runtime holds
//! - **Update**: upserts and tombstones relative to the last manifest
//! - **Record**: self-describing (tag, id, revision, length) so framing can be
//!   checked without parsing payloads
//! - **Frame**: versioned, length-prefixed message on the runtime's pipes

pub mod entity;
pub mod settings;
pub mod error;
pub mod encoder;
pub mod decoder;
pub mod frame;
pub mod replica;
pub mod layout;

pub use entity::{
    EntityId, Revision, EntityKind, EntityData, SceneEntity,
    MeshData, MaterialData, LightData, LightType, CameraData, ObjectData,
    ActionData, CurveData, Keyframe, Interpolation, ImageData, IDENTITY,
};
pub use settings::{SceneSettings, EnvironmentSettings, BloomSettings, PostProcessSettings};
pub use error::{EncodeError, DecodeError, ReplicaError};
pub use encoder::{
    encode, encode_header, encode_records, encode_manifest, encode_update,
    EncodedStream, FormatVersion, Record, StreamHeader, StreamKind,
    HEADER_SIZE, MAGIC, RECORD_HEADER_SIZE, TOMBSTONE_TAG,
};
pub use decoder::{decode, read_header, validate_framing, DecodedStream};
pub use frame::{
    read_message, write_message, ExporterMessage, FrameError, MessageHeader, MessageId,
    RunnerMessage, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use replica::SceneReplica;
pub use layout::{
    list_updates, update_file_name, update_sequence, SyncMode, DEFAULT_ARTIFACT, SYNC_ENV_VAR,
};
