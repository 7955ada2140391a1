//! Binary stream encoder
//!
//! A stream is either a full manifest or an update batch. Both share one
//! layout so a reader only needs one parser:
//!
//! ```text
//! ┌──────────────────────── header (20 bytes) ────────────────────────┐
//! │ magic "RLY\0" │ major u16 │ minor u16 │ kind u8 │ 0 0 0 │ count u32 │ settings_len u32 │
//! └───────────────────────────────────────────────────────────────────┘
//! settings block (bincode, settings_len bytes)
//! record × count:
//!   tag u8 │ 0 0 0 │ id u64 │ revision u64 │ payload_len u32 │ payload
//! ```
//!
//! All integers are little-endian and fixed width. Payloads are bincode with
//! its fixed-int encoding, so the same logical input always yields the same
//! bytes. Record tag 0 marks a removal tombstone with an empty payload.

use serde::Serialize;
use std::fmt;

use crate::entity::{
    ActionData, EntityData, EntityId, ImageData, MeshData, Revision, SceneEntity,
};
use crate::error::EncodeError;
use crate::settings::SceneSettings;

/// Stream magic bytes
pub const MAGIC: &[u8; 4] = b"RLY\0";

/// Fixed stream header size in bytes
pub const HEADER_SIZE: usize = 20;

/// Fixed record header size in bytes
pub const RECORD_HEADER_SIZE: usize = 24;

/// Record tag reserved for removal tombstones
pub const TOMBSTONE_TAG: u8 = 0;

/// Stream format version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatVersion {
    pub major: u16,
    pub minor: u16,
}

impl FormatVersion {
    /// Version written by this encoder
    pub const CURRENT: FormatVersion = FormatVersion { major: 1, minor: 0 };

    /// Whether a reader of the current version can parse this version
    pub fn is_readable(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// What a stream represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamKind {
    /// Complete scene state, supersedes everything on the remote
    Manifest = 0,
    /// Changes relative to the last synchronized state
    Update = 1,
}

impl StreamKind {
    /// Parse the wire discriminant
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Manifest),
            1 => Some(Self::Update),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manifest => write!(f, "manifest"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// One record of a stream
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Full state of an entity
    Entity(SceneEntity),
    /// The entity no longer exists
    Removed { id: EntityId, revision: Revision },
}

impl Record {
    /// The entity this record is about
    pub fn id(&self) -> EntityId {
        match self {
            Self::Entity(entity) => entity.id,
            Self::Removed { id, .. } => *id,
        }
    }

    /// Revision carried by the record
    pub fn revision(&self) -> Revision {
        match self {
            Self::Entity(entity) => entity.revision,
            Self::Removed { revision, .. } => *revision,
        }
    }
}

/// Fixed-size stream header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: FormatVersion,
    pub kind: StreamKind,
    pub record_count: u32,
    pub settings_len: u32,
}

impl StreamHeader {
    /// Serialize to the fixed wire layout
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(MAGIC);
        out[4..6].copy_from_slice(&self.version.major.to_le_bytes());
        out[6..8].copy_from_slice(&self.version.minor.to_le_bytes());
        out[8] = self.kind as u8;
        // 9..12 reserved
        out[12..16].copy_from_slice(&self.record_count.to_le_bytes());
        out[16..20].copy_from_slice(&self.settings_len.to_le_bytes());
        out
    }
}

/// An encoded stream ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStream {
    pub kind: StreamKind,
    pub record_count: u32,
    pub bytes: Vec<u8>,
}

impl EncodedStream {
    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the stream holds no bytes at all
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encode the stream header followed by the settings block
pub fn encode_header(
    version: FormatVersion,
    kind: StreamKind,
    record_count: u32,
    settings: &SceneSettings,
) -> Result<Vec<u8>, EncodeError> {
    let settings_bytes = serialize("scene settings", settings)?;
    let header = StreamHeader {
        version,
        kind,
        record_count,
        settings_len: length_u32("settings block", settings_bytes.len())?,
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + settings_bytes.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&settings_bytes);
    Ok(out)
}

/// Encode entity records, in the given order
pub fn encode(entities: &[SceneEntity]) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    for entity in entities {
        write_entity(&mut out, entity)?;
    }
    Ok(out)
}

/// Encode a mix of entity records and tombstones, in the given order
pub fn encode_records(records: &[Record]) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    for record in records {
        match record {
            Record::Entity(entity) => write_entity(&mut out, entity)?,
            Record::Removed { id, revision } => {
                write_record(&mut out, TOMBSTONE_TAG, *id, *revision, &[])?
            }
        }
    }
    Ok(out)
}

/// Encode a complete manifest of the given entities
pub fn encode_manifest(
    settings: &SceneSettings,
    entities: &[SceneEntity],
) -> Result<EncodedStream, EncodeError> {
    let record_count = length_u32("manifest", entities.len())?;
    let mut bytes = encode_header(FormatVersion::CURRENT, StreamKind::Manifest, record_count, settings)?;
    bytes.extend_from_slice(&encode(entities)?);

    Ok(EncodedStream {
        kind: StreamKind::Manifest,
        record_count,
        bytes,
    })
}

/// Encode an update batch
pub fn encode_update(
    settings: &SceneSettings,
    records: &[Record],
) -> Result<EncodedStream, EncodeError> {
    let record_count = length_u32("update batch", records.len())?;
    let mut bytes = encode_header(FormatVersion::CURRENT, StreamKind::Update, record_count, settings)?;
    bytes.extend_from_slice(&encode_records(records)?);

    Ok(EncodedStream {
        kind: StreamKind::Update,
        record_count,
        bytes,
    })
}

fn write_entity(out: &mut Vec<u8>, entity: &SceneEntity) -> Result<(), EncodeError> {
    validate_entity(entity)?;

    let what = format!("entity {}", entity.id);
    let name = &entity.name;
    let payload = match &entity.data {
        EntityData::Mesh(data) => serialize(&what, &(name, data))?,
        EntityData::Material(data) => serialize(&what, &(name, data))?,
        EntityData::Light(data) => serialize(&what, &(name, data))?,
        EntityData::Camera(data) => serialize(&what, &(name, data))?,
        EntityData::Object(data) => serialize(&what, &(name, data))?,
        EntityData::Action(data) => serialize(&what, &(name, data))?,
        EntityData::Image(data) => serialize(&what, &(name, data))?,
        EntityData::Foreign { kind } => {
            return Err(EncodeError::UnsupportedEntityKind {
                id: entity.id,
                kind: kind.clone(),
            })
        }
    };

    let tag = entity.kind().tag().ok_or_else(|| EncodeError::UnsupportedEntityKind {
        id: entity.id,
        kind: entity.kind().to_string(),
    })?;

    write_record(out, tag, entity.id, entity.revision, &payload)
}

fn write_record(
    out: &mut Vec<u8>,
    tag: u8,
    id: EntityId,
    revision: Revision,
    payload: &[u8],
) -> Result<(), EncodeError> {
    let payload_len = length_u32("record payload", payload.len())?;

    out.push(tag);
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&id.raw().to_le_bytes());
    out.extend_from_slice(&revision.raw().to_le_bytes());
    out.extend_from_slice(&payload_len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Check the structural invariants the runtime relies on
fn validate_entity(entity: &SceneEntity) -> Result<(), EncodeError> {
    let violation = |reason: String| EncodeError::InvariantViolation {
        id: entity.id,
        reason,
    };

    match &entity.data {
        EntityData::Foreign { kind } => Err(EncodeError::UnsupportedEntityKind {
            id: entity.id,
            kind: kind.clone(),
        }),
        EntityData::Mesh(mesh) => validate_mesh(mesh).map_err(violation),
        EntityData::Image(image) => validate_image(image).map_err(violation),
        EntityData::Action(action) => validate_action(action).map_err(violation),
        _ => Ok(()),
    }
}

fn validate_mesh(mesh: &MeshData) -> Result<(), String> {
    let vertex_count = mesh.positions.len();

    if !mesh.normals.is_empty() && mesh.normals.len() != vertex_count {
        return Err(format!(
            "{} normals for {} positions",
            mesh.normals.len(),
            vertex_count
        ));
    }
    if !mesh.uvs.is_empty() && mesh.uvs.len() != vertex_count {
        return Err(format!("{} uvs for {} positions", mesh.uvs.len(), vertex_count));
    }
    if mesh.indices.len() % 3 != 0 {
        return Err(format!("index count {} is not a multiple of 3", mesh.indices.len()));
    }
    if let Some(index) = mesh.indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(format!("index {} out of range for {} vertices", index, vertex_count));
    }
    Ok(())
}

fn validate_image(image: &ImageData) -> Result<(), String> {
    let expected = u64::from(image.width) * u64::from(image.height) * 4;
    if image.pixels.len() as u64 != expected {
        return Err(format!(
            "{}x{} RGBA image needs {} bytes, has {}",
            image.width,
            image.height,
            expected,
            image.pixels.len()
        ));
    }
    Ok(())
}

fn validate_action(action: &ActionData) -> Result<(), String> {
    for curve in &action.curves {
        let sorted = curve
            .keyframes
            .windows(2)
            .all(|pair| pair[0].time <= pair[1].time);
        if !sorted {
            return Err(format!(
                "keyframes of curve {}[{}] are not sorted by time",
                curve.target, curve.index
            ));
        }
    }
    Ok(())
}

fn serialize<T: Serialize + ?Sized>(what: &str, value: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serialize(value).map_err(|e| EncodeError::Serialization {
        what: what.to_string(),
        reason: e.to_string(),
    })
}

fn length_u32(what: &str, len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::TooLarge(format!("{} has {} entries/bytes", what, len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CurveData, Interpolation, Keyframe, MaterialData};

    fn material(id: u64) -> SceneEntity {
        SceneEntity::new(
            EntityId::new(id),
            Revision::new(3),
            format!("material_{}", id),
            EntityData::Material(MaterialData::default()),
        )
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode_header(
            FormatVersion::CURRENT,
            StreamKind::Manifest,
            7,
            &SceneSettings::default(),
        )
        .unwrap();

        assert_eq!(&bytes[0..4], MAGIC);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 1);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 0);
        assert_eq!(bytes[8], StreamKind::Manifest as u8);
        assert_eq!(&bytes[9..12], &[0, 0, 0]);
        assert_eq!(u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]), 7);

        let settings_len = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        assert_eq!(bytes.len(), HEADER_SIZE + settings_len as usize);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let entities: Vec<_> = (1..=5).map(material).collect();
        let settings = SceneSettings::default();

        let a = encode_manifest(&settings, &entities).unwrap();
        let b = encode_manifest(&settings, &entities).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.record_count, 5);
    }

    #[test]
    fn test_record_is_self_describing() {
        let entity = material(42);
        let bytes = encode(std::slice::from_ref(&entity)).unwrap();

        assert_eq!(bytes[0], 2); // material tag
        let id = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
        let revision = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
        let payload_len = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        assert_eq!(id, 42);
        assert_eq!(revision, 3);
        assert_eq!(bytes.len(), RECORD_HEADER_SIZE + payload_len as usize);
    }

    #[test]
    fn test_tombstone_has_empty_payload() {
        let bytes = encode_records(&[Record::Removed {
            id: EntityId::new(9),
            revision: Revision::new(4),
        }])
        .unwrap();

        assert_eq!(bytes.len(), RECORD_HEADER_SIZE);
        assert_eq!(bytes[0], TOMBSTONE_TAG);
    }

    #[test]
    fn test_foreign_kind_aborts_export() {
        let entities = vec![
            material(1),
            SceneEntity::new(
                EntityId::new(2),
                Revision::new(1),
                "smoke",
                EntityData::Foreign { kind: "volume".into() },
            ),
            material(3),
        ];

        let err = encode_manifest(&SceneSettings::default(), &entities).unwrap_err();
        match err {
            EncodeError::UnsupportedEntityKind { id, kind } => {
                assert_eq!(id, EntityId::new(2));
                assert_eq!(kind, "volume");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_mesh_index_out_of_range() {
        let mesh = MeshData {
            positions: vec![[0.0; 3]; 3],
            indices: vec![0, 1, 3],
            ..Default::default()
        };
        let entity = SceneEntity::new(EntityId::new(1), Revision::new(1), "tri", EntityData::Mesh(mesh));

        let err = encode(&[entity]).unwrap_err();
        assert!(matches!(err, EncodeError::InvariantViolation { .. }));
    }

    #[test]
    fn test_image_size_mismatch() {
        let image = ImageData {
            width: 2,
            height: 2,
            pixels: vec![255; 12],
        };
        let entity = SceneEntity::new(EntityId::new(5), Revision::new(1), "tex", EntityData::Image(image));

        assert!(matches!(
            encode(&[entity]).unwrap_err(),
            EncodeError::InvariantViolation { .. }
        ));
    }

    #[test]
    fn test_unsorted_keyframes() {
        let key = |time| Keyframe {
            time,
            value: 0.0,
            interpolation: Interpolation::Linear,
        };
        let action = ActionData {
            curves: vec![CurveData {
                target: "location".into(),
                index: 0,
                keyframes: vec![key(2.0), key(1.0)],
            }],
        };
        let entity = SceneEntity::new(EntityId::new(6), Revision::new(1), "anim", EntityData::Action(action));

        assert!(matches!(
            encode(&[entity]).unwrap_err(),
            EncodeError::InvariantViolation { .. }
        ));
    }
}
