//! Binary stream decoder
//!
//! [`validate_framing`] walks the header and record lengths only, which is
//! enough to detect a truncated or corrupt stream before touching payloads.
//! [`decode`] performs the full parse.

use serde::de::DeserializeOwned;

use crate::encoder::{
    FormatVersion, Record, StreamHeader, StreamKind, HEADER_SIZE, MAGIC, RECORD_HEADER_SIZE,
    TOMBSTONE_TAG,
};
use crate::entity::{
    ActionData, CameraData, EntityData, EntityId, EntityKind, ImageData, LightData, MaterialData,
    MeshData, ObjectData, Revision, SceneEntity,
};
use crate::error::DecodeError;
use crate::settings::SceneSettings;

/// A fully parsed stream
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedStream {
    pub header: StreamHeader,
    pub settings: SceneSettings,
    pub records: Vec<Record>,
}

impl DecodedStream {
    /// Entity records, skipping tombstones
    pub fn entities(&self) -> impl Iterator<Item = &SceneEntity> {
        self.records.iter().filter_map(|record| match record {
            Record::Entity(entity) => Some(entity),
            Record::Removed { .. } => None,
        })
    }
}

/// Raw record view produced by the framing walk
struct RawRecord<'a> {
    offset: usize,
    tag: u8,
    id: EntityId,
    revision: Revision,
    payload: &'a [u8],
}

/// Little-endian cursor over a byte slice
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, offset }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                offset: self.offset,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

/// Parse and check the fixed-size header
pub fn read_header(bytes: &[u8]) -> Result<StreamHeader, DecodeError> {
    let mut reader = Reader::new(bytes, 0);

    let magic = reader.take(MAGIC.len())?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let version = FormatVersion {
        major: reader.u16()?,
        minor: reader.u16()?,
    };
    if !version.is_readable() {
        return Err(DecodeError::UnsupportedVersion {
            major: version.major,
            minor: version.minor,
        });
    }

    let kind_byte = reader.u8()?;
    let kind = StreamKind::from_u8(kind_byte).ok_or(DecodeError::UnknownStreamKind(kind_byte))?;
    reader.take(3)?;

    Ok(StreamHeader {
        version,
        kind,
        record_count: reader.u32()?,
        settings_len: reader.u32()?,
    })
}

/// Check header and record framing without parsing payloads
pub fn validate_framing(bytes: &[u8]) -> Result<StreamHeader, DecodeError> {
    let header = read_header(bytes)?;
    walk_records(bytes, &header, |_| Ok(()))?;
    Ok(header)
}

/// Fully decode a stream
pub fn decode(bytes: &[u8]) -> Result<DecodedStream, DecodeError> {
    let header = read_header(bytes)?;

    let settings_bytes = Reader::new(bytes, HEADER_SIZE).take(header.settings_len as usize)?;
    let settings: SceneSettings = deserialize("scene settings", settings_bytes)?;

    // The declared count is untrusted; every record takes at least a header
    let fits = bytes.len().saturating_sub(HEADER_SIZE) / RECORD_HEADER_SIZE;
    let mut records = Vec::with_capacity((header.record_count as usize).min(fits));
    walk_records(bytes, &header, |raw| {
        records.push(decode_record(raw)?);
        Ok(())
    })?;

    Ok(DecodedStream {
        header,
        settings,
        records,
    })
}

fn walk_records<'a, F>(bytes: &'a [u8], header: &StreamHeader, mut visit: F) -> Result<(), DecodeError>
where
    F: FnMut(RawRecord<'a>) -> Result<(), DecodeError>,
{
    let mut reader = Reader::new(bytes, HEADER_SIZE);
    reader.take(header.settings_len as usize)?;

    let mut found = 0u32;
    while reader.remaining() > 0 {
        if found == header.record_count {
            return Err(DecodeError::TrailingBytes(reader.remaining()));
        }
        if reader.remaining() < RECORD_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                offset: reader.offset,
                needed: RECORD_HEADER_SIZE - reader.remaining(),
            });
        }

        let offset = reader.offset;
        let tag = reader.u8()?;
        reader.take(3)?;
        let id = EntityId::new(reader.u64()?);
        let revision = Revision::new(reader.u64()?);
        let payload_len = reader.u32()? as usize;

        if tag == TOMBSTONE_TAG {
            if header.kind == StreamKind::Manifest {
                return Err(DecodeError::UnexpectedTombstone(offset));
            }
        } else if EntityKind::from_tag(tag).is_none() {
            return Err(DecodeError::UnknownRecordTag { offset, tag });
        }

        let payload = reader.take(payload_len)?;
        visit(RawRecord {
            offset,
            tag,
            id,
            revision,
            payload,
        })?;
        found += 1;
    }

    if found != header.record_count {
        return Err(DecodeError::CountMismatch {
            declared: header.record_count,
            found,
        });
    }
    Ok(())
}

fn decode_record(raw: RawRecord<'_>) -> Result<Record, DecodeError> {
    if raw.tag == TOMBSTONE_TAG {
        if !raw.payload.is_empty() {
            return Err(DecodeError::Payload {
                what: format!("tombstone {} at offset {}", raw.id, raw.offset),
                reason: "tombstones carry no payload".to_string(),
            });
        }
        return Ok(Record::Removed {
            id: raw.id,
            revision: raw.revision,
        });
    }

    let kind = EntityKind::from_tag(raw.tag).ok_or(DecodeError::UnknownRecordTag {
        offset: raw.offset,
        tag: raw.tag,
    })?;
    let what = format!("{} {}", kind, raw.id);

    let (name, data) = match kind {
        EntityKind::Mesh => payload::<MeshData>(&what, raw.payload, EntityData::Mesh)?,
        EntityKind::Material => payload::<MaterialData>(&what, raw.payload, EntityData::Material)?,
        EntityKind::Light => payload::<LightData>(&what, raw.payload, EntityData::Light)?,
        EntityKind::Camera => payload::<CameraData>(&what, raw.payload, EntityData::Camera)?,
        EntityKind::Object => payload::<ObjectData>(&what, raw.payload, EntityData::Object)?,
        EntityKind::Action => payload::<ActionData>(&what, raw.payload, EntityData::Action)?,
        EntityKind::Image => payload::<ImageData>(&what, raw.payload, EntityData::Image)?,
        EntityKind::Foreign(_) => {
            return Err(DecodeError::UnknownRecordTag {
                offset: raw.offset,
                tag: raw.tag,
            })
        }
    };

    Ok(Record::Entity(SceneEntity::new(raw.id, raw.revision, name, data)))
}

fn payload<T: DeserializeOwned>(
    what: &str,
    bytes: &[u8],
    wrap: fn(T) -> EntityData,
) -> Result<(String, EntityData), DecodeError> {
    let (name, data): (String, T) = deserialize(what, bytes)?;
    Ok((name, wrap(data)))
}

fn deserialize<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> Result<T, DecodeError> {
    bincode::deserialize(bytes).map_err(|e| DecodeError::Payload {
        what: what.to_string(),
        reason: e.to_string(),
    })
}
