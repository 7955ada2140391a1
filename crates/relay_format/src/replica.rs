//! Remote-side scene state
//!
//! The runtime keeps a [`SceneReplica`] and feeds every received stream into
//! it. A stream is applied completely or not at all.

use std::collections::BTreeMap;

use crate::decoder::{decode, DecodedStream};
use crate::encoder::{Record, StreamKind};
use crate::entity::{EntityId, EntityKind, SceneEntity};
use crate::error::ReplicaError;
use crate::settings::SceneSettings;

/// Scene state mirrored from the exporter
#[derive(Debug, Default)]
pub struct SceneReplica {
    settings: Option<SceneSettings>,
    entities: BTreeMap<EntityId, SceneEntity>,
    manifests_applied: u64,
    updates_applied: u64,
}

impl SceneReplica {
    /// Create an empty replica
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and apply a raw stream
    pub fn apply_bytes(&mut self, bytes: &[u8]) -> Result<u32, ReplicaError> {
        let stream = decode(bytes)?;
        self.apply(stream)
    }

    /// Apply a decoded stream, returning the number of records applied
    pub fn apply(&mut self, stream: DecodedStream) -> Result<u32, ReplicaError> {
        let count = stream.header.record_count;

        match stream.header.kind {
            StreamKind::Manifest => {
                let entities = stream
                    .records
                    .into_iter()
                    .filter_map(|record| match record {
                        Record::Entity(entity) => Some((entity.id, entity)),
                        Record::Removed { .. } => None,
                    })
                    .collect();

                self.entities = entities;
                self.settings = Some(stream.settings);
                self.manifests_applied += 1;
                log::debug!("Manifest applied: {} entities", self.entities.len());
            }
            StreamKind::Update => {
                if self.settings.is_none() {
                    return Err(ReplicaError::NoManifest);
                }
                self.check_removals(&stream.records)?;

                for record in stream.records {
                    match record {
                        Record::Entity(entity) => {
                            self.entities.insert(entity.id, entity);
                        }
                        Record::Removed { id, .. } => {
                            self.entities.remove(&id);
                        }
                    }
                }
                self.settings = Some(stream.settings);
                self.updates_applied += 1;
                log::debug!("Update applied: {} records", count);
            }
        }

        Ok(count)
    }

    // Walks the batch in order so an entity upserted earlier in the same
    // batch may be removed later in it.
    fn check_removals(&self, records: &[Record]) -> Result<(), ReplicaError> {
        let mut added = Vec::new();
        let mut removed = Vec::new();

        for record in records {
            match record {
                Record::Entity(entity) => {
                    added.push(entity.id);
                    removed.retain(|id| *id != entity.id);
                }
                Record::Removed { id, .. } => {
                    let present = (self.entities.contains_key(id) || added.contains(id))
                        && !removed.contains(id);
                    if !present {
                        return Err(ReplicaError::UnknownEntity(*id));
                    }
                    removed.push(*id);
                    added.retain(|a| a != id);
                }
            }
        }
        Ok(())
    }

    /// Whether a manifest has been applied
    pub fn is_loaded(&self) -> bool {
        self.settings.is_some()
    }

    /// Current scene settings
    pub fn settings(&self) -> Option<&SceneSettings> {
        self.settings.as_ref()
    }

    /// Look up an entity
    pub fn get(&self, id: EntityId) -> Option<&SceneEntity> {
        self.entities.get(&id)
    }

    /// All entities in id order
    pub fn entities(&self) -> impl Iterator<Item = &SceneEntity> {
        self.entities.values()
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the replica holds no entities
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of entities of a given kind
    pub fn count_of(&self, kind: &EntityKind) -> usize {
        self.entities.values().filter(|e| &e.kind() == kind).count()
    }

    /// Manifests applied so far
    pub fn manifests_applied(&self) -> u64 {
        self.manifests_applied
    }

    /// Update batches applied so far
    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{encode_manifest, encode_update};
    use crate::entity::{EntityData, MaterialData, Revision};

    fn material(id: u64, rev: u64) -> SceneEntity {
        SceneEntity::new(
            EntityId::new(id),
            Revision::new(rev),
            format!("mat{}", id),
            EntityData::Material(MaterialData::default()),
        )
    }

    fn manifest(ids: &[u64]) -> Vec<u8> {
        let entities: Vec<_> = ids.iter().map(|&id| material(id, 1)).collect();
        encode_manifest(&SceneSettings::default(), &entities).unwrap().bytes
    }

    #[test]
    fn test_update_requires_manifest() {
        let mut replica = SceneReplica::new();
        let update = encode_update(&SceneSettings::default(), &[Record::Entity(material(1, 2))])
            .unwrap()
            .bytes;

        assert_eq!(replica.apply_bytes(&update), Err(ReplicaError::NoManifest));
        assert!(!replica.is_loaded());
    }

    #[test]
    fn test_manifest_replaces_state() {
        let mut replica = SceneReplica::new();
        replica.apply_bytes(&manifest(&[1, 2, 3])).unwrap();
        replica.apply_bytes(&manifest(&[7])).unwrap();

        assert_eq!(replica.len(), 1);
        assert!(replica.get(EntityId::new(7)).is_some());
        assert_eq!(replica.manifests_applied(), 2);
    }

    #[test]
    fn test_update_upserts_and_removes() {
        let mut replica = SceneReplica::new();
        replica.apply_bytes(&manifest(&[1, 2])).unwrap();

        let records = vec![
            Record::Entity(material(2, 5)),
            Record::Entity(material(3, 1)),
            Record::Removed {
                id: EntityId::new(1),
                revision: Revision::new(2),
            },
        ];
        let update = encode_update(&SceneSettings::default(), &records).unwrap().bytes;
        assert_eq!(replica.apply_bytes(&update).unwrap(), 3);

        assert!(replica.get(EntityId::new(1)).is_none());
        assert_eq!(replica.get(EntityId::new(2)).unwrap().revision, Revision::new(5));
        assert!(replica.get(EntityId::new(3)).is_some());
    }

    #[test]
    fn test_unknown_removal_leaves_state_unchanged() {
        let mut replica = SceneReplica::new();
        replica.apply_bytes(&manifest(&[1])).unwrap();

        let records = vec![
            Record::Entity(material(1, 9)),
            Record::Removed {
                id: EntityId::new(40),
                revision: Revision::new(1),
            },
        ];
        let update = encode_update(&SceneSettings::default(), &records).unwrap().bytes;

        assert_eq!(
            replica.apply_bytes(&update),
            Err(ReplicaError::UnknownEntity(EntityId::new(40)))
        );
        assert_eq!(replica.get(EntityId::new(1)).unwrap().revision, Revision::new(1));
        assert_eq!(replica.updates_applied(), 0);
    }
}
