//! Read-only access to the host's scene
//!
//! The host owns the scene graph; synchronization only ever reads a
//! consistent [`SceneSnapshot`] through [`SceneSource`].
//! [`MemoryScene`] is a host scene kept in memory, used by embedding hosts
//! that mirror their own data model into it and by the tests.

use parking_lot::RwLock;
use relay_format::{EntityData, EntityId, Revision, SceneEntity, SceneSettings};
use std::collections::BTreeMap;

use crate::delta::ChangeFeed;

/// Consistent copy of (part of) the scene
#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    pub settings: SceneSettings,
    pub settings_revision: Revision,
    /// Sorted by id
    pub entities: Vec<SceneEntity>,
}

/// Snapshot accessor implemented by the host
pub trait SceneSource {
    /// Current revision of the scene-wide settings
    fn settings_revision(&self) -> Revision;

    /// Every entity, sorted by id
    fn snapshot(&self) -> SceneSnapshot;

    /// Only the listed entities that still exist, sorted by id
    fn snapshot_of(&self, ids: &[EntityId]) -> SceneSnapshot {
        let mut snapshot = self.snapshot();
        snapshot.entities.retain(|entity| ids.contains(&entity.id));
        snapshot
    }
}

struct SceneState {
    settings: SceneSettings,
    settings_revision: Revision,
    entities: BTreeMap<EntityId, SceneEntity>,
    next_id: u64,
}

/// In-memory host scene that announces its own changes
pub struct MemoryScene {
    state: RwLock<SceneState>,
    feed: RwLock<Option<ChangeFeed>>,
}

impl MemoryScene {
    /// Create an empty scene with default settings
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SceneState {
                settings: SceneSettings::default(),
                settings_revision: Revision::new(1),
                entities: BTreeMap::new(),
                next_id: 1,
            }),
            feed: RwLock::new(None),
        }
    }

    /// Send future changes to `feed`
    pub fn connect(&self, feed: ChangeFeed) {
        *self.feed.write() = Some(feed);
    }

    fn notify(&self, id: EntityId, revision: Revision) {
        if let Some(feed) = self.feed.read().as_ref() {
            feed.notify(id, revision);
        }
    }

    /// Add an entity at revision 1
    pub fn insert(&self, name: impl Into<String>, data: EntityData) -> EntityId {
        let (id, revision) = {
            let mut state = self.state.write();
            let id = EntityId::new(state.next_id);
            state.next_id += 1;

            let revision = Revision::new(1);
            state.entities.insert(id, SceneEntity::new(id, revision, name, data));
            (id, revision)
        };
        self.notify(id, revision);
        id
    }

    /// Replace an entity's payload, bumping its revision
    pub fn update(&self, id: EntityId, data: EntityData) -> Option<Revision> {
        self.modify(id, |entity| entity.data = data)
    }

    /// Rename an entity, bumping its revision
    pub fn rename(&self, id: EntityId, name: impl Into<String>) -> Option<Revision> {
        let name = name.into();
        self.modify(id, |entity| entity.name = name)
    }

    /// Apply an arbitrary edit, bumping the revision
    pub fn modify<F>(&self, id: EntityId, edit: F) -> Option<Revision>
    where
        F: FnOnce(&mut SceneEntity),
    {
        let revision = {
            let mut state = self.state.write();
            let entity = state.entities.get_mut(&id)?;
            edit(entity);
            entity.revision = entity.revision.next();
            entity.revision
        };
        self.notify(id, revision);
        Some(revision)
    }

    /// Delete an entity; the announced revision is one past its last
    pub fn remove(&self, id: EntityId) -> Option<Revision> {
        let revision = self.state.write().entities.remove(&id)?.revision.next();
        self.notify(id, revision);
        Some(revision)
    }

    /// Replace the scene-wide settings
    pub fn set_settings(&self, settings: SceneSettings) -> Revision {
        let mut state = self.state.write();
        state.settings = settings;
        state.settings_revision = state.settings_revision.next();
        state.settings_revision
    }

    /// Current revision of an entity
    pub fn revision_of(&self, id: EntityId) -> Option<Revision> {
        self.state.read().entities.get(&id).map(|entity| entity.revision)
    }

    /// Copy of an entity
    pub fn get(&self, id: EntityId) -> Option<SceneEntity> {
        self.state.read().entities.get(&id).cloned()
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.state.read().entities.len()
    }

    /// Whether the scene is empty
    pub fn is_empty(&self) -> bool {
        self.state.read().entities.is_empty()
    }
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneSource for MemoryScene {
    fn settings_revision(&self) -> Revision {
        self.state.read().settings_revision
    }

    fn snapshot(&self) -> SceneSnapshot {
        let state = self.state.read();
        SceneSnapshot {
            settings: state.settings.clone(),
            settings_revision: state.settings_revision,
            entities: state.entities.values().cloned().collect(),
        }
    }

    fn snapshot_of(&self, ids: &[EntityId]) -> SceneSnapshot {
        let state = self.state.read();
        let mut entities: Vec<_> = ids
            .iter()
            .filter_map(|id| state.entities.get(id).cloned())
            .collect();
        entities.sort_by_key(|entity| entity.id);
        entities.dedup_by_key(|entity| entity.id);

        SceneSnapshot {
            settings: state.settings.clone(),
            settings_revision: state.settings_revision,
            entities,
        }
    }
}
