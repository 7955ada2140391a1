//! Sync Orchestrator - full export or incremental update
//!
//! Every call to [`SyncOrchestrator::synchronize`] ends in exactly one of:
//!
//! - **Full**: the whole scene was delivered as a manifest
//! - **Incremental**: only entities changed since the last delivery were sent
//! - **NoChanges**: nothing to send, no I/O performed
//! - an error, after which the next call is always a full export
//!
//! ## Key Invariants
//!
//! 1. No update batch is sent while `full_resync_required` is set
//! 2. Pending changes are discarded whenever a full resync becomes required
//! 3. Synchronized revisions only advance after acknowledged delivery
//! 4. A change of runtime generation forces a full export

use relay_format::{
    encode_manifest, encode_update, EncodeError, EntityId, Record, Revision, SceneEntity,
};
use std::collections::HashMap;
use thiserror::Error;

use crate::delta::{ChangeFeed, DeltaTracker};
use crate::engine::Generation;
use crate::scene::SceneSource;
use crate::transport::{Acknowledgement, Delivery, Transport, TransportError};

/// Synchronization errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// Encoding failed; nothing was sent
    #[error("Encoding failed: {0}")]
    Encoding(#[from] EncodeError),

    /// Delivery failed; remote state is unknown
    #[error("Delivery failed: {0}")]
    Delivery(#[from] TransportError),

    /// Local and remote views disagree
    #[error("State inconsistency: {0}")]
    Inconsistent(String),
}

/// Result of a successful synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A complete manifest was delivered
    Full { generation: Generation, records: u32 },
    /// An update batch was delivered
    Incremental {
        generation: Generation,
        records: u32,
        removed: u32,
    },
    /// Nothing changed
    NoChanges,
}

impl SyncOutcome {
    /// Records delivered
    pub fn records(&self) -> u32 {
        match self {
            Self::Full { records, .. } | Self::Incremental { records, .. } => *records,
            Self::NoChanges => 0,
        }
    }
}

/// What the exporter believes the remote holds
#[derive(Debug, Clone)]
pub struct SyncState {
    last_synced: HashMap<EntityId, Revision>,
    settings_revision: Option<Revision>,
    full_resync_required: bool,
    bound_generation: Option<Generation>,
    resync_reason: Option<String>,
}

impl SyncState {
    fn new() -> Self {
        Self {
            last_synced: HashMap::new(),
            settings_revision: None,
            full_resync_required: true,
            bound_generation: None,
            resync_reason: Some("no prior synchronization".to_string()),
        }
    }

    pub fn full_resync_required(&self) -> bool {
        self.full_resync_required
    }

    /// Why the next synchronization will be full, if it will
    pub fn resync_reason(&self) -> Option<&str> {
        self.resync_reason.as_deref()
    }

    /// Revision of an entity as last delivered
    pub fn last_synced_revision(&self, id: EntityId) -> Option<Revision> {
        self.last_synced.get(&id).copied()
    }

    /// Number of entities the remote holds
    pub fn synced_count(&self) -> usize {
        self.last_synced.len()
    }

    /// Generation the remote state belongs to
    pub fn bound_generation(&self) -> Option<Generation> {
        self.bound_generation
    }
}

/// Decides between full and incremental synchronization and tracks the result
pub struct SyncOrchestrator {
    state: SyncState,
    tracker: DeltaTracker,
}

impl SyncOrchestrator {
    pub fn new() -> Self {
        Self {
            state: SyncState::new(),
            tracker: DeltaTracker::new(),
        }
    }

    /// Feed the host notifies changes through
    pub fn feed(&self) -> ChangeFeed {
        self.tracker.feed()
    }

    pub fn tracker(&self) -> &DeltaTracker {
        &self.tracker
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Make the next synchronization a full export
    pub fn request_full_resync(&mut self, reason: &str) {
        if !self.state.full_resync_required {
            log::info!("Full resync required: {}", reason);
            self.state.resync_reason = Some(reason.to_string());
        }
        self.state.full_resync_required = true;
        self.tracker.reset();
    }

    /// Forget everything delivered so far; change feeds stay connected
    pub fn reset(&mut self) {
        self.state = SyncState::new();
        self.tracker.reset();
    }

    /// Bring the remote behind `transport` up to date with `scene`
    pub fn synchronize<S: SceneSource + ?Sized>(
        &mut self,
        scene: &S,
        generation: Generation,
        transport: &mut dyn Transport,
    ) -> Result<SyncOutcome, SyncError> {
        if !self.state.full_resync_required && self.state.bound_generation != Some(generation) {
            let reason = match self.state.bound_generation {
                Some(bound) => format!("runtime changed from {} to {}", bound, generation),
                None => format!("first delivery to {}", generation),
            };
            self.request_full_resync(&reason);
        }

        let result = if self.state.full_resync_required {
            self.full_export(scene, generation, transport)
        } else {
            self.incremental_update(scene, generation, transport)
        };

        if let Err(e) = &result {
            log::warn!("Synchronization with {} via {} failed: {}", generation, transport.describe(), e);
            self.request_full_resync(&format!("previous synchronization failed: {}", e));
        }
        result
    }

    fn full_export<S: SceneSource + ?Sized>(
        &mut self,
        scene: &S,
        generation: Generation,
        transport: &mut dyn Transport,
    ) -> Result<SyncOutcome, SyncError> {
        // Changes that arrive after this point are newer than the snapshot
        self.tracker.reset();
        let snapshot = scene.snapshot();

        let stream = encode_manifest(&snapshot.settings, &snapshot.entities)?;
        let ack = transport.deliver(&Delivery::from(&stream))?;
        check_ack(ack, stream.record_count)?;

        self.state.last_synced = snapshot
            .entities
            .iter()
            .map(|entity| (entity.id, entity.revision))
            .collect();
        self.state.settings_revision = Some(snapshot.settings_revision);
        self.state.full_resync_required = false;
        self.state.bound_generation = Some(generation);
        self.state.resync_reason = None;

        log::info!(
            "Full export to {}: {} entities, {} bytes",
            generation,
            stream.record_count,
            stream.len()
        );
        Ok(SyncOutcome::Full {
            generation,
            records: stream.record_count,
        })
    }

    fn incremental_update<S: SceneSource + ?Sized>(
        &mut self,
        scene: &S,
        generation: Generation,
        transport: &mut dyn Transport,
    ) -> Result<SyncOutcome, SyncError> {
        let delta = self.tracker.drain();

        // Notifications at or below the delivered revision are already on the remote
        let changed: Vec<(EntityId, Revision)> = delta
            .iter()
            .filter(|(id, revision)| {
                self.state
                    .last_synced
                    .get(id)
                    .map_or(true, |synced| revision > synced)
            })
            .collect();
        let settings_changed = self.state.settings_revision != Some(scene.settings_revision());

        if changed.is_empty() && !settings_changed {
            return Ok(SyncOutcome::NoChanges);
        }

        let ids: Vec<EntityId> = changed.iter().map(|(id, _)| *id).collect();
        let snapshot = scene.snapshot_of(&ids);
        let present: HashMap<EntityId, &SceneEntity> =
            snapshot.entities.iter().map(|entity| (entity.id, entity)).collect();

        let mut records = Vec::with_capacity(changed.len());
        let mut removed = 0u32;
        for (id, revision) in &changed {
            let synced = self.state.last_synced.get(id);
            match (present.get(id), synced) {
                (Some(entity), Some(synced)) if entity.revision < *synced => {
                    return Err(SyncError::Inconsistent(format!(
                        "entity {} is at {} but {} was already delivered",
                        id, entity.revision, synced
                    )));
                }
                (Some(entity), _) => records.push(Record::Entity((*entity).clone())),
                (None, Some(_)) => {
                    records.push(Record::Removed {
                        id: *id,
                        revision: *revision,
                    });
                    removed += 1;
                }
                (None, None) => {
                    log::debug!("Entity {} was created and removed between synchronizations", id);
                }
            }
        }

        if records.is_empty() && !settings_changed {
            return Ok(SyncOutcome::NoChanges);
        }

        let stream = encode_update(&snapshot.settings, &records)?;
        let ack = transport.deliver(&Delivery::from(&stream))?;
        check_ack(ack, stream.record_count)?;

        for record in &records {
            match record {
                Record::Entity(entity) => {
                    self.state.last_synced.insert(entity.id, entity.revision);
                }
                Record::Removed { id, .. } => {
                    self.state.last_synced.remove(id);
                }
            }
        }
        self.state.settings_revision = Some(snapshot.settings_revision);

        log::debug!(
            "Update to {}: {} records ({} removed)",
            generation,
            stream.record_count,
            removed
        );
        Ok(SyncOutcome::Incremental {
            generation,
            records: stream.record_count,
            removed,
        })
    }
}

impl Default for SyncOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_ack(ack: Acknowledgement, sent: u32) -> Result<(), SyncError> {
    if ack.records != sent {
        return Err(SyncError::Inconsistent(format!(
            "runtime acknowledged {} of {} records",
            ack.records, sent
        )));
    }
    Ok(())
}
