//! Delta Tracker - accumulates entity changes between synchronizations
//!
//! The host announces changes through a [`ChangeFeed`], which can be cloned
//! and moved to whatever thread observes the scene. Notifications queue on a
//! channel and are folded into the pending set when the orchestrator drains.
//!
//! A change sent while a drain is in progress lands in the channel after the
//! drain stopped reading it, so it belongs to the next delta.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use relay_format::{EntityId, Revision};
use std::collections::{BTreeMap, HashMap};

/// Sending half handed to the host
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: Sender<(EntityId, Revision)>,
}

impl ChangeFeed {
    /// Announce that an entity reached a new revision
    pub fn notify(&self, id: EntityId, revision: Revision) {
        if self.sender.send((id, revision)).is_err() {
            log::trace!("Change of {} dropped: tracker is gone", id);
        }
    }
}

/// Entities changed since the last drain, with their latest announced revision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaSet {
    entries: BTreeMap<EntityId, Revision>,
}

impl DeltaSet {
    /// Number of changed entities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest revision recorded for an entity
    pub fn revision_of(&self, id: EntityId) -> Option<Revision> {
        self.entries.get(&id).copied()
    }

    /// Changed ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entries.keys().copied()
    }

    /// (id, revision) pairs in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, Revision)> + '_ {
        self.entries.iter().map(|(id, rev)| (*id, *rev))
    }
}

/// Tracks changed entities for one synchronized scene
pub struct DeltaTracker {
    sender: Sender<(EntityId, Revision)>,
    receiver: Receiver<(EntityId, Revision)>,
    pending: Mutex<HashMap<EntityId, Revision>>,
}

impl DeltaTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Get a feed the host can notify changes through
    pub fn feed(&self) -> ChangeFeed {
        ChangeFeed {
            sender: self.sender.clone(),
        }
    }

    /// Record a change directly
    pub fn record_change(&self, id: EntityId, revision: Revision) {
        merge(&mut self.pending.lock(), id, revision);
    }

    /// Take everything accumulated so far, leaving the tracker empty
    pub fn drain(&self) -> DeltaSet {
        let mut pending = self.pending.lock();
        for (id, revision) in self.receiver.try_iter() {
            merge(&mut pending, id, revision);
        }

        DeltaSet {
            entries: std::mem::take(&mut *pending).into_iter().collect(),
        }
    }

    /// Discard every pending change
    pub fn reset(&self) {
        let mut pending = self.pending.lock();
        let queued = self.receiver.try_iter().count();
        if !pending.is_empty() || queued > 0 {
            log::debug!("Discarding {} pending changes", pending.len() + queued);
        }
        pending.clear();
    }

    /// Number of changes recorded but not yet folded or drained
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len() + self.receiver.len()
    }
}

impl Default for DeltaTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn merge(pending: &mut HashMap<EntityId, Revision>, id: EntityId, revision: Revision) {
    let entry = pending.entry(id).or_insert(revision);
    if revision > *entry {
        *entry = revision;
    }
}
