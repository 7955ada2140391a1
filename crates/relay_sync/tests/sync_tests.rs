//! Integration tests for the sync orchestrator

use relay_format::{
    decode, DecodedStream, EntityData, EntityId, FormatVersion, MaterialData, ObjectData, Record,
    Revision, SceneEntity, SceneSettings, StreamKind,
};
use std::cell::Cell;
use relay_sync::*;

/// Transport that decodes and keeps everything it receives
#[derive(Default)]
struct RecordingTransport {
    received: Vec<DecodedStream>,
    fail_next: bool,
}

impl Transport for RecordingTransport {
    fn deliver(&mut self, delivery: &Delivery<'_>) -> Result<Acknowledgement, TransportError> {
        if std::mem::take(&mut self.fail_next) {
            return Err(TransportError::Rejected("simulated failure".into()));
        }
        let decoded = decode(delivery.bytes).expect("delivered stream must decode");
        self.received.push(decoded);
        Ok(Acknowledgement {
            records: delivery.record_count,
        })
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

impl RecordingTransport {
    fn last(&self) -> &DecodedStream {
        self.received.last().expect("nothing delivered")
    }
}

fn populated(count: usize) -> (SyncOrchestrator, MemoryScene, Vec<EntityId>) {
    let sync = SyncOrchestrator::new();
    let scene = MemoryScene::new();
    scene.connect(sync.feed());
    let ids = (0..count)
        .map(|i| scene.insert(format!("object_{}", i), EntityData::Object(ObjectData::default())))
        .collect();
    (sync, scene, ids)
}

fn move_object(scene: &MemoryScene, id: EntityId, x: f32) {
    scene.modify(id, |entity| {
        if let EntityData::Object(object) = &mut entity.data {
            object.transform[12] = x;
        }
    });
}

const DETACHED: Generation = Generation::DETACHED;

#[test]
fn test_full_export_of_hundred_entities() {
    let (mut sync, scene, ids) = populated(100);
    let mut transport = RecordingTransport::default();

    let outcome = sync.synchronize(&scene, DETACHED, &mut transport).unwrap();
    assert_eq!(outcome, SyncOutcome::Full { generation: DETACHED, records: 100 });

    let stream = transport.last();
    assert_eq!(stream.header.kind, StreamKind::Manifest);
    assert_eq!(stream.header.version, FormatVersion::CURRENT);
    assert_eq!(stream.records.len(), 100);
    assert!(!sync.state().full_resync_required());

    for id in ids {
        assert_eq!(sync.state().last_synced_revision(id), scene.revision_of(id));
    }
}

#[test]
fn test_three_mutations_yield_exactly_three_records() {
    let (mut sync, scene, ids) = populated(20);
    let mut transport = RecordingTransport::default();
    sync.synchronize(&scene, DETACHED, &mut transport).unwrap();

    let touched = [ids[2], ids[7], ids[15]];
    for (i, id) in touched.iter().enumerate() {
        move_object(&scene, *id, i as f32);
    }

    let outcome = sync.synchronize(&scene, DETACHED, &mut transport).unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Incremental { generation: DETACHED, records: 3, removed: 0 }
    );

    let stream = transport.last();
    assert_eq!(stream.header.kind, StreamKind::Update);
    let sent: Vec<EntityId> = stream.records.iter().map(Record::id).collect();
    assert_eq!(sent, touched.to_vec());
    for entity in stream.entities() {
        assert_eq!(Some(entity.revision), scene.revision_of(entity.id));
        assert_eq!(Some(entity), scene.get(entity.id).as_ref());
    }
}

#[test]
fn test_repeated_edits_are_sent_once_at_latest_state() {
    let (mut sync, scene, ids) = populated(4);
    let mut transport = RecordingTransport::default();
    sync.synchronize(&scene, DETACHED, &mut transport).unwrap();

    for step in 0..10 {
        move_object(&scene, ids[1], step as f32);
        move_object(&scene, ids[3], -(step as f32));
    }

    sync.synchronize(&scene, DETACHED, &mut transport).unwrap();
    let stream = transport.last();
    assert_eq!(stream.records.len(), 2);
    assert_eq!(stream.records[0].id(), ids[1]);
    assert_eq!(stream.records[0].revision(), Revision::new(11));
    assert_eq!(sync.state().last_synced_revision(ids[3]), Some(Revision::new(11)));
}

#[test]
fn test_delivery_failure_forces_full_export() {
    let (mut sync, scene, ids) = populated(5);
    let mut transport = RecordingTransport::default();
    sync.synchronize(&scene, DETACHED, &mut transport).unwrap();

    move_object(&scene, ids[0], 1.0);
    transport.fail_next = true;
    let err = sync.synchronize(&scene, DETACHED, &mut transport).unwrap_err();
    assert!(matches!(err, SyncError::Delivery(_)));
    assert!(sync.state().full_resync_required());
    // The failed entity keeps its previously delivered revision
    assert_eq!(sync.state().last_synced_revision(ids[0]), Some(Revision::new(1)));

    let outcome = sync.synchronize(&scene, DETACHED, &mut transport).unwrap();
    assert_eq!(outcome, SyncOutcome::Full { generation: DETACHED, records: 5 });
    assert_eq!(sync.state().last_synced_revision(ids[0]), Some(Revision::new(2)));
}

#[test]
fn test_refresh_then_sync_without_edits_is_full() {
    let (mut sync, scene, _) = populated(3);
    let mut transport = RecordingTransport::default();
    sync.synchronize(&scene, DETACHED, &mut transport).unwrap();
    assert_eq!(sync.synchronize(&scene, DETACHED, &mut transport).unwrap(), SyncOutcome::NoChanges);

    sync.request_full_resync("refresh");
    sync.request_full_resync("refresh");
    assert!(sync.state().full_resync_required());

    let outcome = sync.synchronize(&scene, DETACHED, &mut transport).unwrap();
    assert!(matches!(outcome, SyncOutcome::Full { records: 3, .. }));
    assert_eq!(transport.received.len(), 2);
}

#[test]
fn test_generation_change_discards_pending_delta() {
    let (mut sync, scene, ids) = populated(6);
    let mut transport = RecordingTransport::default();
    sync.synchronize(&scene, DETACHED, &mut transport).unwrap();

    move_object(&scene, ids[4], 9.0);
    assert_eq!(sync.tracker().pending_len(), 1);

    let next = DETACHED.next();
    let outcome = sync.synchronize(&scene, next, &mut transport).unwrap();
    assert_eq!(outcome, SyncOutcome::Full { generation: next, records: 6 });
    assert_eq!(sync.state().bound_generation(), Some(next));
    assert_eq!(sync.tracker().pending_len(), 0);

    // Nothing left over for the new generation
    assert_eq!(sync.synchronize(&scene, next, &mut transport).unwrap(), SyncOutcome::NoChanges);
}

#[test]
fn test_unsupported_kind_aborts_and_forces_full() {
    let (mut sync, scene, _) = populated(2);
    let mut transport = RecordingTransport::default();
    sync.synchronize(&scene, DETACHED, &mut transport).unwrap();

    let fog = scene.insert("fog", EntityData::Foreign { kind: "volume".into() });
    let err = sync.synchronize(&scene, DETACHED, &mut transport).unwrap_err();
    assert!(matches!(err, SyncError::Encoding(_)));
    assert_eq!(transport.received.len(), 1);
    assert!(sync.state().full_resync_required());

    scene.update(fog, EntityData::Material(MaterialData::default()));
    let outcome = sync.synchronize(&scene, DETACHED, &mut transport).unwrap();
    assert!(matches!(outcome, SyncOutcome::Full { records: 3, .. }));
}

#[test]
fn test_new_entity_is_upserted() {
    let (mut sync, scene, _) = populated(1);
    let mut transport = RecordingTransport::default();
    sync.synchronize(&scene, DETACHED, &mut transport).unwrap();

    let lamp = scene.insert("lamp", EntityData::Material(MaterialData::default()));
    sync.synchronize(&scene, DETACHED, &mut transport).unwrap();

    let stream = transport.last();
    assert_eq!(stream.header.kind, StreamKind::Update);
    assert_eq!(stream.records.len(), 1);
    assert_eq!(stream.records[0].id(), lamp);
    assert_eq!(sync.state().synced_count(), 2);
}

/// Host whose single entity can report any revision
struct RewindingScene {
    revision: Cell<u64>,
}

impl SceneSource for RewindingScene {
    fn settings_revision(&self) -> Revision {
        Revision::new(1)
    }

    fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            settings: SceneSettings::default(),
            settings_revision: Revision::new(1),
            entities: vec![SceneEntity::new(
                EntityId::new(1),
                Revision::new(self.revision.get()),
                "rewound",
                EntityData::Material(MaterialData::default()),
            )],
        }
    }
}

#[test]
fn test_revision_going_backwards_is_inconsistency() {
    let mut sync = SyncOrchestrator::new();
    let feed = sync.feed();
    let scene = RewindingScene { revision: Cell::new(5) };
    let mut transport = RecordingTransport::default();

    sync.synchronize(&scene, DETACHED, &mut transport).unwrap();
    assert_eq!(sync.state().last_synced_revision(EntityId::new(1)), Some(Revision::new(5)));

    scene.revision.set(3);
    feed.notify(EntityId::new(1), Revision::new(6));

    let err = sync.synchronize(&scene, DETACHED, &mut transport).unwrap_err();
    assert!(matches!(err, SyncError::Inconsistent(_)));
    assert!(sync.state().full_resync_required());
    assert_eq!(transport.received.len(), 1);

    let outcome = sync.synchronize(&scene, DETACHED, &mut transport).unwrap();
    assert_eq!(outcome, SyncOutcome::Full { generation: DETACHED, records: 1 });
    assert_eq!(sync.state().last_synced_revision(EntityId::new(1)), Some(Revision::new(3)));
}
