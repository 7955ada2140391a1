//! Integration tests for the export session

use relay_format::{decode, list_updates, EntityData, LightData, MaterialData, StreamKind};
use relay_sync::*;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn test_root(name: &str) -> PathBuf {
    let root = env::temp_dir().join(format!("relay_session_tests_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&root);
    root
}

fn config(root: &Path) -> ExportConfig {
    let mut config = ExportConfig::default();
    config.export.output_dir = root.join("out");
    config.runtime.source_dir = root.join("runtime");
    config.runtime.run_after_export = false;
    config
}

fn scene_with(session: &ExportSession, count: usize) -> MemoryScene {
    let scene = MemoryScene::new();
    scene.connect(session.change_feed());
    for i in 0..count {
        scene.insert(format!("light_{}", i), EntityData::Light(LightData::default()));
    }
    scene
}

#[test]
fn test_export_writes_artifact_and_clears_flag() {
    let root = test_root("artifact");
    let session = ExportSession::with_deployer(config(&root), NoDeploy);
    let scene = scene_with(&session, 100);

    let report = session.export(&scene).unwrap();
    assert_eq!(report.records, 100);
    assert!(report.engine.is_none());
    assert!(!session.full_resync_required());

    let decoded = decode(&fs::read(&report.artifact).unwrap()).unwrap();
    assert_eq!(decoded.header.kind, StreamKind::Manifest);
    assert_eq!(decoded.records.len(), 100);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn test_synchronize_without_runtime_writes_update_files() {
    let root = test_root("updates");
    let session = ExportSession::with_deployer(config(&root), NoDeploy);
    let scene = scene_with(&session, 3);
    session.export(&scene).unwrap();

    let first = scene.insert("extra", EntityData::Material(MaterialData::default()));
    let outcome = session.synchronize(&scene).unwrap();
    assert!(matches!(outcome, SyncOutcome::Incremental { records: 1, .. }));
    assert_eq!(session.last_synced_revision(first), scene.revision_of(first));

    let updates = list_updates(&root.join("out")).unwrap();
    assert_eq!(updates.len(), 1);
    let update = decode(&fs::read(&updates[0].1).unwrap()).unwrap();
    assert_eq!(update.header.kind, StreamKind::Update);

    // Refresh rewrites the artifact and drops the update files
    session.refresh();
    assert!(matches!(session.synchronize(&scene).unwrap(), SyncOutcome::Full { records: 4, .. }));
    assert!(list_updates(&root.join("out")).unwrap().is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn test_failed_export_keeps_previous_artifact() {
    let root = test_root("keep");
    let session = ExportSession::with_deployer(config(&root), NoDeploy);
    let scene = scene_with(&session, 2);
    let report = session.export(&scene).unwrap();
    let before = fs::read(&report.artifact).unwrap();

    scene.insert("smoke", EntityData::Foreign { kind: "volume".into() });
    let err = session.export(&scene).unwrap_err();
    assert_eq!(err.stage(), ExportStage::Encoding);
    assert!(session.full_resync_required());

    assert_eq!(fs::read(&report.artifact).unwrap(), before);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn test_missing_runtime_files_fail_deployment() {
    let root = test_root("deploy");
    let session = ExportSession::new(config(&root));
    let scene = scene_with(&session, 1);

    let response = session.invoke(HostAction::Export, &scene);
    assert!(!response.ok);
    assert!(response.message.starts_with("deployment failed"));
    assert!(!root.join("out").join("data.bin").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn test_missing_runtime_executable_fails_process_start() {
    let root = test_root("launch");
    let mut config = config(&root);
    config.runtime.run_after_export = true;
    config.runtime.executable = PathBuf::from("not_deployed");

    let session = ExportSession::with_deployer(config, NoDeploy);
    let scene = scene_with(&session, 1);

    let err = session.export(&scene).unwrap_err();
    assert_eq!(err.stage(), ExportStage::ProcessStart);
    assert!(matches!(err, ExportError::Launch(LaunchError::MissingRuntime(_))));
    assert!(session.engine_handle().is_none());
    // The artifact was still written before the launch attempt
    assert!(root.join("out").join("data.bin").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn test_refresh_action_is_idempotent() {
    let root = test_root("refresh");
    let session = ExportSession::with_deployer(config(&root), NoDeploy);
    let scene = scene_with(&session, 1);
    session.export(&scene).unwrap();

    for _ in 0..3 {
        let response = session.invoke(HostAction::Refresh, &scene);
        assert!(response.ok);
        assert!(session.full_resync_required());
    }
    assert!(!root.join("out").join("update_000001.bin").exists());

    let _ = fs::remove_dir_all(&root);
}
