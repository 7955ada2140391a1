//! Export Session - the entry point a host calls into
//!
//! One [`ExportSession`] per authoring session. It owns the sync state, the
//! runtime process and the artifact transport, and serializes every call
//! behind a single lock.
//!
//! ```text
//! Export:  stop runtime ─► create output dir ─► deploy ─► full export to artifact ─► start runtime
//! Refresh: full_resync_required = true
//! Sync:    runtime alive? ─► its transport : artifact transport ─► orchestrator
//! ```

use parking_lot::Mutex;
use relay_format::{EntityId, Revision};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ExportConfig;
use crate::delta::ChangeFeed;
use crate::deploy::{DeployError, Deployer, RuntimeDeployer};
use crate::engine::{EngineConfig, EngineError, EngineHandle, EngineSessionManager, Generation, LaunchError};
use crate::scene::SceneSource;
use crate::sync::{SyncError, SyncOrchestrator, SyncOutcome};
use crate::transport::{FileTransport, Transport};

/// Stage an export or synchronization failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Deployment,
    Encoding,
    Delivery,
    ProcessStart,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployment => write!(f, "deployment"),
            Self::Encoding => write!(f, "encoding"),
            Self::Delivery => write!(f, "delivery"),
            Self::ProcessStart => write!(f, "process start"),
        }
    }
}

/// Errors surfaced to the host
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to create output directory {path}: {reason}")]
    OutputDir { path: PathBuf, reason: String },

    /// The previous runtime could not be stopped, so its files may still be locked
    #[error("Failed to stop the running runtime before deploying: {0}")]
    StopRuntime(#[source] EngineError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ExportError {
    /// The stage that failed
    pub fn stage(&self) -> ExportStage {
        match self {
            Self::StopRuntime(_) | Self::OutputDir { .. } | Self::Deploy(_) => ExportStage::Deployment,
            Self::Sync(SyncError::Encoding(_)) => ExportStage::Encoding,
            Self::Sync(_) => ExportStage::Delivery,
            Self::Launch(_) | Self::Engine(_) => ExportStage::ProcessStart,
        }
    }

    /// Message for the host's status line
    pub fn diagnostic(&self) -> String {
        format!("{} failed: {}", self.stage(), self)
    }
}

/// What an export produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub artifact: PathBuf,
    pub records: u32,
    pub deployed: Vec<PathBuf>,
    /// Runtime started after the export, if any
    pub engine: Option<EngineHandle>,
}

/// Actions a host UI can trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAction {
    Export,
    Refresh,
}

/// Outcome reported back to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResponse {
    pub ok: bool,
    pub message: String,
}

struct SessionInner {
    orchestrator: SyncOrchestrator,
    engine: EngineSessionManager,
    artifact: FileTransport,
}

/// Coordinates export, refresh and live synchronization for one authoring session
pub struct ExportSession {
    config: ExportConfig,
    deployer: Box<dyn Deployer>,
    inner: Mutex<SessionInner>,
}

impl ExportSession {
    /// Session that deploys the runtime files named in `config`
    pub fn new(config: ExportConfig) -> Self {
        let deployer = RuntimeDeployer::from_config(&config);
        Self::with_deployer(config, deployer)
    }

    /// Session with a custom deployment step
    pub fn with_deployer(config: ExportConfig, deployer: impl Deployer + 'static) -> Self {
        let inner = SessionInner {
            orchestrator: SyncOrchestrator::new(),
            engine: EngineSessionManager::new(EngineConfig::from_export_config(&config)),
            artifact: FileTransport::new(&config.export.output_dir, config.export.artifact.clone()),
        };

        Self {
            config,
            deployer: Box::new(deployer),
            inner: Mutex::new(inner),
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Feed the host notifies entity changes through
    pub fn change_feed(&self) -> ChangeFeed {
        self.inner.lock().orchestrator.feed()
    }

    /// Deploy, write a full artifact and optionally start the runtime
    pub fn export<S: SceneSource + ?Sized>(&self, scene: &S) -> Result<ExportReport, ExportError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let output_dir = &self.config.export.output_dir;

        // A running runtime may hold its files open
        inner.engine.shutdown().map_err(ExportError::StopRuntime)?;

        fs::create_dir_all(output_dir).map_err(|e| ExportError::OutputDir {
            path: output_dir.clone(),
            reason: e.to_string(),
        })?;

        let deployed = self.deployer.deploy(output_dir)?;

        inner.orchestrator.request_full_resync("export requested");
        let outcome = inner
            .orchestrator
            .synchronize(scene, Generation::DETACHED, &mut inner.artifact)?;

        let engine = if self.config.runtime.run_after_export {
            let handle = inner.engine.start(
                output_dir,
                self.config.runtime.start_frame,
                self.config.runtime.profile,
            )?;
            inner
                .orchestrator
                .request_full_resync(&format!("runtime started ({})", handle.generation));
            Some(handle)
        } else {
            None
        };

        let report = ExportReport {
            artifact: inner.artifact.artifact_path(),
            records: outcome.records(),
            deployed: deployed.files,
            engine,
        };
        log::info!("Exported {} entities to {:?}", report.records, report.artifact);
        Ok(report)
    }

    /// Force the next synchronization to be a full export. No I/O.
    pub fn refresh(&self) {
        self.inner.lock().orchestrator.request_full_resync("refresh requested");
    }

    /// Push pending changes to the runtime, or to the artifact when none is alive
    pub fn synchronize<S: SceneSource + ?Sized>(&self, scene: &S) -> Result<SyncOutcome, ExportError> {
        let mut guard = self.inner.lock();
        let SessionInner {
            orchestrator,
            engine,
            artifact,
        } = &mut *guard;

        let live = engine.current().filter(|handle| engine.is_alive(*handle));
        let (generation, transport): (Generation, &mut dyn Transport) = match live {
            Some(handle) => (handle.generation, engine.transport_for(handle)?),
            None => (Generation::DETACHED, artifact as &mut dyn Transport),
        };

        Ok(orchestrator.synchronize(scene, generation, transport)?)
    }

    /// Stop the runtime if one is running
    pub fn stop_engine(&self) -> Result<(), ExportError> {
        self.inner.lock().engine.shutdown()?;
        Ok(())
    }

    /// Handle of the current runtime, if it is alive
    pub fn engine_handle(&self) -> Option<EngineHandle> {
        let mut inner = self.inner.lock();
        inner.engine.current().filter(|handle| inner.engine.is_alive(*handle))
    }

    pub fn full_resync_required(&self) -> bool {
        self.inner.lock().orchestrator.state().full_resync_required()
    }

    /// Revision of an entity as last delivered
    pub fn last_synced_revision(&self, id: EntityId) -> Option<Revision> {
        self.inner.lock().orchestrator.state().last_synced_revision(id)
    }

    /// Stop the runtime and forget all sync state
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if let Err(e) = inner.engine.shutdown() {
            log::error!("Failed to stop runtime: {}", e);
        }
        inner.orchestrator.reset();
    }

    /// Run a host action and report the outcome
    pub fn invoke<S: SceneSource + ?Sized>(&self, action: HostAction, scene: &S) -> HostResponse {
        match action {
            HostAction::Export => match self.export(scene) {
                Ok(report) => HostResponse {
                    ok: true,
                    message: match report.engine {
                        Some(handle) => format!(
                            "Exported {} entities, runtime started (pid {})",
                            report.records, handle.pid
                        ),
                        None => format!("Exported {} entities", report.records),
                    },
                },
                Err(e) => {
                    log::error!("Export failed: {}", e);
                    HostResponse {
                        ok: false,
                        message: e.diagnostic(),
                    }
                }
            },
            HostAction::Refresh => {
                self.refresh();
                HostResponse {
                    ok: true,
                    message: "Full resync scheduled".to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::NoDeploy;
    use crate::scene::MemoryScene;
    use relay_format::{EncodeError, EntityData, MaterialData};

    fn config(name: &str) -> ExportConfig {
        let mut config = ExportConfig::default();
        config.export.output_dir =
            std::env::temp_dir().join(format!("relay_session_{}_{}", name, std::process::id()));
        config.runtime.run_after_export = false;
        config
    }

    #[test]
    fn test_stage_names() {
        let err = ExportError::Sync(SyncError::Encoding(EncodeError::TooLarge("x".into())));
        assert_eq!(err.stage(), ExportStage::Encoding);
        assert!(err.diagnostic().starts_with("encoding failed"));

        let err = ExportError::Deploy(DeployError::Locked(PathBuf::from("a")));
        assert_eq!(err.stage(), ExportStage::Deployment);

        let err = ExportError::Launch(LaunchError::MissingRuntime(PathBuf::from("runner")));
        assert_eq!(err.stage(), ExportStage::ProcessStart);
    }

    #[test]
    fn test_stopping_old_runtime_is_a_deployment_failure() {
        let err = ExportError::StopRuntime(EngineError::Stop {
            pid: 42,
            reason: "operation not permitted".into(),
        });
        assert_eq!(err.stage(), ExportStage::Deployment);
        assert!(err.diagnostic().starts_with("deployment failed"));
        assert!(err.diagnostic().contains("operation not permitted"));

        // Stopping on request is still reported as a process error
        let err = ExportError::from(EngineError::NotRunning(Generation::DETACHED.next()));
        assert_eq!(err.stage(), ExportStage::ProcessStart);
    }

    #[test]
    fn test_refresh_is_pure_and_idempotent() {
        let config = config("refresh");
        let session = ExportSession::with_deployer(config.clone(), NoDeploy);
        let scene = MemoryScene::new();
        scene.connect(session.change_feed());
        scene.insert("m", EntityData::Material(MaterialData::default()));

        session.export(&scene).unwrap();
        assert!(!session.full_resync_required());

        assert!(session.invoke(HostAction::Refresh, &scene).ok);
        session.refresh();
        assert!(session.full_resync_required());

        let _ = fs::remove_dir_all(&config.export.output_dir);
    }
}
