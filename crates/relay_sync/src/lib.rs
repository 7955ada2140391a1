//! # Relay Sync - Scene Export & Live Synchronization
//!
//! Keeps a separate runtime process consistent with a scene the host keeps
//! editing, without restarting the runtime.
//!
//! ## Architecture
//!
//! ```text
//! Host edits ──► ChangeFeed ──► DeltaTracker ──┐
//!                                              ├──► SyncOrchestrator ──► Transport ──► Runtime
//! Host scene ──► SceneSource (snapshots) ──────┘            ▲
//!                                                           │
//!                        ExportSession (Export / Refresh) ──┴── EngineSessionManager
//! ```
//!
//! ## Key Concepts
//!
//! - **Full export**: the whole scene as a manifest; required after launch,
//!   refresh or any failure
//! - **Incremental update**: only entities whose revision advanced since the
//!   last acknowledged delivery
//! - **Generation**: launch counter of the runtime; state bound to one
//!   generation is void for the next
//! - **Detached artifact**: the manifest file in the output directory, the
//!   target when no runtime is alive

pub mod config;
pub mod delta;
pub mod deploy;
pub mod engine;
pub mod scene;
pub mod session;
pub mod sync;
pub mod transport;

pub use config::{ConfigError, ExportConfig, ExportSection, RuntimeSection, TransportMode, CONFIG_FILE};
pub use delta::{ChangeFeed, DeltaSet, DeltaTracker};
pub use deploy::{DeployError, DeployReport, Deployer, NoDeploy, RuntimeDeployer};
pub use engine::{
    EngineConfig, EngineError, EngineHandle, EngineSessionManager, Generation, LaunchError,
};
pub use scene::{MemoryScene, SceneSnapshot, SceneSource};
pub use session::{
    ExportError, ExportReport, ExportSession, ExportStage, HostAction, HostResponse,
};
pub use sync::{SyncError, SyncOrchestrator, SyncOutcome, SyncState};
pub use transport::{
    write_atomic, Acknowledgement, Delivery, FileTransport, PipeTransport, Transport,
    TransportError,
};
