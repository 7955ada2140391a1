//! Runtime side of the exporter contract
//!
//! The runner keeps a [`SceneReplica`] and feeds it from one of two sources:
//!
//! - **stdin**: framed `Load`/`Shutdown` messages, each answered on stdout
//! - **file**: the artifact plus update files in the working directory

use relay_format::{
    list_updates, read_message, read_header, write_message, ExporterMessage, FrameError,
    MessageId, ReplicaError, RunnerMessage, SceneReplica, StreamKind,
};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

use crate::profile::Profile;

/// Runner errors
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Channel error: {0}")]
    Frame(#[from] FrameError),

    #[error("Failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Cannot apply {path}: {source}")]
    Apply {
        path: PathBuf,
        #[source]
        source: ReplicaError,
    },
}

/// Identity of the artifact on disk; a new manifest changes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArtifactStamp {
    len: u64,
    modified: Option<SystemTime>,
}

pub struct Runner {
    replica: SceneReplica,
    profile: Profile,
    artifact: String,
    loaded_stamp: Option<ArtifactStamp>,
    last_update: u32,
}

impl Runner {
    pub fn new(artifact: impl Into<String>, start_frame: u32) -> Self {
        Self {
            replica: SceneReplica::new(),
            profile: Profile::new(start_frame),
            artifact: artifact.into(),
            loaded_stamp: None,
            last_update: 0,
        }
    }

    pub fn replica(&self) -> &SceneReplica {
        &self.replica
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Final profile with the entity count at exit
    pub fn into_profile(mut self) -> Profile {
        self.profile.entities = self.replica.len();
        self.profile
    }

    /// Apply one stream, recording it in the profile
    pub fn apply(&mut self, source: &str, bytes: &[u8]) -> Result<u32, ReplicaError> {
        let start = Instant::now();
        let applied = match read_header(bytes) {
            Ok(header) => self.replica.apply_bytes(bytes).map(|records| (header.kind, records)),
            Err(e) => Err(e.into()),
        };

        let (kind, records) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                self.profile.rejected += 1;
                return Err(e);
            }
        };

        let took = start.elapsed();
        let entities = self.replica.len();
        match kind {
            StreamKind::Manifest => self.profile.record_manifest(source, records, bytes.len(), entities, took),
            StreamKind::Update => self.profile.record_update(source, records, bytes.len(), entities, took),
        }
        log::debug!("Applied {} from {}: {} records, {} entities", kind, source, records, entities);
        Ok(records)
    }

    /// Answer framed messages until `Shutdown` or end of input
    pub fn serve<R: Read, W: Write>(&mut self, reader: &mut R, writer: &mut W) -> Result<(), RunnerError> {
        loop {
            let (id, msg): (MessageId, ExporterMessage) = match read_message(reader) {
                Ok(received) => received,
                Err(FrameError::ConnectionClosed) => {
                    log::info!("Exporter closed the channel");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            match msg {
                ExporterMessage::Load { stream } => {
                    let reply = match self.apply("pipe", &stream) {
                        Ok(records) => RunnerMessage::Ack { records },
                        Err(e) => {
                            log::warn!("Rejected stream: {}", e);
                            RunnerMessage::Rejected { reason: e.to_string() }
                        }
                    };
                    write_message(writer, id, &reply)?;
                }
                ExporterMessage::Shutdown => {
                    log::info!("Shutdown requested");
                    write_message(writer, id, &RunnerMessage::Ack { records: 0 })?;
                    return Ok(());
                }
            }
        }
    }

    /// Load the artifact and every update file after it
    pub fn load_dir(&mut self, dir: &Path) -> Result<(), RunnerError> {
        let artifact = dir.join(&self.artifact);
        let stamp = stamp(&artifact)?;
        let bytes = read(&artifact)?;
        self.apply(&self.artifact.clone(), &bytes)
            .map_err(|source| RunnerError::Apply { path: artifact.clone(), source })?;

        self.loaded_stamp = Some(stamp);
        self.last_update = 0;
        log::info!("Loaded {:?}: {} entities", artifact, self.replica.len());

        self.apply_new_updates(dir)
    }

    /// Apply update files newer than the last one applied
    pub fn apply_new_updates(&mut self, dir: &Path) -> Result<(), RunnerError> {
        let updates = list_updates(dir).map_err(|e| io_error(dir, e))?;
        for (sequence, path) in updates {
            if sequence <= self.last_update {
                continue;
            }
            let bytes = read(&path)?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.apply(&name, &bytes)
                .map_err(|source| RunnerError::Apply { path: path.clone(), source })?;
            self.last_update = sequence;
        }
        Ok(())
    }

    /// Whether the artifact on disk differs from the one loaded
    pub fn artifact_changed(&self, dir: &Path) -> bool {
        match stamp(&dir.join(&self.artifact)) {
            Ok(stamp) => self.loaded_stamp != Some(stamp),
            Err(_) => false,
        }
    }

    /// Follow the directory until the process is stopped
    pub fn watch(&mut self, dir: &Path, poll: Duration) -> Result<(), RunnerError> {
        loop {
            thread::sleep(poll);
            let result = if self.artifact_changed(dir) {
                self.load_dir(dir)
            } else {
                self.apply_new_updates(dir)
            };
            // A file may be replaced while we read it; the next poll retries
            if let Err(e) = result {
                log::warn!("{}", e);
            }
        }
    }
}

fn stamp(path: &Path) -> Result<ArtifactStamp, RunnerError> {
    let meta = fs::metadata(path).map_err(|e| io_error(path, e))?;
    Ok(ArtifactStamp {
        len: meta.len(),
        modified: meta.modified().ok(),
    })
}

fn read(path: &Path) -> Result<Vec<u8>, RunnerError> {
    fs::read(path).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, e: io::Error) -> RunnerError {
    RunnerError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
