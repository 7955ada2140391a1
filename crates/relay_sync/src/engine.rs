//! Engine Session Manager - lifecycle of the runtime process
//!
//! Each successful launch gets a new [`Generation`]. State synchronized with
//! one generation means nothing to the next, so the orchestrator compares
//! generations before sending an incremental update.
//!
//! Generation 0 is reserved for the detached artifact in the output
//! directory, used when no runtime is alive.

use relay_format::SYNC_ENV_VAR;
use std::fmt;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{ExportConfig, TransportMode};
use crate::transport::{FileTransport, PipeTransport, Transport};

/// Launch counter of the runtime process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    /// The artifact on disk, not bound to any process
    pub const DETACHED: Generation = Generation(0);

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen {}", self.0)
    }
}

/// One launched runtime process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHandle {
    pub generation: Generation,
    pub pid: u32,
}

/// Launch errors. A failed launch is never retried automatically.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Runtime executable {0} not found; export the runtime first")]
    MissingRuntime(PathBuf),

    #[error("Permission denied launching {0}")]
    PermissionDenied(PathBuf),

    #[error("A runtime is already running ({0})")]
    AlreadyRunning(Generation),

    #[error("Failed to launch {path}: {reason}")]
    Spawn { path: PathBuf, reason: String },
}

/// Errors on an existing session
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No runtime is running for {0}")]
    NotRunning(Generation),

    #[error("Failed to stop runtime {pid}: {reason}")]
    Stop { pid: u32, reason: String },
}

/// Launch parameters that do not change between launches
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub executable: PathBuf,
    pub transport: TransportMode,
    pub artifact: String,
    pub profile_file: String,
    pub shutdown_timeout: Duration,
}

impl EngineConfig {
    pub fn from_export_config(config: &ExportConfig) -> Self {
        Self {
            executable: config.runtime.executable.clone(),
            transport: config.runtime.transport,
            artifact: config.export.artifact.clone(),
            profile_file: config.runtime.profile_file.clone(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

struct RunningEngine {
    handle: EngineHandle,
    child: Child,
    transport: Box<dyn Transport>,
}

/// Owns at most one runtime process and its transport
pub struct EngineSessionManager {
    config: EngineConfig,
    generation: Generation,
    running: Option<RunningEngine>,
}

impl EngineSessionManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            generation: Generation::DETACHED,
            running: None,
        }
    }

    /// Generation of the most recent successful launch
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Handle of the current process, alive or not
    pub fn current(&self) -> Option<EngineHandle> {
        self.running.as_ref().map(|running| running.handle)
    }

    /// Launch the runtime in `working_dir`
    pub fn start(
        &mut self,
        working_dir: &Path,
        start_frame: u32,
        profiling: bool,
    ) -> Result<EngineHandle, LaunchError> {
        if let Some(handle) = self.current() {
            if self.is_alive(handle) {
                return Err(LaunchError::AlreadyRunning(handle.generation));
            }
            self.running = None;
        }

        let executable = if self.config.executable.is_absolute() {
            self.config.executable.clone()
        } else {
            working_dir.join(&self.config.executable)
        };
        if !executable.is_file() {
            return Err(LaunchError::MissingRuntime(executable));
        }

        let mut command = Command::new(&executable);
        command
            .current_dir(working_dir)
            .arg(format!("--start-frame={}", start_frame))
            .env(SYNC_ENV_VAR, self.config.transport.sync_mode().as_str())
            .stderr(Stdio::inherit());
        if profiling {
            command.arg(format!("--profile={}", self.config.profile_file));
        }
        match self.config.transport {
            TransportMode::Pipe => command.stdin(Stdio::piped()).stdout(Stdio::piped()),
            TransportMode::File => command.stdin(Stdio::null()).stdout(Stdio::null()),
        };

        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LaunchError::MissingRuntime(executable.clone()),
            io::ErrorKind::PermissionDenied => LaunchError::PermissionDenied(executable.clone()),
            _ => LaunchError::Spawn {
                path: executable.clone(),
                reason: e.to_string(),
            },
        })?;

        let transport: Box<dyn Transport> = match self.config.transport {
            TransportMode::Pipe => match pipe_transport(&mut child) {
                Some(transport) => Box::new(transport),
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(LaunchError::Spawn {
                        path: executable,
                        reason: "runtime stdio was not captured".to_string(),
                    });
                }
            },
            TransportMode::File => Box::new(FileTransport::new(working_dir, self.config.artifact.clone())),
        };

        self.generation = self.generation.next();
        let handle = EngineHandle {
            generation: self.generation,
            pid: child.id(),
        };
        log::info!(
            "Started runtime {:?} (pid {}, {}, {} transport)",
            executable,
            handle.pid,
            handle.generation,
            self.config.transport
        );

        self.running = Some(RunningEngine {
            handle,
            child,
            transport,
        });
        Ok(handle)
    }

    /// Whether the process behind `handle` is still running. Never blocks.
    pub fn is_alive(&mut self, handle: EngineHandle) -> bool {
        let Some(running) = self.running.as_mut() else {
            return false;
        };
        if running.handle != handle {
            return false;
        }

        match running.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log::info!("Runtime {} exited with {}", handle.generation, status);
                false
            }
            Err(e) => {
                log::warn!("Cannot query runtime {}: {}", handle.pid, e);
                false
            }
        }
    }

    /// Ask the runtime to exit, killing it after the grace period
    pub fn stop(&mut self, handle: EngineHandle) -> Result<(), EngineError> {
        let mut running = match self.running.take() {
            Some(running) if running.handle == handle => running,
            other => {
                self.running = other;
                return Err(EngineError::NotRunning(handle.generation));
            }
        };

        if let Err(e) = running.transport.close() {
            log::warn!("Runtime {} did not accept shutdown: {}", handle.generation, e);
        }

        let deadline = Instant::now() + self.config.shutdown_timeout;
        loop {
            match running.child.try_wait() {
                Ok(Some(status)) => {
                    log::info!("Runtime {} stopped ({})", handle.generation, status);
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Cannot query runtime {}: {}", handle.pid, e);
                    break;
                }
            }
        }

        log::warn!("Runtime {} did not exit in time, killing it", handle.generation);
        let stop_error = |e: io::Error| EngineError::Stop {
            pid: handle.pid,
            reason: e.to_string(),
        };
        if let Err(e) = running.child.kill() {
            // Already exited between the last poll and the kill
            if e.kind() != io::ErrorKind::InvalidInput {
                return Err(stop_error(e));
            }
        }
        running.child.wait().map_err(stop_error)?;
        Ok(())
    }

    /// Stop whatever is running
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        match self.current() {
            Some(handle) => self.stop(handle),
            None => Ok(()),
        }
    }

    /// Transport bound to the process behind `handle`
    pub fn transport_for(&mut self, handle: EngineHandle) -> Result<&mut dyn Transport, EngineError> {
        match self.running.as_mut() {
            Some(running) if running.handle == handle => Ok(running.transport.as_mut()),
            _ => Err(EngineError::NotRunning(handle.generation)),
        }
    }
}

impl Drop for EngineSessionManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Failed to stop runtime on teardown: {}", e);
        }
    }
}

fn pipe_transport(child: &mut Child) -> Option<PipeTransport<ChildStdin, BufReader<ChildStdout>>> {
    let stdin = child.stdin.take()?;
    let stdout = child.stdout.take()?;
    Some(PipeTransport::new(stdin, BufReader::new(stdout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn config(executable: &str) -> EngineConfig {
        EngineConfig {
            executable: PathBuf::from(executable),
            transport: TransportMode::File,
            artifact: "data.bin".to_string(),
            profile_file: "profile.json".to_string(),
            shutdown_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_missing_runtime_does_not_bump_generation() {
        let dir = env::temp_dir().join(format!("relay_engine_missing_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let mut engine = EngineSessionManager::new(config("no_such_runner"));
        let err = engine.start(&dir, 0, false).unwrap_err();

        assert!(matches!(err, LaunchError::MissingRuntime(_)));
        assert_eq!(engine.generation(), Generation::DETACHED);
        assert!(engine.current().is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unknown_handle() {
        let mut engine = EngineSessionManager::new(config("runner"));
        let handle = EngineHandle {
            generation: Generation::DETACHED.next(),
            pid: 1,
        };

        assert!(!engine.is_alive(handle));
        assert!(matches!(engine.stop(handle), Err(EngineError::NotRunning(_))));
        assert!(engine.transport_for(handle).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_start_and_stop_process() {
        use std::os::unix::fs::PermissionsExt;

        if !Path::new("/bin/sh").exists() {
            return;
        }
        let dir = env::temp_dir().join(format!("relay_engine_script_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        // Stays alive whatever arguments it is given
        let script = dir.join("runner.sh");
        fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut engine = EngineSessionManager::new(config(&script.to_string_lossy()));
        let handle = engine.start(&dir, 30, false).unwrap();
        assert_eq!(handle.generation.raw(), 1);
        assert!(engine.is_alive(handle));
        assert!(matches!(
            engine.start(&dir, 30, false),
            Err(LaunchError::AlreadyRunning(generation)) if generation == handle.generation
        ));

        // Killed after the grace period
        engine.shutdown().unwrap();
        assert!(engine.current().is_none());
        assert!(!engine.is_alive(handle));
        assert_eq!(engine.generation(), handle.generation);

        let _ = fs::remove_dir_all(&dir);
    }
}
