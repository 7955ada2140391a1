//! Relay Runner
//!
//! Headless runtime that mirrors an exported scene. Started by the exporter
//! in the output directory:
//!
//! ```text
//! relay_runner --start-frame=<n> [--profile=<file>] [--once] [--poll-ms=<ms>]
//! ```
//!
//! `RELAY_SYNC=stdin` serves framed messages on stdin/stdout; `RELAY_SYNC=file`
//! (the default) loads the artifact and follows update files. Logs go to
//! stderr because stdout may carry frames.

mod profile;
mod runner;

use relay_format::{SyncMode, DEFAULT_ARTIFACT, SYNC_ENV_VAR};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use crate::runner::{Runner, RunnerError};

/// Command line options
#[derive(Debug, Clone, PartialEq)]
struct RunnerArgs {
    start_frame: u32,
    profile: Option<PathBuf>,
    /// Load once and exit (file mode only)
    once: bool,
    poll: Duration,
    artifact: String,
}

impl Default for RunnerArgs {
    fn default() -> Self {
        Self {
            start_frame: 0,
            profile: None,
            once: false,
            poll: Duration::from_millis(100),
            artifact: DEFAULT_ARTIFACT.to_string(),
        }
    }
}

impl RunnerArgs {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut parsed = Self::default();

        for arg in args {
            if let Some(value) = arg.strip_prefix("--start-frame=") {
                parsed.start_frame = value
                    .parse()
                    .map_err(|_| format!("Invalid start frame: {}", value))?;
            } else if let Some(value) = arg.strip_prefix("--profile=") {
                parsed.profile = Some(PathBuf::from(value));
            } else if let Some(value) = arg.strip_prefix("--poll-ms=") {
                let ms = value
                    .parse()
                    .map_err(|_| format!("Invalid poll interval: {}", value))?;
                parsed.poll = Duration::from_millis(ms);
            } else if let Some(value) = arg.strip_prefix("--artifact=") {
                parsed.artifact = value.to_string();
            } else if arg == "--once" {
                parsed.once = true;
            } else {
                log::warn!("Ignoring unknown argument {:?}", arg);
            }
        }

        Ok(parsed)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match RunnerArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let mode = match std::env::var(SYNC_ENV_VAR) {
        Ok(value) => match value.parse::<SyncMode>() {
            Ok(mode) => mode,
            Err(e) => {
                log::error!("{}", e);
                return ExitCode::from(2);
            }
        },
        Err(_) => SyncMode::File,
    };

    log::info!(
        "Relay runner starting at frame {} ({} sync)",
        args.start_frame,
        mode
    );

    let mut runner = Runner::new(args.artifact.clone(), args.start_frame);
    let result = run(&mut runner, mode, &args);

    let profile = runner.into_profile();
    if let Some(path) = &args.profile {
        match profile.write(path) {
            Ok(()) => log::info!("Profile written to {:?}", path),
            Err(e) => log::error!("Failed to write profile {:?}: {}", path, e),
        }
    }

    match result {
        Ok(()) => {
            log::info!("Runner exiting with {} entities", profile.entities);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(runner: &mut Runner, mode: SyncMode, args: &RunnerArgs) -> Result<(), RunnerError> {
    let dir = Path::new(".");

    match mode {
        SyncMode::Stdin => {
            // Start from the exported artifact when there is one
            if dir.join(&args.artifact).exists() {
                if let Err(e) = runner.load_dir(dir) {
                    log::warn!("{}", e);
                }
            }
            let mut reader = BufReader::new(io::stdin().lock());
            let mut writer = io::stdout().lock();
            runner.serve(&mut reader, &mut writer)
        }
        SyncMode::File => {
            runner.load_dir(dir)?;
            if args.once {
                return Ok(());
            }
            runner.watch(dir, args.poll)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<RunnerArgs, String> {
        RunnerArgs::parse(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--start-frame=48", "--profile=profile.json", "--once"]).unwrap();
        assert_eq!(parsed.start_frame, 48);
        assert_eq!(parsed.profile, Some(PathBuf::from("profile.json")));
        assert!(parsed.once);
        assert_eq!(parsed.artifact, "data.bin");
    }

    #[test]
    fn test_reject_negative_frame() {
        assert!(args(&["--start-frame=-1"]).is_err());
    }

    #[test]
    fn test_unknown_args_ignored() {
        assert_eq!(args(&["--fullscreen"]).unwrap(), RunnerArgs::default());
    }
}
