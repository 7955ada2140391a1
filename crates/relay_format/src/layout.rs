//! On-disk layout shared by the exporter and the runtime
//!
//! The output directory holds the artifact (a manifest) and, when streams are
//! delivered as files, numbered update batches that apply on top of it.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default artifact file name
pub const DEFAULT_ARTIFACT: &str = "data.bin";

/// Environment variable telling the runtime how streams reach it
pub const SYNC_ENV_VAR: &str = "RELAY_SYNC";

const UPDATE_PREFIX: &str = "update_";
const UPDATE_SUFFIX: &str = ".bin";

/// How the runtime receives streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Framed messages on stdin, replies on stdout
    Stdin,
    /// Artifact and update files in the working directory
    File,
}

impl SyncMode {
    /// Value used in [`SYNC_ENV_VAR`]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::File => "file",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdin" | "pipe" => Ok(Self::Stdin),
            "file" => Ok(Self::File),
            _ => Err(format!("Unknown sync mode: {}", s)),
        }
    }
}

/// File name of the update batch with the given sequence number
pub fn update_file_name(sequence: u32) -> String {
    format!("{}{:06}{}", UPDATE_PREFIX, sequence, UPDATE_SUFFIX)
}

/// Sequence number encoded in an update file name
pub fn update_sequence(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(UPDATE_PREFIX)?
        .strip_suffix(UPDATE_SUFFIX)?
        .parse()
        .ok()
}

/// Update files in `dir`, ordered by sequence number
pub fn list_updates(dir: &Path) -> io::Result<Vec<(u32, PathBuf)>> {
    let mut updates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(sequence) = name.to_str().and_then(update_sequence) {
            updates.push((sequence, entry.path()));
        }
    }
    updates.sort_by_key(|(sequence, _)| *sequence);
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_file_names() {
        assert_eq!(update_file_name(7), "update_000007.bin");
        assert_eq!(update_sequence("update_000007.bin"), Some(7));
        assert_eq!(update_sequence("update_x.bin"), None);
        assert_eq!(update_sequence("data.bin"), None);
        assert_eq!(update_sequence(".update_000001.bin.tmp"), None);
    }

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!("stdin".parse::<SyncMode>(), Ok(SyncMode::Stdin));
        assert_eq!("FILE".parse::<SyncMode>(), Ok(SyncMode::File));
        assert!("socket".parse::<SyncMode>().is_err());
    }
}
