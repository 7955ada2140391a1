//! Load profile written on exit when `--profile` is given

use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// One applied stream
#[derive(Debug, Clone, Serialize)]
pub struct LoadEvent {
    /// Where the stream came from (`pipe` or a file name)
    pub source: String,
    pub records: u32,
    pub bytes: usize,
    /// Entities held after applying
    pub entities: usize,
    pub micros: u64,
}

/// Everything the runner did, in order
#[derive(Debug, Clone, Default, Serialize)]
pub struct Profile {
    pub start_frame: u32,
    pub manifests: Vec<LoadEvent>,
    pub updates: Vec<LoadEvent>,
    pub rejected: u32,
    /// Entities held at exit
    pub entities: usize,
}

impl Profile {
    pub fn new(start_frame: u32) -> Self {
        Self {
            start_frame,
            ..Default::default()
        }
    }

    pub fn record_manifest(&mut self, source: &str, records: u32, bytes: usize, entities: usize, took: Duration) {
        self.manifests.push(event(source, records, bytes, entities, took));
    }

    pub fn record_update(&mut self, source: &str, records: u32, bytes: usize, entities: usize, took: Duration) {
        self.updates.push(event(source, records, bytes, entities, took));
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

fn event(source: &str, records: u32, bytes: usize, entities: usize, took: Duration) -> LoadEvent {
    LoadEvent {
        source: source.to_string(),
        records,
        bytes,
        entities,
        micros: took.as_micros() as u64,
    }
}
