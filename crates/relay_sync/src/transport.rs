//! Delivery of encoded streams to a runtime
//!
//! A [`Transport`] returns only once the receiving side has acknowledged the
//! stream. Two implementations exist:
//!
//! - [`FileTransport`]: artifact and update files in an output directory,
//!   each written to a temp file and renamed into place
//! - [`PipeTransport`]: framed messages over a child process's stdin/stdout

use relay_format::{
    list_updates, read_message, update_file_name, write_message, EncodedStream, ExporterMessage,
    FrameError, MessageId, RunnerMessage, StreamKind,
};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One stream handed to a transport
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub kind: StreamKind,
    pub record_count: u32,
    pub bytes: &'a [u8],
}

impl<'a> From<&'a EncodedStream> for Delivery<'a> {
    fn from(stream: &'a EncodedStream) -> Self {
        Self {
            kind: stream.kind,
            record_count: stream.record_count,
            bytes: &stream.bytes,
        }
    }
}

/// Confirmation from the receiving side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Records the receiver applied
    pub records: u32,
}

/// Delivery errors. After any of them the remote state is unverified.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Runtime channel error: {0}")]
    Frame(#[from] FrameError),

    #[error("Runtime rejected the stream: {0}")]
    Rejected(String),

    #[error("Reply to message {expected} carried id {got}")]
    UnexpectedReply { expected: u64, got: u64 },

    #[error("Transport is closed")]
    Closed,
}

/// Something that can deliver streams and wait for acknowledgement
pub trait Transport: Send {
    /// Deliver a stream; returns once it is acknowledged
    fn deliver(&mut self, delivery: &Delivery<'_>) -> Result<Acknowledgement, TransportError>;

    /// Orderly shutdown
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Writes streams as files in a directory
#[derive(Debug)]
pub struct FileTransport {
    dir: PathBuf,
    artifact: String,
    update_sequence: u32,
}

impl FileTransport {
    /// Deliver into `dir`, with manifests written to `artifact`
    pub fn new(dir: impl Into<PathBuf>, artifact: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            artifact: artifact.into(),
            update_sequence: 0,
        }
    }

    /// Directory streams are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the manifest artifact
    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(&self.artifact)
    }

    /// Sequence number of the last update written since the last manifest
    pub fn update_sequence(&self) -> u32 {
        self.update_sequence
    }

    fn remove_stale_updates(&self) -> Result<(), TransportError> {
        let updates = list_updates(&self.dir).map_err(|e| write_error(&self.dir, e))?;
        for (_, path) in updates {
            fs::remove_file(&path).map_err(|e| write_error(&path, e))?;
        }
        Ok(())
    }
}

impl Transport for FileTransport {
    fn deliver(&mut self, delivery: &Delivery<'_>) -> Result<Acknowledgement, TransportError> {
        match delivery.kind {
            StreamKind::Manifest => {
                let path = self.artifact_path();
                // Stale updates must be gone before the new manifest appears
                let temp_path = write_temp(&path, delivery.bytes)?;
                if let Err(e) = self.remove_stale_updates() {
                    let _ = fs::remove_file(&temp_path);
                    return Err(e);
                }
                commit(&temp_path, &path)?;
                self.update_sequence = 0;
                log::debug!("Wrote manifest to {:?} ({} bytes)", path, delivery.bytes.len());
            }
            StreamKind::Update => {
                let sequence = self.update_sequence + 1;
                let path = self.dir.join(update_file_name(sequence));
                write_atomic(&path, delivery.bytes)?;
                self.update_sequence = sequence;
                log::debug!("Wrote update {:?} ({} records)", path, delivery.record_count);
            }
        }

        Ok(Acknowledgement {
            records: delivery.record_count,
        })
    }

    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }
}

/// Write to a temp file beside `path`, then rename over it
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TransportError> {
    let temp_path = write_temp(path, bytes)?;
    commit(&temp_path, path)
}

fn write_temp(path: &Path, bytes: &[u8]) -> Result<PathBuf, TransportError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let written = (|| -> io::Result<()> {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(write_error(path, e));
    }
    Ok(temp_path)
}

fn commit(temp_path: &Path, path: &Path) -> Result<(), TransportError> {
    fs::rename(temp_path, path).map_err(|e| {
        let _ = fs::remove_file(temp_path);
        write_error(path, e)
    })
}

fn write_error(path: &Path, e: io::Error) -> TransportError {
    TransportError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Framed request/reply channel to a runtime
pub struct PipeTransport<W, R> {
    writer: W,
    reader: R,
    closed: bool,
}

impl<W: Write, R: Read> PipeTransport<W, R> {
    /// Wrap the runtime's input and output streams
    pub fn new(writer: W, reader: R) -> Self {
        Self {
            writer,
            reader,
            closed: false,
        }
    }

    fn request(&mut self, msg: &ExporterMessage) -> Result<RunnerMessage, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let id = MessageId::new();
        write_message(&mut self.writer, id, msg)?;
        let (reply_id, reply): (MessageId, RunnerMessage) = read_message(&mut self.reader)?;

        if reply_id != id {
            return Err(TransportError::UnexpectedReply {
                expected: id.raw(),
                got: reply_id.raw(),
            });
        }
        Ok(reply)
    }
}

impl<W: Write + Send, R: Read + Send> Transport for PipeTransport<W, R> {
    fn deliver(&mut self, delivery: &Delivery<'_>) -> Result<Acknowledgement, TransportError> {
        let msg = ExporterMessage::Load {
            stream: delivery.bytes.to_vec(),
        };

        match self.request(&msg)? {
            RunnerMessage::Ack { records } => Ok(Acknowledgement { records }),
            RunnerMessage::Rejected { reason } => Err(TransportError::Rejected(reason)),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        let result = match self.request(&ExporterMessage::Shutdown) {
            Ok(_) | Err(TransportError::Frame(FrameError::ConnectionClosed)) => Ok(()),
            Err(e) => Err(e),
        };
        self.closed = true;
        result
    }

    fn describe(&self) -> String {
        "pipe".to_string()
    }
}
