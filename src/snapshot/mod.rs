//! Capture and restore of suspended tasks.
//!
//! [`capture`] walks a task's heap-resident frame chain and generator table
//! into a self-describing, versioned blob; [`restore`] validates every
//! embedded routine against the running bytecode version and rebuilds an
//! equivalent task. Incompatible routines are trapped, corrupt frames are
//! marked invalid, and both only fail once something tries to execute them.

pub mod capture;
pub mod format;
pub mod restore;
pub mod validate;

use std::fmt;
use std::fs;
use std::io;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::CodecError;
use crate::policy::PickleFlags;
use crate::vm::TaskId;

pub use capture::{capture, capture_with, Capturer};
pub use format::{CodeRecord, RawInstruction, FORMAT_VERSION, MAGIC};
pub use restore::{restore, restore_all, restore_all_with, restore_with, Diagnostic, Restored};
pub use validate::{Validator, Verdict};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("{task} is not restorable: activation '{frame}' is opaque")]
    NotRestorable { task: TaskId, frame: String },
    #[error("serialization failed: {0}")]
    Serialization(#[source] CodecError),
    #[error("length {0} does not fit in a snapshot")]
    Oversized(usize),
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] CodecError),
    #[error("invalid snapshot header")]
    InvalidHeader,
    #[error("unsupported snapshot format {0}")]
    UnsupportedFormat(u16),
    #[error("unexpected end of snapshot")]
    UnexpectedEof,
    #[error("invalid utf-8 sequence in snapshot")]
    InvalidUtf8,
    #[error("malformed snapshot: {0}")]
    Malformed(String),
    #[error("routine '{key}' rejected: {reason}")]
    CodeRejected { key: String, reason: String },
    #[error("snapshot i/o failed on {path}")]
    Io {
        path: String,
        #[source]
        source: IoFailure,
    },
}

impl SnapshotError {
    fn io(path: &Path, err: io::Error) -> Self {
        SnapshotError::Io {
            path: path.display().to_string(),
            source: IoFailure(Arc::new(err)),
        }
    }
}

/// Shared [`io::Error`]; two failures compare equal when their kinds match.
#[derive(Debug, Clone)]
pub struct IoFailure(Arc<io::Error>);

impl IoFailure {
    pub fn kind(&self) -> io::ErrorKind {
        self.0.kind()
    }

    pub fn get_ref(&self) -> &io::Error {
        &self.0
    }
}

impl PartialEq for IoFailure {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
    }
}

impl Eq for IoFailure {}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for IoFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Serialized form of one or more suspended tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    bytes: Vec<u8>,
}

impl Snapshot {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        fs::write(path, &self.bytes).map_err(|err| SnapshotError::io(path, err))
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        fs::read(path)
            .map(Self::from_bytes)
            .map_err(|err| SnapshotError::io(path, err))
    }
}

impl AsRef<[u8]> for Snapshot {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeInfo {
    pub key: String,
    pub name: String,
    pub version: u32,
    pub trapped: bool,
    pub instruction_count: usize,
    /// Absolute byte range of the routine's instructions in the blob.
    pub instruction_span: Range<usize>,
}

/// Header-level view of a blob; nothing is decoded or rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub format_version: u16,
    pub flags: PickleFlags,
    pub codes: Vec<CodeInfo>,
    pub task_count: usize,
}

impl SnapshotInfo {
    pub fn code(&self, key: &str) -> Option<&CodeInfo> {
        self.codes.iter().find(|code| code.key == key)
    }
}

pub fn inspect(snapshot: &Snapshot) -> Result<SnapshotInfo, SnapshotError> {
    let container = format::parse(snapshot.as_bytes())?;
    Ok(SnapshotInfo {
        format_version: container.format,
        flags: container.flags,
        codes: container
            .codes
            .into_iter()
            .map(|record| CodeInfo {
                instruction_count: record.instructions.len(),
                key: record.key,
                name: record.name,
                version: record.version,
                trapped: record.trapped,
                instruction_span: record.instruction_span,
            })
            .collect(),
        task_count: container.tasks.len(),
    })
}
