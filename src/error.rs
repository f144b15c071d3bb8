use thiserror::Error;

use crate::policy::PolicyError;
use crate::snapshot::SnapshotError;
use crate::vm::VmError;

pub type TaskletResult<T> = Result<T, TaskletError>;

/// Coarse classification callers can branch on without matching every
/// variant of the layer-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotRestorable,
    VersionTrap,
    InvalidFrameExecution,
    Serialization,
    Deserialization,
    Io,
    Runtime,
    Config,
}

#[derive(Debug, Error)]
pub enum TaskletError {
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl TaskletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskletError::Vm(err) => err.kind(),
            TaskletError::Snapshot(err) => err.kind(),
            TaskletError::Policy(_) => ErrorKind::Config,
        }
    }
}

impl VmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::VersionTrap { .. } => ErrorKind::VersionTrap,
            VmError::InvalidFrameExecution { .. } => ErrorKind::InvalidFrameExecution,
            _ => ErrorKind::Runtime,
        }
    }
}

impl SnapshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::NotRestorable { .. } => ErrorKind::NotRestorable,
            SnapshotError::Serialization(_) | SnapshotError::Oversized(_) => {
                ErrorKind::Serialization
            }
            SnapshotError::Io { .. } => ErrorKind::Io,
            SnapshotError::Deserialization(_)
            | SnapshotError::InvalidHeader
            | SnapshotError::UnsupportedFormat(_)
            | SnapshotError::UnexpectedEof
            | SnapshotError::InvalidUtf8
            | SnapshotError::Malformed(_)
            | SnapshotError::CodeRejected { .. } => ErrorKind::Deserialization,
        }
    }
}
