use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    /// The routine was restored from an incompatible bytecode generation.
    #[error("routine '{routine}' was compiled for bytecode version {found}, runtime supports {expected}")]
    VersionTrap {
        routine: String,
        found: u32,
        expected: u32,
    },
    /// The frame's instruction stream was found corrupt when it was restored.
    #[error("frame of routine '{routine}' at offset {offset} has a corrupt instruction stream")]
    InvalidFrameExecution { routine: String, offset: u32 },
    #[error("activation '{0}' is owned by host code and cannot be interpreted")]
    OpaqueFrame(String),
    #[error("task has already finished")]
    TaskFinished,
    #[error("operand stack underflow in '{0}'")]
    StackUnderflow(String),
    #[error("local slot {slot} of '{routine}' is unbound")]
    UnboundLocal { routine: String, slot: u32 },
    #[error("'{routine}' has no {what} at index {index}")]
    BadOperand {
        routine: String,
        what: &'static str,
        index: u32,
    },
    #[error("type error: {0}")]
    TypeMismatch(String),
    #[error("generator {0} is already running")]
    GeneratorRunning(u32),
    #[error("unknown generator {0}")]
    UnknownGenerator(u32),
    #[error("YIELD_VALUE outside of a generator frame in '{0}'")]
    YieldOutsideGenerator(String),
    #[error("uncaught exception: {0}")]
    Uncaught(Value),
    #[error("assembly error: {0}")]
    Assembly(String),
}
