//! Continuation capture and restore for cooperatively scheduled tasklets.
//!
//! A suspended [`Task`] keeps its whole call chain on the heap, so
//! [`snapshot::capture`] only has to walk existing frames to produce a
//! portable [`Snapshot`]. [`snapshot::restore`] rebuilds an equivalent task,
//! poisoning (rather than refusing) routines whose bytecode generation does
//! not match the running process.

pub mod codec;
pub mod concurrency;
pub mod engine;
pub mod error;
pub mod host;
pub mod policy;
pub mod registry;
pub mod snapshot;
pub mod value;
pub mod vm;

pub use codec::{BincodeCodec, CodecError, ValueCodec};
pub use concurrency::scheduler::{reinsert, Admission, CooperativeScheduler};
pub use engine::EngineConfig;
pub use error::{ErrorKind, TaskletError, TaskletResult};
pub use host::{FinalizerInstaller, NamedFinalizer, NoFinalizer};
pub use policy::{get_flags, set_flags, PickleFlags, PolicyConfig, PolicyError, PolicyRegistry};
pub use registry::CodeRegistry;
pub use snapshot::{
    capture, capture_with, inspect, restore, restore_all, restore_all_with, restore_with,
    Capturer, Diagnostic, Restored, Snapshot, SnapshotError, SnapshotInfo, Validator, Verdict,
};
pub use value::{Finalizer, NativeHandle, Value};
pub use vm::{
    CodeBuilder, CodeObject, CodeState, Frame, FrameOrigin, FrameValidity, GeneratorId,
    GeneratorObject, Instruction, Interpreter, Opcode, Phase, RoutineKind, RunOutcome, Task,
    TaskId, TaskState, VmError, BYTECODE_VERSION,
};
