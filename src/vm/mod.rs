//! Cooperative interpreter whose activation records live on the heap.

pub mod assembler;
pub mod code;
pub mod error;
pub mod frame;
pub mod generator;
pub mod instruction;
pub mod interpreter;
pub mod task;

pub use assembler::{CodeBuilder, Label};
pub use code::{CodeObject, CodeState, RoutineKind, BYTECODE_VERSION};
pub use error::VmError;
pub use frame::{Frame, FrameChain, FrameOrigin, FrameValidity, Handler, LocalSlot};
pub use generator::{FinalizerState, Flavor, GeneratorId, GeneratorObject, Phase};
pub use instruction::{Instruction, Opcode, UnknownOpcode};
pub use interpreter::{Interpreter, RunOutcome};
pub use task::{Task, TaskId, TaskState};
