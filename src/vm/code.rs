use std::sync::Arc;

use crate::value::Value;

use super::instruction::{Instruction, Opcode};

/// Bytecode generation understood by this build of the interpreter.
pub const BYTECODE_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RoutineKind {
    Plain = 0,
    Generator = 1,
    Coroutine = 2,
    AsyncGenerator = 3,
}

impl RoutineKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RoutineKind::Plain),
            1 => Some(RoutineKind::Generator),
            2 => Some(RoutineKind::Coroutine),
            3 => Some(RoutineKind::AsyncGenerator),
            _ => None,
        }
    }

    pub fn is_resumable(self) -> bool {
        !matches!(self, RoutineKind::Plain)
    }
}

/// Whether a descriptor may still be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeState {
    Valid,
    /// Restored from a blob carrying another bytecode generation.
    Trapped { found: u32, expected: u32 },
}

pub(crate) struct CodeParts {
    pub key: String,
    pub name: String,
    pub kind: RoutineKind,
    pub version: u32,
    pub arity: u16,
    pub locals: u16,
    pub constants: Vec<Value>,
    pub children: Vec<Arc<CodeObject>>,
    pub instructions: Vec<Instruction>,
    pub state: CodeState,
}

/// Immutable compiled routine shared by every frame executing it.
#[derive(Debug)]
pub struct CodeObject {
    key: String,
    name: String,
    kind: RoutineKind,
    version: u32,
    arity: u16,
    locals: u16,
    constants: Vec<Value>,
    children: Vec<Arc<CodeObject>>,
    instructions: Vec<Instruction>,
    state: CodeState,
}

impl CodeObject {
    pub(crate) fn from_parts(parts: CodeParts) -> Self {
        Self {
            key: parts.key,
            name: parts.name,
            kind: parts.kind,
            version: parts.version,
            arity: parts.arity,
            locals: parts.locals.max(parts.arity),
            constants: parts.constants,
            children: parts.children,
            instructions: parts.instructions,
            state: parts.state,
        }
    }

    /// Placeholder descriptor for an activation owned by host code.
    pub(crate) fn native(label: &str) -> Self {
        Self::from_parts(CodeParts {
            key: format!("<native {label}>"),
            name: label.to_string(),
            kind: RoutineKind::Plain,
            version: BYTECODE_VERSION,
            arity: 0,
            locals: 0,
            constants: Vec::new(),
            children: Vec::new(),
            instructions: Vec::new(),
            state: CodeState::Valid,
        })
    }

    /// Registry key; anonymous routines get a synthesized one.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RoutineKind {
        self.kind
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn arity(&self) -> u16 {
        self.arity
    }

    pub fn locals(&self) -> u16 {
        self.locals
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    pub fn constant(&self, index: u32) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    pub fn children(&self) -> &[Arc<CodeObject>] {
        &self.children
    }

    pub fn child(&self, index: u32) -> Option<&Arc<CodeObject>> {
        self.children.get(index as usize)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction(&self, offset: u32) -> Option<&Instruction> {
        self.instructions.get(offset as usize)
    }

    pub fn first_opcode(&self) -> Option<Opcode> {
        self.instructions.first().map(|instruction| instruction.opcode)
    }

    pub fn state(&self) -> CodeState {
        self.state
    }

    pub fn is_trapped(&self) -> bool {
        matches!(self.state, CodeState::Trapped { .. })
    }

    /// Structural equality, used to decide whether a restored descriptor can
    /// be replaced by an already registered one.
    pub fn same_routine(&self, other: &CodeObject) -> bool {
        self.key == other.key
            && self.name == other.name
            && self.kind == other.kind
            && self.version == other.version
            && self.arity == other.arity
            && self.locals == other.locals
            && self.state == other.state
            && self.constants == other.constants
            && self.instructions == other.instructions
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(left, right)| Arc::ptr_eq(left, right) || left.same_routine(right))
    }
}
