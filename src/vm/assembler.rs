//! Hand assembly of code descriptors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::value::Value;

use super::code::{CodeObject, CodeParts, CodeState, RoutineKind, BYTECODE_VERSION};
use super::error::VmError;
use super::instruction::{Instruction, Opcode};

const ANONYMOUS: &str = "<lambda>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
pub struct CodeBuilder {
    key: Option<String>,
    name: String,
    kind: RoutineKind,
    version: u32,
    arity: u16,
    locals: u16,
    constants: Vec<Value>,
    children: Vec<Arc<CodeObject>>,
    instructions: Vec<Instruction>,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>, kind: RoutineKind) -> Self {
        Self {
            key: None,
            name: name.into(),
            kind,
            version: BYTECODE_VERSION,
            arity: 0,
            locals: 0,
            constants: Vec::new(),
            children: Vec::new(),
            instructions: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Anonymous routine; its registry key is synthesized on `build`.
    pub fn lambda(kind: RoutineKind) -> Self {
        Self::new(ANONYMOUS, kind)
    }

    pub fn key(&mut self, key: impl Into<String>) -> &mut Self {
        self.key = Some(key.into());
        self
    }

    /// Overrides the version tag, e.g. to emulate code compiled elsewhere.
    pub fn version(&mut self, version: u32) -> &mut Self {
        self.version = version;
        self
    }

    pub fn arity(&mut self, arity: u16) -> &mut Self {
        self.arity = arity;
        self
    }

    pub fn locals(&mut self, locals: u16) -> &mut Self {
        self.locals = locals;
        self
    }

    pub fn constant(&mut self, value: Value) -> u32 {
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    pub fn child(&mut self, code: Arc<CodeObject>) -> u32 {
        self.children.push(code);
        (self.children.len() - 1) as u32
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) -> &mut Self {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.instructions.len() as u32);
        }
        self
    }

    pub fn offset(&self) -> u32 {
        self.instructions.len() as u32
    }

    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.op_ab(opcode, 0, 0)
    }

    pub fn op_a(&mut self, opcode: Opcode, operand_a: u32) -> &mut Self {
        self.op_ab(opcode, operand_a, 0)
    }

    pub fn op_ab(&mut self, opcode: Opcode, operand_a: u32, operand_b: u32) -> &mut Self {
        self.instructions
            .push(Instruction::new(opcode, operand_a, operand_b));
        self
    }

    /// Emits a branch whose target is patched once `label` is bound.
    pub fn branch(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        self.fixups.push((self.instructions.len(), label));
        self.op(opcode)
    }

    pub fn build(self) -> Result<Arc<CodeObject>, VmError> {
        let CodeBuilder {
            key,
            name,
            kind,
            version,
            arity,
            locals,
            constants,
            children,
            mut instructions,
            labels,
            fixups,
        } = self;

        for (position, label) in fixups {
            let target = labels
                .get(label.0)
                .copied()
                .flatten()
                .ok_or_else(|| VmError::Assembly(format!("{name}: label {} is unbound", label.0)))?;
            let instruction = &mut instructions[position];
            if !instruction.opcode.is_branch() {
                return Err(VmError::Assembly(format!(
                    "{name}: {} at {position} cannot take a label",
                    instruction.opcode.name()
                )));
            }
            instruction.operand_a = target;
        }

        for (position, instruction) in instructions.iter().enumerate() {
            check_operands(&name, position, instruction, &constants, &children, instructions.len())?;
        }

        let key = key.unwrap_or_else(|| {
            if name == ANONYMOUS {
                static NEXT_LAMBDA: AtomicU64 = AtomicU64::new(1);
                format!("{ANONYMOUS}#{}", NEXT_LAMBDA.fetch_add(1, Ordering::SeqCst))
            } else {
                name.clone()
            }
        });

        Ok(Arc::new(CodeObject::from_parts(CodeParts {
            key,
            name,
            kind,
            version,
            arity,
            locals,
            constants,
            children,
            instructions,
            state: CodeState::Valid,
        })))
    }
}

fn check_operands(
    name: &str,
    position: usize,
    instruction: &Instruction,
    constants: &[Value],
    children: &[Arc<CodeObject>],
    length: usize,
) -> Result<(), VmError> {
    let operand = instruction.operand_a as usize;
    let problem = match instruction.opcode {
        Opcode::LoadConst if operand >= constants.len() => Some("constant index out of range"),
        opcode if opcode.is_branch() && operand > length => Some("branch target out of range"),
        Opcode::Call => match children.get(operand) {
            None => Some("callee index out of range"),
            Some(child) if child.kind().is_resumable() => {
                Some("CALL on a resumable routine; use MAKE_GENERATOR")
            }
            Some(_) => None,
        },
        Opcode::MakeGenerator => match children.get(operand) {
            None => Some("callee index out of range"),
            Some(child) if !child.kind().is_resumable() => {
                Some("MAKE_GENERATOR on a plain routine")
            }
            Some(_) => None,
        },
        _ => None,
    };
    match problem {
        Some(problem) => Err(VmError::Assembly(format!(
            "{name}: {} at {position}: {problem}",
            instruction.opcode.name()
        ))),
        None => Ok(()),
    }
}
