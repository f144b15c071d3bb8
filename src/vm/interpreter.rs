use std::sync::Arc;

use tracing::debug;

use crate::host::{self, FinalizerInstaller};
use crate::value::Value;

use super::code::{CodeObject, CodeState};
use super::error::VmError;
use super::frame::{Frame, Handler};
use super::generator::{FinalizerState, Flavor, GeneratorId, GeneratorObject, Phase};
use super::instruction::Opcode;
use super::task::{Task, TaskState};

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The task reached a cooperative `YIELD` and can be resumed later.
    Yielded,
    Finished(Value),
}

/// Executes tasks one slice at a time, between cooperative yield points.
pub struct Interpreter {
    installer: Arc<dyn FinalizerInstaller>,
    effects: Vec<Value>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_installer(host::current_finalizer_installer())
    }

    pub fn with_installer(installer: Arc<dyn FinalizerInstaller>) -> Self {
        Self {
            installer,
            effects: Vec::new(),
        }
    }

    /// Values emitted so far, in order.
    pub fn effects(&self) -> &[Value] {
        &self.effects
    }

    pub fn take_effects(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.effects)
    }

    /// Runs `task` until it yields or finishes. Any error kills the task.
    pub fn run(&mut self, task: &mut Task) -> Result<RunOutcome, VmError> {
        if task.state == TaskState::Dead {
            return Err(VmError::TaskFinished);
        }
        task.state = TaskState::Runnable;
        loop {
            match self.step(task) {
                Ok(None) => continue,
                Ok(Some(outcome)) => {
                    if let RunOutcome::Finished(value) = &outcome {
                        debug!(task = %task.id, result = %value, "task finished");
                    }
                    return Ok(outcome);
                }
                Err(err) => {
                    debug!(task = %task.id, error = %err, "task failed");
                    task.state = TaskState::Dead;
                    return Err(err);
                }
            }
        }
    }

    /// Runs `task` through every yield until it finishes.
    pub fn run_to_completion(&mut self, task: &mut Task) -> Result<Value, VmError> {
        loop {
            if let RunOutcome::Finished(value) = self.run(task)? {
                return Ok(value);
            }
        }
    }

    fn step(&mut self, task: &mut Task) -> Result<Option<RunOutcome>, VmError> {
        let Some(frame) = task.top.as_deref_mut() else {
            task.state = TaskState::Dead;
            task.result = Some(Value::Null);
            return Ok(Some(RunOutcome::Finished(Value::Null)));
        };
        frame.check_executable()?;
        let code = Arc::clone(&frame.code);
        let Some(instruction) = code.instruction(frame.ip).copied() else {
            return finish_frame(task, Value::Null);
        };
        frame.ip += 1;
        let a = instruction.operand_a;
        let b = instruction.operand_b;

        match instruction.opcode {
            Opcode::Nop => {}
            Opcode::LoadConst => {
                let value = code
                    .constant(a)
                    .cloned()
                    .ok_or_else(|| bad_operand(&code, "constant", a))?;
                frame.stack.push(value);
            }
            Opcode::LoadLocal => {
                let slot = frame
                    .locals
                    .get(a as usize)
                    .ok_or_else(|| bad_operand(&code, "local", a))?;
                let value = slot.clone().ok_or_else(|| VmError::UnboundLocal {
                    routine: code.key().to_string(),
                    slot: a,
                })?;
                frame.stack.push(value);
            }
            Opcode::StoreLocal => {
                let value = frame.pop()?;
                let slot = frame
                    .locals
                    .get_mut(a as usize)
                    .ok_or_else(|| bad_operand(&code, "local", a))?;
                *slot = Some(value);
            }
            Opcode::Pop => {
                frame.pop()?;
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.stack.push(arithmetic(instruction.opcode, lhs, rhs)?);
            }
            Opcode::Less => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.stack.push(Value::Boolean(less_than(&lhs, &rhs)?));
            }
            Opcode::Equal => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.stack.push(Value::Boolean(lhs == rhs));
            }
            Opcode::Not => {
                let value = frame.pop()?;
                frame.stack.push(Value::Boolean(!value.is_truthy()));
            }
            Opcode::Jump => frame.ip = a,
            Opcode::JumpIfFalse => {
                if !frame.pop()?.is_truthy() {
                    frame.ip = a;
                }
            }
            Opcode::Call => {
                let callee = code
                    .child(a)
                    .cloned()
                    .ok_or_else(|| bad_operand(&code, "callee", a))?;
                let args = frame.pop_args(b)?;
                task.push_frame(Frame::new(callee, args));
            }
            Opcode::Return => {
                let value = frame.stack.pop().unwrap_or(Value::Null);
                return finish_frame(task, value);
            }
            Opcode::Yield => {
                task.state = TaskState::Scheduled;
                return Ok(Some(RunOutcome::Yielded));
            }
            Opcode::Emit => {
                let value = frame.pop()?;
                self.effects.push(value);
            }
            Opcode::MakeGenerator => {
                let callee = code
                    .child(a)
                    .cloned()
                    .ok_or_else(|| bad_operand(&code, "callee", a))?;
                let args = frame.pop_args(b)?;
                let id = GeneratorId(task.generators.len() as u32);
                let kind = callee.kind();
                let mut body = Frame::new(callee, args);
                body.generator = Some(id);
                task.generators.push(GeneratorObject::new(kind, body));
                push_top(task, Value::Generator(id))?;
            }
            Opcode::ForIter => {
                let target = frame.pop()?;
                let id = target.as_generator().ok_or_else(|| {
                    VmError::TypeMismatch(format!("cannot iterate over {}", target.type_name()))
                })?;
                self.resume_generator(task, id)?;
            }
            Opcode::YieldValue => {
                let value = frame.pop()?;
                let id = frame
                    .generator
                    .ok_or_else(|| VmError::YieldOutsideGenerator(code.key().to_string()))?;
                let body = task
                    .pop_frame()
                    .ok_or_else(|| VmError::StackUnderflow(code.key().to_string()))?;
                let generator = generator_mut(task, id)?;
                generator.phase = Phase::Suspended;
                generator.frame = Some(body);
                push_top(task, value)?;
                push_top(task, Value::Boolean(true))?;
            }
            Opcode::SetupHandler => {
                let stack_depth = frame.stack.len() as u32;
                frame.handlers.push(Handler {
                    target: a,
                    stack_depth,
                });
            }
            Opcode::PopHandler => {
                frame.handlers.pop();
            }
            Opcode::Raise => {
                let value = frame.pop()?;
                return raise(task, value);
            }
            Opcode::TrapEntry => {
                // Hand-assembled traps carry no mismatch of their own.
                let (found, expected) = match code.state() {
                    CodeState::Trapped { found, expected } => (found, expected),
                    CodeState::Valid => (code.version(), code.version()),
                };
                return Err(VmError::VersionTrap {
                    routine: code.key().to_string(),
                    found,
                    expected,
                });
            }
            Opcode::Invalid => {
                return Err(VmError::InvalidFrameExecution {
                    routine: code.key().to_string(),
                    offset: frame.ip - 1,
                });
            }
        }
        Ok(None)
    }

    fn resume_generator(&mut self, task: &mut Task, id: GeneratorId) -> Result<(), VmError> {
        let generator = generator_mut(task, id)?;
        match generator.phase {
            Phase::Running => return Err(VmError::GeneratorRunning(id.0)),
            Phase::Exhausted => {
                push_top(task, Value::Null)?;
                return push_top(task, Value::Boolean(false));
            }
            Phase::NotStarted | Phase::Suspended => {}
        }
        if let Flavor::AsyncGenerator { finalizer } = &mut generator.flavor {
            if *finalizer == FinalizerState::Uninitialized {
                *finalizer = FinalizerState::Installed(self.installer.install());
            }
        }
        let body = generator
            .frame
            .take()
            .ok_or(VmError::UnknownGenerator(id.0))?;
        generator.phase = Phase::Running;
        task.push_boxed(body);
        Ok(())
    }
}

fn finish_frame(task: &mut Task, value: Value) -> Result<Option<RunOutcome>, VmError> {
    if let Some(done) = task.pop_frame() {
        if let Some(id) = done.generator {
            exhaust(task, id)?;
            push_top(task, value)?;
            push_top(task, Value::Boolean(false))?;
            return Ok(None);
        }
    }
    match task.top.as_deref_mut() {
        Some(caller) => {
            caller.stack.push(value);
            Ok(None)
        }
        None => {
            task.state = TaskState::Dead;
            task.result = Some(value.clone());
            Ok(Some(RunOutcome::Finished(value)))
        }
    }
}

fn raise(task: &mut Task, value: Value) -> Result<Option<RunOutcome>, VmError> {
    loop {
        let Some(frame) = task.top.as_deref_mut() else {
            return Err(VmError::Uncaught(value));
        };
        if let Some(handler) = frame.handlers.pop() {
            frame.stack.truncate(handler.stack_depth as usize);
            frame.stack.push(value);
            frame.ip = handler.target;
            return Ok(None);
        }
        if let Some(unwound) = task.pop_frame() {
            if let Some(id) = unwound.generator {
                exhaust(task, id)?;
            }
        }
    }
}

fn exhaust(task: &mut Task, id: GeneratorId) -> Result<(), VmError> {
    let generator = generator_mut(task, id)?;
    generator.phase = Phase::Exhausted;
    generator.frame = None;
    Ok(())
}

fn generator_mut(task: &mut Task, id: GeneratorId) -> Result<&mut GeneratorObject, VmError> {
    task.generators
        .get_mut(id.0 as usize)
        .ok_or(VmError::UnknownGenerator(id.0))
}

fn push_top(task: &mut Task, value: Value) -> Result<(), VmError> {
    let frame = task
        .top
        .as_deref_mut()
        .ok_or_else(|| VmError::StackUnderflow("<empty chain>".into()))?;
    frame.stack.push(value);
    Ok(())
}

fn bad_operand(code: &CodeObject, what: &'static str, index: u32) -> VmError {
    VmError::BadOperand {
        routine: code.key().to_string(),
        what,
        index,
    }
}

fn arithmetic(opcode: Opcode, lhs: Value, rhs: Value) -> Result<Value, VmError> {
    let overflow = || VmError::TypeMismatch(format!("integer overflow in {}", opcode.name()));
    match (opcode, lhs, rhs) {
        (Opcode::Add, Value::Integer(a), Value::Integer(b)) => {
            a.checked_add(b).map(Value::Integer).ok_or_else(overflow)
        }
        (Opcode::Sub, Value::Integer(a), Value::Integer(b)) => {
            a.checked_sub(b).map(Value::Integer).ok_or_else(overflow)
        }
        (Opcode::Mul, Value::Integer(a), Value::Integer(b)) => {
            a.checked_mul(b).map(Value::Integer).ok_or_else(overflow)
        }
        (Opcode::Add, Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (opcode, lhs, rhs) => match (as_float(&lhs), as_float(&rhs)) {
            (Some(a), Some(b)) => Ok(Value::Float(match opcode {
                Opcode::Add => a + b,
                Opcode::Sub => a - b,
                _ => a * b,
            })),
            _ => Err(VmError::TypeMismatch(format!(
                "unsupported operands for {}: {} and {}",
                opcode.name(),
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn less_than(lhs: &Value, rhs: &Value) -> Result<bool, VmError> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Ok(a < b),
        (Value::String(a), Value::String(b)) => Ok(a < b),
        _ => match (as_float(lhs), as_float(rhs)) {
            (Some(a), Some(b)) => Ok(a < b),
            _ => Err(VmError::TypeMismatch(format!(
                "cannot order {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(int) => Some(*int as f64),
        Value::Float(float) => Some(*float),
        _ => None,
    }
}
