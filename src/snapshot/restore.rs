use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::ValueCodec;
use crate::engine::EngineConfig;
use crate::host::FinalizerInstaller;
use crate::policy::PickleFlags;
use crate::value::Value;
use crate::vm::code::CodeParts;
use crate::vm::{
    CodeObject, CodeState, FinalizerState, Flavor, Frame, FrameValidity, GeneratorId,
    GeneratorObject, Handler, Instruction, Opcode, Phase, RoutineKind, Task, TaskId, TaskState,
};

use super::format::{
    self, CodeRecord, Reader, FINALIZER_MARKER, FINALIZER_RESET, FINALIZER_UNINITIALIZED,
    FINALIZER_VALUE, VALIDITY_INVALID, VALIDITY_VALID,
};
use super::validate::{Validator, Verdict};
use super::{Snapshot, SnapshotError};

/// Problems found and contained while restoring. Each one also goes out as a
/// `warn!` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The routine was rebuilt but poisoned; executing it fails.
    VersionTrap {
        key: String,
        found: u32,
        expected: u32,
    },
    /// The frame's instruction stream is corrupt; resuming it fails.
    InvalidFrame { task: TaskId, routine: String },
}

#[derive(Debug)]
pub struct Restored {
    pub tasks: Vec<Task>,
    pub diagnostics: Vec<Diagnostic>,
    /// Flags that were in effect when the blob was captured.
    pub flags: PickleFlags,
}

pub fn restore(snapshot: &Snapshot) -> Result<Task, SnapshotError> {
    restore_with(snapshot, &EngineConfig::default())
}

/// Restores a blob holding exactly one task.
pub fn restore_with(snapshot: &Snapshot, config: &EngineConfig) -> Result<Task, SnapshotError> {
    let rebuilt = rebuild(snapshot, config)?;
    let count = rebuilt.restored.tasks.len();
    if count != 1 {
        return Err(SnapshotError::Malformed(format!(
            "expected exactly one task, found {count}"
        )));
    }
    let mut restored = rebuilt.commit(config);
    restored
        .tasks
        .pop()
        .ok_or_else(|| SnapshotError::Malformed("expected exactly one task, found 0".into()))
}

pub fn restore_all(snapshot: &Snapshot) -> Result<Restored, SnapshotError> {
    restore_all_with(snapshot, &EngineConfig::default())
}

pub fn restore_all_with(
    snapshot: &Snapshot,
    config: &EngineConfig,
) -> Result<Restored, SnapshotError> {
    Ok(rebuild(snapshot, config)?.commit(config))
}

/// A fully decoded blob whose new routines are not yet in the registry.
struct Rebuilt {
    restored: Restored,
    fresh: Vec<Arc<CodeObject>>,
}

impl Rebuilt {
    fn commit(self, config: &EngineConfig) -> Restored {
        for code in &self.fresh {
            config.registry.register_if_absent(code);
        }
        self.restored
    }
}

fn rebuild(snapshot: &Snapshot, config: &EngineConfig) -> Result<Rebuilt, SnapshotError> {
    let flags = config.policy.snapshot();
    let container = format::parse(snapshot.as_bytes())?;
    let mut restorer = Restorer {
        config,
        codec: config.codec.as_ref(),
        installer: config.installer(),
        reset_finalizers: flags.contains(PickleFlags::RESET_FINALIZER),
        codes: Vec::with_capacity(container.codes.len()),
        fresh: Vec::new(),
        diagnostics: Vec::new(),
    };

    let validator = Validator::new(config.accepted_version);
    for record in &container.codes {
        let verdict = validator.validate(record);
        let code = restorer.build_code(record, verdict)?;
        restorer.codes.push(code);
    }

    let mut tasks = Vec::with_capacity(container.tasks.len());
    for bytes in &container.tasks {
        tasks.push(restorer.read_task(bytes)?);
    }
    debug!(
        tasks = tasks.len(),
        codes = restorer.codes.len(),
        registered = restorer.fresh.len(),
        diagnostics = restorer.diagnostics.len(),
        capture_flags = %container.flags,
        restore_flags = %flags,
        "snapshot restored"
    );
    Ok(Rebuilt {
        restored: Restored {
            tasks,
            diagnostics: restorer.diagnostics,
            flags: container.flags,
        },
        fresh: restorer.fresh,
    })
}

struct Restorer<'c> {
    config: &'c EngineConfig,
    codec: &'c dyn ValueCodec,
    installer: Arc<dyn FinalizerInstaller>,
    reset_finalizers: bool,
    codes: Vec<Arc<CodeObject>>,
    /// Registered only once every task record has been read.
    fresh: Vec<Arc<CodeObject>>,
    diagnostics: Vec<Diagnostic>,
}

impl Restorer<'_> {
    fn build_code(
        &mut self,
        record: &CodeRecord,
        verdict: Verdict,
    ) -> Result<Arc<CodeObject>, SnapshotError> {
        let rejected = |reason: String| SnapshotError::CodeRejected {
            key: record.key.clone(),
            reason,
        };
        let state = match verdict {
            Verdict::Accepted => CodeState::Valid,
            Verdict::Trapped { found, expected } => CodeState::Trapped { found, expected },
            Verdict::Rejected(reason) => return Err(rejected(reason)),
        };
        let trapped = state != CodeState::Valid;
        let kind = match RoutineKind::from_byte(record.kind) {
            Some(kind) => kind,
            // Only a trapped record reaches this with a kind from another generation.
            None if trapped => RoutineKind::Plain,
            None => return Err(rejected(format!("unknown routine kind {}", record.kind))),
        };

        let mut unknown = 0usize;
        let mut instructions = Vec::with_capacity(record.instructions.len());
        for raw in &record.instructions {
            let opcode = Opcode::try_from(raw.opcode).unwrap_or_else(|_| {
                unknown += 1;
                Opcode::Invalid
            });
            instructions.push(Instruction::new(opcode, raw.operand_a, raw.operand_b));
        }
        if trapped {
            let entry = Instruction::bare(Opcode::TrapEntry);
            match instructions.first_mut() {
                Some(first) => *first = entry,
                None => instructions.push(entry),
            }
        }

        let mut constants = Vec::with_capacity(record.constants.len());
        for bytes in &record.constants {
            constants.push(self.decode(bytes)?);
        }
        let mut children = Vec::with_capacity(record.children.len());
        for &child in &record.children {
            let child = self.codes.get(child as usize).cloned().ok_or_else(|| {
                SnapshotError::Malformed(format!("code '{}' has dangling child {child}", record.key))
            })?;
            children.push(child);
        }

        let code = Arc::new(CodeObject::from_parts(CodeParts {
            key: record.key.clone(),
            name: record.name.clone(),
            kind,
            version: record.version,
            arity: record.arity,
            locals: record.locals,
            constants,
            children,
            instructions,
            state,
        }));

        if let CodeState::Trapped { found, expected } = state {
            warn!(routine = %record.key, found, expected, "restored routine trapped");
            self.diagnostics.push(Diagnostic::VersionTrap {
                key: record.key.clone(),
                found,
                expected,
            });
            return Ok(code);
        }
        if unknown > 0 {
            warn!(routine = %record.key, unknown, "restored routine carries unknown opcodes");
        }
        let damaged = code
            .instructions()
            .iter()
            .any(|instruction| instruction.opcode == Opcode::Invalid);
        if damaged {
            return Ok(code);
        }
        if let Some(existing) = self.config.registry.resolve(code.key()) {
            if existing.same_routine(&code) {
                return Ok(existing);
            }
        }
        self.fresh.push(Arc::clone(&code));
        Ok(code)
    }

    fn read_task(&mut self, bytes: &[u8]) -> Result<Task, SnapshotError> {
        let mut reader = Reader::new(bytes);
        let original = TaskId(reader.u64()?);
        let state_byte = reader.u8()?;
        let state = TaskState::from_byte(state_byte)
            .ok_or_else(|| SnapshotError::Malformed(format!("unknown task state {state_byte}")))?;
        let id = TaskId::next();

        let context = self.optional_value(&mut reader)?;
        let result = self.optional_value(&mut reader)?;

        let depth = reader.count()?;
        let mut frames = Vec::with_capacity(depth);
        for _ in 0..depth {
            frames.push(self.read_frame(&mut reader, id)?);
        }
        // Frames arrive innermost first; link them from the outermost up.
        let mut top: Option<Box<Frame>> = None;
        for mut frame in frames.into_iter().rev() {
            frame.caller = top.take();
            top = Some(frame);
        }

        let generator_count = reader.count()?;
        let mut generators = Vec::with_capacity(generator_count);
        for _ in 0..generator_count {
            generators.push(self.read_generator(&mut reader, id)?);
        }
        if !reader.is_at_end() {
            return Err(SnapshotError::Malformed(format!(
                "trailing bytes in record of {original}"
            )));
        }

        let mut task = Task {
            id,
            state,
            top,
            generators,
            context,
            result,
            restorable: true,
            restored_from: Some(original),
        };
        task.recompute_restorable();
        debug!(task = %id, restored_from = %original, frames = depth, "task rebuilt");
        Ok(task)
    }

    fn read_frame(&mut self, reader: &mut Reader<'_>, task: TaskId) -> Result<Box<Frame>, SnapshotError> {
        let index = reader.u32()?;
        let code = self
            .codes
            .get(index as usize)
            .cloned()
            .ok_or_else(|| SnapshotError::Malformed(format!("frame refers to unknown code {index}")))?;
        let ip = reader.u32()?;
        let marked_invalid = match reader.u8()? {
            VALIDITY_VALID => false,
            VALIDITY_INVALID => true,
            other => {
                return Err(SnapshotError::Malformed(format!("unknown frame validity {other}")))
            }
        };
        let generator = if reader.flag()? {
            Some(GeneratorId(reader.u32()?))
        } else {
            None
        };

        let slot_count = reader.count()?;
        let mut locals = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            locals.push(self.optional_value(reader)?);
        }
        let stack_depth = reader.count()?;
        let mut stack = Vec::with_capacity(stack_depth);
        for _ in 0..stack_depth {
            let bytes = reader.bytes()?;
            stack.push(self.decode(bytes)?);
        }
        let handler_count = reader.count()?;
        let mut handlers = Vec::with_capacity(handler_count);
        for _ in 0..handler_count {
            handlers.push(Handler {
                target: reader.u32()?,
                stack_depth: reader.u32()?,
            });
        }

        let corrupt = code.first_opcode() == Some(Opcode::Invalid);
        let validity = if marked_invalid || corrupt {
            warn!(task = %task, routine = %code.key(), offset = ip, "restored frame is invalid");
            self.diagnostics.push(Diagnostic::InvalidFrame {
                task,
                routine: code.key().to_string(),
            });
            FrameValidity::Invalid
        } else {
            FrameValidity::Valid
        };

        let mut frame = Frame::new(code, Vec::new());
        frame.ip = ip;
        frame.locals = locals;
        frame.stack = stack;
        frame.handlers = handlers;
        frame.validity = validity;
        frame.generator = generator;
        Ok(Box::new(frame))
    }

    fn read_generator(
        &mut self,
        reader: &mut Reader<'_>,
        task: TaskId,
    ) -> Result<GeneratorObject, SnapshotError> {
        let kind_byte = reader.u8()?;
        let phase_byte = reader.u8()?;
        let phase = Phase::from_byte(phase_byte)
            .ok_or_else(|| SnapshotError::Malformed(format!("unknown generator phase {phase_byte}")))?;
        let frame = if reader.flag()? {
            Some(self.read_frame(reader, task)?)
        } else {
            None
        };
        let flavor = match RoutineKind::from_byte(kind_byte) {
            Some(RoutineKind::Generator) => Flavor::Generator,
            Some(RoutineKind::Coroutine) => Flavor::Coroutine,
            Some(RoutineKind::AsyncGenerator) => Flavor::AsyncGenerator {
                finalizer: self.read_finalizer(reader)?,
            },
            Some(RoutineKind::Plain) | None => {
                return Err(SnapshotError::Malformed(format!(
                    "generator record has kind {kind_byte}"
                )))
            }
        };
        Ok(GeneratorObject {
            flavor,
            phase,
            frame,
        })
    }

    fn read_finalizer(&mut self, reader: &mut Reader<'_>) -> Result<FinalizerState, SnapshotError> {
        match reader.u8()? {
            FINALIZER_UNINITIALIZED | FINALIZER_RESET => Ok(FinalizerState::Uninitialized),
            FINALIZER_MARKER if self.reset_finalizers => Ok(FinalizerState::Uninitialized),
            FINALIZER_MARKER => Ok(FinalizerState::Installed(self.installer.install())),
            FINALIZER_VALUE => match self.optional_value(reader)? {
                Some(Value::Finalizer(finalizer)) => Ok(FinalizerState::Installed(Some(finalizer))),
                Some(other) => Err(SnapshotError::Malformed(format!(
                    "expected a finalizer, found {}",
                    other.type_name()
                ))),
                None => Ok(FinalizerState::Installed(None)),
            },
            other => Err(SnapshotError::Malformed(format!("unknown finalizer tag {other}"))),
        }
    }

    fn optional_value(&self, reader: &mut Reader<'_>) -> Result<Option<Value>, SnapshotError> {
        if !reader.flag()? {
            return Ok(None);
        }
        let bytes = reader.bytes()?;
        self.decode(bytes).map(Some)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SnapshotError> {
        self.codec.decode(bytes).map_err(SnapshotError::Deserialization)
    }
}
