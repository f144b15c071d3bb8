use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::codec::ValueCodec;
use crate::engine::EngineConfig;
use crate::policy::PickleFlags;
use crate::value::Value;
use crate::vm::{
    CodeObject, FinalizerState, Flavor, Frame, FrameOrigin, FrameValidity, GeneratorObject, Task,
};

use super::format::{
    Writer, FINALIZER_MARKER, FINALIZER_RESET, FINALIZER_UNINITIALIZED, FINALIZER_VALUE,
    FORMAT_VERSION, MAGIC, VALIDITY_INVALID, VALIDITY_VALID,
};
use super::{Snapshot, SnapshotError};

/// Captures several tasks into one blob that shares a single code table.
///
/// Flags are read once, when the capturer is created. A task that fails to
/// capture leaves nothing behind; tasks added before it are kept.
pub struct Capturer {
    codec: Arc<dyn ValueCodec>,
    flags: PickleFlags,
    codes: Vec<Arc<CodeObject>>,
    index: HashMap<usize, u32>,
    code_records: Vec<Vec<u8>>,
    tasks: Vec<Vec<u8>>,
}

impl Capturer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            codec: Arc::clone(&config.codec),
            flags: config.policy.snapshot(),
            codes: Vec::new(),
            index: HashMap::new(),
            code_records: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn flags(&self) -> PickleFlags {
        self.flags
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn add_task(&mut self, task: &Task) -> Result<(), SnapshotError> {
        ensure_restorable(task)?;
        let mark = self.codes.len();
        match self.encode_task(task) {
            Ok(record) => {
                debug!(
                    task = %task.id(),
                    frames = task.depth(),
                    generators = task.generators().len(),
                    "captured task"
                );
                self.tasks.push(record);
                Ok(())
            }
            Err(err) => {
                self.rollback(mark);
                Err(err)
            }
        }
    }

    pub fn finish(self) -> Result<Snapshot, SnapshotError> {
        let mut writer = Writer::new();
        writer.raw(MAGIC);
        writer.u16(FORMAT_VERSION);
        writer.u8(self.flags.bits());
        writer.count(self.code_records.len())?;
        for record in &self.code_records {
            writer.bytes(record)?;
        }
        writer.count(self.tasks.len())?;
        for record in &self.tasks {
            writer.bytes(record)?;
        }
        let snapshot = Snapshot::from_bytes(writer.into_bytes());
        debug!(
            tasks = self.tasks.len(),
            codes = self.code_records.len(),
            bytes = snapshot.len(),
            flags = %self.flags,
            "snapshot written"
        );
        Ok(snapshot)
    }

    fn rollback(&mut self, mark: usize) {
        for code in self.codes.drain(mark..) {
            self.index.remove(&(Arc::as_ptr(&code) as usize));
        }
        self.code_records.truncate(mark);
    }

    fn encode_task(&mut self, task: &Task) -> Result<Vec<u8>, SnapshotError> {
        let mut writer = Writer::new();
        writer.u64(task.id().0);
        writer.u8(task.state() as u8);

        match task.context() {
            Some(context) if self.flags.contains(PickleFlags::INCLUDE_CONTEXT) => {
                writer.flag(true);
                self.value(&mut writer, context)?;
            }
            _ => writer.flag(false),
        }
        match task.result() {
            Some(result) => {
                writer.flag(true);
                self.value(&mut writer, result)?;
            }
            None => writer.flag(false),
        }

        writer.count(task.depth())?;
        for frame in task.frames() {
            self.frame(&mut writer, frame)?;
        }
        writer.count(task.generators().len())?;
        for generator in task.generators() {
            self.generator(&mut writer, generator)?;
        }
        Ok(writer.into_bytes())
    }

    fn frame(&mut self, writer: &mut Writer, frame: &Frame) -> Result<(), SnapshotError> {
        let code = self.intern(frame.code())?;
        writer.u32(code);
        writer.u32(frame.instruction_offset());
        writer.u8(match frame.validity() {
            FrameValidity::Valid => VALIDITY_VALID,
            FrameValidity::Invalid => VALIDITY_INVALID,
        });
        match frame.generator() {
            Some(id) => {
                writer.flag(true);
                writer.u32(id.0);
            }
            None => writer.flag(false),
        }

        writer.count(frame.locals().len())?;
        for slot in frame.locals() {
            match slot {
                Some(value) => {
                    writer.flag(true);
                    self.value(writer, value)?;
                }
                None => writer.flag(false),
            }
        }
        writer.count(frame.stack().len())?;
        for value in frame.stack() {
            self.value(writer, value)?;
        }
        writer.count(frame.handler_stack().len())?;
        for handler in frame.handler_stack() {
            writer.u32(handler.target);
            writer.u32(handler.stack_depth);
        }
        Ok(())
    }

    fn generator(
        &mut self,
        writer: &mut Writer,
        generator: &GeneratorObject,
    ) -> Result<(), SnapshotError> {
        writer.u8(generator.kind() as u8);
        writer.u8(generator.phase() as u8);
        match generator.frame() {
            Some(frame) => {
                writer.flag(true);
                self.frame(writer, frame)?;
            }
            None => writer.flag(false),
        }
        if let Flavor::AsyncGenerator { finalizer } = generator.flavor() {
            self.finalizer(writer, finalizer)?;
        }
        Ok(())
    }

    fn finalizer(
        &mut self,
        writer: &mut Writer,
        state: &FinalizerState,
    ) -> Result<(), SnapshotError> {
        let FinalizerState::Installed(finalizer) = state else {
            writer.u8(FINALIZER_UNINITIALIZED);
            return Ok(());
        };
        if self.flags.contains(PickleFlags::RESET_FINALIZER) {
            writer.u8(FINALIZER_RESET);
        } else if self.flags.contains(PickleFlags::PRESERVE_FINALIZER) {
            writer.u8(FINALIZER_VALUE);
            match finalizer {
                Some(finalizer) => {
                    writer.flag(true);
                    self.value(writer, &Value::Finalizer(finalizer.clone()))?;
                }
                None => writer.flag(false),
            }
        } else {
            writer.u8(FINALIZER_MARKER);
        }
        Ok(())
    }

    fn value(&self, writer: &mut Writer, value: &Value) -> Result<(), SnapshotError> {
        let encoded = self
            .codec
            .encode(value)
            .map_err(SnapshotError::Serialization)?;
        writer.bytes(&encoded)?;
        Ok(())
    }

    /// Returns the table index of `code`, embedding it (children first) on
    /// first sight.
    fn intern(&mut self, code: &Arc<CodeObject>) -> Result<u32, SnapshotError> {
        let identity = Arc::as_ptr(code) as usize;
        if let Some(&index) = self.index.get(&identity) {
            return Ok(index);
        }
        let mut children = Vec::with_capacity(code.children().len());
        for child in code.children() {
            children.push(self.intern(child)?);
        }

        let mut writer = Writer::new();
        writer.string(code.key())?;
        writer.u32(code.version());
        writer.flag(code.is_trapped());
        writer.u8(code.kind() as u8);
        writer.string(code.name())?;
        writer.u16(code.arity());
        writer.u16(code.locals());
        writer.count(code.constants().len())?;
        for constant in code.constants() {
            self.value(&mut writer, constant)?;
        }
        writer.count(children.len())?;
        for child in children {
            writer.u32(child);
        }
        writer.count(code.instructions().len())?;
        for instruction in code.instructions() {
            writer.u8(instruction.opcode as u8);
            writer.u32(instruction.operand_a);
            writer.u32(instruction.operand_b);
        }

        let index = u32::try_from(self.codes.len())
            .map_err(|_| SnapshotError::Oversized(self.codes.len()))?;
        self.codes.push(Arc::clone(code));
        self.index.insert(identity, index);
        self.code_records.push(writer.into_bytes());
        Ok(index)
    }
}

fn ensure_restorable(task: &Task) -> Result<(), SnapshotError> {
    let opaque = task
        .frames()
        .chain(
            task.generators()
                .iter()
                .filter_map(GeneratorObject::frame)
                .flat_map(Frame::chain),
        )
        .find_map(|frame| match frame.origin() {
            FrameOrigin::Opaque { label } => Some(label.clone()),
            FrameOrigin::Bytecode => None,
        });
    match opaque {
        Some(frame) => Err(SnapshotError::NotRestorable {
            task: task.id(),
            frame,
        }),
        None if !task.is_restorable() => Err(SnapshotError::NotRestorable {
            task: task.id(),
            frame: "<unknown>".into(),
        }),
        None => Ok(()),
    }
}

pub fn capture(task: &Task) -> Result<Snapshot, SnapshotError> {
    capture_with(task, &EngineConfig::default())
}

pub fn capture_with(task: &Task, config: &EngineConfig) -> Result<Snapshot, SnapshotError> {
    let mut capturer = Capturer::new(config);
    capturer.add_task(task)?;
    capturer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NativeHandle;
    use crate::vm::{CodeBuilder, Interpreter, Opcode, RoutineKind};

    fn parked(code: Arc<CodeObject>) -> Task {
        let mut task = Task::spawn(code, Vec::new());
        Interpreter::new().run(&mut task).expect("run to first yield");
        task
    }

    fn yielding(name: &str) -> Arc<CodeObject> {
        let mut builder = CodeBuilder::new(name, RoutineKind::Plain);
        builder.op(Opcode::Yield).op(Opcode::Return);
        builder.build().expect("build")
    }

    #[test]
    fn shared_code_is_embedded_once() {
        let code = yielding("shared");
        let config = EngineConfig::isolated(PickleFlags::NONE);
        let mut capturer = Capturer::new(&config);
        capturer.add_task(&parked(code.clone())).expect("first");
        capturer.add_task(&parked(code)).expect("second");
        assert_eq!(capturer.code_records.len(), 1);
        assert_eq!(capturer.task_count(), 2);
    }

    #[test]
    fn failed_task_leaves_no_code_behind() {
        let mut builder = CodeBuilder::new("holds_native", RoutineKind::Plain);
        builder.locals(1);
        let handle = builder.constant(Value::Native(NativeHandle(0xdead)));
        builder
            .op_a(Opcode::LoadConst, handle)
            .op_a(Opcode::StoreLocal, 0)
            .op(Opcode::Yield);
        let config = EngineConfig::isolated(PickleFlags::NONE);
        let mut capturer = Capturer::new(&config);
        capturer.add_task(&parked(yielding("fine"))).expect("fine");
        let err = capturer
            .add_task(&parked(builder.build().expect("build")))
            .expect_err("native constant");
        assert!(matches!(err, SnapshotError::Serialization(_)));
        assert_eq!(capturer.code_records.len(), 1);
        assert_eq!(capturer.index.len(), 1);
        assert_eq!(capturer.task_count(), 1);
    }

    #[test]
    fn opaque_activation_names_the_frame() {
        let mut task = parked(yielding("main"));
        task.enter_native("qsort_compare");
        let err = capture_with(&task, &EngineConfig::isolated(PickleFlags::NONE))
            .expect_err("opaque");
        assert_eq!(
            err,
            SnapshotError::NotRestorable {
                task: task.id(),
                frame: "qsort_compare".into()
            }
        );
    }

    #[test]
    fn context_is_omitted_unless_requested() {
        let mut task = parked(yielding("main"));
        task.set_context(Some(Value::String("request-42".into())));
        let without = capture_with(&task, &EngineConfig::isolated(PickleFlags::NONE))
            .expect("capture");
        let with = capture_with(&task, &EngineConfig::isolated(PickleFlags::INCLUDE_CONTEXT))
            .expect("capture");
        assert!(with.len() > without.len());
    }
}
