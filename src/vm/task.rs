use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::value::Value;

use super::code::CodeObject;
use super::frame::{Frame, FrameChain};
use super::generator::{GeneratorId, GeneratorObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    Runnable = 0,
    Blocked = 1,
    Scheduled = 2,
    Dead = 3,
}

impl TaskState {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TaskState::Runnable),
            1 => Some(TaskState::Blocked),
            2 => Some(TaskState::Scheduled),
            3 => Some(TaskState::Dead),
            _ => None,
        }
    }
}

/// Independently schedulable unit of cooperative execution.
#[derive(Debug)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) state: TaskState,
    pub(crate) top: Option<Box<Frame>>,
    pub(crate) generators: Vec<GeneratorObject>,
    pub(crate) context: Option<Value>,
    pub(crate) result: Option<Value>,
    pub(crate) restorable: bool,
    pub(crate) restored_from: Option<TaskId>,
}

impl Task {
    pub fn spawn(code: Arc<CodeObject>, args: Vec<Value>) -> Self {
        Self {
            id: TaskId::next(),
            state: TaskState::Runnable,
            top: Some(Box::new(Frame::new(code, args))),
            generators: Vec::new(),
            context: None,
            result: None,
            restorable: true,
            restored_from: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn top_frame(&self) -> Option<&Frame> {
        self.top.as_deref()
    }

    /// Frames from the innermost activation outwards.
    pub fn frames(&self) -> FrameChain<'_> {
        match self.top.as_deref() {
            Some(frame) => frame.chain(),
            None => FrameChain::empty(),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames().count()
    }

    pub fn generators(&self) -> &[GeneratorObject] {
        &self.generators
    }

    pub fn generator(&self, id: GeneratorId) -> Option<&GeneratorObject> {
        self.generators.get(id.0 as usize)
    }

    /// Ambient per-task context; only captured when explicitly requested.
    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: Option<Value>) {
        self.context = context;
    }

    /// Return value of a finished task.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn is_restorable(&self) -> bool {
        self.restorable
    }

    /// Identity the task had in the process that captured it.
    pub fn restored_from(&self) -> Option<TaskId> {
        self.restored_from
    }

    /// Records that host code is now running on behalf of this task.
    pub fn enter_native(&mut self, label: &str) {
        let mut frame = Frame::opaque(label);
        frame.caller = self.top.take();
        self.top = Some(Box::new(frame));
        self.restorable = false;
    }

    /// Pops the innermost activation if it is opaque. Returns whether it did.
    pub fn leave_native(&mut self) -> bool {
        let is_opaque = self
            .top
            .as_deref()
            .map(|frame| !frame.is_capturable())
            .unwrap_or(false);
        if is_opaque {
            if let Some(mut frame) = self.top.take() {
                self.top = frame.caller.take();
            }
            self.recompute_restorable();
        }
        is_opaque
    }

    pub(crate) fn recompute_restorable(&mut self) {
        let chain_ok = self.frames().all(Frame::is_capturable);
        let generators_ok = self
            .generators
            .iter()
            .filter_map(GeneratorObject::frame)
            .all(|frame| frame.chain().all(Frame::is_capturable));
        self.restorable = chain_ok && generators_ok;
    }

    pub(crate) fn push_frame(&mut self, frame: Frame) {
        self.push_boxed(Box::new(frame));
    }

    pub(crate) fn push_boxed(&mut self, mut frame: Box<Frame>) {
        frame.caller = self.top.take();
        self.top = Some(frame);
    }

    pub(crate) fn pop_frame(&mut self) -> Option<Box<Frame>> {
        let mut frame = self.top.take()?;
        self.top = frame.caller.take();
        Some(frame)
    }
}
