use std::sync::Arc;

use crate::value::Value;

use super::code::{CodeObject, CodeState};
use super::error::VmError;
use super::generator::GeneratorId;

/// A local variable slot; `None` means the slot is not live.
pub type LocalSlot = Option<Value>;

/// Active exception handler pushed by `SETUP_HANDLER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub target: u32,
    pub stack_depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameValidity {
    Valid,
    /// Instruction stream found corrupt on restore; execution will fail.
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOrigin {
    Bytecode,
    /// Activation backed by a host call; it can never be captured.
    Opaque { label: String },
}

/// One heap-resident activation record. Each frame owns its caller.
#[derive(Debug)]
pub struct Frame {
    pub(crate) code: Arc<CodeObject>,
    pub(crate) ip: u32,
    pub(crate) locals: Vec<LocalSlot>,
    pub(crate) stack: Vec<Value>,
    pub(crate) handlers: Vec<Handler>,
    pub(crate) validity: FrameValidity,
    pub(crate) origin: FrameOrigin,
    pub(crate) generator: Option<GeneratorId>,
    pub(crate) caller: Option<Box<Frame>>,
}

impl Frame {
    /// Fresh activation with `args` bound to the leading local slots.
    pub fn new(code: Arc<CodeObject>, args: Vec<Value>) -> Self {
        let slots = usize::from(code.locals()).max(args.len());
        let mut locals: Vec<LocalSlot> = args.into_iter().map(Some).collect();
        locals.resize(slots, None);
        Self {
            code,
            ip: 0,
            locals,
            stack: Vec::new(),
            handlers: Vec::new(),
            validity: FrameValidity::Valid,
            origin: FrameOrigin::Bytecode,
            generator: None,
            caller: None,
        }
    }

    pub(crate) fn opaque(label: &str) -> Self {
        let mut frame = Self::new(Arc::new(CodeObject::native(label)), Vec::new());
        frame.origin = FrameOrigin::Opaque {
            label: label.to_string(),
        };
        frame
    }

    pub fn code(&self) -> &Arc<CodeObject> {
        &self.code
    }

    pub fn instruction_offset(&self) -> u32 {
        self.ip
    }

    pub fn locals(&self) -> &[LocalSlot] {
        &self.locals
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn handler_stack(&self) -> &[Handler] {
        &self.handlers
    }

    pub fn caller(&self) -> Option<&Frame> {
        self.caller.as_deref()
    }

    pub fn validity(&self) -> FrameValidity {
        self.validity
    }

    pub fn origin(&self) -> &FrameOrigin {
        &self.origin
    }

    /// Generator that owns this frame, if it is a generator body.
    pub fn generator(&self) -> Option<GeneratorId> {
        self.generator
    }

    pub fn is_capturable(&self) -> bool {
        matches!(self.origin, FrameOrigin::Bytecode)
    }

    /// Walks the chain from this frame towards the outermost caller.
    pub fn chain(&self) -> FrameChain<'_> {
        FrameChain { next: Some(self) }
    }

    /// The single gate every instruction passes before it is dispatched.
    pub(crate) fn check_executable(&self) -> Result<(), VmError> {
        if let FrameOrigin::Opaque { label } = &self.origin {
            return Err(VmError::OpaqueFrame(label.clone()));
        }
        if let CodeState::Trapped { found, expected } = self.code.state() {
            return Err(VmError::VersionTrap {
                routine: self.code.key().to_string(),
                found,
                expected,
            });
        }
        if self.validity == FrameValidity::Invalid {
            return Err(VmError::InvalidFrameExecution {
                routine: self.code.key().to_string(),
                offset: self.ip,
            });
        }
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::StackUnderflow(self.code.key().to_string()))
    }

    pub(crate) fn pop_args(&mut self, count: u32) -> Result<Vec<Value>, VmError> {
        let count = count as usize;
        if count > self.stack.len() {
            return Err(VmError::StackUnderflow(self.code.key().to_string()));
        }
        let start = self.stack.len() - count;
        Ok(self.stack.drain(start..).collect())
    }
}

impl Drop for Frame {
    // Unlink iteratively so long chains never recurse through `Drop`.
    fn drop(&mut self) {
        let mut next = self.caller.take();
        while let Some(mut frame) = next {
            next = frame.caller.take();
        }
    }
}

pub struct FrameChain<'a> {
    next: Option<&'a Frame>,
}

impl FrameChain<'_> {
    pub(crate) fn empty() -> Self {
        FrameChain { next: None }
    }
}

impl<'a> Iterator for FrameChain<'a> {
    type Item = &'a Frame;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.next?;
        self.next = frame.caller();
        Some(frame)
    }
}
