use serde::{Deserialize, Serialize};

use crate::value::Finalizer;

use super::code::RoutineKind;
use super::frame::Frame;

/// Index of a generator inside its owning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeneratorId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    NotStarted = 0,
    Suspended = 1,
    Running = 2,
    Exhausted = 3,
}

impl Phase {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Phase::NotStarted),
            1 => Some(Phase::Suspended),
            2 => Some(Phase::Running),
            3 => Some(Phase::Exhausted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizerState {
    Uninitialized,
    /// The host hook ran; it may have declined to provide a finalizer.
    Installed(Option<Finalizer>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flavor {
    Generator,
    Coroutine,
    AsyncGenerator { finalizer: FinalizerState },
}

/// Generator, coroutine or asynchronous generator wrapping exactly one frame.
///
/// While the body runs the frame is lent to the task's chain and `frame` is
/// `None`; the frame records the owning id so it can be handed back.
#[derive(Debug)]
pub struct GeneratorObject {
    pub(crate) flavor: Flavor,
    pub(crate) phase: Phase,
    pub(crate) frame: Option<Box<Frame>>,
}

impl GeneratorObject {
    pub(crate) fn new(kind: RoutineKind, frame: Frame) -> Self {
        let flavor = match kind {
            RoutineKind::Coroutine => Flavor::Coroutine,
            RoutineKind::AsyncGenerator => Flavor::AsyncGenerator {
                finalizer: FinalizerState::Uninitialized,
            },
            RoutineKind::Generator | RoutineKind::Plain => Flavor::Generator,
        };
        Self {
            flavor,
            phase: Phase::NotStarted,
            frame: Some(Box::new(frame)),
        }
    }

    pub fn kind(&self) -> RoutineKind {
        match self.flavor {
            Flavor::Generator => RoutineKind::Generator,
            Flavor::Coroutine => RoutineKind::Coroutine,
            Flavor::AsyncGenerator { .. } => RoutineKind::AsyncGenerator,
        }
    }

    pub fn flavor(&self) -> &Flavor {
        &self.flavor
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_deref()
    }

    pub fn finalizer_state(&self) -> Option<&FinalizerState> {
        match &self.flavor {
            Flavor::AsyncGenerator { finalizer } => Some(finalizer),
            _ => None,
        }
    }

    pub fn finalizer_initialized(&self) -> bool {
        matches!(self.finalizer_state(), Some(FinalizerState::Installed(_)))
    }

    pub fn finalizer(&self) -> Option<&Finalizer> {
        match self.finalizer_state() {
            Some(FinalizerState::Installed(finalizer)) => finalizer.as_ref(),
            _ => None,
        }
    }
}
