use std::collections::{HashMap, HashSet};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::vm::{Interpreter, RunOutcome, Task, TaskId, TaskState, VmError};

/// Admission entry point of a scheduler; the only way a restored task goes
/// live again.
pub trait Admission {
    fn admit(&self, task: Task);
}

/// Hands a (typically restored) task to `scheduler` and returns its id.
pub fn reinsert(task: Task, scheduler: &dyn Admission) -> TaskId {
    let id = task.id();
    debug!(
        task = %id,
        restored_from = ?task.restored_from(),
        state = ?task.state(),
        "reinserting task"
    );
    scheduler.admit(task);
    id
}

/// Single-threaded round-robin scheduler: one task runs at a time, and only
/// until its next cooperative yield.
#[derive(Debug, Default)]
pub struct CooperativeScheduler {
    run_queue: SegQueue<Task>,
    pending_blocks: Mutex<HashSet<TaskId>>,
    blocked: Mutex<HashMap<TaskId, Task>>,
    finished: Mutex<Vec<Task>>,
    failed: Mutex<Vec<(Task, VmError)>>,
}

impl CooperativeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, task: Task) -> TaskId {
        let id = task.id();
        self.admit(task);
        id
    }

    /// Runs the task at the head of the queue for one slice. Returns `None`
    /// when nothing is runnable.
    pub fn run_once(&self, interpreter: &mut Interpreter) -> Option<TaskId> {
        let mut task = self.run_queue.pop()?;
        let id = task.id();
        if self.pending_blocks.lock().remove(&id) {
            self.park(task);
            return Some(id);
        }
        match interpreter.run(&mut task) {
            Ok(RunOutcome::Yielded) => self.run_queue.push(task),
            Ok(RunOutcome::Finished(_)) => self.finished.lock().push(task),
            Err(err) => {
                warn!(task = %id, error = %err, "task failed");
                self.failed.lock().push((task, err));
            }
        }
        Some(id)
    }

    /// Runs slices until the run queue drains; returns the number of slices.
    pub fn run_until_idle(&self, interpreter: &mut Interpreter) -> usize {
        let mut slices = 0;
        while self.run_once(interpreter).is_some() {
            slices += 1;
        }
        slices
    }

    /// Parks `id` the next time it reaches the head of the queue.
    pub fn block(&self, id: TaskId) {
        self.pending_blocks.lock().insert(id);
    }

    /// Moves a parked task back to the run queue.
    pub fn wake(&self, id: TaskId) -> bool {
        self.pending_blocks.lock().remove(&id);
        let Some(mut task) = self.blocked.lock().remove(&id) else {
            return false;
        };
        task.state = TaskState::Scheduled;
        self.run_queue.push(task);
        true
    }

    /// Borrows a parked task, e.g. to capture it.
    pub fn with_blocked<R>(&self, id: TaskId, f: impl FnOnce(&Task) -> R) -> Option<R> {
        self.blocked.lock().get(&id).map(f)
    }

    /// Removes a parked task from the scheduler entirely.
    pub fn detach(&self, id: TaskId) -> Option<Task> {
        self.blocked.lock().remove(&id)
    }

    pub fn take_finished(&self) -> Vec<Task> {
        std::mem::take(&mut *self.finished.lock())
    }

    pub fn take_failed(&self) -> Vec<(Task, VmError)> {
        std::mem::take(&mut *self.failed.lock())
    }

    pub fn runnable_len(&self) -> usize {
        self.run_queue.len()
    }

    pub fn blocked_len(&self) -> usize {
        self.blocked.lock().len()
    }

    fn park(&self, mut task: Task) {
        debug!(task = %task.id(), "task blocked");
        task.state = TaskState::Blocked;
        self.blocked.lock().insert(task.id(), task);
    }
}

impl Admission for CooperativeScheduler {
    fn admit(&self, task: Task) {
        match task.state() {
            TaskState::Dead => self.finished.lock().push(task),
            TaskState::Blocked => self.park(task),
            TaskState::Runnable | TaskState::Scheduled => self.run_queue.push(task),
        }
    }
}
