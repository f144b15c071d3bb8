//===================================================
// SolvraTasklet Finalizer Policy
//===================================================
// Author: Zobie
// License: Duality Public License (DPL v1.0)
// Goal: Async-generator finalizers obey the pickle flags
// Objective: Reset, preserve and default re-installation
//===================================================

use std::sync::Arc;

use solvra_tasklet::vm::FinalizerState;
use solvra_tasklet::{
    capture_with, inspect, restore_with, CodeBuilder, EngineConfig, Finalizer, GeneratorId,
    Interpreter, NamedFinalizer, NoFinalizer, Opcode, PickleFlags, RoutineKind, RunOutcome, Task,
    Value,
};

/// Iterates an async generator once and suspends with it half consumed.
fn async_task() -> (Task, Finalizer) {
    let mut body = CodeBuilder::new("events", RoutineKind::AsyncGenerator);
    let first = body.constant(Value::String("open".into()));
    let second = body.constant(Value::String("close".into()));
    body.op_a(Opcode::LoadConst, first)
        .op(Opcode::YieldValue)
        .op_a(Opcode::LoadConst, second)
        .op(Opcode::YieldValue);
    let body = body.build().expect("body");

    let mut main = CodeBuilder::new("consume_events", RoutineKind::Plain);
    main.locals(1);
    let child = main.child(body);
    main.op_ab(Opcode::MakeGenerator, child, 0)
        .op_a(Opcode::StoreLocal, 0)
        .op_a(Opcode::LoadLocal, 0)
        .op(Opcode::ForIter)
        .op(Opcode::Pop)
        .op(Opcode::Emit)
        .op(Opcode::Yield)
        .op_a(Opcode::LoadLocal, 0)
        .op(Opcode::ForIter)
        .op(Opcode::Pop)
        .op(Opcode::Emit)
        .op(Opcode::Return);

    let mut task = Task::spawn(main.build().expect("main"), Vec::new());
    let mut interpreter = Interpreter::with_installer(Arc::new(NamedFinalizer::new("aclose")));
    assert_eq!(interpreter.run(&mut task), Ok(RunOutcome::Yielded));
    let finalizer = task
        .generator(GeneratorId(0))
        .and_then(|generator| generator.finalizer())
        .cloned()
        .expect("finalizer installed on first iteration");
    (task, finalizer)
}

fn round_trip(task: &Task, capture: PickleFlags, restore: PickleFlags) -> (Task, Arc<NamedFinalizer>) {
    let blob = capture_with(task, &EngineConfig::isolated(capture)).expect("capture");
    let hook = Arc::new(NamedFinalizer::new("aclose"));
    let config = EngineConfig::isolated(restore).with_installer(hook.clone());
    (restore_with(&blob, &config).expect("restore"), hook)
}

fn state(task: &Task) -> FinalizerState {
    task.generator(GeneratorId(0))
        .and_then(|generator| generator.finalizer_state())
        .cloned()
        .expect("async generator")
}

#[test]
fn reset_at_capture_leaves_finalizer_uninitialized() {
    let (task, _) = async_task();
    let (restored, hook) = round_trip(&task, PickleFlags::RESET_FINALIZER, PickleFlags::NONE);
    assert_eq!(state(&restored), FinalizerState::Uninitialized);
    assert_eq!(hook.installed(), 0);
}

#[test]
fn reset_at_restore_leaves_finalizer_uninitialized() {
    let (task, _) = async_task();
    let (restored, hook) = round_trip(&task, PickleFlags::NONE, PickleFlags::RESET_FINALIZER);
    assert_eq!(state(&restored), FinalizerState::Uninitialized);
    assert_eq!(hook.installed(), 0);
}

#[test]
fn preserve_restores_the_finalizer_by_value() {
    let (task, original) = async_task();
    let (restored, hook) = round_trip(&task, PickleFlags::PRESERVE_FINALIZER, PickleFlags::NONE);
    assert_eq!(state(&restored), FinalizerState::Installed(Some(original)));
    assert_eq!(hook.installed(), 0);
}

#[test]
fn default_reinstalls_through_the_current_hook() {
    let (task, original) = async_task();
    let (restored, hook) = round_trip(&task, PickleFlags::NONE, PickleFlags::NONE);
    assert_eq!(hook.installed(), 1);
    match state(&restored) {
        FinalizerState::Installed(Some(fresh)) => {
            assert_eq!(fresh.name, original.name);
            // Issued by the restoring process's hook, not copied from the blob.
            assert_eq!(fresh.token, 1);
        }
        other => panic!("expected a fresh finalizer, got {other:?}"),
    }
}

#[test]
fn declining_hook_is_recorded_as_installed() {
    let (task, _) = async_task();
    let blob = capture_with(&task, &EngineConfig::isolated(PickleFlags::NONE)).expect("capture");
    let config = EngineConfig::isolated(PickleFlags::NONE).with_installer(Arc::new(NoFinalizer));
    let restored = restore_with(&blob, &config).expect("restore");
    assert_eq!(state(&restored), FinalizerState::Installed(None));
}

#[test]
fn capture_flags_are_recorded_in_the_blob() {
    let (task, _) = async_task();
    let flags = PickleFlags::PRESERVE_FINALIZER | PickleFlags::INCLUDE_CONTEXT;
    let blob = capture_with(&task, &EngineConfig::isolated(flags)).expect("capture");
    assert_eq!(inspect(&blob).expect("inspect").flags, flags);
}

#[test]
fn restored_generator_finishes_the_iteration() {
    let (task, _) = async_task();
    let (mut restored, _) = round_trip(&task, PickleFlags::PRESERVE_FINALIZER, PickleFlags::NONE);
    let mut interpreter = Interpreter::new();
    interpreter.run_to_completion(&mut restored).expect("resume");
    assert_eq!(interpreter.effects(), &[Value::String("close".into())]);
}
