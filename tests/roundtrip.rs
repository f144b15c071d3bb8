//===================================================
// SolvraTasklet Round Trip
//===================================================
// Author: Zobie
// License: Duality Public License (DPL v1.0)
// Goal: Restored tasks continue exactly where they stopped
// Objective: Compare effects of resumed originals and restored copies
//===================================================

mod support;

use solvra_tasklet::{
    capture_with, restore_with, EngineConfig, GeneratorId, Interpreter, Phase, PickleFlags,
    RunOutcome, Task, TaskState, Value,
};

fn isolated() -> EngineConfig {
    EngineConfig::isolated(PickleFlags::NONE)
}

fn reference_effects() -> Vec<Value> {
    let mut task = Task::spawn(support::pipeline(), Vec::new());
    let mut interpreter = Interpreter::new();
    interpreter.run_to_completion(&mut task).expect("reference run");
    interpreter.take_effects()
}

#[test]
fn pipeline_emits_doubled_numbers() {
    assert_eq!(
        reference_effects(),
        [Value::Integer(2), Value::Integer(4), Value::Integer(6)]
    );
}

#[test]
fn every_suspension_point_restores_to_the_same_effects() {
    let expected = reference_effects();
    let config = isolated();
    let mut suspension = 0;
    loop {
        let mut task = Task::spawn(support::pipeline(), Vec::new());
        let mut interpreter = Interpreter::new();
        let mut finished = false;
        for _ in 0..=suspension {
            if let RunOutcome::Finished(_) = interpreter.run(&mut task).expect("slice") {
                finished = true;
                break;
            }
        }
        if finished {
            break;
        }

        let blob = capture_with(&task, &config).expect("capture");
        let mut restored = restore_with(&blob, &config).expect("restore");
        assert_eq!(restored.depth(), task.depth());
        assert!(restored.is_restorable());

        let mut resumed = Interpreter::new();
        resumed.run_to_completion(&mut restored).expect("resume");
        let mut effects = interpreter.take_effects();
        effects.extend(resumed.take_effects());
        assert_eq!(effects, expected, "suspension point {suspension}");
        suspension += 1;
    }
    assert_eq!(suspension, 4);
}

#[test]
fn generator_lent_to_the_chain_survives_capture() {
    let task = support::parked(support::pipeline());
    let generator = task.generator(GeneratorId(0)).expect("generator");
    assert_eq!(generator.phase(), Phase::Running);
    assert!(generator.frame().is_none());
    assert_eq!(task.top_frame().and_then(|frame| frame.generator()), Some(GeneratorId(0)));

    let config = isolated();
    let restored = restore_with(&capture_with(&task, &config).expect("capture"), &config)
        .expect("restore");
    let generator = restored.generator(GeneratorId(0)).expect("generator");
    assert_eq!(generator.phase(), Phase::Running);
    let top = restored.top_frame().expect("top frame");
    assert_eq!(top.generator(), Some(GeneratorId(0)));
    assert_eq!(top.code().name(), "numbers");
    assert_eq!(top.stack(), &[Value::Integer(1)]);
    assert_eq!(top.caller().map(|frame| frame.code().name()), Some("pipeline"));
}

#[test]
fn locals_keep_their_liveness() {
    let task = support::parked(support::pipeline());
    let config = isolated();
    let restored = restore_with(&capture_with(&task, &config).expect("capture"), &config)
        .expect("restore");
    let outer = restored.frames().last().expect("outer frame");
    assert_eq!(outer.locals(), task.frames().last().expect("outer").locals());
    assert_eq!(outer.locals(), &[Some(Value::Generator(GeneratorId(0)))]);
}

#[test]
fn context_travels_only_when_requested() {
    let mut task = support::parked(support::stepper("ctx"));
    task.set_context(Some(Value::String("trace-7".into())));

    let plain = isolated();
    let restored = restore_with(&capture_with(&task, &plain).expect("capture"), &plain)
        .expect("restore");
    assert_eq!(restored.context(), None);

    let with_context = EngineConfig::isolated(PickleFlags::INCLUDE_CONTEXT);
    let restored = restore_with(
        &capture_with(&task, &with_context).expect("capture"),
        &with_context,
    )
    .expect("restore");
    assert_eq!(restored.context(), Some(&Value::String("trace-7".into())));
}

#[test]
fn finished_tasks_keep_their_result() {
    let mut task = Task::spawn(support::stepper("done"), Vec::new());
    Interpreter::new().run_to_completion(&mut task).expect("run");
    let config = isolated();
    let restored = restore_with(&capture_with(&task, &config).expect("capture"), &config)
        .expect("restore");
    assert_eq!(restored.state(), TaskState::Dead);
    assert_eq!(restored.result(), Some(&Value::Null));
    assert_eq!(restored.depth(), 0);
}
