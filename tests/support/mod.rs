//===================================================
// SolvraTasklet Test Support
//===================================================
// Author: Zobie
// License: Duality Public License (DPL v1.0)
// Goal: Shared programs for integration tests
// Objective: Hand-assembled routines that suspend at known points
//===================================================

#![allow(dead_code)]

use std::sync::Arc;

use solvra_tasklet::{
    CodeBuilder, CodeObject, Interpreter, Opcode, RoutineKind, RunOutcome, Task, Value,
};

/// Generator yielding `1, 2, 3`, suspending the whole task once before the
/// first value so the generator is captured while it is running.
pub fn numbers() -> Arc<CodeObject> {
    let mut builder = CodeBuilder::new("numbers", RoutineKind::Generator);
    let one = builder.constant(Value::Integer(1));
    let two = builder.constant(Value::Integer(2));
    let three = builder.constant(Value::Integer(3));
    builder
        .op_a(Opcode::LoadConst, one)
        .op(Opcode::Yield)
        .op(Opcode::YieldValue)
        .op_a(Opcode::LoadConst, two)
        .op(Opcode::YieldValue)
        .op_a(Opcode::LoadConst, three)
        .op(Opcode::YieldValue)
        .op(Opcode::Return);
    builder.build().expect("numbers")
}

/// `fn double(x) { yield; return x * 2 }`
pub fn double() -> Arc<CodeObject> {
    let mut builder = CodeBuilder::new("double", RoutineKind::Plain);
    builder.arity(1);
    let two = builder.constant(Value::Integer(2));
    builder
        .op(Opcode::Yield)
        .op_a(Opcode::LoadLocal, 0)
        .op_a(Opcode::LoadConst, two)
        .op(Opcode::Mul)
        .op(Opcode::Return);
    builder.build().expect("double")
}

/// `for n in numbers() { emit double(n) }`
pub fn pipeline() -> Arc<CodeObject> {
    let mut builder = CodeBuilder::new("pipeline", RoutineKind::Plain);
    builder.locals(1);
    let numbers = builder.child(numbers());
    let double = builder.child(double());
    let top = builder.label();
    let done = builder.label();
    builder
        .op_ab(Opcode::MakeGenerator, numbers, 0)
        .op_a(Opcode::StoreLocal, 0);
    builder.bind(top);
    builder
        .op_a(Opcode::LoadLocal, 0)
        .op(Opcode::ForIter)
        .branch(Opcode::JumpIfFalse, done)
        .op_ab(Opcode::Call, double, 1)
        .op(Opcode::Emit)
        .branch(Opcode::Jump, top);
    builder.bind(done);
    builder.op(Opcode::Pop).op(Opcode::Return);
    builder.build().expect("pipeline")
}

/// `emit label; yield; emit label; return`
pub fn stepper(label: &str) -> Arc<CodeObject> {
    stepper_with_version(label, solvra_tasklet::BYTECODE_VERSION)
}

pub fn stepper_with_version(label: &str, version: u32) -> Arc<CodeObject> {
    let mut builder = CodeBuilder::new(label, RoutineKind::Plain);
    builder.version(version);
    let name = builder.constant(Value::String(label.into()));
    builder
        .op_a(Opcode::LoadConst, name)
        .op(Opcode::Emit)
        .op(Opcode::Yield)
        .op_a(Opcode::LoadConst, name)
        .op(Opcode::Emit)
        .op(Opcode::Return);
    builder.build().expect("stepper")
}

/// Spawns `code` and runs it to its first cooperative yield.
pub fn parked(code: Arc<CodeObject>) -> Task {
    let mut task = Task::spawn(code, Vec::new());
    let outcome = Interpreter::new().run(&mut task).expect("first slice");
    assert_eq!(outcome, RunOutcome::Yielded);
    task
}
