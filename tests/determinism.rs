//===================================================
// SolvraTasklet Determinism
//===================================================
// Author: Zobie
// License: Duality Public License (DPL v1.0)
// Goal: Identical state and flags give identical blobs
// Objective: Byte-level reproducibility of capture
//===================================================

mod support;

use solvra_tasklet::{
    capture_with, restore_with, Capturer, EngineConfig, PickleFlags, Snapshot,
};

#[test]
fn capturing_twice_is_byte_identical() {
    let task = support::parked(support::pipeline());
    for flags in [
        PickleFlags::NONE,
        PickleFlags::PRESERVE_FINALIZER,
        PickleFlags::RESET_FINALIZER | PickleFlags::INCLUDE_CONTEXT,
    ] {
        let config = EngineConfig::isolated(flags);
        let first = capture_with(&task, &config).expect("first");
        let second = capture_with(&task, &config).expect("second");
        assert_eq!(first.as_bytes(), second.as_bytes(), "flags {flags}");
    }
}

#[test]
fn separately_built_identical_programs_capture_identically() {
    let config = EngineConfig::isolated(PickleFlags::NONE);
    let left = capture_with(&support::parked(support::stepper("twin")), &config).expect("left");
    let right = capture_with(&support::parked(support::stepper("twin")), &config).expect("right");
    // Only the task id differs.
    assert_eq!(left.len(), right.len());
    let diff: Vec<usize> = left
        .as_bytes()
        .iter()
        .zip(right.as_bytes())
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(index, _)| index)
        .collect();
    assert!(diff.len() <= 8, "unexpected differences at {diff:?}");
}

#[test]
fn recapture_of_a_restored_task_is_stable() {
    let config = EngineConfig::isolated(PickleFlags::NONE);
    let task = support::parked(support::pipeline());
    let restored = restore_with(&capture_with(&task, &config).expect("capture"), &config)
        .expect("restore");
    let once = capture_with(&restored, &config).expect("once");
    let twice = capture_with(&restored, &config).expect("twice");
    assert_eq!(once, twice);
}

#[test]
fn blob_starts_with_magic_and_format() {
    let config = EngineConfig::isolated(PickleFlags::NONE);
    let mut capturer = Capturer::new(&config);
    capturer
        .add_task(&support::parked(support::stepper("header")))
        .expect("capture");
    let blob: Snapshot = capturer.finish().expect("finish");
    let bytes = blob.as_bytes();
    assert_eq!(&bytes[..4], b"SVTK");
    assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 1);
    assert_eq!(bytes[6], 0);
}
