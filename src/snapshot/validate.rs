use crate::vm::{RoutineKind, BYTECODE_VERSION};

use super::format::CodeRecord;

/// Outcome of checking one embedded code descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Built anyway, but poisoned so that executing it fails.
    Trapped { found: u32, expected: u32 },
    /// Cannot be rebuilt at all.
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    accepted: u32,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(BYTECODE_VERSION)
    }
}

impl Validator {
    pub fn new(accepted: u32) -> Self {
        Self { accepted }
    }

    pub fn accepted(&self) -> u32 {
        self.accepted
    }

    /// The version decides first: a record from another generation traps
    /// whatever it carries, since it never runs. For the current generation
    /// an unknown routine kind is rejected because no wrapper can be built
    /// for it. Opcode bytes are not judged here; restore turns undecodable
    /// ones into [`Opcode::Invalid`](crate::vm::Opcode::Invalid) so they fail
    /// only when reached.
    pub fn validate(&self, record: &CodeRecord) -> Verdict {
        if record.trapped || record.version != self.accepted {
            return Verdict::Trapped {
                found: record.version,
                expected: self.accepted,
            };
        }
        if RoutineKind::from_byte(record.kind).is_none() {
            return Verdict::Rejected(format!("unknown routine kind {}", record.kind));
        }
        Verdict::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::format::RawInstruction;
    use crate::vm::Opcode;

    fn record(version: u32, opcodes: &[u8]) -> CodeRecord {
        CodeRecord {
            key: "f".into(),
            version,
            trapped: false,
            kind: RoutineKind::Plain as u8,
            name: "f".into(),
            arity: 0,
            locals: 0,
            constants: Vec::new(),
            children: Vec::new(),
            instructions: opcodes
                .iter()
                .map(|&opcode| RawInstruction {
                    opcode,
                    operand_a: 0,
                    operand_b: 0,
                })
                .collect(),
            instruction_span: 0..0,
        }
    }

    #[test]
    fn matching_version_is_accepted() {
        let validator = Validator::new(3);
        assert_eq!(validator.validate(&record(3, &[Opcode::Return as u8])), Verdict::Accepted);
    }

    #[test]
    fn corrupt_entry_is_still_accepted_at_code_level() {
        let validator = Validator::new(3);
        let corrupt = record(3, &[Opcode::Invalid as u8, Opcode::Return as u8]);
        assert_eq!(validator.validate(&corrupt), Verdict::Accepted);
    }

    #[test]
    fn other_versions_trap() {
        let validator = Validator::new(3);
        assert_eq!(
            validator.validate(&record(2, &[0x77])),
            Verdict::Trapped {
                found: 2,
                expected: 3
            }
        );
    }

    #[test]
    fn previously_trapped_stays_trapped() {
        let validator = Validator::new(3);
        let mut poisoned = record(3, &[Opcode::TrapEntry as u8]);
        poisoned.trapped = true;
        assert!(matches!(validator.validate(&poisoned), Verdict::Trapped { .. }));
    }

    #[test]
    fn unknown_opcodes_are_left_to_restore() {
        let validator = Validator::new(3);
        assert_eq!(validator.validate(&record(3, &[0x77])), Verdict::Accepted);
        assert_eq!(
            validator.validate(&record(3, &[Opcode::Nop as u8, 0xFE])),
            Verdict::Accepted
        );
    }

    #[test]
    fn unknown_kind_is_rejected_only_for_the_current_version() {
        let validator = Validator::new(3);
        let mut bad_kind = record(3, &[]);
        bad_kind.kind = 9;
        assert!(matches!(validator.validate(&bad_kind), Verdict::Rejected(_)));

        let mut newer = record(4, &[Opcode::Return as u8]);
        newer.kind = 9;
        assert_eq!(
            validator.validate(&newer),
            Verdict::Trapped {
                found: 4,
                expected: 3
            }
        );
    }
}
