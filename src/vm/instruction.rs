use std::convert::TryFrom;

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown opcode {0:#04x}")]
pub struct UnknownOpcode(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    LoadConst = 1,
    LoadLocal = 2,
    StoreLocal = 3,
    Pop = 4,
    Add = 5,
    Sub = 6,
    Mul = 7,
    Less = 8,
    Equal = 9,
    Not = 10,
    Jump = 11,
    JumpIfFalse = 12,
    Call = 13,
    Return = 14,
    Yield = 15,
    Emit = 16,
    MakeGenerator = 17,
    ForIter = 18,
    YieldValue = 19,
    SetupHandler = 20,
    PopHandler = 21,
    Raise = 22,
    /// Written over the entry of a routine whose version tag was rejected.
    TrapEntry = 0xFD,
    /// Reserved; never produced by a well-formed routine.
    Invalid = 0xFF,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadLocal => "LOAD_LOCAL",
            Opcode::StoreLocal => "STORE_LOCAL",
            Opcode::Pop => "POP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Less => "LESS",
            Opcode::Equal => "EQUAL",
            Opcode::Not => "NOT",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::Yield => "YIELD",
            Opcode::Emit => "EMIT",
            Opcode::MakeGenerator => "MAKE_GENERATOR",
            Opcode::ForIter => "FOR_ITER",
            Opcode::YieldValue => "YIELD_VALUE",
            Opcode::SetupHandler => "SETUP_HANDLER",
            Opcode::PopHandler => "POP_HANDLER",
            Opcode::Raise => "RAISE",
            Opcode::TrapEntry => "TRAP_ENTRY",
            Opcode::Invalid => "INVALID",
        }
    }

    /// Opcodes whose `operand_a` is an instruction offset.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::JumpIfFalse | Opcode::SetupHandler
        )
    }
}

impl TryFrom<u8> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let opcode = match value {
            0 => Opcode::Nop,
            1 => Opcode::LoadConst,
            2 => Opcode::LoadLocal,
            3 => Opcode::StoreLocal,
            4 => Opcode::Pop,
            5 => Opcode::Add,
            6 => Opcode::Sub,
            7 => Opcode::Mul,
            8 => Opcode::Less,
            9 => Opcode::Equal,
            10 => Opcode::Not,
            11 => Opcode::Jump,
            12 => Opcode::JumpIfFalse,
            13 => Opcode::Call,
            14 => Opcode::Return,
            15 => Opcode::Yield,
            16 => Opcode::Emit,
            17 => Opcode::MakeGenerator,
            18 => Opcode::ForIter,
            19 => Opcode::YieldValue,
            20 => Opcode::SetupHandler,
            21 => Opcode::PopHandler,
            22 => Opcode::Raise,
            0xFD => Opcode::TrapEntry,
            0xFF => Opcode::Invalid,
            other => return Err(UnknownOpcode(other)),
        };
        Ok(opcode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand_a: u32,
    pub operand_b: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, operand_a: u32, operand_b: u32) -> Self {
        Self {
            opcode,
            operand_a,
            operand_b,
        }
    }

    pub fn bare(opcode: Opcode) -> Self {
        Self::new(opcode, 0, 0)
    }
}
