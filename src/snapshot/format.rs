//! Byte-level layout of a snapshot.
//!
//! ```text
//! "SVTK" | format u16 | flags u8
//! code count u32 | (len u32, code record)*
//! task count u32 | (len u32, task record)*
//! ```
//!
//! Every integer is little-endian with a fixed width, so a blob reads the same
//! on every word size and byte order. Values inside records are opaque byte
//! strings produced by the configured [`ValueCodec`](crate::codec::ValueCodec).

use std::io::{Cursor, Read};
use std::ops::Range;

use crate::policy::PickleFlags;

use super::SnapshotError;

pub const MAGIC: &[u8; 4] = b"SVTK";
pub const FORMAT_VERSION: u16 = 1;

/// Size of one encoded instruction: opcode byte plus two `u32` operands.
pub const INSTRUCTION_WIDTH: usize = 9;

pub(crate) const VALIDITY_VALID: u8 = 0;
pub(crate) const VALIDITY_INVALID: u8 = 1;

pub(crate) const FINALIZER_UNINITIALIZED: u8 = 0;
pub(crate) const FINALIZER_MARKER: u8 = 1;
pub(crate) const FINALIZER_VALUE: u8 = 2;
pub(crate) const FINALIZER_RESET: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInstruction {
    pub opcode: u8,
    pub operand_a: u32,
    pub operand_b: u32,
}

/// A code descriptor exactly as it appears in a blob, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRecord {
    pub key: String,
    pub version: u32,
    /// The descriptor was already poisoned when it was captured.
    pub trapped: bool,
    pub kind: u8,
    pub name: String,
    pub arity: u16,
    pub locals: u16,
    pub constants: Vec<Vec<u8>>,
    /// Indices into the blob's code table; always lower than this record's.
    pub children: Vec<u32>,
    pub instructions: Vec<RawInstruction>,
    /// Absolute byte range of the instruction entries inside the blob.
    pub instruction_span: Range<usize>,
}

pub(crate) struct Container<'a> {
    pub format: u16,
    pub flags: PickleFlags,
    pub codes: Vec<CodeRecord>,
    pub tasks: Vec<&'a [u8]>,
}

/// Parses the header and code table and slices out the task records.
pub(crate) fn parse(bytes: &[u8]) -> Result<Container<'_>, SnapshotError> {
    let mut reader = Reader::new(bytes);
    let mut magic = [0u8; 4];
    reader.fill(&mut magic)?;
    if &magic != MAGIC {
        return Err(SnapshotError::InvalidHeader);
    }
    let format = reader.u16()?;
    if format != FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedFormat(format));
    }
    let flags = PickleFlags::from_bits(reader.u8()?)
        .map_err(|err| SnapshotError::Malformed(err.to_string()))?;

    let code_count = reader.count()?;
    let mut codes = Vec::with_capacity(code_count);
    for index in 0..code_count {
        let end = reader.record_end()?;
        let record = read_code_record(&mut reader, index as u32)?;
        reader.expect_at(end, "code record")?;
        codes.push(record);
    }

    let task_count = reader.count()?;
    let mut tasks = Vec::with_capacity(task_count);
    for _ in 0..task_count {
        tasks.push(reader.bytes()?);
    }
    if !reader.is_at_end() {
        return Err(SnapshotError::Malformed("trailing bytes after task table".into()));
    }
    Ok(Container {
        format,
        flags,
        codes,
        tasks,
    })
}

fn read_code_record(reader: &mut Reader<'_>, index: u32) -> Result<CodeRecord, SnapshotError> {
    let key = reader.string()?;
    let version = reader.u32()?;
    let trapped = reader.flag()?;
    let kind = reader.u8()?;
    let name = reader.string()?;
    let arity = reader.u16()?;
    let locals = reader.u16()?;

    let constant_count = reader.count()?;
    let mut constants = Vec::with_capacity(constant_count);
    for _ in 0..constant_count {
        constants.push(reader.bytes()?.to_vec());
    }

    let child_count = reader.count()?;
    let mut children = Vec::with_capacity(child_count);
    for _ in 0..child_count {
        let child = reader.u32()?;
        if child >= index {
            return Err(SnapshotError::Malformed(format!(
                "code '{key}' refers to child {child} which is not defined before it"
            )));
        }
        children.push(child);
    }

    let instruction_count = reader.count()?;
    let start = reader.position();
    let mut instructions = Vec::with_capacity(instruction_count);
    for _ in 0..instruction_count {
        instructions.push(RawInstruction {
            opcode: reader.u8()?,
            operand_a: reader.u32()?,
            operand_b: reader.u32()?,
        });
    }
    let instruction_span = start..reader.position();

    Ok(CodeRecord {
        key,
        version,
        trapped,
        kind,
        name,
        arity,
        locals,
        constants,
        children,
        instructions,
        instruction_span,
    })
}

#[derive(Debug, Default)]
pub(crate) struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn flag(&mut self, value: bool) {
        self.bytes.push(u8::from(value));
    }

    pub fn u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Counts and lengths are stored as `u32`.
    pub fn count(&mut self, len: usize) -> Result<(), SnapshotError> {
        let len = u32::try_from(len).map_err(|_| SnapshotError::Oversized(len))?;
        self.u32(len);
        Ok(())
    }

    /// Length-prefixed byte string.
    pub fn bytes(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        self.count(data.len())?;
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    pub fn string(&mut self, value: &str) -> Result<(), SnapshotError> {
        self.bytes(value.as_bytes())
    }

    pub fn raw(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub(crate) struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    pub fn fill(&mut self, buf: &mut [u8]) -> Result<(), SnapshotError> {
        self.cursor
            .read_exact(buf)
            .map_err(|_| SnapshotError::UnexpectedEof)
    }

    pub fn u8(&mut self) -> Result<u8, SnapshotError> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    pub fn flag(&mut self) -> Result<bool, SnapshotError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SnapshotError::Malformed(format!("invalid flag byte {other}"))),
        }
    }

    pub fn u16(&mut self) -> Result<u16, SnapshotError> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn u32(&mut self) -> Result<u32, SnapshotError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn u64(&mut self) -> Result<u64, SnapshotError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Element count, bounded by the bytes left so a corrupt prefix cannot
    /// trigger a huge allocation.
    pub fn count(&mut self) -> Result<usize, SnapshotError> {
        let count = self.u32()? as usize;
        if count > self.remaining() {
            return Err(SnapshotError::UnexpectedEof);
        }
        Ok(count)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8], SnapshotError> {
        let len = self.count()?;
        let start = self.position();
        let data: &'a [u8] = self.cursor.get_ref();
        let slice = &data[start..start + len];
        self.cursor.set_position((start + len) as u64);
        Ok(slice)
    }

    pub fn string(&mut self) -> Result<String, SnapshotError> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SnapshotError::InvalidUtf8)
    }

    /// Reads a record length and returns the absolute offset it ends at.
    pub fn record_end(&mut self) -> Result<usize, SnapshotError> {
        let len = self.count()?;
        Ok(self.position() + len)
    }

    pub fn expect_at(&self, end: usize, what: &str) -> Result<(), SnapshotError> {
        if self.position() != end {
            return Err(SnapshotError::Malformed(format!(
                "{what} length does not match its contents"
            )));
        }
        Ok(())
    }
}
