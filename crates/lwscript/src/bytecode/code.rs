//! `Chunk`: bytecode stream, constant pool, and the token back-map —
//! `spec.md` §4.6.
//!
//! Grounded on `ouros::bytecode::code`'s chunk shape, with the wire format
//! of `spec.md` §4.6/§6 implemented literally: magic, version, opcode
//! byte-count, raw opcodes, constant count, then each constant prefixed by
//! its own payload size. Constants are kept as a self-contained [`Constant`]
//! enum rather than runtime [`crate::value::Value`]s, since a `Value`'s
//! object variants are [`crate::heap::HeapId`] indirections into a live
//! heap a freshly deserialized chunk doesn't have yet — `engine.rs`
//! materializes `Constant::Str`/`Constant::Function` into heap objects the
//! first time a chunk is loaded, and scalar kinds convert directly.
//!
//! The per-opcode source token (`spec.md` §4.5: "every opcode carries a
//! one-byte back-index into a per-chunk table of originating source
//! tokens") is kept as a byte-offset-keyed map rather than inline in the
//! opcode stream, so jumps and loops can look a token up by instruction
//! pointer without needing to track a separate sequential instruction
//! counter across non-linear control flow. It is intentionally excluded
//! from the wire format, matching `spec.md` §8 invariant 4's round-trip
//! equality, which is scoped to "opcodes and constants" only.

use ahash::AHashMap;

use crate::token::Source;
use crate::types::function::ArityKind;

const MAGIC: u32 = 0x4C57_5343; // "LWSC"
const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Function(Box<FunctionConstant>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionConstant {
    pub name: String,
    pub arity: u8,
    pub arity_kind: ArityKind,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    BadMagic,
    UnsupportedVersion(u32),
    Truncated,
}

impl std::fmt::Display for ChunkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkError::BadMagic => write!(f, "not an lwscript bytecode file (bad magic)"),
            ChunkError::UnsupportedVersion(v) => write!(f, "unsupported bytecode version {v}"),
            ChunkError::Truncated => write!(f, "truncated bytecode file"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    token_table: Vec<Source>,
    op_token_at_offset: AHashMap<u32, u8>,
    pub name: String,
}

impl PartialEq for Chunk {
    /// Structural equality over opcodes and constants only (`spec.md` §8
    /// invariant 4's round-trip scope excludes the token back-map).
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.constants == other.constants
    }
}

impl Chunk {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn record_source(&mut self, offset: usize, source: Source) {
        let index = match self.token_table.iter().position(|s| *s == source) {
            Some(i) => i,
            None => {
                self.token_table.push(source);
                self.token_table.len() - 1
            }
        };
        // the one-byte back-index table caps at 256 distinct source
        // locations per chunk; beyond that, later tokens alias the last
        // table entry rather than growing past a byte's range.
        let clamped = index.min(255) as u8;
        self.op_token_at_offset.insert(offset as u32, clamped);
    }

    #[must_use]
    pub fn source_at(&self, offset: usize) -> Option<Source> {
        self.op_token_at_offset.get(&(offset as u32)).and_then(|&i| self.token_table.get(i as usize)).copied()
    }

    pub fn add_constant(&mut self, constant: Constant) -> u16 {
        if let Some(pos) = self.constants.iter().position(|c| c == &constant) {
            return pos as u16;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u16
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&(self.constants.len() as u32).to_le_bytes());
        for constant in &self.constants {
            let payload = serialize_constant(constant);
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&payload);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, ChunkError> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.read_u32_be()?;
        if magic != MAGIC {
            return Err(ChunkError::BadMagic);
        }
        let version = cursor.read_u32_be()?;
        if version != VERSION {
            return Err(ChunkError::UnsupportedVersion(version));
        }
        let code_len = cursor.read_u32_le()? as usize;
        let code = cursor.read_bytes(code_len)?.to_vec();
        let constant_count = cursor.read_u32_le()?;
        let mut constants = Vec::with_capacity(constant_count as usize);
        for _ in 0..constant_count {
            let payload_len = cursor.read_u32_le()? as usize;
            let payload = cursor.read_bytes(payload_len)?;
            constants.push(deserialize_constant(payload)?);
        }
        Ok(Self { code, constants, token_table: Vec::new(), op_token_at_offset: AHashMap::default(), name: String::new() })
    }
}

const KIND_NULL: u8 = 0;
const KIND_BOOL: u8 = 1;
const KIND_INT: u8 = 2;
const KIND_FLOAT: u8 = 3;
const KIND_CHAR: u8 = 4;
const KIND_STR: u8 = 5;
const KIND_FUNCTION: u8 = 6;

fn serialize_constant(constant: &Constant) -> Vec<u8> {
    let mut out = Vec::new();
    match constant {
        Constant::Null => {
            out.push(KIND_NULL);
            out.push(0);
            out.extend_from_slice(&0u64.to_le_bytes());
        }
        Constant::Bool(b) => {
            out.push(KIND_BOOL);
            out.push(0);
            out.extend_from_slice(&u64::from(*b).to_le_bytes());
        }
        Constant::Int(n) => {
            out.push(KIND_INT);
            out.push(0);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Constant::Float(f) => {
            out.push(KIND_FLOAT);
            out.push(0);
            out.extend_from_slice(&f.to_bits().to_le_bytes());
        }
        Constant::Char(c) => {
            out.push(KIND_CHAR);
            out.push(0);
            out.extend_from_slice(&u64::from(*c).to_le_bytes());
        }
        Constant::Str(s) => {
            out.push(KIND_STR);
            out.push(0);
            let bytes = s.as_bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(bytes);
        }
        Constant::Function(f) => {
            out.push(KIND_FUNCTION);
            out.push(0);
            let name_bytes = f.name.as_bytes();
            out.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(name_bytes);
            out.push(f.arity);
            out.push(arity_kind_tag(f.arity_kind));
            let chunk_bytes = f.chunk.serialize();
            out.extend_from_slice(&(chunk_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&chunk_bytes);
        }
    }
    out
}

fn deserialize_constant(payload: &[u8]) -> Result<Constant, ChunkError> {
    let mut cursor = Cursor::new(payload);
    let kind = cursor.read_u8()?;
    let _mutability = cursor.read_u8()?;
    Ok(match kind {
        KIND_NULL => {
            cursor.read_bytes(8)?;
            Constant::Null
        }
        KIND_BOOL => Constant::Bool(cursor.read_u64_le()? != 0),
        KIND_INT => Constant::Int(cursor.read_u64_le()? as i64),
        KIND_FLOAT => Constant::Float(f64::from_bits(cursor.read_u64_le()?)),
        KIND_CHAR => {
            let code_point = cursor.read_u64_le()? as u32;
            Constant::Char(char::from_u32(code_point).unwrap_or('\u{FFFD}'))
        }
        KIND_STR => {
            let len = cursor.read_u32_le()? as usize;
            let bytes = cursor.read_bytes(len)?;
            Constant::Str(String::from_utf8_lossy(bytes).into_owned())
        }
        KIND_FUNCTION => {
            let name_len = cursor.read_u32_le()? as usize;
            let name = String::from_utf8_lossy(cursor.read_bytes(name_len)?).into_owned();
            let arity = cursor.read_u8()?;
            let arity_kind = arity_kind_from_tag(cursor.read_u8()?);
            let chunk_len = cursor.read_u32_le()? as usize;
            let chunk = Chunk::deserialize(cursor.read_bytes(chunk_len)?)?;
            Constant::Function(Box::new(FunctionConstant { name, arity, arity_kind, chunk }))
        }
        _ => return Err(ChunkError::Truncated),
    })
}

fn arity_kind_tag(kind: ArityKind) -> u8 {
    match kind {
        ArityKind::None => 0,
        ArityKind::Unnamed => 1,
        ArityKind::Named => 2,
    }
}

fn arity_kind_from_tag(tag: u8) -> ArityKind {
    match tag {
        1 => ArityKind::Unnamed,
        2 => ArityKind::Named,
        _ => ArityKind::None,
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ChunkError> {
        if self.pos + len > self.bytes.len() {
            return Err(ChunkError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ChunkError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32_be(&mut self) -> Result<u32, ChunkError> {
        Ok(u32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u32_le(&mut self) -> Result<u32, ChunkError> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64_le(&mut self) -> Result<u64, ChunkError> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalar_constants_and_code() {
        let mut chunk = Chunk::new("test");
        chunk.code = vec![1, 2, 3, 4];
        chunk.add_constant(Constant::Int(42));
        chunk.add_constant(Constant::Str("hi".to_string()));
        chunk.add_constant(Constant::Bool(true));
        let bytes = chunk.serialize();
        let restored = Chunk::deserialize(&bytes).unwrap();
        assert_eq!(chunk, restored);
    }

    #[test]
    fn round_trips_nested_function_constant() {
        let mut inner = Chunk::new("inner");
        inner.code = vec![9, 9];
        let mut outer = Chunk::new("outer");
        outer.add_constant(Constant::Function(Box::new(FunctionConstant {
            name: "f".to_string(),
            arity: 2,
            arity_kind: ArityKind::Named,
            chunk: inner,
        })));
        let bytes = outer.serialize();
        let restored = Chunk::deserialize(&bytes).unwrap();
        assert_eq!(outer, restored);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = Chunk::deserialize(&[0, 0, 0, 0, 0, 0, 0, 1]).unwrap_err();
        assert_eq!(err, ChunkError::BadMagic);
    }

    #[test]
    fn interns_duplicate_constants() {
        let mut chunk = Chunk::new("test");
        let a = chunk.add_constant(Constant::Int(7));
        let b = chunk.add_constant(Constant::Int(7));
        assert_eq!(a, b);
    }

    #[test]
    fn token_lookup_by_offset_survives_backward_jumps() {
        let mut chunk = Chunk::new("test");
        chunk.record_source(0, Source::new(1, 1, 0));
        chunk.record_source(5, Source::new(2, 1, 10));
        assert_eq!(chunk.source_at(0), Some(Source::new(1, 1, 0)));
        assert_eq!(chunk.source_at(5), Some(Source::new(2, 1, 10)));
        assert_eq!(chunk.source_at(99), None);
    }
}
