//! Bytecode opcodes — `spec.md` §4.5.
//!
//! Names and grouping mirror `original_source/liblwScript/Chunk.h`'s
//! `OpCode` enum (`OP_CONSTANT`, `OP_ADD`, ...), generalized to the full
//! opcode set `spec.md` §4.5 calls for (upvalues, references, destructuring
//! aggregate-resolve, modules) which the distilled original only partially
//! exposes. One byte per opcode tag; operand widths are fixed per opcode
//! and documented alongside each variant (`bytecode/code.rs` encodes them).

/// One bytecode instruction tag. `#[repr(u8)]` so `Opcode as u8` is the wire
/// encoding used by `Chunk`'s raw opcode stream (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum Opcode {
    // stack
    /// operand: u16 constant-pool index
    Constant,
    Null,
    Pop,

    // arithmetic / logic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Not,
    Minus,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    BitLeftShift,
    BitRightShift,
    Less,
    Greater,
    Equal,
    Factorial,

    // control flow
    /// operand: u16 forward offset
    Jump,
    /// operand: u16 forward offset; leaves the condition on the stack
    JumpIfFalse,
    /// operand: u16 backward offset
    Loop,

    // bindings
    /// operand: u16 global slot index
    SetGlobal,
    GetGlobal,
    /// operand: u16 local slot index
    SetLocal,
    GetLocal,
    /// operand: u16 upvalue index
    SetUpvalue,
    GetUpvalue,
    /// operand: u16 slot index — produces a `Reference` value
    RefGlobal,
    RefLocal,
    RefUpvalue,
    /// pops an index and a container, produces an indexed `Reference`
    RefIndex,
    CloseUpvalue,

    // aggregates
    /// operand: u16 element count
    Array,
    Dict,
    Struct,
    GetIndex,
    SetIndex,
    /// operand: u16 name constant index
    GetProperty,
    SetProperty,
    GetBase,

    // calls / returns
    /// operand: u8 argument count
    Call,
    /// operand: u8 return-value count
    Return,
    /// operand: u16 function constant index, followed by u8 upvalue count
    /// and that many `(is_local: u8, index: u16)` pairs
    Closure,

    // objects
    /// operands: u8 ctor_count, u8 var_count, u8 const_count, u8 parent_count
    Class,
    /// operands: u8 var_count, u8 const_count
    Module,
    /// operand: u8 scratch count
    Reset,

    // multi-return packing
    /// operand: u8 target count
    AggregateResolve,
    AggregateResolveVarArg,
}

impl Opcode {
    /// Number of operand bytes following the one-byte tag, for opcodes whose
    /// operand width is fixed (`Closure`'s trailing upvalue pairs are
    /// variable-length and handled specially by the decoder).
    #[must_use]
    pub fn fixed_operand_len(self) -> usize {
        use Opcode::{
            Add, AggregateResolve, AggregateResolveVarArg, Array, BitAnd, BitLeftShift, BitNot, BitOr,
            BitRightShift, BitXor, Call, Class, CloseUpvalue, Closure, Constant, Dict, Div, Equal, Factorial,
            GetBase, GetGlobal, GetIndex, GetLocal, GetProperty, GetUpvalue, Greater, Jump, JumpIfFalse, Less,
            Loop, Minus, Mod, Module, Mul, Not, Null, Pop, RefGlobal, RefIndex, RefLocal, RefUpvalue, Reset,
            Return, SetGlobal, SetIndex, SetLocal, SetProperty, SetUpvalue, Struct, Sub,
        };
        match self {
            Null | Pop | Add | Sub | Mul | Div | Mod | Not | Minus | BitAnd | BitOr | BitXor | BitNot
            | BitLeftShift | BitRightShift | Less | Greater | Equal | Factorial | GetIndex | SetIndex | GetBase
            | CloseUpvalue | RefIndex => 0,
            Call | Return | Reset | AggregateResolve | AggregateResolveVarArg => 1,
            Constant | Jump | JumpIfFalse | Loop | SetGlobal | GetGlobal | SetLocal | GetLocal | SetUpvalue
            | GetUpvalue | RefGlobal | RefLocal | RefUpvalue | Array | Dict | Struct | GetProperty | SetProperty => 2,
            Class => 4,
            Module => 2,
            // Closure's fixed prefix is the u16 const index + u8 upvalue count;
            // the pairs that follow are read separately by the decoder.
            Closure => 3,
        }
    }
}
