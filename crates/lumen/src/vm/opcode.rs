// Opcode catalog
//
// Byte values are normative: compiled programs are a linear byte stream of
// these opcodes with inline operands. Two-byte immediates are big-endian;
// jump offsets are signed 16-bit, relative to the byte immediately after
// the opcode.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    No = 0,          // no-op
    LoadConst = 1,   // u16 constant index
    StoreGlobal = 2, // u8 name index; pops the value
    LoadGlobal = 3,  // u8 name index; missing globals read as nil
    LoadLocal = 4,   // u8 bp-relative slot
    StoreLocal = 5,  // u8 bp-relative slot; pops the value
    LoadUpvalue = 6, // u8 upvalue index in the current function
    StoreUpvalue = 7, // u8 upvalue index; pops the value
    PushNil = 8,
    DupTop = 9,
    Pop = 10,          // closes an open upvalue at the popped slot
    PopN = 11,         // u8 count
    Jump = 12,         // i16 relative offset
    JumpIfTrue = 13,   // i16; pops the test
    JumpIfFalse = 14,  // i16; pops the test
    Return = 15,       // pops the result, unwinds one frame
    Halt = 16,
    Binary = 17,  // u8 sub-opcode (BinaryOp)
    Unary = 18,   // u8 sub-opcode (UnaryOp)
    Compare = 19, // u8 sub-opcode (CompareOp)
    PushList = 20, // u16 element count
    PushMap = 21,  // u16 pair count
    PushRange = 22, // pops step, end, start
    PushSlice = 23, // pops step, end, start, then the sequence
    GetItem = 24,   // pops index, container
    SetItem = 25,   // pops index, container, value
    PushIter = 26,  // pops an iterable, resets its cursor
    Loop = 27,      // u16 forward offset taken on exhaustion
    PopIter = 28,
    CallFunction = 29, // u8 argument count
    PushFunction = 30, // u8 parameter count
    PushClosure = 31,  // u8 parameter count, u8 upvalue count
    Debug = 32,        // prints the current pc
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        Some(match byte {
            0 => OpCode::No,
            1 => OpCode::LoadConst,
            2 => OpCode::StoreGlobal,
            3 => OpCode::LoadGlobal,
            4 => OpCode::LoadLocal,
            5 => OpCode::StoreLocal,
            6 => OpCode::LoadUpvalue,
            7 => OpCode::StoreUpvalue,
            8 => OpCode::PushNil,
            9 => OpCode::DupTop,
            10 => OpCode::Pop,
            11 => OpCode::PopN,
            12 => OpCode::Jump,
            13 => OpCode::JumpIfTrue,
            14 => OpCode::JumpIfFalse,
            15 => OpCode::Return,
            16 => OpCode::Halt,
            17 => OpCode::Binary,
            18 => OpCode::Unary,
            19 => OpCode::Compare,
            20 => OpCode::PushList,
            21 => OpCode::PushMap,
            22 => OpCode::PushRange,
            23 => OpCode::PushSlice,
            24 => OpCode::GetItem,
            25 => OpCode::SetItem,
            26 => OpCode::PushIter,
            27 => OpCode::Loop,
            28 => OpCode::PopIter,
            29 => OpCode::CallFunction,
            30 => OpCode::PushFunction,
            31 => OpCode::PushClosure,
            32 => OpCode::Debug,
            _ => return None,
        })
    }
}

/// BINARY sub-opcodes. 10 doubles as xor (numbers, list broadcast) and the
/// 3-D cross product (two lists).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Mod = 4,
    And = 5,
    Or = 6,
    Pow = 7,
    BitAnd = 8,
    BitOr = 9,
    BitXor = 10,
    Shl = 11,
    Shr = 12,
    UShr = 13,
    Dot = 14,
    Is = 15,
}

impl BinaryOp {
    pub fn from_byte(byte: u8) -> Option<BinaryOp> {
        Some(match byte {
            0 => BinaryOp::Add,
            1 => BinaryOp::Sub,
            2 => BinaryOp::Mul,
            3 => BinaryOp::Div,
            4 => BinaryOp::Mod,
            5 => BinaryOp::And,
            6 => BinaryOp::Or,
            7 => BinaryOp::Pow,
            8 => BinaryOp::BitAnd,
            9 => BinaryOp::BitOr,
            10 => BinaryOp::BitXor,
            11 => BinaryOp::Shl,
            12 => BinaryOp::Shr,
            13 => BinaryOp::UShr,
            14 => BinaryOp::Dot,
            15 => BinaryOp::Is,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnaryOp {
    Plus = 0,
    Minus = 1,
    Not = 2,
    BitNot = 3,
    Size = 4,
    Incr = 5,
    Decr = 6,
}

impl UnaryOp {
    pub fn from_byte(byte: u8) -> Option<UnaryOp> {
        Some(match byte {
            0 => UnaryOp::Plus,
            1 => UnaryOp::Minus,
            2 => UnaryOp::Not,
            3 => UnaryOp::BitNot,
            4 => UnaryOp::Size,
            5 => UnaryOp::Incr,
            6 => UnaryOp::Decr,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompareOp {
    Eq = 0,
    Ne = 1,
    Gt = 2,
    Lt = 3,
    Ge = 4,
    Le = 5,
}

impl CompareOp {
    pub fn from_byte(byte: u8) -> Option<CompareOp> {
        Some(match byte {
            0 => CompareOp::Eq,
            1 => CompareOp::Ne,
            2 => CompareOp::Gt,
            3 => CompareOp::Lt,
            4 => CompareOp::Ge,
            5 => CompareOp::Le,
            _ => return None,
        })
    }
}
