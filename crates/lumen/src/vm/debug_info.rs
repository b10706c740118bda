// Instruction records for error attribution
//
// The compiler emits, per function, a list of records mapping bytecode
// offsets back to source positions. A fault is attributed to the record
// with the greatest offset not exceeding the faulting pc.

use ahash::AHashMap;
use smol_str::SmolStr;

#[derive(Debug, Clone)]
pub struct InstrRecord {
    /// Bytecode offset of the instruction's opcode byte.
    pub offset: usize,
    pub line: i32,
    pub column: i32,
    /// Enclosing function name, when the compiler knows one.
    pub fun_name: Option<SmolStr>,
}

/// Function name to its instruction records, ordered by offset.
pub type InstrTable = AHashMap<SmolStr, Vec<InstrRecord>>;

/// Name used for records of top-level code.
pub const GLOBAL_SCOPE: &str = "<global>";

/// Find the record attributing `pc` within `fun_name`'s records.
pub fn locate<'a>(instrs: &'a InstrTable, fun_name: &str, pc: usize) -> Option<&'a InstrRecord> {
    let records = instrs.get(fun_name)?;
    let mut found = None;
    for record in records {
        if record.offset > pc {
            break;
        }
        found = Some(record);
    }
    found
}
