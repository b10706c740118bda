// Call frame
//
// A frame records the caller's resume state at the moment of the call plus
// the callee (for error attribution and GC marking) and the iterator depth
// to restore on return, reclaiming iterators left open by `break`.

use crate::gc::object::ObjPtr;

pub struct Frame {
    /// Caller program counter to resume at.
    pub pc: usize,
    /// Caller base pointer.
    pub bp: usize,
    /// Caller stack pointer; the operands of the call were already popped.
    pub sp: usize,
    /// Caller instruction counter.
    pub ip: usize,
    /// Caller code object.
    pub code: ObjPtr,
    /// The function executing in this frame.
    pub function: Option<ObjPtr>,
    /// Iterator stack height at frame creation.
    pub iters_top: usize,
}
