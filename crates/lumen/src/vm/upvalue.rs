// Open-upvalue registry
//
// Open upvalues form a singly-linked list threaded through the cells
// themselves, keyed by stack slot. Capturing the same slot twice returns
// the same cell, so every closure over a local aliases one binding; closing
// copies the slot into the cell and unlinks it, turning the aliases into a
// shared heap cell.

use crate::gc::object::{ObjBody, ObjPtr, UpvalueObj};
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
    /// Find or create the open upvalue for `slot`. New cells are inserted
    /// at the head of the open list.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> ObjPtr {
        let mut cursor = self.open_upvalues;
        while let Some(cell) = cursor {
            let upvalue = cell.upvalue_ref();
            if upvalue.index == slot as i32 {
                return cell;
            }
            cursor = upvalue.next_open;
        }

        let cell = self.gc.alloc(ObjBody::Upvalue(UpvalueObj {
            value: self.stack[slot],
            index: slot as i32,
            next_open: self.open_upvalues,
        }));
        self.open_upvalues = Some(cell);
        cell
    }

    /// Close the open upvalue for `slot`, if any: copy the stack value into
    /// the cell, mark it closed and unlink it from the open list. Called on
    /// POP/POP_N for the popped slot and on return for every callee slot.
    pub(crate) fn close_upvalue(&mut self, slot: usize) {
        let mut prev: Option<ObjPtr> = None;
        let mut cursor = self.open_upvalues;
        while let Some(cell) = cursor {
            let upvalue = cell.upvalue_mut();
            if upvalue.index == slot as i32 {
                upvalue.value = self.stack[slot];
                upvalue.index = -1;
                match prev {
                    None => self.open_upvalues = upvalue.next_open,
                    Some(previous) => previous.upvalue_mut().next_open = upvalue.next_open,
                }
                upvalue.next_open = None;
                return;
            }
            prev = cursor;
            cursor = upvalue.next_open;
        }
    }

    /// Read through a cell: open cells defer to their stack slot.
    #[inline(always)]
    pub(crate) fn upvalue_get(&self, cell: ObjPtr) -> Value {
        let upvalue = cell.upvalue_ref();
        if upvalue.index >= 0 {
            self.stack[upvalue.index as usize]
        } else {
            upvalue.value
        }
    }

    /// Write through a cell, symmetric with `upvalue_get`.
    #[inline(always)]
    pub(crate) fn upvalue_set(&mut self, cell: ObjPtr, value: Value) {
        let upvalue = cell.upvalue_mut();
        if upvalue.index >= 0 {
            self.stack[upvalue.index as usize] = value;
        } else {
            upvalue.value = value;
        }
    }
}
