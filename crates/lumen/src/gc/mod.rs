// Tri-color mark-sweep garbage collector
//
// Objects are born white and prepended to one intrusive heap list. A cycle
// runs only at the safe point between two opcodes: seed every root gray,
// drain the gray worklist blackening as it goes, then sweep whites and
// recolor survivors. Graying happens before a child is visited, so cyclic
// graphs (prototype loops, self-referencing lists) terminate.
//
// Triggering is adaptive: a per-opcode counter fires a cycle at `next_gc`;
// an effective cycle (many frees) halves the threshold, an ineffective one
// doubles it, clamped to a fixed window.

pub mod object;

use crate::gc::object::{GcColor, ObjBody, ObjPtr, Object};
use crate::value::Value;
use crate::vm::limits::{GC_EFFECTIVE_FREES, GC_NEXT_DEFAULT, GC_NEXT_MAX, GC_NEXT_MIN};
use crate::vm::Vm;

#[derive(Debug, Clone, Default)]
pub struct GcStats {
    pub collections: usize,
    pub objects_freed: usize,
}

pub struct Gc {
    /// Head of the intrusive heap list.
    head: *mut Object,
    /// Gray worklist for the mark phase.
    gray: Vec<ObjPtr>,
    /// Opcodes executed since the last cycle.
    pub counter: u64,
    /// Collection threshold for `counter`.
    pub next_gc: u64,
    /// Live objects currently linked in the heap list.
    pub obj_count: usize,
    pub stats: GcStats,
}

impl Gc {
    pub fn new() -> Self {
        Gc {
            head: std::ptr::null_mut(),
            gray: Vec::new(),
            counter: 0,
            next_gc: GC_NEXT_DEFAULT,
            obj_count: 0,
            stats: GcStats::default(),
        }
    }

    /// Allocate a new heap object and link it at the head of the list.
    pub fn alloc(&mut self, body: ObjBody) -> ObjPtr {
        let ptr = ObjPtr::from_box(Box::new(Object::new(body)));
        self.add_obj(ptr)
    }

    /// Link an object at the head of the heap list. Idempotent: an object
    /// already linked is returned untouched.
    pub fn add_obj(&mut self, ptr: ObjPtr) -> ObjPtr {
        let obj = ptr.get_mut();
        if obj.header.in_heap_list {
            return ptr;
        }
        obj.header.in_heap_list = true;
        obj.header.color = GcColor::White;
        obj.header.next = self.head;
        self.head = ptr.as_ptr();
        self.obj_count += 1;
        ptr
    }

    /// Walk the heap list and count it. Debugging aid.
    pub fn count_objs(&self) -> usize {
        let mut count = 0;
        let mut cur = self.head;
        while !cur.is_null() {
            count += 1;
            cur = unsafe { (*cur).header.next };
        }
        count
    }

    #[inline]
    pub(crate) fn mark_value(&mut self, value: Value) {
        if let Value::Obj(ptr) = value {
            self.mark_object(ptr);
        }
    }

    /// Gray an object and queue it for tracing. Objects met here that were
    /// never linked (reachable but outside the heap list) are linked first,
    /// so every live object ends a mark phase listed and gray-or-black.
    pub(crate) fn mark_object(&mut self, ptr: ObjPtr) {
        if !ptr.get().header.in_heap_list {
            self.add_obj(ptr);
        }
        let obj = ptr.get_mut();
        if obj.header.color != GcColor::White {
            return;
        }
        obj.header.color = GcColor::Gray;
        self.gray.push(ptr);
    }

    /// Drain the gray worklist, graying children and blackening each
    /// drained object.
    pub(crate) fn trace(&mut self) {
        while let Some(ptr) = self.gray.pop() {
            match &ptr.get().body {
                ObjBody::Str(_) | ObjBody::Range(_) | ObjBody::Native(_) => {}
                ObjBody::List(list) => {
                    for &item in &list.items {
                        self.mark_value(item);
                    }
                }
                ObjBody::Map(map) => {
                    for (_, &value) in map.table.iter() {
                        self.mark_value(value);
                    }
                    if let Some(proto) = map.proto {
                        self.mark_object(proto);
                    }
                }
                ObjBody::Function(fun) => {
                    for &default in &fun.defaults {
                        self.mark_value(default);
                    }
                    for &cell in &fun.upvalues {
                        self.mark_object(cell);
                    }
                    if let Some(receiver) = fun.receiver {
                        self.mark_object(receiver);
                    }
                    self.mark_object(fun.body);
                }
                ObjBody::Code(code) => {
                    let constants = code.constants.clone();
                    for &constant in constants.iter() {
                        self.mark_value(constant);
                    }
                }
                ObjBody::Upvalue(cell) => {
                    self.mark_value(cell.value);
                }
            }
            ptr.get_mut().header.color = GcColor::Black;
        }
    }

    /// Free every white object, recolor survivors white for the next
    /// cycle. Returns the number of objects freed.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let mut prev: *mut Object = std::ptr::null_mut();
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: `cur` came off the heap list and has not been freed
            // in this walk.
            let obj = unsafe { &mut *cur };
            let next = obj.header.next;
            if obj.header.color == GcColor::White {
                if prev.is_null() {
                    self.head = next;
                } else {
                    unsafe { (*prev).header.next = next };
                }
                drop(unsafe { Box::from_raw(cur) });
                freed += 1;
            } else {
                obj.header.color = GcColor::White;
                prev = cur;
            }
            cur = next;
        }
        self.obj_count -= freed;
        self.stats.objects_freed += freed;
        freed
    }

    /// Free the whole heap list; only called when the VM is dropped.
    pub(crate) fn free_all(&mut self) {
        let mut cur = self.head;
        while !cur.is_null() {
            let next = unsafe { (*cur).header.next };
            drop(unsafe { Box::from_raw(cur) });
            cur = next;
        }
        self.head = std::ptr::null_mut();
        self.obj_count = 0;
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Run one full collection cycle and adapt the trigger threshold.
    pub(crate) fn collect_garbage(&mut self) {
        self.mark_roots();
        self.gc.trace();
        let freed = self.gc.sweep();

        self.gc.stats.collections += 1;
        self.gc.counter = 0;
        if freed >= GC_EFFECTIVE_FREES {
            self.gc.next_gc /= 2;
        } else {
            self.gc.next_gc = self.gc.next_gc.saturating_mul(2);
        }
        self.gc.next_gc = self.gc.next_gc.clamp(GC_NEXT_MIN, GC_NEXT_MAX);
    }

    /// Seed the gray worklist from every root: live stack slots, frames,
    /// live iterators, globals, the open-upvalue chain, the current code
    /// and its constant pool, and the currently executing function.
    fn mark_roots(&mut self) {
        for i in 0..self.sp {
            let value = self.stack[i];
            self.gc.mark_value(value);
        }

        for frame in &self.frames {
            self.gc.mark_object(frame.code);
            if let Some(function) = frame.function {
                self.gc.mark_object(function);
            }
        }

        for &iter in &self.iters {
            self.gc.mark_object(iter);
        }

        for (_, &value) in self.globals.iter() {
            self.gc.mark_value(value);
        }

        let mut open = self.open_upvalues;
        while let Some(cell) = open {
            self.gc.mark_object(cell);
            let upvalue = cell.upvalue_ref();
            self.gc.mark_value(upvalue.value);
            if upvalue.index >= 0 {
                let slot = self.stack[upvalue.index as usize];
                self.gc.mark_value(slot);
            }
            open = upvalue.next_open;
        }

        self.gc.mark_object(self.code);
        let constants = self.code.code_ref().constants.clone();
        for &constant in constants.iter() {
            self.gc.mark_value(constant);
        }

        if let Some(function) = self.function {
            self.gc.mark_object(function);
        }
    }
}
