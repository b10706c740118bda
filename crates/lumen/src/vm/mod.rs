// Virtual machine state and lifecycle
//
// The Vm is a self-contained value threaded through every operation: the
// operand stack, frame stack, iterator stack, global table, heap and open
// upvalues all live here. Execution is single-threaded and cooperative; the
// only cross-thread surfaces are the cancellation flag and an advisory lock
// host threads take before reading VM state.

pub mod debug;
pub mod debug_info;
pub mod error;
pub mod execute;
pub mod frame;
pub mod limits;
pub mod opcode;
pub mod upvalue;

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use smol_str::SmolStr;

use crate::gc::object::{
    CodeObj, FunctionObj, ListObj, MapObj, NativeFn, NativeObj, ObjBody, ObjPtr, RangeObj,
    StringObj,
};
use crate::gc::Gc;
use crate::value::table::OrderedTable;
use crate::value::Value;
use crate::vm::error::{ErrorHandler, VmResult};
use crate::vm::frame::Frame;
use crate::vm::limits::{STACK_MAX, TARGET_FPS};

pub struct Vm {
    pub(crate) stack: Vec<Value>,
    pub(crate) sp: usize,
    pub(crate) bp: usize,
    pub(crate) pc: usize,
    /// Instructions executed in the current function activation.
    pub(crate) ip: usize,
    /// Currently executing code object.
    pub(crate) code: ObjPtr,
    /// Currently executing function, if any. Not restored on return; each
    /// nested dispatch loop holds its own binding.
    pub(crate) function: Option<ObjPtr>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) iters: Vec<ObjPtr>,
    pub(crate) globals: OrderedTable,
    pub(crate) open_upvalues: Option<ObjPtr>,
    pub(crate) gc: Gc,
    /// Cleared by the host to stop the dispatcher after the current opcode.
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) error_message: String,
    pub(crate) error_handler: Option<ErrorHandler>,

    /// Host frame-rate target, read by host-provided natives.
    pub fps: u32,
    /// Opaque host handles; their semantics belong to the host.
    pub screen: Option<Box<dyn Any>>,
    pub cart: Option<Box<dyn Any>>,
    lock: Mutex<()>,
}

impl Vm {
    pub fn new() -> Box<Vm> {
        let mut gc = Gc::new();
        let code = gc.alloc(ObjBody::Code(CodeObj::empty()));

        let mut vm = Box::new(Vm {
            stack: vec![Value::Nil; STACK_MAX],
            sp: 0,
            bp: 0,
            pc: 0,
            ip: 0,
            code,
            function: None,
            frames: Vec::new(),
            iters: Vec::new(),
            globals: OrderedTable::new(),
            open_upvalues: None,
            gc,
            running: Arc::new(AtomicBool::new(true)),
            error_message: String::new(),
            error_handler: None,
            fps: TARGET_FPS,
            screen: None,
            cart: None,
            lock: Mutex::new(()),
        });

        vm.install_key_constants();
        vm
    }

    /// Load new code and reset the execution state. Globals are kept on
    /// purpose so interactive shells accumulate state across programs.
    pub fn reset(&mut self, code: ObjPtr) {
        self.pc = 0;
        self.sp = 0;
        self.bp = 0;
        self.ip = 0;
        self.code = code;

        self.frames.clear();
        self.iters.clear();
        self.open_upvalues = None;
        self.function = None;

        self.running.store(true, Ordering::Relaxed);

        self.gc.counter = 0;
        self.gc.next_gc = limits::GC_NEXT_DEFAULT;
        self.error_message.clear();
    }

    /// Run the loaded program to completion.
    pub fn execute(&mut self) -> VmResult<()> {
        self.run()
    }

    // ============ Stack primitives ============

    #[inline(always)]
    pub(crate) fn push(&mut self, value: Value) -> VmResult<()> {
        if self.sp >= STACK_MAX {
            return Err(self.error("Stack overflow: attempted to push onto a full stack"));
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    #[inline(always)]
    pub(crate) fn pop(&mut self) -> VmResult<Value> {
        if self.sp == 0 {
            return Err(self.error("Stack underflow: attempted to pop from an empty stack"));
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    #[inline(always)]
    pub(crate) fn peek(&mut self) -> VmResult<Value> {
        if self.sp == 0 {
            return Err(self.error("Stack underflow: attempted to peek at an empty stack"));
        }
        Ok(self.stack[self.sp - 1])
    }

    // ============ Globals ============

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.put(name, value);
    }

    /// Install a native function into globals under its name.
    pub fn register_native(&mut self, name: &str, func: NativeFn) {
        let native = self.alloc_native(name, func);
        self.globals.put(name, native);
    }

    // ============ Allocation ============

    pub fn alloc_string(&mut self, data: &str) -> Value {
        Value::Obj(self.gc.alloc(ObjBody::Str(StringObj { data: data.into() })))
    }

    pub fn alloc_string_owned(&mut self, data: String) -> Value {
        Value::Obj(self.gc.alloc(ObjBody::Str(StringObj {
            data: data.into_boxed_str(),
        })))
    }

    /// Build a list, classifying numeric and matrix metadata the way a
    /// list literal does.
    pub fn alloc_list(&mut self, items: Vec<Value>) -> Value {
        Value::Obj(self.gc.alloc(ObjBody::List(ListObj::from_items(items))))
    }

    pub(crate) fn alloc_list_raw(&mut self, list: ListObj) -> Value {
        Value::Obj(self.gc.alloc(ObjBody::List(list)))
    }

    pub fn alloc_map(&mut self) -> Value {
        Value::Obj(self.gc.alloc(ObjBody::Map(MapObj::new())))
    }

    pub fn alloc_range(&mut self, start: f64, end: f64, step: f64) -> Value {
        Value::Obj(self.gc.alloc(ObjBody::Range(RangeObj {
            start,
            end,
            step,
            current: start,
        })))
    }

    pub fn alloc_code(&mut self, code: CodeObj) -> ObjPtr {
        self.gc.alloc(ObjBody::Code(code))
    }

    pub fn alloc_function(&mut self, name: &str, body: ObjPtr, defaults: Vec<Value>) -> Value {
        Value::Obj(self.gc.alloc(ObjBody::Function(FunctionObj {
            name: SmolStr::new(name),
            body,
            defaults,
            upvalues: Vec::new(),
            receiver: None,
            is_method: false,
        })))
    }

    pub fn alloc_native(&mut self, name: &str, func: NativeFn) -> Value {
        Value::Obj(self.gc.alloc(ObjBody::Native(NativeObj {
            name: SmolStr::new(name),
            func,
        })))
    }

    // ============ Host surface ============

    /// Shared cancellation flag; clearing it stops the dispatcher after
    /// the current opcode.
    pub fn run_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Advisory lock for host threads reading VM state (input polling,
    /// audio callbacks). The dispatch loop itself never takes it.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_error_handler(&mut self, handler: impl FnMut(&str, i32, i32) + 'static) {
        self.error_handler = Some(Box::new(handler));
    }

    pub fn clear_error_handler(&mut self) {
        self.error_handler = None;
    }

    /// Human-readable collector report.
    pub fn gc_stats(&self) -> String {
        format!(
            "GC Stats:\n\
            - Live objects: {}\n\
            - Collections: {}\n\
            - Objects freed: {}\n\
            - Next collection at: {}",
            self.gc.obj_count,
            self.gc.stats.collections,
            self.gc.stats.objects_freed,
            self.gc.next_gc
        )
    }

    /// Live objects currently on the heap.
    pub fn live_objects(&self) -> usize {
        self.gc.obj_count
    }

    pub fn gc_threshold(&self) -> u64 {
        self.gc.next_gc
    }

    /// Fixed key-code constants, installed as one global map `keys`:
    /// letters A-Z, digits 0-9 and the special keys, valued by their SDL
    /// scancodes.
    fn install_key_constants(&mut self) {
        const SCANCODE_A: f64 = 4.0;
        const SCANCODE_0: f64 = 39.0;
        const SPECIALS: [(&str, f64); 13] = [
            ("SPACE", 44.0),
            ("ENTER", 40.0),
            ("ESC", 41.0),
            ("UP", 82.0),
            ("DOWN", 81.0),
            ("LEFT", 80.0),
            ("RIGHT", 79.0),
            ("LSHIFT", 225.0),
            ("RSHIFT", 229.0),
            ("LCTRL", 224.0),
            ("RCTRL", 228.0),
            ("LALT", 226.0),
            ("RALT", 230.0),
        ];

        let keys = self.gc.alloc(ObjBody::Map(MapObj::new()));
        let map = keys.map_mut();

        for (offset, letter) in ('A'..='Z').enumerate() {
            map.table
                .put(&letter.to_string(), Value::Num(SCANCODE_A + offset as f64));
        }
        for digit in 0..=9u32 {
            map.table
                .put(&digit.to_string(), Value::Num(SCANCODE_0 + digit as f64));
        }
        for (name, code) in SPECIALS {
            map.table.put(name, Value::Num(code));
        }

        self.globals.put("keys", Value::Obj(keys));
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.gc.free_all();
    }
}
