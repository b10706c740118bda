// Heap objects
//
// Every GC-managed object embeds a GcHeader and lives in one intrusive
// singly-linked list owned by the collector. The payload is a tagged enum;
// exhaustive matches replace runtime type introspection.

use std::ptr::NonNull;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::value::table::OrderedTable;
use crate::value::{format_number, Value};
use crate::vm::debug_info::InstrTable;
use crate::vm::error::VmResult;
use crate::vm::Vm;

/// Native function: receives the VM and the argument slice, returns one
/// value or raises a VM error.
pub type NativeFn = fn(&mut Vm, &[Value]) -> VmResult<Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcColor {
    White,
    Gray,
    Black,
}

/// Header embedded in every heap object. `next` threads the heap list;
/// `in_heap_list` makes linking idempotent.
pub struct GcHeader {
    pub color: GcColor,
    pub in_heap_list: bool,
    pub next: *mut Object,
}

impl GcHeader {
    pub fn new() -> Self {
        GcHeader {
            color: GcColor::White,
            in_heap_list: false,
            next: std::ptr::null_mut(),
        }
    }
}

impl Default for GcHeader {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Object {
    pub header: GcHeader,
    pub body: ObjBody,
}

pub enum ObjBody {
    Str(StringObj),
    List(ListObj),
    Map(MapObj),
    Range(RangeObj),
    Function(FunctionObj),
    Native(NativeObj),
    Code(CodeObj),
    Upvalue(UpvalueObj),
}

/// Immutable string. Indexing, slicing and concatenation allocate new
/// strings; character-based so multi-byte text indexes sanely.
pub struct StringObj {
    pub data: Box<str>,
}

/// List with opportunistic matrix metadata. The metadata is a hint: it is
/// set when a literal or operator result is known to be a matrix and
/// invalidated (`rows = cols = -1`, `is_numeric = false`) by mutations that
/// break the shape. It is never recomputed after the fact.
pub struct ListObj {
    pub items: Vec<Value>,
    pub is_numeric: bool,
    pub is_matrix: bool,
    pub rows: i32,
    pub cols: i32,
    /// Iteration cursor, reset when the list enters the iterator stack.
    pub cursor: usize,
}

impl ListObj {
    /// Classify freshly-built items the way a list literal does: an empty
    /// list is numeric with zero shape; an all-number list is numeric but
    /// carries no shape; a list of equal-length numeric lists is a matrix.
    pub fn from_items(items: Vec<Value>) -> ListObj {
        if items.is_empty() {
            return ListObj {
                items,
                is_numeric: true,
                is_matrix: false,
                rows: 0,
                cols: 0,
                cursor: 0,
            };
        }

        let is_numeric = items.iter().all(|v| matches!(v, Value::Num(_)));
        let mut is_matrix = false;
        let mut rows = -1;
        let mut cols = -1;

        if !is_numeric {
            if let Some(first) = items[0].as_obj().and_then(|p| p.try_list()) {
                if first.is_numeric {
                    let width = first.items.len();
                    is_matrix = items.iter().all(|v| {
                        v.as_obj()
                            .and_then(|p| p.try_list())
                            .is_some_and(|row| row.is_numeric && row.items.len() == width)
                    });
                    if is_matrix {
                        rows = items.len() as i32;
                        cols = width as i32;
                    }
                }
            }
        }

        ListObj {
            items,
            is_numeric,
            is_matrix,
            rows,
            cols,
            cursor: 0,
        }
    }

    pub fn invalidate_shape(&mut self) {
        self.rows = -1;
        self.cols = -1;
        self.is_numeric = false;
    }
}

/// Map with optional prototype link. Reads fall through the prototype
/// chain; writes always land in the own table.
pub struct MapObj {
    pub table: OrderedTable,
    pub proto: Option<ObjPtr>,
    pub is_instance: bool,
    /// Iteration cursor over the insertion-order key list.
    pub cursor: usize,
}

impl MapObj {
    pub fn new() -> MapObj {
        MapObj {
            table: OrderedTable::new(),
            proto: None,
            is_instance: false,
            cursor: 0,
        }
    }

    /// Prototype-chain lookup.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.table.get(key) {
            return Some(*value);
        }
        let mut proto = self.proto;
        while let Some(ptr) = proto {
            let map = ptr.map_ref();
            if let Some(value) = map.table.get(key) {
                return Some(*value);
            }
            proto = map.proto;
        }
        None
    }
}

impl Default for MapObj {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RangeObj {
    pub start: f64,
    pub end: f64,
    pub step: f64,
    /// Iteration state; reset to `start` when the range enters the
    /// iterator stack.
    pub current: f64,
}

pub struct FunctionObj {
    pub name: SmolStr,
    /// Code object holding the body bytecode.
    pub body: ObjPtr,
    /// One default per formal parameter; call binding copies these first,
    /// then overwrites with the actuals provided.
    pub defaults: Vec<Value>,
    /// Shared upvalue cells, empty for plain functions.
    pub upvalues: Vec<ObjPtr>,
    pub receiver: Option<ObjPtr>,
    pub is_method: bool,
}

pub struct NativeObj {
    pub name: SmolStr,
    pub func: NativeFn,
}

/// Bytecode container supplied by the compiler. The constant, name and
/// instruction pools are shared by reference with nested code objects.
pub struct CodeObj {
    pub bytes: Vec<u8>,
    pub constants: Rc<Vec<Value>>,
    pub names: Rc<Vec<SmolStr>>,
    pub instrs: Rc<InstrTable>,
}

impl CodeObj {
    pub fn new(
        bytes: Vec<u8>,
        constants: Rc<Vec<Value>>,
        names: Rc<Vec<SmolStr>>,
        instrs: Rc<InstrTable>,
    ) -> CodeObj {
        CodeObj {
            bytes,
            constants,
            names,
            instrs,
        }
    }

    /// Placeholder program: a single HALT.
    pub fn empty() -> CodeObj {
        CodeObj {
            bytes: vec![crate::vm::opcode::OpCode::Halt as u8],
            constants: Rc::new(Vec::new()),
            names: Rc::new(Vec::new()),
            instrs: Rc::new(InstrTable::default()),
        }
    }
}

/// Shared binding cell. While open, `index` names the authoritative stack
/// slot and `next_open` threads the VM's open-upvalue list; closing copies
/// the slot into `value` and sets `index` to -1.
pub struct UpvalueObj {
    pub value: Value,
    pub index: i32,
    pub next_open: Option<ObjPtr>,
}

impl Object {
    pub fn new(body: ObjBody) -> Object {
        Object {
            header: GcHeader::new(),
            body,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.body {
            ObjBody::Str(_) => "string",
            ObjBody::List(_) => "list",
            ObjBody::Map(_) => "map",
            ObjBody::Range(_) => "range",
            ObjBody::Function(_) => "function",
            ObjBody::Native(_) => "native",
            ObjBody::Code(_) => "code",
            ObjBody::Upvalue(_) => "upvalue",
        }
    }

    pub(crate) fn kind_rank(&self) -> i32 {
        match &self.body {
            ObjBody::Str(_) => 0,
            ObjBody::List(_) => 1,
            ObjBody::Map(_) => 2,
            ObjBody::Range(_) => 3,
            ObjBody::Function(_) => 4,
            ObjBody::Native(_) => 5,
            ObjBody::Code(_) => 6,
            ObjBody::Upvalue(_) => 7,
        }
    }

    pub fn render(&self) -> String {
        match &self.body {
            ObjBody::Str(s) => s.data.to_string(),
            ObjBody::List(l) => {
                let mut out = String::from("[");
                for (i, item) in l.items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&item.as_string());
                }
                out.push(']');
                out
            }
            ObjBody::Map(m) => {
                let mut out = String::from("{");
                for (i, (key, value)) in m.table.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    out.push_str(": ");
                    out.push_str(&value.as_string());
                }
                out.push('}');
                out
            }
            ObjBody::Range(r) => format!(
                "range({}, {}, {})",
                format_number(r.start),
                format_number(r.end),
                format_number(r.step)
            ),
            ObjBody::Function(f) => format!("<fn {}>", f.name),
            ObjBody::Native(n) => format!("<native {}>", n.name),
            ObjBody::Code(_) => "<code>".to_string(),
            ObjBody::Upvalue(_) => "<upvalue>".to_string(),
        }
    }
}

/// Non-null raw pointer to a heap object.
///
/// Values alias objects freely, so borrows handed out here are deliberately
/// unbounded.
/// SAFETY: a pointer is valid from allocation until the sweep that frees
/// the object, and sweeps only run at opcode boundaries while the object
/// is unreachable from every root.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObjPtr(NonNull<Object>);

impl ObjPtr {
    pub(crate) fn from_box(obj: Box<Object>) -> ObjPtr {
        // SAFETY: Box::into_raw never returns null.
        unsafe { ObjPtr(NonNull::new_unchecked(Box::into_raw(obj))) }
    }

    #[inline(always)]
    pub fn as_ptr(self) -> *mut Object {
        self.0.as_ptr()
    }

    #[inline(always)]
    pub fn get<'a>(self) -> &'a Object {
        // SAFETY: see the type-level contract above.
        unsafe { &*self.0.as_ptr() }
    }

    #[inline(always)]
    pub fn get_mut<'a>(self) -> &'a mut Object {
        // SAFETY: see the type-level contract above; the dispatch loop is
        // the sole mutator and never holds two live borrows of one object.
        unsafe { &mut *self.0.as_ptr() }
    }

    // ============ Checked payload accessors ============

    #[inline(always)]
    pub fn try_list<'a>(self) -> Option<&'a ListObj> {
        match &self.get().body {
            ObjBody::List(l) => Some(l),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn try_map<'a>(self) -> Option<&'a MapObj> {
        match &self.get().body {
            ObjBody::Map(m) => Some(m),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn try_function<'a>(self) -> Option<&'a FunctionObj> {
        match &self.get().body {
            ObjBody::Function(f) => Some(f),
            _ => None,
        }
    }

    // ============ Invariant-backed payload accessors ============
    // These are used where the VM already knows the kind: a frame's code
    // slot holds Code, a function's upvalue array holds Upvalue cells.

    #[inline(always)]
    pub(crate) fn code_ref<'a>(self) -> &'a CodeObj {
        match &self.get().body {
            ObjBody::Code(c) => c,
            _ => unreachable!("expected a code object"),
        }
    }

    #[inline(always)]
    pub(crate) fn function_ref<'a>(self) -> &'a FunctionObj {
        match &self.get().body {
            ObjBody::Function(f) => f,
            _ => unreachable!("expected a function object"),
        }
    }

    #[inline(always)]
    pub(crate) fn function_mut<'a>(self) -> &'a mut FunctionObj {
        match &mut self.get_mut().body {
            ObjBody::Function(f) => f,
            _ => unreachable!("expected a function object"),
        }
    }

    #[inline(always)]
    pub(crate) fn map_ref<'a>(self) -> &'a MapObj {
        match &self.get().body {
            ObjBody::Map(m) => m,
            _ => unreachable!("expected a map object"),
        }
    }

    #[inline(always)]
    pub(crate) fn map_mut<'a>(self) -> &'a mut MapObj {
        match &mut self.get_mut().body {
            ObjBody::Map(m) => m,
            _ => unreachable!("expected a map object"),
        }
    }

    #[inline(always)]
    pub(crate) fn list_mut<'a>(self) -> &'a mut ListObj {
        match &mut self.get_mut().body {
            ObjBody::List(l) => l,
            _ => unreachable!("expected a list object"),
        }
    }

    #[inline(always)]
    pub(crate) fn upvalue_ref<'a>(self) -> &'a UpvalueObj {
        match &self.get().body {
            ObjBody::Upvalue(u) => u,
            _ => unreachable!("expected an upvalue cell"),
        }
    }

    #[inline(always)]
    pub(crate) fn upvalue_mut<'a>(self) -> &'a mut UpvalueObj {
        match &mut self.get_mut().body {
            ObjBody::Upvalue(u) => u,
            _ => unreachable!("expected an upvalue cell"),
        }
    }
}
