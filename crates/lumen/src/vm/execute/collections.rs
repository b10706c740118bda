// Collection construction and element access
//
// PUSH_LIST classifies numeric/matrix metadata from its elements, PUSH_MAP
// preserves insertion order and flags function values as methods, slices
// build fresh sequences. Indexing wraps one negative step by the length;
// map reads fall through the prototype chain and misses read as nil.

use crate::gc::object::{FunctionObj, MapObj, ObjBody};
use crate::value::{format_number, Value};
use crate::vm::error::VmResult;
use crate::vm::Vm;

impl Vm {
    /// Normalize an index against `len`: one negative wrap, then bounds.
    pub(crate) fn resolve_index(&mut self, index: f64, len: usize) -> VmResult<usize> {
        let mut i = index as i64;
        if i < 0 {
            i += len as i64;
        }
        if i < 0 || i >= len as i64 {
            return Err(self.error(format!("Index [{}] out of range.", format_number(index))));
        }
        Ok(i as usize)
    }

    pub(crate) fn push_list(&mut self, count: usize) -> VmResult<()> {
        if self.sp < count {
            return Err(self.error("Stack underflow: list literal is short of elements"));
        }
        self.sp -= count;
        let items = self.stack[self.sp..self.sp + count].to_vec();
        let value = self.alloc_list(items);
        self.push(value)
    }

    pub(crate) fn push_map(&mut self, count: usize) -> VmResult<()> {
        if self.sp < count * 2 {
            return Err(self.error("Stack underflow: map literal is short of elements"));
        }

        let mut map = MapObj::new();
        let base = self.sp - count * 2;
        for i in 0..count {
            let value = self.stack[base + i * 2];
            let key_value = self.stack[base + i * 2 + 1];
            let Some(key) = key_value.as_str() else {
                return Err(self.error("Map keys must be strings."));
            };
            // Functions stored in a map literal become methods.
            if let Some(function) = key_value_function(value) {
                function.is_method = true;
            }
            map.table.put(key, value);
        }
        self.sp = base;

        let ptr = self.gc.alloc(ObjBody::Map(map));
        self.push(Value::Obj(ptr))
    }

    pub(crate) fn push_range(&mut self) -> VmResult<()> {
        let step = self.pop()?;
        let end = self.pop()?;
        let start = self.pop()?;

        if !start.is_num() || !end.is_num() {
            return Err(self.error("Range `start` and `end` must be numbers."));
        }
        if !step.is_nil() && !step.is_num() {
            return Err(self.error("Range `step` must be nil or a number."));
        }

        let start = start.as_number();
        let end = end.as_number();
        let step = if step.is_nil() {
            if start < end { 1.0 } else { -1.0 }
        } else {
            step.as_number()
        };

        let value = self.alloc_range(start, end, step);
        self.push(value)
    }

    pub(crate) fn push_slice(&mut self) -> VmResult<()> {
        let step = self.pop()?;
        let end = self.pop()?;
        let start = self.pop()?;

        if !start.is_num() || !end.is_num() {
            return Err(self.error("Slice [start] and [end] must be numbers."));
        }
        if !step.is_nil() && !step.is_num() {
            return Err(self.error("Slice [step] must be nil or a number."));
        }
        let step = if step.is_nil() { 1.0 } else { step.as_number() };
        if step as i64 == 0 {
            return Err(self.error("Slice [step] must not be zero."));
        }

        let sequence = self.pop()?;
        let Some(ptr) = sequence.as_obj() else {
            return Err(self.error("Slice operand must be a list or string."));
        };

        match &ptr.get().body {
            ObjBody::List(list) => {
                let picked: Vec<Value> = slice_positions(
                    start.as_number(),
                    end.as_number(),
                    step,
                    list.items.len(),
                )
                .into_iter()
                .map(|i| list.items[i])
                .collect();
                let value = self.alloc_list(picked);
                self.push(value)
            }
            ObjBody::Str(string) => {
                let chars: Vec<char> = string.data.chars().collect();
                let picked: String =
                    slice_positions(start.as_number(), end.as_number(), step, chars.len())
                        .into_iter()
                        .map(|i| chars[i])
                        .collect();
                let value = self.alloc_string_owned(picked);
                self.push(value)
            }
            _ => Err(self.error("Slice operand must be a list or string.")),
        }
    }

    pub(crate) fn get_item(&mut self) -> VmResult<()> {
        let index = self.pop()?;
        let container = self.pop()?;

        let Some(ptr) = container.as_obj() else {
            return Err(self.error("Unsupported operand type for get item operator."));
        };

        match &ptr.get().body {
            ObjBody::List(list) => {
                if list.items.is_empty() {
                    return self.push(Value::Nil);
                }
                let i = self.resolve_index(index.as_number(), list.items.len())?;
                let item = list.items[i];
                self.push(item)
            }
            ObjBody::Map(map) => {
                let key = index.as_string();
                let item = map.get(&key).unwrap_or(Value::Nil);
                self.push(item)
            }
            ObjBody::Str(string) => {
                let chars: Vec<char> = string.data.chars().collect();
                let i = self.resolve_index(index.as_number(), chars.len())?;
                let value = self.alloc_string_owned(chars[i].to_string());
                self.push(value)
            }
            _ => Err(self.error("Unsupported operand type for get item operator.")),
        }
    }

    pub(crate) fn set_item(&mut self) -> VmResult<()> {
        let index = self.pop()?;
        let container = self.pop()?;
        let value = self.pop()?;

        let Some(ptr) = container.as_obj() else {
            return Err(self.error("Unsupported operand type for set item operator."));
        };

        match &mut ptr.get_mut().body {
            ObjBody::List(list) => {
                let i = self.resolve_index(index.as_number(), list.items.len())?;
                list.items[i] = value;
                Ok(())
            }
            ObjBody::Map(map) => {
                let key = index.as_string();
                map.table.put(&key, value);
                Ok(())
            }
            ObjBody::Str(_) => Err(self.error("Cannot modify immutable string.")),
            _ => Err(self.error("Unsupported operand type for set item operator.")),
        }
    }
}

/// Positions selected by a slice over a sequence of `len` elements.
/// Negative start/end wrap once; iteration runs from start toward end
/// (exclusive) and silently skips positions outside the sequence.
fn slice_positions(start: f64, end: f64, step: f64, len: usize) -> Vec<usize> {
    let len = len as i64;
    let mut s = start as i64;
    let mut e = end as i64;
    if s < 0 {
        s += len;
    }
    if e < 0 {
        e += len;
    }

    let step = step as i64;
    let mut positions = Vec::new();
    let mut i = s;
    if step > 0 {
        while i < e {
            if i >= 0 && i < len {
                positions.push(i as usize);
            }
            i += step;
        }
    } else {
        while i > e {
            if i >= 0 && i < len {
                positions.push(i as usize);
            }
            i += step;
        }
    }
    positions
}

/// Borrow the function payload when the value is a function object.
fn key_value_function<'a>(value: Value) -> Option<&'a mut FunctionObj> {
    match value.as_obj() {
        Some(ptr) => match &mut ptr.get_mut().body {
            ObjBody::Function(function) => Some(function),
            _ => None,
        },
        None => None,
    }
}
