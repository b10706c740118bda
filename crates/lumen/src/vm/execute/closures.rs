// Function and closure construction, upvalue access
//
// Stack layouts are fixed by the compiler and preserved exactly.
// PUSH_FUNCTION finds, from the top down: body, name, then the defaults
// block. PUSH_CLOSURE first pops one (is_local, index) pair per upvalue,
// top pair last; a local descriptor captures `bp + index` from the running
// frame, a non-local one reuses the enclosing function's cell, so sibling
// closures alias one binding.

use smol_str::SmolStr;

use crate::gc::object::{FunctionObj, ObjBody, ObjPtr};
use crate::value::Value;
use crate::vm::error::VmResult;
use crate::vm::Vm;

impl Vm {
    pub(crate) fn push_function(&mut self, params: usize) -> VmResult<()> {
        let (name, body, defaults) = self.pop_function_parts(params)?;
        let value = Value::Obj(self.gc.alloc(ObjBody::Function(FunctionObj {
            name,
            body,
            defaults,
            upvalues: Vec::new(),
            receiver: None,
            is_method: false,
        })));
        self.push(value)
    }

    pub(crate) fn push_closure(
        &mut self,
        params: usize,
        upvalue_count: usize,
        enclosing: Option<ObjPtr>,
    ) -> VmResult<()> {
        let mut upvalues = vec![None; upvalue_count];
        for i in 0..upvalue_count {
            let is_local = self.pop()?.as_bool();
            let index = self.pop()?.as_number() as usize;

            let cell = if is_local {
                self.capture_upvalue(self.bp + index)
            } else {
                let Some(enclosing) = enclosing else {
                    return Err(self.error("Closure upvalue refers outside any function."));
                };
                match enclosing.function_ref().upvalues.get(index) {
                    Some(&cell) => cell,
                    None => return Err(self.error(format!("Upvalue index [{index}] out of range"))),
                }
            };
            upvalues[upvalue_count - 1 - i] = Some(cell);
        }
        let upvalues: Vec<ObjPtr> = upvalues.into_iter().flatten().collect();

        let (name, body, defaults) = self.pop_function_parts(params)?;
        let value = Value::Obj(self.gc.alloc(ObjBody::Function(FunctionObj {
            name,
            body,
            defaults,
            upvalues,
            receiver: None,
            is_method: false,
        })));
        self.push(value)
    }

    /// Pop body, name and the defaults block shared by PUSH_FUNCTION and
    /// PUSH_CLOSURE.
    fn pop_function_parts(&mut self, params: usize) -> VmResult<(SmolStr, ObjPtr, Vec<Value>)> {
        let body_value = self.pop()?;
        let body = match body_value.as_obj() {
            Some(ptr) if matches!(ptr.get().body, ObjBody::Code(_)) => ptr,
            _ => return Err(self.error("Function body must be a code object.")),
        };

        let name_value = self.pop()?;
        let Some(name) = name_value.as_str() else {
            return Err(self.error("Function name must be a string."));
        };
        let name = SmolStr::new(name);

        if self.sp < params {
            return Err(self.error("Stack underflow: function literal is short of defaults"));
        }
        self.sp -= params;
        let defaults = self.stack[self.sp..self.sp + params].to_vec();

        Ok((name, body, defaults))
    }

    pub(crate) fn load_upvalue(
        &mut self,
        function: Option<ObjPtr>,
        index: usize,
    ) -> VmResult<Value> {
        let cell = self.upvalue_cell(function, index)?;
        Ok(self.upvalue_get(cell))
    }

    pub(crate) fn store_upvalue(
        &mut self,
        function: Option<ObjPtr>,
        index: usize,
    ) -> VmResult<()> {
        let cell = self.upvalue_cell(function, index)?;
        let value = self.pop()?;
        self.upvalue_set(cell, value);
        Ok(())
    }

    fn upvalue_cell(&mut self, function: Option<ObjPtr>, index: usize) -> VmResult<ObjPtr> {
        let Some(function) = function else {
            return Err(self.error("No enclosing function for upvalue access."));
        };
        match function.function_ref().upvalues.get(index) {
            Some(&cell) => Ok(cell),
            None => Err(self.error(format!("Upvalue index [{index}] out of range"))),
        }
    }
}
