// Calls, frames and prototype construction
//
// A call pops its arguments and callee, then re-enters the dispatch loop
// for function callees: the frame captures the caller's resume state and
// the callee binds its formals from defaults overwritten by actuals, with
// the receiver prepended for methods. Natives are invoked directly. Calling
// a non-instance map constructs an instance from it as a prototype.
// RETURN closes the callee's upvalues, reclaims iterators the callee left
// open and restores the caller.

use crate::gc::object::{FunctionObj, MapObj, ObjBody, ObjPtr};
use crate::value::Value;
use crate::vm::error::VmResult;
use crate::vm::frame::Frame;
use crate::vm::limits::FRAME_MAX;
use crate::vm::Vm;

impl Vm {
    /// CALL_FUNCTION: `argc` arguments above the callee on the stack.
    pub(crate) fn op_call(&mut self, argc: usize) -> VmResult<()> {
        let mut args = vec![Value::Nil; argc];
        for i in (0..argc).rev() {
            args[i] = self.pop()?;
        }
        let callee = self.pop()?;

        let Some(ptr) = callee.as_obj() else {
            return Err(self.error("Attempt to call a non-function object."));
        };

        match &ptr.get().body {
            ObjBody::Function(_) | ObjBody::Native(_) => {
                let result = self.call_func(ptr, &args)?;
                if let Value::Obj(obj) = result {
                    // Results built outside the VM's allocator still get
                    // linked; add_obj is idempotent for the rest.
                    self.gc.add_obj(obj);
                }
                self.push(result)
            }
            ObjBody::Map(map) => {
                if map.is_instance {
                    return Err(self.error("Attempt to call an Object instance."));
                }
                let instance = self.construct(ptr, &args)?;
                self.push(Value::Obj(instance))
            }
            _ => Err(self.error("Attempt to call a non-function object.")),
        }
    }

    /// Invoke a function or native with already-popped arguments and
    /// return its result. Function calls nest the dispatch loop; the
    /// caller's pc must already be mirrored to the VM.
    pub(crate) fn call_func(&mut self, callee: ObjPtr, args: &[Value]) -> VmResult<Value> {
        let function: &FunctionObj = match &callee.get().body {
            ObjBody::Native(native) => {
                let func = native.func;
                return func(self, args);
            }
            ObjBody::Function(function) => function,
            _ => return Err(self.error("Attempt to call a non-function object.")),
        };

        if self.frames.len() >= FRAME_MAX {
            return Err(self.error("Stack overflow: too many nested function calls"));
        }

        self.frames.push(Frame {
            pc: self.pc,
            bp: self.bp,
            sp: self.sp,
            ip: self.ip,
            code: self.code,
            function: Some(callee),
            iters_top: self.iters.len(),
        });

        self.pc = 0;
        self.ip = 0;
        self.bp = self.sp;
        self.code = function.body;
        self.function = Some(callee);

        // Methods see their receiver as the first local.
        if function.is_method {
            let Some(receiver) = function.receiver else {
                return Err(self.error("Method call without a bound receiver."));
            };
            self.push(Value::Obj(receiver))?;
        }

        // Formals: defaults first, then overwrite with the actuals
        // provided. Missing actuals keep their defaults, extras are
        // dropped.
        for &default in &function.defaults {
            self.push(default)?;
        }
        let first_formal = self.bp + function.is_method as usize;
        for (i, &arg) in args.iter().enumerate() {
            if i >= function.defaults.len() {
                break;
            }
            self.stack[first_formal + i] = arg;
        }

        self.run()?;

        if !self.running.load(std::sync::atomic::Ordering::Relaxed) {
            // HALT mid-call: every nested activation unwinds.
            return Ok(Value::Nil);
        }
        self.pop()
    }

    /// RETURN: unwind exactly one frame.
    pub(crate) fn do_return(&mut self) -> VmResult<()> {
        let result = self.pop()?;

        // Close everything the callee still had open, top down.
        for slot in (self.bp..self.sp).rev() {
            self.close_upvalue(slot);
        }

        let Some(frame) = self.frames.pop() else {
            return Err(self.error("Stack underflow: return outside any call"));
        };

        // Reclaim iterators left open by break.
        self.iters.truncate(frame.iters_top);

        self.pc = frame.pc;
        self.bp = frame.bp;
        self.sp = frame.sp;
        self.ip = frame.ip;
        self.code = frame.code;

        self.push(result)
    }

    /// Build an instance from a prototype map: fields copy by reference,
    /// functions bind to the fresh instance, then `constructor` runs with
    /// the instance prepended to the arguments. A constructor returning an
    /// object replaces the instance.
    pub(crate) fn construct(&mut self, proto: ObjPtr, args: &[Value]) -> VmResult<ObjPtr> {
        let instance = self.gc.alloc(ObjBody::Map(MapObj {
            table: Default::default(),
            proto: Some(proto),
            is_instance: true,
            cursor: 0,
        }));

        let proto_map = proto.map_ref();
        for key in proto_map.table.keys().to_vec() {
            if key == "constructor" {
                continue;
            }
            let Some(&value) = proto_map.table.get(&key) else {
                continue;
            };
            let stored = match value.as_obj().filter(|p| p.try_function().is_some()) {
                Some(function) => self.bind(function, instance),
                None => value,
            };
            instance.map_mut().table.put(&key, stored);
        }

        let constructor = proto_map.table.get("constructor").copied();
        if let Some(constructor) = constructor {
            if let Some(ctor) = constructor.as_obj().filter(|p| p.try_function().is_some()) {
                ctor.function_mut().is_method = false;
                let mut ctor_args = Vec::with_capacity(args.len() + 1);
                ctor_args.push(Value::Obj(instance));
                ctor_args.extend_from_slice(args);

                let result = self.call_func(ctor, &ctor_args)?;
                if let Value::Obj(obj) = result {
                    return Ok(obj);
                }
            }
        }

        Ok(instance)
    }

    /// Clone a function with the receiver bound. The original stays
    /// intact; the clone shares body and upvalue cells.
    pub(crate) fn bind(&mut self, function: ObjPtr, instance: ObjPtr) -> Value {
        let original = function.function_ref();
        let bound = FunctionObj {
            name: original.name.clone(),
            body: original.body,
            defaults: original.defaults.clone(),
            upvalues: original.upvalues.clone(),
            receiver: Some(instance),
            is_method: true,
        };
        Value::Obj(self.gc.alloc(ObjBody::Function(bound)))
    }
}
