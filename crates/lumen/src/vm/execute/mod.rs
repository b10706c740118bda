// Fetch-decode-execute loop
//
// One linear pass over the current code object's byte stream. The program
// counter lives in a local and is mirrored to the VM at every instruction
// boundary and before any nested call, so error attribution and frame
// creation always observe a stable offset. Function calls re-enter this
// loop recursively; RETURN unwinds exactly one activation. The collector
// is polled between instructions only, which is the GC's safe point.

mod arith;
mod call;
mod closures;
mod collections;
mod iterate;

use std::sync::atomic::Ordering;

use crate::value::Value;
use crate::vm::error::VmResult;
use crate::vm::limits::STACK_MAX;
use crate::vm::opcode::OpCode;
use crate::vm::Vm;

macro_rules! need {
    ($vm:ident, $pc:ident, $bytes:ident, $n:expr) => {
        if $pc + $n > $bytes.len() {
            return Err($vm.error("Unexpected end of bytecode"));
        }
    };
}

macro_rules! read_u8 {
    ($vm:ident, $pc:ident, $bytes:ident) => {{
        need!($vm, $pc, $bytes, 1);
        let byte = $bytes[$pc];
        $pc += 1;
        byte
    }};
}

macro_rules! read_u16 {
    ($vm:ident, $pc:ident, $bytes:ident) => {{
        need!($vm, $pc, $bytes, 2);
        let value = (($bytes[$pc] as u16) << 8) | $bytes[$pc + 1] as u16;
        $pc += 2;
        value
    }};
}

/// Read a 16-bit operand without advancing; jumps consume it themselves.
macro_rules! peek_u16 {
    ($vm:ident, $pc:ident, $bytes:ident) => {{
        need!($vm, $pc, $bytes, 2);
        (($bytes[$pc] as u16) << 8) | $bytes[$pc + 1] as u16
    }};
}

impl Vm {
    /// Execute the current activation until RETURN, HALT, end of code or
    /// cancellation.
    pub(crate) fn run(&mut self) -> VmResult<()> {
        let code = self.code.code_ref();
        let bytes = &code.bytes;
        let length = bytes.len();

        let mut pc = self.pc;
        // The function this activation executes; PUSH_CLOSURE and the
        // upvalue opcodes resolve against it.
        let function = self.function;

        while pc < length && self.running.load(Ordering::Relaxed) {
            let byte = bytes[pc];
            pc += 1;
            self.gc.counter += 1;
            self.ip += 1;

            let Some(op) = OpCode::from_byte(byte) else {
                return Err(self.error(format!("Unknown opcode: [{byte}]")));
            };

            match op {
                OpCode::No => {}

                OpCode::LoadConst => {
                    let index = read_u16!(self, pc, bytes) as usize;
                    let Some(&constant) = code.constants.get(index) else {
                        return Err(self.error(format!("Constant index [{index}] out of range")));
                    };
                    self.push(constant)?;
                }

                OpCode::StoreGlobal => {
                    let index = read_u8!(self, pc, bytes) as usize;
                    let Some(name) = code.names.get(index).cloned() else {
                        return Err(self.error(format!("Name index [{index}] out of range")));
                    };
                    let value = self.pop()?;
                    self.globals.put(&name, value);
                }

                OpCode::LoadGlobal => {
                    let index = read_u8!(self, pc, bytes) as usize;
                    let Some(name) = code.names.get(index) else {
                        return Err(self.error(format!("Name index [{index}] out of range")));
                    };
                    let value = self.globals.get(name).copied().unwrap_or(Value::Nil);
                    self.push(value)?;
                }

                OpCode::LoadLocal => {
                    let offset = read_u8!(self, pc, bytes) as usize;
                    let slot = self.bp + offset;
                    if slot >= STACK_MAX {
                        return Err(self.error("Local slot out of range"));
                    }
                    let value = self.stack[slot];
                    self.push(value)?;
                }

                OpCode::StoreLocal => {
                    let offset = read_u8!(self, pc, bytes) as usize;
                    let slot = self.bp + offset;
                    if slot >= STACK_MAX {
                        return Err(self.error("Local slot out of range"));
                    }
                    self.stack[slot] = self.pop()?;
                }

                OpCode::LoadUpvalue => {
                    let index = read_u8!(self, pc, bytes) as usize;
                    let value = self.load_upvalue(function, index)?;
                    self.push(value)?;
                }

                OpCode::StoreUpvalue => {
                    let index = read_u8!(self, pc, bytes) as usize;
                    self.store_upvalue(function, index)?;
                }

                OpCode::PushNil => {
                    self.push(Value::Nil)?;
                }

                OpCode::DupTop => {
                    let top = self.peek()?;
                    self.push(top)?;
                }

                OpCode::Pop => {
                    if self.sp > 0 {
                        self.close_upvalue(self.sp - 1);
                    }
                    self.pop()?;
                }

                OpCode::PopN => {
                    let count = read_u8!(self, pc, bytes);
                    for _ in 0..count {
                        if self.sp > 0 {
                            self.close_upvalue(self.sp - 1);
                        }
                        self.pop()?;
                    }
                }

                OpCode::Jump => {
                    let offset = peek_u16!(self, pc, bytes) as i16;
                    pc = self.jump_target(pc, offset, length)?;
                }

                OpCode::JumpIfTrue => {
                    let offset = peek_u16!(self, pc, bytes) as i16;
                    let test = self.pop()?;
                    if test.as_bool() {
                        pc = self.jump_target(pc, offset, length)?;
                    } else {
                        pc += 2;
                    }
                }

                OpCode::JumpIfFalse => {
                    let offset = peek_u16!(self, pc, bytes) as i16;
                    let test = self.pop()?;
                    if !test.as_bool() {
                        pc = self.jump_target(pc, offset, length)?;
                    } else {
                        pc += 2;
                    }
                }

                OpCode::Return => {
                    self.do_return()?;
                    return Ok(());
                }

                OpCode::Halt => {
                    self.running.store(false, Ordering::Relaxed);
                    self.pc = pc;
                    return Ok(());
                }

                OpCode::Binary => {
                    let sub = read_u8!(self, pc, bytes);
                    self.binary_op(sub)?;
                }

                OpCode::Unary => {
                    let sub = read_u8!(self, pc, bytes);
                    self.unary_op(sub)?;
                }

                OpCode::Compare => {
                    let sub = read_u8!(self, pc, bytes);
                    self.compare_op(sub)?;
                }

                OpCode::PushList => {
                    let count = read_u16!(self, pc, bytes) as usize;
                    self.push_list(count)?;
                }

                OpCode::PushMap => {
                    let count = read_u16!(self, pc, bytes) as usize;
                    self.push_map(count)?;
                }

                OpCode::PushRange => {
                    self.push_range()?;
                }

                OpCode::PushSlice => {
                    self.push_slice()?;
                }

                OpCode::GetItem => {
                    self.get_item()?;
                }

                OpCode::SetItem => {
                    self.set_item()?;
                }

                OpCode::PushIter => {
                    self.push_iter()?;
                }

                OpCode::Loop => {
                    let offset = peek_u16!(self, pc, bytes);
                    match self.iter_step()? {
                        Some(value) => {
                            self.push(value)?;
                            pc += 2;
                        }
                        None => {
                            pc = self.jump_target(pc, offset as i16, length)?;
                        }
                    }
                }

                OpCode::PopIter => {
                    self.iters.pop();
                }

                OpCode::CallFunction => {
                    let argc = read_u8!(self, pc, bytes) as usize;
                    // The callee's frame must resume after the operand.
                    self.pc = pc;
                    self.op_call(argc)?;
                }

                OpCode::PushFunction => {
                    let params = read_u8!(self, pc, bytes) as usize;
                    self.push_function(params)?;
                }

                OpCode::PushClosure => {
                    let params = read_u8!(self, pc, bytes) as usize;
                    let upvalues = read_u8!(self, pc, bytes) as usize;
                    self.push_closure(params, upvalues, function)?;
                }

                OpCode::Debug => {
                    eprintln!("[DEBUG] Current PC: {pc}");
                }
            }

            if self.gc.counter >= self.gc.next_gc {
                self.pc = pc;
                self.collect_garbage();
            }
            self.pc = pc;
        }

        Ok(())
    }

    /// Resolve a relative jump. `pc` points at the offset's high byte; the
    /// offset is relative to the byte after the opcode, hence the -1.
    #[inline(always)]
    fn jump_target(&mut self, pc: usize, offset: i16, length: usize) -> VmResult<usize> {
        let target = pc as i64 + offset as i64 - 1;
        if target < 0 || target > length as i64 {
            return Err(self.error("Jump target out of range"));
        }
        Ok(target as usize)
    }
}
