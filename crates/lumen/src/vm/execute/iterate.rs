// Iteration protocol
//
// Iterator state lives in the iterated object itself: a cursor for lists
// and maps, the current number for ranges. PUSH_ITER resets that state and
// pushes the object onto the iterator stack; LOOP steps the top iterator,
// popping it on exhaustion. Map iteration yields keys, freshly allocated
// as strings each step.

use crate::gc::object::ObjBody;
use crate::value::Value;
use crate::vm::error::VmResult;
use crate::vm::limits::ITER_MAX;
use crate::vm::Vm;

impl Vm {
    pub(crate) fn push_iter(&mut self) -> VmResult<()> {
        let iterable = self.pop()?;
        let Some(ptr) = iterable.as_obj() else {
            return Err(self.error("Object is not iterable."));
        };

        match &mut ptr.get_mut().body {
            ObjBody::List(list) => list.cursor = 0,
            ObjBody::Map(map) => map.cursor = 0,
            ObjBody::Range(range) => range.current = range.start,
            _ => return Err(self.error("Object is not iterable.")),
        }

        if self.iters.len() >= ITER_MAX {
            return Err(self.error("Iterator overflow: too many nested loops"));
        }
        self.iters.push(ptr);
        Ok(())
    }

    /// Advance the top iterator. Returns the next element, or None after
    /// popping an exhausted iterator.
    pub(crate) fn iter_step(&mut self) -> VmResult<Option<Value>> {
        let Some(&iter) = self.iters.last() else {
            return Err(self.error("No active iterator."));
        };

        let next = match &mut iter.get_mut().body {
            ObjBody::List(list) => {
                if list.cursor < list.items.len() {
                    let value = list.items[list.cursor];
                    list.cursor += 1;
                    Some(value)
                } else {
                    None
                }
            }
            ObjBody::Map(map) => match map.table.key_at(map.cursor).cloned() {
                Some(key) => {
                    map.cursor += 1;
                    Some(self.alloc_string(&key))
                }
                None => None,
            },
            ObjBody::Range(range) => {
                let more = if range.step > 0.0 {
                    range.current < range.end
                } else if range.step < 0.0 {
                    range.current > range.end
                } else {
                    false
                };
                if more {
                    let value = range.current;
                    range.current += range.step;
                    Some(Value::Num(value))
                } else {
                    None
                }
            }
            _ => return Err(self.error("Object is not iterable.")),
        };

        if next.is_none() {
            self.iters.pop();
        }
        Ok(next)
    }
}
