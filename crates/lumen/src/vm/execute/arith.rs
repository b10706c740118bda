// BINARY / UNARY / COMPARE semantics
//
// Operand combinations beyond the numeric fast path are resolved per
// operator: `+` concatenates or appends, `-` removes, `*` repeats or does
// matrix multiplication, `^` doubles as xor and 3-D cross product, `.` is
// the dot product, `is` walks the prototype chain. Division by zero is a
// value (+inf), as is mod-by-zero (NaN).

use crate::gc::object::{ListObj, ObjBody, ObjPtr};
use crate::value::{compare, equals, Value};
use crate::vm::error::VmResult;
use crate::vm::opcode::{BinaryOp, CompareOp, UnaryOp};
use crate::vm::Vm;

impl Vm {
    pub(crate) fn binary_op(&mut self, sub: u8) -> VmResult<()> {
        let Some(op) = BinaryOp::from_byte(sub) else {
            return Err(self.error(format!("Unknown binary operator: [{sub}]")));
        };
        let right = self.pop()?;
        let left = self.pop()?;

        match op {
            BinaryOp::Add => self.binary_add(left, right),
            BinaryOp::Sub => self.binary_sub(left, right),
            BinaryOp::Mul => self.binary_mul(left, right),
            BinaryOp::Div => {
                let denominator = right.as_number();
                if denominator == 0.0 {
                    self.push(Value::Num(f64::INFINITY))
                } else {
                    self.push(Value::Num(left.as_number() / denominator))
                }
            }
            BinaryOp::Mod => {
                let denominator = right.as_number() as i64;
                if denominator == 0 {
                    self.push(Value::NaN)
                } else {
                    self.push(Value::Num((left.as_number() as i64 % denominator) as f64))
                }
            }
            BinaryOp::And => self.push(Value::Bool(left.as_bool() && right.as_bool())),
            BinaryOp::Or => self.push(Value::Bool(left.as_bool() || right.as_bool())),
            BinaryOp::Pow => self.push(Value::Num(left.as_number().powf(right.as_number()))),
            BinaryOp::BitAnd => self.bitwise(left, right, |a, b| a & b, "&"),
            BinaryOp::BitOr => self.bitwise(left, right, |a, b| a | b, "|"),
            BinaryOp::BitXor => self.binary_xor(left, right),
            BinaryOp::Shl => self.bitwise(left, right, |a, b| a.wrapping_shl(b as u32), "<<"),
            BinaryOp::Shr => self.bitwise(left, right, |a, b| a.wrapping_shr(b as u32), ">>"),
            BinaryOp::UShr => self.bitwise(
                left,
                right,
                |a, b| (a as u32).wrapping_shr(b as u32) as i64,
                ">>>",
            ),
            BinaryOp::Dot => self.dot_product(left, right),
            BinaryOp::Is => self.instance_of(left, right),
        }
    }

    fn binary_add(&mut self, left: Value, right: Value) -> VmResult<()> {
        if left.is_numeric() && right.is_numeric() {
            return self.push(Value::Num(left.as_number() + right.as_number()));
        }

        // String concatenation wins over list append when either side is
        // a string; both sides are coerced.
        if left.is_string() || right.is_string() {
            let mut combined = left.as_string();
            combined.push_str(&right.as_string());
            let value = self.alloc_string_owned(combined);
            return self.push(value);
        }

        if let Some(list_ptr) = left.as_obj().filter(|ptr| ptr.try_list().is_some()) {
            let list = list_ptr.list_mut();
            list.items.push(right);

            // Matrix integrity check: keep the shape hint honest after
            // the append, invalidating instead of recomputing.
            if list.rows == 1 && list.cols >= 0 {
                if matches!(right, Value::Num(_)) {
                    list.cols += 1; // still a row vector
                } else {
                    list.invalidate_shape();
                }
            } else if list.rows > 1 && list.cols > 0 {
                match right.as_obj().and_then(|ptr| ptr.try_list()) {
                    Some(row) if row.is_numeric && row.items.len() == list.cols as usize => {
                        list.rows += 1; // still an NxM matrix
                    }
                    _ => list.invalidate_shape(),
                }
            } else if list.items.len() == 1
                && matches!(right, Value::Num(_))
                && matches!(list.items[0], Value::Num(_))
            {
                // First numeric append to an empty list starts a row vector.
                list.is_numeric = true;
                list.rows = 1;
                list.cols = 2;
            }

            return self.push(left);
        }

        if left.is_nan() || right.is_nan() {
            return self.push(Value::Num(f64::NAN));
        }

        Err(self.error("Unsupported operand types for binary operator [+]."))
    }

    fn binary_sub(&mut self, left: Value, right: Value) -> VmResult<()> {
        if left.is_numeric() && right.is_numeric() {
            return self.push(Value::Num(left.as_number() - right.as_number()));
        }

        if let Some(ptr) = left.as_obj() {
            match &mut ptr.get_mut().body {
                ObjBody::List(list) => {
                    // Remove the first occurrence, if any.
                    if let Some(pos) = list.items.iter().position(|&item| equals(item, right)) {
                        list.items.remove(pos);
                    }
                    return self.push(left);
                }
                ObjBody::Str(string) => {
                    // Remove every occurrence of the right operand.
                    let needle = right.as_string();
                    let result = string.data.replace(&needle, "");
                    let value = self.alloc_string_owned(result);
                    return self.push(value);
                }
                _ => {}
            }
        }

        Err(self.error("Unsupported operand types for binary operator [-]."))
    }

    fn binary_mul(&mut self, left: Value, right: Value) -> VmResult<()> {
        if left.is_numeric() {
            return self.push(Value::Num(left.as_number() * right.as_number()));
        }

        let Some(ptr) = left.as_obj() else {
            return Err(self.error("Unsupported operand types for binary operator [*]."));
        };

        match &ptr.get().body {
            ObjBody::List(list) => {
                if let Some(other) = right.as_obj().and_then(|p| p.try_list()) {
                    return self.matrix_multiply(list, other);
                }

                // Repetition; the numeric flag survives, the shape does not.
                let count = right.as_number() as i64;
                let mut items = Vec::with_capacity(list.items.len() * count.max(0) as usize);
                for _ in 0..count.max(0) {
                    items.extend_from_slice(&list.items);
                }
                let result = ListObj {
                    items,
                    is_numeric: list.is_numeric,
                    is_matrix: false,
                    rows: -1,
                    cols: -1,
                    cursor: 0,
                };
                let value = self.alloc_list_raw(result);
                self.push(value)
            }
            ObjBody::Str(string) => {
                let count = right.as_number() as i64;
                let repeated = string.data.repeat(count.max(0) as usize);
                let value = self.alloc_string_owned(repeated);
                self.push(value)
            }
            _ => Err(self.error("Unsupported operand types for binary operator [*].")),
        }
    }

    fn matrix_multiply(&mut self, a: &ListObj, b: &ListObj) -> VmResult<()> {
        if !a.is_matrix || !b.is_matrix {
            return Err(self.error("Matrix multiplication requires numeric lists."));
        }
        if a.cols == -1 || b.cols == -1 {
            return Err(self.error("Matrix dimensions are not set properly."));
        }
        if a.cols != b.rows {
            return Err(self.error("Matrix multiplication dimension mismatch."));
        }

        let m = a.rows as usize;
        let n = a.cols as usize;
        let p = b.cols as usize;

        let row_of = |list: &ListObj, i: usize| -> Option<&'static ListObj> {
            list.items.get(i)?.as_obj()?.try_list()
        };

        let mut rows = Vec::with_capacity(m);
        for i in 0..m {
            let Some(row_a) = row_of(a, i) else {
                return Err(self.error("Matrix dimensions are not set properly."));
            };
            let mut row = Vec::with_capacity(p);
            for j in 0..p {
                let mut sum = 0.0;
                for k in 0..n {
                    let Some(row_b) = row_of(b, k) else {
                        return Err(self.error("Matrix dimensions are not set properly."));
                    };
                    let x = row_a.items.get(k).copied().unwrap_or(Value::Nil).as_number();
                    let y = row_b.items.get(j).copied().unwrap_or(Value::Nil).as_number();
                    sum += x * y;
                }
                row.push(Value::Num(sum));
            }
            let row_value = self.alloc_list(row);
            rows.push(row_value);
        }

        // from_items re-derives the matrix tag for the m x p result.
        let value = self.alloc_list(rows);
        self.push(value)
    }

    fn binary_xor(&mut self, left: Value, right: Value) -> VmResult<()> {
        if let (Some(a), Some(b)) = (
            left.as_obj().and_then(|p| p.try_list()),
            right.as_obj().and_then(|p| p.try_list()),
        ) {
            return self.cross_product(a, b);
        }
        if left.is_numeric() {
            let result = (left.as_number() as i64) ^ (right.as_number() as i64);
            return self.push(Value::Num(result as f64));
        }
        self.bitwise(left, right, |a, b| a ^ b, "^")
    }

    fn cross_product(&mut self, a: &ListObj, b: &ListObj) -> VmResult<()> {
        if !a.is_numeric || !b.is_numeric {
            return Err(self.error("Cross product requires numeric lists."));
        }
        if a.items.len() != 3 || b.items.len() != 3 {
            return Err(self.error("Cross product is defined for 3-dimensional vectors only."));
        }

        let ax = a.items[0].as_number();
        let ay = a.items[1].as_number();
        let az = a.items[2].as_number();
        let bx = b.items[0].as_number();
        let by = b.items[1].as_number();
        let bz = b.items[2].as_number();

        let items = vec![
            Value::Num(ay * bz - az * by),
            Value::Num(az * bx - ax * bz),
            Value::Num(ax * by - ay * bx),
        ];
        let value = self.alloc_list(items);
        self.push(value)
    }

    fn dot_product(&mut self, left: Value, right: Value) -> VmResult<()> {
        let (Some(a), Some(b)) = (
            left.as_obj().and_then(|p| p.try_list()),
            right.as_obj().and_then(|p| p.try_list()),
        ) else {
            return Err(self.error("Unsupported operand types for binary operator [.]"));
        };

        if !a.is_numeric || !b.is_numeric {
            return Err(self.error("Dot product requires numeric lists."));
        }
        if a.items.len() != b.items.len() {
            return Err(self.error("Dot product requires lists of the same length."));
        }

        let mut sum = 0.0;
        for (x, y) in a.items.iter().zip(b.items.iter()) {
            sum += x.as_number() * y.as_number();
        }
        self.push(Value::Num(sum))
    }

    /// `a is B`: true when B appears on a's prototype chain (pointer
    /// equality, a itself included). Non-map operands are simply false.
    fn instance_of(&mut self, left: Value, right: Value) -> VmResult<()> {
        let (Some(instance), Some(proto)) = (left.as_obj(), right.as_obj()) else {
            return self.push(Value::Bool(false));
        };
        if instance.try_map().is_none() || proto.try_map().is_none() {
            return self.push(Value::Bool(false));
        }

        let mut cursor: Option<ObjPtr> = Some(instance);
        let mut found = false;
        while let Some(ptr) = cursor {
            if ptr == proto {
                found = true;
                break;
            }
            cursor = ptr.map_ref().proto;
        }
        self.push(Value::Bool(found))
    }

    /// Scalar bitwise op, broadcast over the elements when the left side
    /// is a list.
    fn bitwise<F>(&mut self, left: Value, right: Value, op: F, symbol: &str) -> VmResult<()>
    where
        F: Fn(i64, i64) -> i64,
    {
        if left.is_numeric() {
            let result = op(left.as_number() as i64, right.as_number() as i64);
            return self.push(Value::Num(result as f64));
        }

        if let Some(list) = left.as_obj().and_then(|p| p.try_list()) {
            let scalar = right.as_number() as i64;
            let items: Vec<Value> = list
                .items
                .iter()
                .map(|item| Value::Num(op(item.as_number() as i64, scalar) as f64))
                .collect();
            let value = self.alloc_list(items);
            return self.push(value);
        }

        Err(self.error(format!(
            "Unsupported operand types for binary operator [{symbol}]."
        )))
    }

    pub(crate) fn unary_op(&mut self, sub: u8) -> VmResult<()> {
        let Some(op) = UnaryOp::from_byte(sub) else {
            return Err(self.error("Unknown unary operator."));
        };
        let operand = self.pop()?;

        match op {
            UnaryOp::Plus => self.push(Value::Num(operand.as_number())),
            UnaryOp::Minus => self.push(Value::Num(-operand.as_number())),
            UnaryOp::Not => self.push(Value::Bool(!operand.as_bool())),
            UnaryOp::BitNot => self.push(Value::Num(!(operand.as_number() as i64) as f64)),
            UnaryOp::Size => {
                let Some(ptr) = operand.as_obj() else {
                    return Err(self.error("Unsupported operand type for '#' operator."));
                };
                let size = match &ptr.get().body {
                    ObjBody::List(list) => list.items.len(),
                    ObjBody::Str(string) => string.data.chars().count(),
                    ObjBody::Map(map) => map.table.len(),
                    _ => return Err(self.error("Unsupported operand type for '#' operator.")),
                };
                self.push(Value::Num(size as f64))
            }
            UnaryOp::Incr => self.push(Value::Num(operand.as_number() + 1.0)),
            UnaryOp::Decr => self.push(Value::Num(operand.as_number() - 1.0)),
        }
    }

    pub(crate) fn compare_op(&mut self, sub: u8) -> VmResult<()> {
        let Some(op) = CompareOp::from_byte(sub) else {
            return Err(self.error(format!("Unknown comparison operator: [{sub}]")));
        };
        let right = self.pop()?;
        let left = self.pop()?;

        let ordering = compare(left, right);
        let result = match op {
            CompareOp::Eq => ordering == 0,
            CompareOp::Ne => ordering != 0,
            CompareOp::Gt => ordering > 0,
            CompareOp::Lt => ordering < 0,
            CompareOp::Ge => ordering >= 0,
            CompareOp::Le => ordering <= 0,
        };
        self.push(Value::Bool(result))
    }
}
