// Arithmetic, comparison and concatenation semantics, shared by the
// dispatch loop's fast paths and the metamethod fallback instructions.

use crate::value::{
    float_le_int, float_lt_int, float_floor_mod, int_floor_div, int_floor_mod, int_le_float,
    int_lt_float, int_to_display, float_to_display, Mm, Value,
};
use crate::vm::{Lua, LuaResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
}

impl ArithOp {
    pub fn event(self) -> Mm {
        match self {
            ArithOp::Add => Mm::Add,
            ArithOp::Sub => Mm::Sub,
            ArithOp::Mul => Mm::Mul,
            ArithOp::Mod => Mm::Mod,
            ArithOp::Pow => Mm::Pow,
            ArithOp::Div => Mm::Div,
            ArithOp::IDiv => Mm::IDiv,
            ArithOp::BAnd => Mm::BAnd,
            ArithOp::BOr => Mm::BOr,
            ArithOp::BXor => Mm::BXor,
            ArithOp::Shl => Mm::Shl,
            ArithOp::Shr => Mm::Shr,
            ArithOp::Unm => Mm::Unm,
            ArithOp::BNot => Mm::BNot,
        }
    }

    pub fn from_event(mm: Mm) -> Option<ArithOp> {
        Some(match mm {
            Mm::Add => ArithOp::Add,
            Mm::Sub => ArithOp::Sub,
            Mm::Mul => ArithOp::Mul,
            Mm::Mod => ArithOp::Mod,
            Mm::Pow => ArithOp::Pow,
            Mm::Div => ArithOp::Div,
            Mm::IDiv => ArithOp::IDiv,
            Mm::BAnd => ArithOp::BAnd,
            Mm::BOr => ArithOp::BOr,
            Mm::BXor => ArithOp::BXor,
            Mm::Shl => ArithOp::Shl,
            Mm::Shr => ArithOp::Shr,
            Mm::Unm => ArithOp::Unm,
            Mm::BNot => ArithOp::BNot,
            _ => return None,
        })
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }
}

/// Integer-only core; `Shl`/`Shr` follow Lua: shifts past width produce
/// zero, negative shifts reverse direction.
pub fn int_arith(op: ArithOp, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Mod => {
            if b == 0 {
                return None;
            }
            int_floor_mod(a, b)
        }
        ArithOp::IDiv => {
            if b == 0 {
                return None;
            }
            int_floor_div(a, b)
        }
        ArithOp::BAnd => a & b,
        ArithOp::BOr => a | b,
        ArithOp::BXor => a ^ b,
        ArithOp::Shl => shift_left(a, b),
        ArithOp::Shr => shift_left(a, b.wrapping_neg()),
        ArithOp::Unm => a.wrapping_neg(),
        ArithOp::BNot => !a,
        ArithOp::Pow | ArithOp::Div => return None, // always float
    })
}

#[inline]
pub fn shift_left(a: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> -n) as i64
    }
}

pub fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Pow => a.powf(b),
        ArithOp::IDiv => (a / b).floor(),
        ArithOp::Mod => float_floor_mod(a, b),
        ArithOp::Unm => -a,
        _ => f64::NAN,
    }
}

impl Lua {
    /// Numeric arithmetic with string coercion; `None` when operands do
    /// not coerce and the metamethod protocol should take over.
    pub(crate) fn raw_arith(&mut self, op: ArithOp, a: Value, b: Value) -> LuaResult<Option<Value>> {
        if op.is_bitwise() {
            let (ia, ib) = match (self.coerce_number(a), self.coerce_number(b)) {
                (Some(na), Some(nb)) => (na, nb),
                _ => return Ok(None),
            };
            let ia = match self.coerce_integer(ia) {
                Some(i) => i,
                None => return Err(self.rt_error("number has no integer representation")),
            };
            let ib = match self.coerce_integer(ib) {
                Some(i) => i,
                None => return Err(self.rt_error("number has no integer representation")),
            };
            let r = match int_arith(op, ia, ib) {
                Some(r) => r,
                None => return Ok(None),
            };
            return Ok(Some(Value::Integer(r)));
        }
        let (na, nb) = match (self.coerce_number(a), self.coerce_number(b)) {
            (Some(na), Some(nb)) => (na, nb),
            _ => return Ok(None),
        };
        match (na, nb) {
            (Value::Integer(x), Value::Integer(y))
                if !matches!(op, ArithOp::Div | ArithOp::Pow) =>
            {
                match int_arith(op, x, y) {
                    Some(r) => Ok(Some(Value::Integer(r))),
                    None => {
                        let what = if op == ArithOp::Mod { "'n%0'" } else { "'n//0'" };
                        Err(self.rt_error(format!("attempt to perform {}", what)))
                    }
                }
            }
            _ => {
                let x = match na {
                    Value::Integer(i) => i as f64,
                    Value::Float(f) => f,
                    _ => return Ok(None),
                };
                let y = match nb {
                    Value::Integer(i) => i as f64,
                    Value::Float(f) => f,
                    _ => return Ok(None),
                };
                Ok(Some(Value::Float(float_arith(op, x, y))))
            }
        }
    }

    /// Full arithmetic: primitive semantics, then the metamethod of the
    /// left operand, then the right.
    pub(crate) fn arith_value(&mut self, op: ArithOp, a: Value, b: Value) -> LuaResult<Value> {
        if let Some(v) = self.raw_arith(op, a, b)? {
            return Ok(v);
        }
        self.arith_metamethod(op, a, b)
    }

    pub(crate) fn arith_metamethod(&mut self, op: ArithOp, a: Value, b: Value) -> LuaResult<Value> {
        let ev = op.event();
        let mut mm = self.metamethod(a, ev);
        if mm.is_nil() {
            mm = self.metamethod(b, ev);
        }
        if mm.is_nil() {
            let culprit = if self.coerce_number(a).is_none() { a } else { b };
            let action = if op.is_bitwise() {
                "perform bitwise operation on"
            } else {
                "perform arithmetic on"
            };
            return Err(self.type_error(action, culprit));
        }
        self.call_single(mm, &[a, b])
    }

    // ---- ordering ----

    pub(crate) fn num_lt(a: Value, b: Value) -> Option<bool> {
        match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => Some(x < y),
            (Value::Float(x), Value::Float(y)) => Some(x < y),
            (Value::Integer(x), Value::Float(y)) => Some(int_lt_float(x, y)),
            (Value::Float(x), Value::Integer(y)) => Some(float_lt_int(x, y)),
            _ => None,
        }
    }

    pub(crate) fn num_le(a: Value, b: Value) -> Option<bool> {
        match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => Some(x <= y),
            (Value::Float(x), Value::Float(y)) => Some(x <= y),
            (Value::Integer(x), Value::Float(y)) => Some(int_le_float(x, y)),
            (Value::Float(x), Value::Integer(y)) => Some(float_le_int(x, y)),
            _ => None,
        }
    }

    pub(crate) fn less_than(&mut self, a: Value, b: Value) -> LuaResult<bool> {
        if let Some(r) = Self::num_lt(a, b) {
            return Ok(r);
        }
        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            return Ok(self.heap.str(x).as_bytes() < self.heap.str(y).as_bytes());
        }
        self.order_metamethod(Mm::Lt, a, b)
    }

    pub(crate) fn less_equal(&mut self, a: Value, b: Value) -> LuaResult<bool> {
        if let Some(r) = Self::num_le(a, b) {
            return Ok(r);
        }
        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            return Ok(self.heap.str(x).as_bytes() <= self.heap.str(y).as_bytes());
        }
        self.order_metamethod(Mm::Le, a, b)
    }

    fn order_metamethod(&mut self, ev: Mm, a: Value, b: Value) -> LuaResult<bool> {
        let mut mm = self.metamethod(a, ev);
        if mm.is_nil() {
            mm = self.metamethod(b, ev);
        }
        if mm.is_nil() {
            let (ta, tb) = (a.type_name(), b.type_name());
            let msg = if ta == tb {
                format!("attempt to compare two {} values", ta)
            } else {
                format!("attempt to compare {} with {}", ta, tb)
            };
            return Err(self.rt_error(msg));
        }
        let r = self.call_single(mm, &[a, b])?;
        Ok(r.is_truthy())
    }

    // ---- length ----

    pub(crate) fn length_of(&mut self, v: Value) -> LuaResult<Value> {
        match v {
            Value::Str(id) => Ok(Value::Integer(self.heap.str(id).len() as i64)),
            Value::Table(tid) => {
                let mm = self.metamethod(v, Mm::Len);
                if mm.is_nil() {
                    Ok(Value::Integer(self.heap.table(tid).boundary()))
                } else {
                    self.call_single(mm, &[v])
                }
            }
            other => {
                let mm = self.metamethod(other, Mm::Len);
                if mm.is_nil() {
                    Err(self.type_error("get length of", other))
                } else {
                    self.call_single(mm, &[other])
                }
            }
        }
    }

    // ---- concatenation ----

    /// One step of `..`, right-associative like the operator.
    pub(crate) fn concat_pair(&mut self, a: Value, b: Value) -> LuaResult<Value> {
        let sa = self.concat_piece(a);
        let sb = self.concat_piece(b);
        if let (Some(mut x), Some(y)) = (sa, sb) {
            x.extend_from_slice(&y);
            return Ok(self.new_string_bytes(&x));
        }
        let mut mm = self.metamethod(a, Mm::Concat);
        if mm.is_nil() {
            mm = self.metamethod(b, Mm::Concat);
        }
        if mm.is_nil() {
            let culprit = if self.concat_piece(a).is_none() { a } else { b };
            return Err(self.type_error("concatenate", culprit));
        }
        self.call_single(mm, &[a, b])
    }

    fn concat_piece(&self, v: Value) -> Option<Vec<u8>> {
        match v {
            Value::Str(id) => Some(self.heap.str(id).as_bytes().to_vec()),
            Value::Integer(i) => Some(int_to_display(i).into_bytes()),
            Value::Float(f) => Some(float_to_display(f).into_bytes()),
            _ => None,
        }
    }

    /// Folds registers `first..first+count` right to left.
    pub(crate) fn concat_range(
        &mut self,
        tid: crate::gc::ThreadId,
        first: usize,
        count: usize,
    ) -> LuaResult<Value> {
        debug_assert!(count >= 1);
        let mut acc = self.heap.thread(tid).stack[first + count - 1];
        for i in (0..count - 1).rev() {
            let left = self.heap.thread(tid).stack[first + i];
            acc = self.concat_pair(left, acc)?;
        }
        Ok(acc)
    }
}
