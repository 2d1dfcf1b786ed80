// The dispatch loop and call machinery. Lua-to-Lua calls never recurse
// in Rust: frames are data, which is what lets errors unwind through
// protected frames and lets a coroutine yield from inside pcall.

use std::rc::Rc;

use crate::gc::{FunctionBody, ThreadId};
use crate::limits;
use crate::stdlib::NativeId;
use crate::value::{Mm, Proto, Value};
use crate::vm::arith::ArithOp;
use crate::vm::frame::{frame_flags, CallInfo};
use crate::vm::opcode::{self as op, Op};
use crate::vm::{Fault, Lua, LuaResult, Status, ThreadStatus};

/// What `precall` did with the callee.
pub(crate) enum Called {
    /// A bytecode frame was pushed; the dispatch loop should reload.
    Frame,
    /// A native ran to completion; results are already placed.
    Native,
}

impl Lua {
    #[inline(always)]
    pub(crate) fn reg(&self, tid: ThreadId, base: usize, r: usize) -> Value {
        self.heap.thread(tid).stack[base + r]
    }

    #[inline(always)]
    pub(crate) fn set_reg(&mut self, tid: ThreadId, base: usize, r: usize, v: Value) {
        self.heap.thread_mut(tid).stack[base + r] = v;
    }

    #[inline]
    fn save_pc(&mut self, tid: ThreadId, pc: usize) {
        let th = self.heap.thread_mut(tid);
        if let Some(ci) = th.frames.last_mut() {
            ci.pc = pc;
        }
    }

    #[inline]
    fn rk(&self, tid: ThreadId, base: usize, proto: &Proto, i: u32, c: usize) -> Value {
        if op::get_k(i) {
            proto.consts[c]
        } else {
            self.reg(tid, base, c)
        }
    }

    /// Runs frames of `tid` until the frame stack drops below `entry`,
    /// unwinding errors to protected frames along the way.
    pub(crate) fn run_protected(&mut self, tid: ThreadId, entry: usize) -> LuaResult<()> {
        loop {
            match self.execute_inner(tid, entry) {
                Ok(()) => return Ok(()),
                Err(Fault::Yield) => return Err(Fault::Yield),
                Err(Fault::Error) => match self.unwind(tid, entry)? {
                    true => continue,
                    false => return Ok(()),
                },
            }
        }
    }

    fn execute_inner(&mut self, tid: ThreadId, entry: usize) -> LuaResult<()> {
        'reentry: loop {
            let (proto, base, mut pc) = {
                let th = self.heap.thread(tid);
                match th.frames.last() {
                    Some(ci) => (ci.proto.clone(), ci.base, ci.pc),
                    None => return Ok(()),
                }
            };
            loop {
                if self.heap.pending && !self.heap.in_gc {
                    self.save_pc(tid, pc);
                    self.collect_garbage();
                }
                let i = proto.code[pc];
                pc += 1;
                self.save_pc(tid, pc);
                match op::get_op(i) {
                    Op::Move => {
                        let v = self.reg(tid, base, op::get_b(i));
                        self.set_reg(tid, base, op::get_a(i), v);
                    }
                    Op::LoadI => {
                        self.set_reg(tid, base, op::get_a(i), Value::Integer(op::get_sbx(i) as i64));
                    }
                    Op::LoadF => {
                        self.set_reg(tid, base, op::get_a(i), Value::Float(op::get_sbx(i) as f64));
                    }
                    Op::LoadK => {
                        let k = proto.consts[op::get_bx(i)];
                        self.set_reg(tid, base, op::get_a(i), k);
                    }
                    Op::LoadKX => {
                        let extra = op::get_ax(proto.code[pc]);
                        pc += 1;
                        let k = proto.consts[extra];
                        self.set_reg(tid, base, op::get_a(i), k);
                    }
                    Op::LoadFalse => {
                        self.set_reg(tid, base, op::get_a(i), Value::Boolean(false));
                    }
                    Op::LFalseSkip => {
                        self.set_reg(tid, base, op::get_a(i), Value::Boolean(false));
                        pc += 1;
                    }
                    Op::LoadTrue => {
                        self.set_reg(tid, base, op::get_a(i), Value::Boolean(true));
                    }
                    Op::LoadNil => {
                        let a = op::get_a(i);
                        for r in a..=a + op::get_b(i) {
                            self.set_reg(tid, base, r, Value::Nil);
                        }
                    }
                    Op::GetUpval => {
                        let v = self.frame_upval(tid, op::get_b(i));
                        self.set_reg(tid, base, op::get_a(i), v);
                    }
                    Op::SetUpval => {
                        let v = self.reg(tid, base, op::get_a(i));
                        let id = self.frame_upval_id(tid, op::get_b(i));
                        self.upval_set(id, v);
                    }
                    Op::GetTabUp => {
                        let t = self.frame_upval(tid, op::get_b(i));
                        let key = proto.consts[op::get_c(i)];
                        let v = self.index_value(t, key)?;
                        self.set_reg(tid, base, op::get_a(i), v);
                    }
                    Op::SetTabUp => {
                        let t = self.frame_upval(tid, op::get_a(i));
                        let key = proto.consts[op::get_b(i)];
                        let v = self.rk(tid, base, &proto, i, op::get_c(i));
                        self.setindex_value(t, key, v)?;
                    }
                    Op::GetTable => {
                        let t = self.reg(tid, base, op::get_b(i));
                        let key = self.reg(tid, base, op::get_c(i));
                        let v = self.index_value(t, key)?;
                        self.set_reg(tid, base, op::get_a(i), v);
                    }
                    Op::GetI => {
                        let t = self.reg(tid, base, op::get_b(i));
                        let key = Value::Integer(op::get_c(i) as i64);
                        let v = self.index_value(t, key)?;
                        self.set_reg(tid, base, op::get_a(i), v);
                    }
                    Op::GetField => {
                        let t = self.reg(tid, base, op::get_b(i));
                        let key = proto.consts[op::get_c(i)];
                        let v = self.index_value(t, key)?;
                        self.set_reg(tid, base, op::get_a(i), v);
                    }
                    Op::SetTable => {
                        let t = self.reg(tid, base, op::get_a(i));
                        let key = self.reg(tid, base, op::get_b(i));
                        let v = self.rk(tid, base, &proto, i, op::get_c(i));
                        self.setindex_value(t, key, v)?;
                    }
                    Op::SetI => {
                        let t = self.reg(tid, base, op::get_a(i));
                        let key = Value::Integer(op::get_b(i) as i64);
                        let v = self.rk(tid, base, &proto, i, op::get_c(i));
                        self.setindex_value(t, key, v)?;
                    }
                    Op::SetField => {
                        let t = self.reg(tid, base, op::get_a(i));
                        let key = proto.consts[op::get_b(i)];
                        let v = self.rk(tid, base, &proto, i, op::get_c(i));
                        self.setindex_value(t, key, v)?;
                    }
                    Op::NewTable => {
                        let id = self.heap.new_table(op::get_b(i), op::get_c(i));
                        self.set_reg(tid, base, op::get_a(i), Value::Table(id));
                    }
                    Op::SelfGet => {
                        let a = op::get_a(i);
                        let obj = self.reg(tid, base, op::get_b(i));
                        let key = self.rk(tid, base, &proto, i, op::get_c(i));
                        self.set_reg(tid, base, a + 1, obj);
                        let method = self.index_value(obj, key)?;
                        self.set_reg(tid, base, a, method);
                    }
                    Op::AddI => {
                        let b = self.reg(tid, base, op::get_b(i));
                        let imm = op::get_sc(i) as i64;
                        let done = match b {
                            Value::Integer(x) => {
                                let v = Value::Integer(x.wrapping_add(imm));
                                self.set_reg(tid, base, op::get_a(i), v);
                                true
                            }
                            Value::Float(x) => {
                                let v = Value::Float(x + imm as f64);
                                self.set_reg(tid, base, op::get_a(i), v);
                                true
                            }
                            _ => false,
                        };
                        if done {
                            pc += 1; // skip the MMBINI fallback
                        }
                    }
                    Op::AddK | Op::SubK | Op::MulK | Op::ModK | Op::PowK | Op::DivK
                    | Op::IDivK | Op::BAndK | Op::BOrK | Op::BXorK => {
                        let aop = arith_op_of(op::get_op(i));
                        let b = self.reg(tid, base, op::get_b(i));
                        let k = proto.consts[op::get_c(i)];
                        if let Some(v) = self.fast_arith(aop, b, k) {
                            self.set_reg(tid, base, op::get_a(i), v);
                            pc += 1; // skip the MMBINK fallback
                        }
                    }
                    Op::ShrI => {
                        let b = self.reg(tid, base, op::get_b(i));
                        let imm = op::get_sc(i) as i64;
                        if let Some(x) = b.as_integer() {
                            let v = Value::Integer(super::arith::shift_left(x, -imm));
                            self.set_reg(tid, base, op::get_a(i), v);
                            pc += 1;
                        }
                    }
                    Op::ShlI => {
                        // sC << R[B]
                        let b = self.reg(tid, base, op::get_b(i));
                        let imm = op::get_sc(i) as i64;
                        if let Some(x) = b.as_integer() {
                            let v = Value::Integer(super::arith::shift_left(imm, x));
                            self.set_reg(tid, base, op::get_a(i), v);
                            pc += 1;
                        }
                    }
                    Op::Add | Op::Sub | Op::Mul | Op::Mod | Op::Pow | Op::Div | Op::IDiv
                    | Op::BAnd | Op::BOr | Op::BXor | Op::Shl | Op::Shr => {
                        let aop = arith_op_of(op::get_op(i));
                        let b = self.reg(tid, base, op::get_b(i));
                        let c = self.reg(tid, base, op::get_c(i));
                        if let Some(v) = self.fast_arith(aop, b, c) {
                            self.set_reg(tid, base, op::get_a(i), v);
                            pc += 1; // skip the MMBIN fallback
                        }
                    }
                    Op::MmBin => {
                        let prev = proto.code[pc - 2];
                        let dest = op::get_a(prev);
                        let a = self.reg(tid, base, op::get_a(i));
                        let b = self.reg(tid, base, op::get_b(i));
                        let ev = mm_from_c(op::get_c(i));
                        let aop = match ArithOp::from_event(ev) {
                            Some(x) => x,
                            None => return Err(self.rt_error("bad metamethod event")),
                        };
                        let v = self.arith_value(aop, a, b)?;
                        self.set_reg(tid, base, dest, v);
                    }
                    Op::MmBinI => {
                        let prev = proto.code[pc - 2];
                        let dest = op::get_a(prev);
                        let ra = self.reg(tid, base, op::get_a(i));
                        let imm = Value::Integer(op::get_sb(i) as i64);
                        let ev = mm_from_c(op::get_c(i));
                        let aop = match ArithOp::from_event(ev) {
                            Some(x) => x,
                            None => return Err(self.rt_error("bad metamethod event")),
                        };
                        let (x, y) = if op::get_k(i) { (imm, ra) } else { (ra, imm) };
                        let v = self.arith_value(aop, x, y)?;
                        self.set_reg(tid, base, dest, v);
                    }
                    Op::MmBinK => {
                        let prev = proto.code[pc - 2];
                        let dest = op::get_a(prev);
                        let ra = self.reg(tid, base, op::get_a(i));
                        let k = proto.consts[op::get_b(i)];
                        let ev = mm_from_c(op::get_c(i));
                        let aop = match ArithOp::from_event(ev) {
                            Some(x) => x,
                            None => return Err(self.rt_error("bad metamethod event")),
                        };
                        let (x, y) = if op::get_k(i) { (k, ra) } else { (ra, k) };
                        let v = self.arith_value(aop, x, y)?;
                        self.set_reg(tid, base, dest, v);
                    }
                    Op::Unm => {
                        let b = self.reg(tid, base, op::get_b(i));
                        let v = match b {
                            Value::Integer(x) => Value::Integer(x.wrapping_neg()),
                            Value::Float(x) => Value::Float(-x),
                            _ => self.arith_value(ArithOp::Unm, b, b)?,
                        };
                        self.set_reg(tid, base, op::get_a(i), v);
                    }
                    Op::BNot => {
                        let b = self.reg(tid, base, op::get_b(i));
                        let v = match b.as_integer() {
                            Some(x) => Value::Integer(!x),
                            None => self.arith_value(ArithOp::BNot, b, b)?,
                        };
                        self.set_reg(tid, base, op::get_a(i), v);
                    }
                    Op::Not => {
                        let b = self.reg(tid, base, op::get_b(i));
                        self.set_reg(tid, base, op::get_a(i), Value::Boolean(!b.is_truthy()));
                    }
                    Op::Len => {
                        let b = self.reg(tid, base, op::get_b(i));
                        let v = self.length_of(b)?;
                        self.set_reg(tid, base, op::get_a(i), v);
                    }
                    Op::Concat => {
                        let a = op::get_a(i);
                        let n = op::get_b(i);
                        let v = self.concat_range(tid, base + a, n)?;
                        self.set_reg(tid, base, a, v);
                    }
                    Op::Close => {
                        let level = base + op::get_a(i);
                        self.close_tbc_down_to(tid, level, Value::Nil)?;
                        self.close_upvalues(tid, level);
                    }
                    Op::Tbc => {
                        self.mark_tbc(tid, base + op::get_a(i))?;
                    }
                    Op::Jmp => {
                        pc = (pc as i64 + op::get_sj(i) as i64) as usize;
                    }
                    Op::Eq => {
                        let a = self.reg(tid, base, op::get_a(i));
                        let b = self.reg(tid, base, op::get_b(i));
                        let cond = self.values_equal(a, b)?;
                        if cond != op::get_k(i) {
                            pc += 1;
                        }
                    }
                    Op::Lt => {
                        let a = self.reg(tid, base, op::get_a(i));
                        let b = self.reg(tid, base, op::get_b(i));
                        let cond = self.less_than(a, b)?;
                        if cond != op::get_k(i) {
                            pc += 1;
                        }
                    }
                    Op::Le => {
                        let a = self.reg(tid, base, op::get_a(i));
                        let b = self.reg(tid, base, op::get_b(i));
                        let cond = self.less_equal(a, b)?;
                        if cond != op::get_k(i) {
                            pc += 1;
                        }
                    }
                    Op::EqK => {
                        let a = self.reg(tid, base, op::get_a(i));
                        let k = proto.consts[op::get_b(i)];
                        let cond = self.raw_equals(a, k);
                        if cond != op::get_k(i) {
                            pc += 1;
                        }
                    }
                    Op::EqI => {
                        let a = self.reg(tid, base, op::get_a(i));
                        let imm = Value::Integer(op::get_sb(i) as i64);
                        let cond = self.raw_equals(a, imm);
                        if cond != op::get_k(i) {
                            pc += 1;
                        }
                    }
                    Op::LtI => {
                        let a = self.reg(tid, base, op::get_a(i));
                        let cond = self.less_than(a, Value::Integer(op::get_sb(i) as i64))?;
                        if cond != op::get_k(i) {
                            pc += 1;
                        }
                    }
                    Op::LeI => {
                        let a = self.reg(tid, base, op::get_a(i));
                        let cond = self.less_equal(a, Value::Integer(op::get_sb(i) as i64))?;
                        if cond != op::get_k(i) {
                            pc += 1;
                        }
                    }
                    Op::GtI => {
                        let a = self.reg(tid, base, op::get_a(i));
                        let cond = self.less_than(Value::Integer(op::get_sb(i) as i64), a)?;
                        if cond != op::get_k(i) {
                            pc += 1;
                        }
                    }
                    Op::GeI => {
                        let a = self.reg(tid, base, op::get_a(i));
                        let cond = self.less_equal(Value::Integer(op::get_sb(i) as i64), a)?;
                        if cond != op::get_k(i) {
                            pc += 1;
                        }
                    }
                    Op::Test => {
                        let a = self.reg(tid, base, op::get_a(i));
                        if a.is_truthy() != op::get_k(i) {
                            pc += 1;
                        }
                    }
                    Op::TestSet => {
                        let b = self.reg(tid, base, op::get_b(i));
                        if b.is_truthy() != op::get_k(i) {
                            pc += 1;
                        } else {
                            self.set_reg(tid, base, op::get_a(i), b);
                        }
                    }
                    Op::Call => {
                        let a = op::get_a(i);
                        let b = op::get_b(i);
                        let c = op::get_c(i);
                        let func_idx = base + a;
                        let nargs = if b == 0 {
                            self.heap.thread(tid).top - func_idx - 1
                        } else {
                            b - 1
                        };
                        match self.precall(tid, func_idx, nargs, c as i32 - 1)? {
                            Called::Frame => continue 'reentry,
                            Called::Native => {
                                if c != 0 {
                                    let th = self.heap.thread_mut(tid);
                                    th.top = base + proto.max_stack as usize;
                                }
                            }
                        }
                    }
                    Op::TailCall => {
                        let a = op::get_a(i);
                        let b = op::get_b(i);
                        let func_idx = base + a;
                        let nargs = if b == 0 {
                            self.heap.thread(tid).top - func_idx - 1
                        } else {
                            let th = self.heap.thread_mut(tid);
                            th.top = func_idx + b;
                            b - 1
                        };
                        match self.tail_call(tid, func_idx, nargs)? {
                            Called::Frame => continue 'reentry,
                            Called::Native => {
                                // results placed at func_idx; the RETURN
                                // that follows the TAILCALL finishes up
                            }
                        }
                    }
                    Op::Return => {
                        let a = op::get_a(i);
                        let b = op::get_b(i);
                        let first = base + a;
                        let nret = if b == 0 {
                            self.heap.thread(tid).top - first
                        } else {
                            b - 1
                        };
                        let nres = self.do_return(tid, first, nret)?;
                        if self.heap.thread(tid).frames.len() < entry {
                            return Ok(());
                        }
                        if nres >= 0 {
                            self.restore_caller_top(tid);
                        }
                        continue 'reentry;
                    }
                    Op::Return0 => {
                        let nres = self.do_return(tid, base, 0)?;
                        if self.heap.thread(tid).frames.len() < entry {
                            return Ok(());
                        }
                        if nres >= 0 {
                            self.restore_caller_top(tid);
                        }
                        continue 'reentry;
                    }
                    Op::Return1 => {
                        let nres = self.do_return(tid, base + op::get_a(i), 1)?;
                        if self.heap.thread(tid).frames.len() < entry {
                            return Ok(());
                        }
                        if nres >= 0 {
                            self.restore_caller_top(tid);
                        }
                        continue 'reentry;
                    }
                    Op::ForPrep => {
                        let a = op::get_a(i);
                        if self.for_prep(tid, base + a)? {
                            // loop will not run: jump past the FORLOOP
                            pc += op::get_bx(i) + 1;
                        }
                    }
                    Op::ForLoop => {
                        let a = op::get_a(i);
                        if self.for_loop(tid, base + a) {
                            pc -= op::get_bx(i);
                        }
                    }
                    Op::TForPrep => {
                        let a = op::get_a(i);
                        let closing = self.reg(tid, base, a + 3);
                        if closing.is_truthy() {
                            self.mark_tbc(tid, base + a + 3)?;
                        }
                        pc += op::get_bx(i);
                    }
                    Op::TForCall => {
                        let a = op::get_a(i);
                        let c = op::get_c(i);
                        // copy iterator, state, control above the closing slot
                        for off in 0..3 {
                            let v = self.reg(tid, base, a + off);
                            self.set_reg(tid, base, a + 4 + off, v);
                        }
                        {
                            let th = self.heap.thread_mut(tid);
                            th.top = base + a + 4 + 3;
                        }
                        match self.precall(tid, base + a + 4, 2, c as i32)? {
                            Called::Frame => continue 'reentry,
                            Called::Native => {
                                let th = self.heap.thread_mut(tid);
                                th.top = base + proto.max_stack as usize;
                            }
                        }
                    }
                    Op::TForLoop => {
                        let a = op::get_a(i);
                        let ctrl = self.reg(tid, base, a + 2);
                        if !ctrl.is_nil() {
                            self.set_reg(tid, base, a, ctrl);
                            pc -= op::get_bx(i);
                        }
                    }
                    Op::SetList => {
                        let a = op::get_a(i);
                        let b = op::get_b(i);
                        let mut c = op::get_c(i);
                        if op::get_k(i) {
                            c += op::get_ax(proto.code[pc]) * (op::MAX_C as usize + 1);
                            pc += 1;
                        }
                        let n = if b == 0 {
                            self.heap.thread(tid).top - (base + a) - 1
                        } else {
                            b
                        };
                        let t = match self.reg(tid, base, a) {
                            Value::Table(t) => t,
                            other => return Err(self.type_error("index", other)),
                        };
                        for idx in 1..=n {
                            let v = self.reg(tid, base, a + idx);
                            self.raw_seti(t, (c + idx) as i64, v);
                        }
                        if b == 0 {
                            let th = self.heap.thread_mut(tid);
                            th.top = base + proto.max_stack as usize;
                        }
                    }
                    Op::Closure => {
                        let child = proto.protos[op::get_bx(i)].clone();
                        let enclosing = {
                            let th = self.heap.thread(tid);
                            th.frames.last().map(|ci| ci.fn_id)
                        };
                        let fid = self.make_closure(child, tid, base, enclosing);
                        self.set_reg(tid, base, op::get_a(i), Value::Function(fid));
                    }
                    Op::Vararg => {
                        let a = op::get_a(i);
                        let c = op::get_c(i);
                        let varargs = {
                            let th = self.heap.thread(tid);
                            match th.frames.last() {
                                Some(ci) => ci.varargs.clone(),
                                None => Vec::new(),
                            }
                        };
                        let want = if c == 0 { varargs.len() } else { c - 1 };
                        {
                            let th = self.heap.thread_mut(tid);
                            th.ensure(base + a + want);
                            for k in 0..want {
                                th.stack[base + a + k] =
                                    varargs.get(k).copied().unwrap_or(Value::Nil);
                            }
                            if c == 0 {
                                th.top = base + a + want;
                            }
                        }
                    }
                    Op::VarargPrep => {
                        self.vararg_prep(tid, base, &proto);
                    }
                    Op::ExtraArg => {
                        return Err(self.rt_error("orphan EXTRAARG"));
                    }
                }
            }
        }
    }

    fn restore_caller_top(&mut self, tid: ThreadId) {
        let th = self.heap.thread_mut(tid);
        if let Some(ci) = th.frames.last() {
            th.top = ci.base + ci.proto.max_stack as usize;
        }
    }

    /// Fast numeric path shared by the arith opcodes; `None` leaves the
    /// following MMBIN* instruction to finish the job.
    fn fast_arith(&mut self, aop: ArithOp, b: Value, c: Value) -> Option<Value> {
        if aop.is_bitwise() {
            let x = match b {
                Value::Integer(x) => x,
                _ => return None,
            };
            let y = match c {
                Value::Integer(y) => y,
                _ => return None,
            };
            return super::arith::int_arith(aop, x, y).map(Value::Integer);
        }
        match (b, c) {
            (Value::Integer(x), Value::Integer(y))
                if !matches!(aop, ArithOp::Div | ArithOp::Pow) =>
            {
                super::arith::int_arith(aop, x, y).map(Value::Integer)
            }
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                let x = b.as_float().unwrap_or(0.0);
                let y = c.as_float().unwrap_or(0.0);
                Some(Value::Float(super::arith::float_arith(aop, x, y)))
            }
            _ => None,
        }
    }

    // ---- upvalue access through the current frame ----

    fn frame_upval_id(&self, tid: ThreadId, idx: usize) -> crate::gc::UpvalId {
        let th = self.heap.thread(tid);
        let fid = match th.frames.last() {
            Some(ci) => ci.fn_id,
            None => unreachable!("upvalue access with no frame"),
        };
        match self.heap.function(fid) {
            FunctionBody::Lua(_, ups) => ups[idx],
            FunctionBody::Native(_, _) => unreachable!("native frame has no upvalue cells"),
        }
    }

    fn frame_upval(&self, tid: ThreadId, idx: usize) -> Value {
        self.upval_get(self.frame_upval_id(tid, idx))
    }

    // ---- to-be-closed ----

    /// Registers a register slot as to-be-closed. nil and false are
    /// ignored; anything else must carry `__close`.
    fn mark_tbc(&mut self, tid: ThreadId, slot: usize) -> LuaResult<()> {
        let v = self.heap.thread(tid).stack[slot];
        if !v.is_truthy() {
            return Ok(());
        }
        if self.metamethod(v, Mm::Close).is_nil() {
            return Err(self.rt_error(format!(
                "variable '?' got a non-closable value ({})",
                v.type_name()
            )));
        }
        let th = self.heap.thread_mut(tid);
        if let Some(ci) = th.frames.last_mut() {
            ci.tbc.push(slot);
        }
        Ok(())
    }

    /// Closes the current frame's to-be-closed slots at or above `level`
    /// in LIFO order, passing `errobj` to each `__close`.
    pub(crate) fn close_tbc_down_to(
        &mut self,
        tid: ThreadId,
        level: usize,
        errobj: Value,
    ) -> LuaResult<()> {
        loop {
            let slot = {
                let th = self.heap.thread(tid);
                match th.frames.last().and_then(|ci| ci.tbc.last().copied()) {
                    Some(s) if s >= level => s,
                    _ => return Ok(()),
                }
            };
            {
                let th = self.heap.thread_mut(tid);
                if let Some(ci) = th.frames.last_mut() {
                    ci.tbc.pop();
                }
            }
            let v = self.heap.thread(tid).stack[slot];
            if !v.is_truthy() {
                continue;
            }
            let mm = self.metamethod(v, Mm::Close);
            if mm.is_nil() {
                continue;
            }
            self.call_value(mm, &[v, errobj], 0)?;
        }
    }

    // ---- varargs ----

    fn vararg_prep(&mut self, tid: ThreadId, base: usize, proto: &Proto) {
        let nparams = proto.num_params as usize;
        let extras: Vec<Value> = {
            let th = self.heap.thread(tid);
            let nargs = th.top.saturating_sub(base);
            if nargs > nparams {
                th.stack[base + nparams..base + nargs].to_vec()
            } else {
                Vec::new()
            }
        };
        let max = proto.max_stack as usize;
        let th = self.heap.thread_mut(tid);
        th.ensure(base + max);
        for slot in base + nparams..base + max {
            th.stack[slot] = Value::Nil;
        }
        th.top = base + max;
        if let Some(ci) = th.frames.last_mut() {
            ci.varargs = extras;
        }
    }

    // ---- calls ----

    /// Resolves and begins a call of `stack[func_idx]` with `nargs`
    /// arguments laid out above it. Natives run to completion here;
    /// bytecode pushes a frame for the dispatch loop.
    pub(crate) fn precall(
        &mut self,
        tid: ThreadId,
        func_idx: usize,
        mut nargs: usize,
        nresults: i32,
    ) -> LuaResult<Called> {
        let mut meta_depth = 0;
        loop {
            let callee = self.heap.thread(tid).stack[func_idx];
            let fid = match callee {
                Value::Function(fid) => fid,
                other => {
                    let mm = self.metamethod(other, Mm::Call);
                    if mm.is_nil() {
                        return Err(self.type_error("call", other));
                    }
                    meta_depth += 1;
                    if meta_depth > limits::MAX_TAG_LOOP {
                        return Err(self.rt_error("'__call' chain too long; possible loop"));
                    }
                    let th = self.heap.thread_mut(tid);
                    th.ensure(func_idx + 2 + nargs);
                    for k in (0..nargs).rev() {
                        th.stack[func_idx + 2 + k] = th.stack[func_idx + 1 + k];
                    }
                    th.stack[func_idx + 1] = other;
                    th.stack[func_idx] = mm;
                    th.top = func_idx + 2 + nargs;
                    nargs += 1;
                    continue;
                }
            };
            enum Body {
                Lua(Rc<Proto>),
                Native(NativeId),
            }
            let body = match self.heap.function(fid) {
                FunctionBody::Lua(p, _) => Body::Lua(p.clone()),
                FunctionBody::Native(id, _) => Body::Native(*id),
            };
            return match body {
                Body::Lua(proto) => {
                    let base = func_idx + 1;
                    let need = base + (proto.max_stack as usize).max(nargs);
                    if need > limits::MAX_STACK {
                        return Err(self.rt_error("stack overflow"));
                    }
                    {
                        let th = self.heap.thread_mut(tid);
                        th.ensure(need);
                        if proto.is_vararg {
                            th.top = base + nargs;
                        } else {
                            for slot in base + nargs..base + proto.max_stack as usize {
                                th.stack[slot] = Value::Nil;
                            }
                            th.top = base + proto.max_stack as usize;
                        }
                    }
                    let ci = CallInfo::new(callee, fid, proto, base, nresults);
                    self.heap.thread_mut(tid).frames.push(ci);
                    Ok(Called::Frame)
                }
                Body::Native(NativeId::Pcall) => {
                    self.protected_precall(tid, func_idx, nargs, nresults, false)
                }
                Body::Native(NativeId::Xpcall) => {
                    self.protected_precall(tid, func_idx, nargs, nresults, true)
                }
                Body::Native(NativeId::CoroutineYield) => self.do_yield(tid, func_idx, nargs, nresults),
                Body::Native(id) => {
                    self.check_native_depth()?;
                    let args: Vec<Value> = {
                        let th = self.heap.thread(tid);
                        th.stack[func_idx + 1..func_idx + 1 + nargs].to_vec()
                    };
                    let prev_self = std::mem::replace(&mut self.native_self, callee);
                    self.native_depth += 1;
                    let res = crate::stdlib::dispatch(self, id, &args);
                    self.native_depth -= 1;
                    self.native_self = prev_self;
                    let vals = res?;
                    self.place_results(tid, func_idx, &vals, nresults);
                    Ok(Called::Native)
                }
            };
        }
    }

    /// pcall/xpcall are call-machinery intrinsics: the protective flag
    /// lives on the callee's frame so errors and yields both traverse
    /// plain data.
    fn protected_precall(
        &mut self,
        tid: ThreadId,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
        with_handler: bool,
    ) -> LuaResult<Called> {
        let shift = if with_handler { 2 } else { 1 };
        let name = if with_handler { "xpcall" } else { "pcall" };
        if nargs < shift {
            return Err(self.rt_error(format!("bad argument #{} to '{}' (value expected)", shift, name)));
        }
        let handler = if with_handler {
            self.heap.thread(tid).stack[func_idx + 2]
        } else {
            Value::Nil
        };
        let inner_nargs = nargs - shift;
        {
            // drop the pcall (and handler) slots: callee moves into the
            // call position, its arguments right behind it
            let th = self.heap.thread_mut(tid);
            th.stack[func_idx] = th.stack[func_idx + 1];
            for k in 0..inner_nargs {
                th.stack[func_idx + 1 + k] = th.stack[func_idx + shift + 1 + k];
            }
            th.top = func_idx + 1 + inner_nargs;
        }
        self.protect(handler);
        let outcome = self.precall(tid, func_idx, inner_nargs, nresults);
        self.unprotect(1);
        match outcome {
            Ok(Called::Frame) => {
                let th = self.heap.thread_mut(tid);
                if let Some(ci) = th.frames.last_mut() {
                    ci.flags |= frame_flags::PROTECTED;
                    if with_handler {
                        ci.flags |= frame_flags::HAS_HANDLER;
                        ci.handler = handler;
                    }
                }
                Ok(Called::Frame)
            }
            Ok(Called::Native) => {
                // native callee already completed: prepend true
                let (results, _) = {
                    let th = self.heap.thread(tid);
                    (th.stack[func_idx..th.top].to_vec(), th.top)
                };
                let mut out = Vec::with_capacity(results.len() + 1);
                out.push(Value::Boolean(true));
                out.extend(results);
                self.place_results(tid, func_idx, &out, nresults);
                Ok(Called::Native)
            }
            Err(Fault::Error) => {
                let err = self.take_fault();
                let msg = if with_handler {
                    self.run_message_handler(handler, err)
                } else {
                    err
                };
                self.fault_status = Status::Ok;
                self.saved_traceback = None;
                self.place_results(tid, func_idx, &[Value::Boolean(false), msg], nresults);
                Ok(Called::Native)
            }
            Err(Fault::Yield) => Err(Fault::Yield),
        }
    }

    /// Invokes an xpcall message handler; an error inside it becomes the
    /// "error in error handling" case.
    pub(crate) fn run_message_handler(&mut self, handler: Value, err: Value) -> Value {
        match self.call_value(handler, &[err], 1) {
            Ok(vs) => vs.first().copied().unwrap_or(Value::Nil),
            Err(_) => {
                let _ = self.take_fault();
                self.fault_status = Status::ErrErr;
                self.new_string("error in error handling")
            }
        }
    }

    /// `coroutine.yield` intrinsic: park the values, remember where the
    /// resume results land, and let the signal climb through the frames.
    fn do_yield(
        &mut self,
        tid: ThreadId,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
    ) -> LuaResult<Called> {
        if tid == self.main_thread {
            return Err(self.rt_error("attempt to yield from outside a coroutine"));
        }
        if self.heap.thread(tid).ccalls > 0 {
            return Err(self.rt_error("attempt to yield across a C-call boundary"));
        }
        let th = self.heap.thread_mut(tid);
        th.transfer = th.stack[func_idx + 1..func_idx + 1 + nargs].to_vec();
        th.resume_dest = Some((func_idx, nresults));
        Err(Fault::Yield)
    }

    fn place_results(&mut self, tid: ThreadId, at: usize, vals: &[Value], nresults: i32) {
        let want = if nresults < 0 { vals.len() } else { nresults as usize };
        let th = self.heap.thread_mut(tid);
        th.ensure(at + want);
        for k in 0..want {
            th.stack[at + k] = vals.get(k).copied().unwrap_or(Value::Nil);
        }
        th.top = at + want;
    }

    /// Finishes a frame: closes its obligations, pops it, and lays the
    /// results where the caller expects them. Returns the popped frame's
    /// `nresults` so the dispatch loop can restore the caller's top.
    fn do_return(&mut self, tid: ThreadId, first: usize, nret: usize) -> LuaResult<i32> {
        self.close_tbc_down_to(tid, 0, Value::Nil)?;
        let base = {
            let th = self.heap.thread(tid);
            match th.frames.last() {
                Some(ci) => ci.base,
                None => unreachable!("return with no frame"),
            }
        };
        self.close_upvalues(tid, base);
        let ci = {
            let th = self.heap.thread_mut(tid);
            match th.frames.pop() {
                Some(ci) => ci,
                None => unreachable!("return with no frame"),
            }
        };
        let func_pos = ci.base - 1;
        let produced: Vec<Value> = {
            let th = self.heap.thread(tid);
            th.stack[first..first + nret].to_vec()
        };
        if ci.is_protected() {
            let mut out = Vec::with_capacity(nret + 1);
            out.push(Value::Boolean(true));
            out.extend(produced);
            self.place_results(tid, func_pos, &out, ci.nresults);
        } else {
            self.place_results(tid, func_pos, &produced, ci.nresults);
        }
        Ok(ci.nresults)
    }

    /// `TAILCALL`: replace the running frame with the callee's. A native
    /// callee runs in place and the RETURN following the TAILCALL picks
    /// its results up.
    fn tail_call(&mut self, tid: ThreadId, func_idx: usize, nargs: usize) -> LuaResult<Called> {
        // resolve __call chains up front so we know the callee kind
        let mut nargs = nargs;
        let mut meta_depth = 0;
        let fid = loop {
            let callee = self.heap.thread(tid).stack[func_idx];
            match callee {
                Value::Function(fid) => break fid,
                other => {
                    let mm = self.metamethod(other, Mm::Call);
                    if mm.is_nil() {
                        return Err(self.type_error("call", other));
                    }
                    meta_depth += 1;
                    if meta_depth > limits::MAX_TAG_LOOP {
                        return Err(self.rt_error("'__call' chain too long; possible loop"));
                    }
                    let th = self.heap.thread_mut(tid);
                    th.ensure(func_idx + 2 + nargs);
                    for k in (0..nargs).rev() {
                        th.stack[func_idx + 2 + k] = th.stack[func_idx + 1 + k];
                    }
                    th.stack[func_idx + 1] = other;
                    th.stack[func_idx] = mm;
                    th.top = func_idx + 2 + nargs;
                    nargs += 1;
                }
            }
        };
        let is_native = self.heap.function(fid).is_native();
        if is_native {
            // no frame elision needed; run like a plain call with all
            // results and let the following RETURN forward them
            return self.precall(tid, func_idx, nargs, -1);
        }
        // close the current frame's obligations before reusing its slot
        self.close_tbc_down_to(tid, 0, Value::Nil)?;
        let (old_base, old_flags, old_handler, old_nresults) = {
            let th = self.heap.thread(tid);
            match th.frames.last() {
                Some(ci) => (ci.base, ci.flags, ci.handler, ci.nresults),
                None => unreachable!("tail call with no frame"),
            }
        };
        self.close_upvalues(tid, old_base);
        let dest = old_base - 1;
        {
            let th = self.heap.thread_mut(tid);
            th.frames.pop();
            for k in 0..=nargs {
                th.stack[dest + k] = th.stack[func_idx + k];
            }
            th.top = dest + 1 + nargs;
        }
        let called = self.precall(tid, dest, nargs, old_nresults)?;
        if let Called::Frame = called {
            let keep = old_flags & (frame_flags::PROTECTED | frame_flags::HAS_HANDLER);
            let th = self.heap.thread_mut(tid);
            if let Some(ci) = th.frames.last_mut() {
                ci.flags |= keep | frame_flags::TAIL;
                ci.handler = old_handler;
            }
        }
        Ok(called)
    }

    /// Error recovery: pops frames (closing their obligations) until a
    /// protected frame catches the error. `Ok(true)` resumes dispatch,
    /// `Ok(false)` means the entry frame itself was the protected one.
    pub(crate) fn unwind(&mut self, tid: ThreadId, entry: usize) -> LuaResult<bool> {
        if self.saved_traceback.is_none() {
            self.saved_traceback = Some(self.traceback_string(None));
        }
        loop {
            let flen = self.heap.thread(tid).frames.len();
            if flen == 0 || flen < entry {
                return Err(Fault::Error);
            }
            let (protected, has_handler, handler, base, nresults) = {
                let th = self.heap.thread(tid);
                let ci = match th.frames.last() {
                    Some(ci) => ci,
                    None => return Err(Fault::Error),
                };
                (
                    ci.is_protected(),
                    ci.flags & frame_flags::HAS_HANDLER != 0,
                    ci.handler,
                    ci.base,
                    ci.nresults,
                )
            };
            // close to-be-closed slots with the error object; a __close
            // error replaces the one in flight and unwinding continues
            let errobj = self.fault;
            if self.close_tbc_down_to(tid, 0, errobj).is_err() {
                continue;
            }
            self.close_upvalues(tid, base);
            if !protected {
                self.heap.thread_mut(tid).frames.pop();
                continue;
            }
            let err = self.take_fault();
            let msg = if has_handler {
                self.run_message_handler(handler, err)
            } else {
                err
            };
            self.heap.thread_mut(tid).frames.pop();
            let func_pos = base - 1;
            self.place_results(tid, func_pos, &[Value::Boolean(false), msg], nresults);
            self.fault_status = Status::Ok;
            self.saved_traceback = None;
            let remaining = self.heap.thread(tid).frames.len();
            if remaining < entry {
                return Ok(false);
            }
            if nresults >= 0 {
                self.restore_caller_top(tid);
            }
            return Ok(true);
        }
    }

    // ---- nested entry for natives and metamethods ----

    /// Calls a callable from native context, running a nested dispatch
    /// loop. Yields cannot cross this boundary.
    pub fn call_value(&mut self, f: Value, args: &[Value], nresults: i32) -> LuaResult<Vec<Value>> {
        self.check_native_depth()?;
        let tid = self.current;
        let func_idx = {
            let th = self.heap.thread_mut(tid);
            let fi = th.top;
            th.push(f);
            for a in args {
                th.push(*a);
            }
            fi
        };
        self.heap.thread_mut(tid).ccalls += 1;
        let outcome = match self.precall(tid, func_idx, args.len(), nresults) {
            Ok(Called::Native) => Ok(()),
            Ok(Called::Frame) => {
                let entry = self.heap.thread(tid).frames.len();
                self.run_protected(tid, entry)
            }
            Err(f) => Err(f),
        };
        self.heap.thread_mut(tid).ccalls -= 1;
        match outcome {
            Ok(()) => {
                let th = self.heap.thread_mut(tid);
                let res = th.stack[func_idx..th.top].to_vec();
                th.top = func_idx;
                Ok(res)
            }
            Err(f) => {
                let th = self.heap.thread_mut(tid);
                th.top = func_idx;
                Err(f)
            }
        }
    }

    /// Single-result convenience for metamethod invocation.
    pub(crate) fn call_single(&mut self, f: Value, args: &[Value]) -> LuaResult<Value> {
        let vs = self.call_value(f, args, 1)?;
        Ok(vs.first().copied().unwrap_or(Value::Nil))
    }

    // ---- numeric for ----

    /// Validates and prepares the loop triple at `slot..slot+2`; puts
    /// the control variable copy in `slot+3`. Returns true when the
    /// loop body must be skipped entirely.
    fn for_prep(&mut self, tid: ThreadId, slot: usize) -> LuaResult<bool> {
        let (init, limit, step) = {
            let th = self.heap.thread(tid);
            (th.stack[slot], th.stack[slot + 1], th.stack[slot + 2])
        };
        let init = match init {
            Value::Integer(_) | Value::Float(_) => init,
            _ => return Err(self.rt_error("'for' initial value must be a number")),
        };
        let limit = match limit {
            Value::Integer(_) | Value::Float(_) => limit,
            _ => return Err(self.rt_error("'for' limit must be a number")),
        };
        let step = match step {
            Value::Integer(_) | Value::Float(_) => step,
            _ => return Err(self.rt_error("'for' step must be a number")),
        };
        if matches!(step, Value::Integer(0)) || matches!(step, Value::Float(f) if f == 0.0) {
            return Err(self.rt_error("'for' step is zero"));
        }
        match (init, step) {
            (Value::Integer(i0), Value::Integer(st)) => {
                // integer loop; a float limit clamps to the integer range
                let lim = match limit {
                    Value::Integer(l) => l,
                    Value::Float(f) => {
                        if st > 0 {
                            if crate::value::float_lt_int(f, i64::MIN) {
                                return Ok(true);
                            }
                            f.floor().clamp(i64::MIN as f64, i64::MAX as f64) as i64
                        } else {
                            if crate::value::int_lt_float(i64::MAX, f) {
                                return Ok(true);
                            }
                            f.ceil().clamp(i64::MIN as f64, i64::MAX as f64) as i64
                        }
                    }
                    _ => unreachable!("limit validated as Integer or Float above"),
                };
                let skip = if st > 0 { i0 > lim } else { i0 < lim };
                if skip {
                    return Ok(true);
                }
                let th = self.heap.thread_mut(tid);
                th.stack[slot] = Value::Integer(i0);
                th.stack[slot + 1] = Value::Integer(lim);
                th.stack[slot + 2] = Value::Integer(st);
                th.stack[slot + 3] = Value::Integer(i0);
                Ok(false)
            }
            _ => {
                let i0 = init.as_float().unwrap_or(0.0);
                let lim = limit.as_float().unwrap_or(0.0);
                let st = step.as_float().unwrap_or(0.0);
                let skip = if st > 0.0 { i0 > lim } else { i0 < lim };
                if skip || lim.is_nan() || i0.is_nan() {
                    return Ok(true);
                }
                let th = self.heap.thread_mut(tid);
                th.stack[slot] = Value::Float(i0);
                th.stack[slot + 1] = Value::Float(lim);
                th.stack[slot + 2] = Value::Float(st);
                th.stack[slot + 3] = Value::Float(i0);
                Ok(false)
            }
        }
    }

    /// Advances the loop; true means jump back to the body.
    fn for_loop(&mut self, tid: ThreadId, slot: usize) -> bool {
        let (counter, limit, step) = {
            let th = self.heap.thread(tid);
            (th.stack[slot], th.stack[slot + 1], th.stack[slot + 2])
        };
        match (counter, limit, step) {
            (Value::Integer(c), Value::Integer(l), Value::Integer(s)) => {
                let next = match c.checked_add(s) {
                    Some(n) => n,
                    None => return false, // stepping past the integer range ends the loop
                };
                let cont = if s > 0 { next <= l } else { next >= l };
                if cont {
                    let th = self.heap.thread_mut(tid);
                    th.stack[slot] = Value::Integer(next);
                    th.stack[slot + 3] = Value::Integer(next);
                }
                cont
            }
            (Value::Float(c), Value::Float(l), Value::Float(s)) => {
                let next = c + s;
                let cont = if s > 0.0 { next <= l } else { next >= l };
                if cont {
                    let th = self.heap.thread_mut(tid);
                    th.stack[slot] = Value::Float(next);
                    th.stack[slot + 3] = Value::Float(next);
                }
                cont
            }
            _ => false,
        }
    }

    // ---- coroutines ----

    /// Creates a coroutine whose body is `f`.
    pub fn new_coroutine(&mut self, f: Value) -> Value {
        let mut th = crate::vm::LuaThread::new();
        th.push(f);
        Value::Thread(self.heap.new_thread(th))
    }

    /// Transfers control into `co` until it yields, finishes or fails.
    /// `Ok((done, values))` on success; `Err(errobj)` when the coroutine
    /// died with an error.
    pub fn resume_thread(
        &mut self,
        co: ThreadId,
        args: Vec<Value>,
    ) -> Result<(bool, Vec<Value>), Value> {
        if self.native_depth >= limits::MAX_NATIVE_DEPTH {
            let msg = self.new_string("C stack overflow");
            return Err(msg);
        }
        let prev = self.current;
        self.heap.thread_mut(prev).status = ThreadStatus::Normal;
        self.heap.thread_mut(co).status = ThreadStatus::Running;
        self.current = co;
        self.native_depth += 1;
        let outcome = self.resume_body(co, args);
        self.native_depth -= 1;
        self.current = prev;
        self.heap.thread_mut(prev).status = ThreadStatus::Running;
        match outcome {
            Ok(()) => {
                let th = self.heap.thread_mut(co);
                th.status = ThreadStatus::Dead;
                let results = th.stack[0..th.top].to_vec();
                th.top = 0;
                th.frames.clear();
                Ok((true, results))
            }
            Err(Fault::Yield) => {
                let th = self.heap.thread_mut(co);
                th.status = ThreadStatus::Suspended;
                Ok((false, std::mem::take(&mut th.transfer)))
            }
            Err(Fault::Error) => {
                self.heap.thread_mut(co).status = ThreadStatus::Dead;
                self.saved_traceback = None;
                Err(self.take_fault())
            }
        }
    }

    fn resume_body(&mut self, co: ThreadId, args: Vec<Value>) -> LuaResult<()> {
        let pending = self.heap.thread_mut(co).resume_dest.take();
        match pending {
            None => {
                // first resume: stack[0] holds the body function
                {
                    let th = self.heap.thread_mut(co);
                    th.top = 1;
                    for a in &args {
                        th.push(*a);
                    }
                }
                match self.precall(co, 0, args.len(), -1)? {
                    Called::Native => Ok(()),
                    Called::Frame => self.run_protected(co, 1),
                }
            }
            Some((dest, nres)) => {
                self.place_results(co, dest, &args, nres);
                if self.heap.thread(co).frames.is_empty() {
                    // a native body yielded at top level; it is done now
                    return Ok(());
                }
                if nres >= 0 {
                    self.restore_caller_top(co);
                }
                self.run_protected(co, 1)
            }
        }
    }

    /// `coroutine.close`: drives a suspended coroutine through its
    /// pending to-be-closed slots and kills it.
    pub fn close_thread(&mut self, co: ThreadId) -> Result<(), Value> {
        let prev = self.current;
        self.current = co;
        let mut first_err: Option<Value> = None;
        loop {
            let has_frames = !self.heap.thread(co).frames.is_empty();
            if !has_frames {
                break;
            }
            let base = {
                let th = self.heap.thread(co);
                th.frames.last().map(|ci| ci.base).unwrap_or(0)
            };
            let errobj = first_err.unwrap_or(Value::Nil);
            if let Err(Fault::Error) = self.close_tbc_down_to(co, 0, errobj) {
                if first_err.is_none() {
                    first_err = Some(self.take_fault());
                } else {
                    let _ = self.take_fault();
                }
                continue;
            }
            self.close_upvalues(co, base);
            self.heap.thread_mut(co).frames.pop();
        }
        self.current = prev;
        let th = self.heap.thread_mut(co);
        th.status = ThreadStatus::Dead;
        th.top = 0;
        th.resume_dest = None;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn arith_op_of(o: Op) -> ArithOp {
    match o {
        Op::Add | Op::AddK | Op::AddI => ArithOp::Add,
        Op::Sub | Op::SubK => ArithOp::Sub,
        Op::Mul | Op::MulK => ArithOp::Mul,
        Op::Mod | Op::ModK => ArithOp::Mod,
        Op::Pow | Op::PowK => ArithOp::Pow,
        Op::Div | Op::DivK => ArithOp::Div,
        Op::IDiv | Op::IDivK => ArithOp::IDiv,
        Op::BAnd | Op::BAndK => ArithOp::BAnd,
        Op::BOr | Op::BOrK => ArithOp::BOr,
        Op::BXor | Op::BXorK => ArithOp::BXor,
        Op::Shl => ArithOp::Shl,
        Op::Shr => ArithOp::Shr,
        _ => unreachable!("not an arithmetic opcode"),
    }
}

fn mm_from_c(c: usize) -> Mm {
    // the code generator stores the Mm discriminant in the C field
    debug_assert!(c < crate::value::MM_COUNT);
    Mm::ALL[c]
}
