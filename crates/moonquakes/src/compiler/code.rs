// The emission layer: turning expression descriptors into register
// instructions, jump-list patching, and operator code generation.

use crate::compiler::funcstate::ConstKey;
use crate::compiler::{BinOp, ExpDesc, ExpKind, Parser, UnOp};
use crate::value::{ParsedNumber, Value};
use crate::vm::arith::{float_arith, int_arith, ArithOp};
use crate::vm::opcode::{self as op, Op, NO_JUMP};
use crate::vm::SyntaxError;

/// Marker for "no destination register" in test patching.
const NO_REG: u32 = op::MAX_A;

impl Parser<'_, '_> {
    // ---- jumps ----

    pub(crate) fn jump(&mut self) -> i32 {
        let line = self.tok_line;
        self.fs_mut().emit(op::sj(Op::Jmp, NO_JUMP), line)
    }

    /// Marks the current pc as a jump target.
    pub(crate) fn here(&mut self) -> i32 {
        let pc = self.fs().pc();
        self.fs_mut().last_target = pc;
        pc
    }

    fn get_jump(&self, pc: i32) -> i32 {
        let offset = op::get_sj(self.fs().code[pc as usize]);
        if offset == NO_JUMP {
            NO_JUMP
        } else {
            pc + 1 + offset
        }
    }

    fn fix_jump(&mut self, pc: i32, dest: i32) -> Result<(), SyntaxError> {
        let offset = dest - (pc + 1);
        if offset.abs() > op::OFFSET_SJ {
            return Err(self.error_at(self.tok_line, "control structure too long".to_string()));
        }
        op::set_sj(&mut self.fs_mut().code[pc as usize], offset);
        Ok(())
    }

    /// Splices list `l2` onto `*l1`.
    pub(crate) fn concat_jumps(&mut self, l1: &mut i32, l2: i32) -> Result<(), SyntaxError> {
        if l2 == NO_JUMP {
            return Ok(());
        }
        if *l1 == NO_JUMP {
            *l1 = l2;
            return Ok(());
        }
        let mut list = *l1;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next;
        }
        self.fix_jump(list, l2)
    }

    /// The TEST/TESTSET/comparison controlling a conditional jump.
    fn jump_control(&self, pc: i32) -> usize {
        let code = &self.fs().code;
        if pc >= 1 {
            let prev = code[pc as usize - 1];
            if is_test_like(op::get_op(prev)) {
                return pc as usize - 1;
            }
        }
        pc as usize
    }

    fn patch_test_reg(&mut self, node: i32, reg: u32) -> bool {
        let ctrl = self.jump_control(node);
        let i = self.fs().code[ctrl];
        if op::get_op(i) != Op::TestSet {
            return false;
        }
        let b = op::get_b(i) as u32;
        if reg != NO_REG && reg != b {
            op::set_a(&mut self.fs_mut().code[ctrl], reg);
        } else {
            // value not wanted (or already in place): degrade to TEST
            self.fs_mut().code[ctrl] = op::abck(Op::Test, b, 0, 0, op::get_k(i));
        }
        true
    }

    /// Any jump in the list that cannot deliver a value via TESTSET?
    fn need_value(&self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let ctrl = self.jump_control(list);
            if op::get_op(self.fs().code[ctrl]) != Op::TestSet {
                return true;
            }
            list = self.get_jump(list);
        }
        false
    }

    fn patch_list_aux(
        &mut self,
        mut list: i32,
        vtarget: i32,
        reg: u32,
        dtarget: i32,
    ) -> Result<(), SyntaxError> {
        while list != NO_JUMP {
            let next = self.get_jump(list);
            if self.patch_test_reg(list, reg) {
                self.fix_jump(list, vtarget)?;
            } else {
                self.fix_jump(list, dtarget)?;
            }
            list = next;
        }
        Ok(())
    }

    pub(crate) fn patch_list(&mut self, list: i32, target: i32) -> Result<(), SyntaxError> {
        self.patch_list_aux(list, target, NO_REG, target)
    }

    pub(crate) fn patch_to_here(&mut self, list: i32) -> Result<(), SyntaxError> {
        let here = self.here();
        self.patch_list(list, here)
    }

    /// Converts TESTSETs in the list into plain TESTs.
    fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            self.patch_test_reg(list, NO_REG);
            list = self.get_jump(list);
        }
    }

    // ---- constants ----

    pub(crate) fn const_index(&mut self, e: &ExpDesc) -> Option<usize> {
        let fs = self.fstack.last_mut()?;
        match e.kind {
            ExpKind::KInt(i) => Some(fs.add_const(ConstKey::Int(i), Value::Integer(i))),
            ExpKind::KFlt(f) => Some(fs.add_const(ConstKey::Flt(f.to_bits()), Value::Float(f))),
            ExpKind::KStr(s) => Some(fs.add_const(ConstKey::Str(s), Value::Str(s))),
            ExpKind::Nil => Some(fs.add_const(ConstKey::Nil, Value::Nil)),
            ExpKind::True => Some(fs.add_const(ConstKey::True, Value::Boolean(true))),
            ExpKind::False => Some(fs.add_const(ConstKey::False, Value::Boolean(false))),
            ExpKind::K(idx) => Some(idx),
            _ => None,
        }
    }

    // ---- discharge ----

    /// Reads through variables: after this the expression produces a
    /// value (possibly relocatable), not a location.
    pub(crate) fn discharge_vars(&mut self, e: &mut ExpDesc) {
        let line = self.tok_line;
        match e.kind {
            ExpKind::Local(r) => e.kind = ExpKind::NonReloc(r),
            ExpKind::Upval(u) => {
                let pc = self.emit_abc(Op::GetUpval, 0, u as u32, 0, line);
                e.kind = ExpKind::Reloc(pc as usize);
            }
            ExpKind::IndexUp { t, key } => {
                let pc = self.emit_abc(Op::GetTabUp, 0, t as u32, key as u32, line);
                e.kind = ExpKind::Reloc(pc as usize);
            }
            ExpKind::IndexI { t, idx } => {
                self.fs_mut().free_reg_if_temp(t);
                let pc = self.emit_abc(Op::GetI, 0, t as u32, idx as u32, line);
                e.kind = ExpKind::Reloc(pc as usize);
            }
            ExpKind::IndexStr { t, key } => {
                self.fs_mut().free_reg_if_temp(t);
                let pc = self.emit_abc(Op::GetField, 0, t as u32, key as u32, line);
                e.kind = ExpKind::Reloc(pc as usize);
            }
            ExpKind::Indexed { t, k } => {
                self.fs_mut().free_two(t, k);
                let pc = self.emit_abc(Op::GetTable, 0, t as u32, k as u32, line);
                e.kind = ExpKind::Reloc(pc as usize);
            }
            ExpKind::Call(pc) => {
                // one result: the call's own register
                let a = op::get_a(self.fs().code[pc]);
                op::set_c(&mut self.fs_mut().code[pc], 2);
                e.kind = ExpKind::NonReloc(a as u8);
            }
            ExpKind::Vararg(pc) => {
                op::set_c(&mut self.fs_mut().code[pc], 2);
                e.kind = ExpKind::Reloc(pc);
            }
            _ => {}
        }
    }

    fn discharge_to_reg(&mut self, e: &mut ExpDesc, reg: u8) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        self.discharge_vars(e);
        match e.kind {
            ExpKind::Nil => {
                self.emit_abc(Op::LoadNil, reg as u32, 0, 0, line);
            }
            ExpKind::False => {
                self.emit_abc(Op::LoadFalse, reg as u32, 0, 0, line);
            }
            ExpKind::True => {
                self.emit_abc(Op::LoadTrue, reg as u32, 0, 0, line);
            }
            ExpKind::KInt(i) => {
                if fits_sbx(i) {
                    self.emit_asbx(Op::LoadI, reg as u32, i as i32, line);
                } else {
                    let idx = match self.const_index(e) {
                        Some(idx) => idx,
                        None => unreachable!(),
                    };
                    self.emit_load_k(reg, idx, line);
                }
            }
            ExpKind::KFlt(f) => {
                let as_int = f as i64;
                if as_int as f64 == f && fits_sbx(as_int) && !(f == 0.0 && f.is_sign_negative()) {
                    self.emit_asbx(Op::LoadF, reg as u32, as_int as i32, line);
                } else {
                    let idx = match self.const_index(e) {
                        Some(idx) => idx,
                        None => unreachable!(),
                    };
                    self.emit_load_k(reg, idx, line);
                }
            }
            ExpKind::KStr(_) | ExpKind::K(_) => {
                let idx = match self.const_index(e) {
                    Some(idx) => idx,
                    None => unreachable!(),
                };
                self.emit_load_k(reg, idx, line);
            }
            ExpKind::Reloc(pc) => {
                op::set_a(&mut self.fs_mut().code[pc], reg as u32);
            }
            ExpKind::NonReloc(r) => {
                if r != reg {
                    self.emit_abc(Op::Move, reg as u32, r as u32, 0, line);
                }
            }
            ExpKind::Jump(_) => return Ok(()),
            ExpKind::Void => {
                return Err(self.error_at(line, "value expected".to_string()));
            }
            _ => unreachable!("expression not discharged"),
        }
        e.kind = ExpKind::NonReloc(reg);
        Ok(())
    }

    fn emit_load_k(&mut self, reg: u8, idx: usize, line: u32) {
        if idx <= op::MAX_BX as usize {
            self.emit_abx(Op::LoadK, reg as u32, idx as u32, line);
        } else {
            self.emit_abx(Op::LoadKX, reg as u32, 0, line);
            let extra = op::ax(Op::ExtraArg, idx as u32);
            self.fs_mut().emit(extra, line);
        }
    }

    fn discharge_to_any_reg(&mut self, e: &mut ExpDesc) -> Result<(), SyntaxError> {
        if !matches!(e.kind, ExpKind::NonReloc(_)) {
            let line = self.tok_line;
            self.fs_mut().reserve(1, line)?;
            let reg = self.fs().free_reg - 1;
            self.discharge_to_reg(e, reg)?;
        }
        Ok(())
    }

    /// Forces the expression (including any pending jumps) into `reg`.
    pub(crate) fn exp_to_reg(&mut self, e: &mut ExpDesc, reg: u8) -> Result<(), SyntaxError> {
        self.discharge_to_reg(e, reg)?;
        if let ExpKind::Jump(pc) = e.kind {
            self.concat_jumps(&mut e.t, pc as i32)?;
        }
        if e.has_jumps() {
            let mut p_f = NO_JUMP;
            let mut p_t = NO_JUMP;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if matches!(e.kind, ExpKind::Jump(_)) {
                    NO_JUMP
                } else {
                    self.jump()
                };
                let line = self.tok_line;
                self.here();
                p_f = self.emit_abc(Op::LFalseSkip, reg as u32, 0, 0, line);
                p_t = self.emit_abc(Op::LoadTrue, reg as u32, 0, 0, line);
                if fj != NO_JUMP {
                    self.patch_to_here(fj)?;
                }
            }
            let final_pc = self.here();
            self.patch_list_aux(e.f, final_pc, reg as u32, p_f)?;
            self.patch_list_aux(e.t, final_pc, reg as u32, p_t)?;
        }
        e.t = NO_JUMP;
        e.f = NO_JUMP;
        e.kind = ExpKind::NonReloc(reg);
        Ok(())
    }

    pub(crate) fn free_exp(&mut self, e: &ExpDesc) {
        if let ExpKind::NonReloc(r) = e.kind {
            self.fs_mut().free_reg_if_temp(r);
        }
    }

    pub(crate) fn exp_to_next_reg(&mut self, e: &mut ExpDesc) -> Result<(), SyntaxError> {
        self.discharge_vars(e);
        self.free_exp(e);
        let line = self.tok_line;
        self.fs_mut().reserve(1, line)?;
        let reg = self.fs().free_reg - 1;
        self.exp_to_reg(e, reg)
    }

    pub(crate) fn exp_to_any_reg(&mut self, e: &mut ExpDesc) -> Result<u8, SyntaxError> {
        self.discharge_vars(e);
        if let ExpKind::NonReloc(r) = e.kind {
            if !e.has_jumps() {
                return Ok(r);
            }
            if r as usize >= self.fs().active.len() {
                self.exp_to_reg(e, r)?;
                return Ok(r);
            }
        }
        self.exp_to_next_reg(e)?;
        match e.kind {
            ExpKind::NonReloc(r) => Ok(r),
            _ => unreachable!(),
        }
    }

    pub(crate) fn exp_to_val(&mut self, e: &mut ExpDesc) -> Result<(), SyntaxError> {
        if e.has_jumps() {
            self.exp_to_any_reg(e)?;
        } else {
            self.discharge_vars(e);
        }
        Ok(())
    }

    /// Operand for a k-flagged B/C slot: constant index when it fits,
    /// register otherwise.
    pub(crate) fn exp_to_rk(&mut self, e: &mut ExpDesc) -> Result<(bool, u32), SyntaxError> {
        self.exp_to_val(e)?;
        if e.is_const() {
            if let Some(idx) = self.const_index(e) {
                if idx <= op::MAX_C as usize {
                    e.kind = ExpKind::K(idx);
                    return Ok((true, idx as u32));
                }
            }
        }
        let r = self.exp_to_any_reg(e)?;
        Ok((false, r as u32))
    }

    // ---- variables ----

    pub(crate) fn store_var(&mut self, target: &ExpDesc, e: &mut ExpDesc) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        match target.kind {
            ExpKind::Local(reg) => {
                self.free_exp(e);
                return self.exp_to_reg(e, reg);
            }
            ExpKind::Upval(u) => {
                let r = self.exp_to_any_reg(e)?;
                self.emit_abc(Op::SetUpval, r as u32, u as u32, 0, line);
            }
            ExpKind::IndexUp { t, key } => {
                let (k, c) = self.exp_to_rk(e)?;
                self.emit_abck(Op::SetTabUp, t as u32, key as u32, c, k, line);
            }
            ExpKind::IndexI { t, idx } => {
                let (k, c) = self.exp_to_rk(e)?;
                self.emit_abck(Op::SetI, t as u32, idx as u32, c, k, line);
            }
            ExpKind::IndexStr { t, key } => {
                let (k, c) = self.exp_to_rk(e)?;
                self.emit_abck(Op::SetField, t as u32, key as u32, c, k, line);
            }
            ExpKind::Indexed { t, k: kr } => {
                let (k, c) = self.exp_to_rk(e)?;
                self.emit_abck(Op::SetTable, t as u32, kr as u32, c, k, line);
            }
            _ => unreachable!("cannot assign to this expression"),
        }
        self.free_exp(e);
        Ok(())
    }

    /// Builds `t[k]` as an indexable descriptor.
    pub(crate) fn indexed(&mut self, t: &mut ExpDesc, k: &mut ExpDesc) -> Result<ExpDesc, SyntaxError> {
        if let ExpKind::Upval(u) = t.kind {
            if let ExpKind::KStr(_) = k.kind {
                if let Some(idx) = self.const_index(k) {
                    if idx <= op::MAX_C as usize {
                        return Ok(ExpDesc::new(ExpKind::IndexUp { t: u, key: idx }));
                    }
                }
            }
            // not a short string key: get the upvalue into a register
            self.exp_to_any_reg(t)?;
        }
        let treg = self.exp_to_any_reg(t)?;
        if let ExpKind::KInt(i) = k.kind {
            if (0..=op::MAX_C as i64).contains(&i) && !k.has_jumps() {
                return Ok(ExpDesc::new(ExpKind::IndexI {
                    t: treg,
                    idx: i as u8,
                }));
            }
        }
        if let ExpKind::KStr(_) = k.kind {
            if !k.has_jumps() {
                if let Some(idx) = self.const_index(k) {
                    if idx <= op::MAX_C as usize {
                        return Ok(ExpDesc::new(ExpKind::IndexStr { t: treg, key: idx }));
                    }
                }
            }
        }
        let kreg = self.exp_to_any_reg(k)?;
        Ok(ExpDesc::new(ExpKind::Indexed { t: treg, k: kreg }))
    }

    // ---- conditions ----

    fn negate_condition(&mut self, pc: i32) {
        let ctrl = self.jump_control(pc);
        let i = self.fs().code[ctrl];
        debug_assert!(is_test_like(op::get_op(i)));
        let flipped = i ^ (1 << op::POS_K);
        self.fs_mut().code[ctrl] = flipped;
    }

    fn jump_on_cond(&mut self, e: &mut ExpDesc, cond: bool) -> Result<i32, SyntaxError> {
        let line = self.tok_line;
        if let ExpKind::Reloc(pc) = e.kind {
            let i = self.fs().code[pc];
            if op::get_op(i) == Op::Not {
                // fold `not x` into the test
                self.fs_mut().code.pop();
                self.fs_mut().lines.pop();
                let b = op::get_b(i);
                self.emit_abck(Op::Test, b as u32, 0, 0, !cond, line);
                return Ok(self.jump());
            }
        }
        self.discharge_to_any_reg(e)?;
        self.free_exp(e);
        let r = match e.kind {
            ExpKind::NonReloc(r) => r,
            _ => unreachable!(),
        };
        self.emit_abck(Op::TestSet, NO_REG, r as u32, 0, cond, line);
        Ok(self.jump())
    }

    /// Prepares `e` to be followed by code executed only when truthy.
    pub(crate) fn go_if_true(&mut self, e: &mut ExpDesc) -> Result<(), SyntaxError> {
        self.discharge_vars(e);
        let pc = if e.is_true_const() {
            NO_JUMP
        } else if let ExpKind::Jump(j) = e.kind {
            self.negate_condition(j as i32);
            j as i32
        } else {
            self.jump_on_cond(e, false)?
        };
        let f = std::mem::replace(&mut e.f, NO_JUMP);
        let mut list = f;
        self.concat_jumps(&mut list, pc)?;
        e.f = list;
        self.patch_to_here(e.t)?;
        e.t = NO_JUMP;
        Ok(())
    }

    pub(crate) fn go_if_false(&mut self, e: &mut ExpDesc) -> Result<(), SyntaxError> {
        self.discharge_vars(e);
        let pc = if e.is_false_const() {
            NO_JUMP
        } else if let ExpKind::Jump(j) = e.kind {
            j as i32
        } else {
            self.jump_on_cond(e, true)?
        };
        let t = std::mem::replace(&mut e.t, NO_JUMP);
        let mut list = t;
        self.concat_jumps(&mut list, pc)?;
        e.t = list;
        self.patch_to_here(e.f)?;
        e.f = NO_JUMP;
        Ok(())
    }

    // ---- operators ----

    pub(crate) fn apply_unary(&mut self, uop: UnOp, e: &mut ExpDesc, line: u32) -> Result<(), SyntaxError> {
        match uop {
            UnOp::Minus => {
                if e.is_numeral() {
                    match e.kind {
                        ExpKind::KInt(i) => {
                            e.kind = ExpKind::KInt(i.wrapping_neg());
                            return Ok(());
                        }
                        ExpKind::KFlt(f) => {
                            e.kind = ExpKind::KFlt(-f);
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                self.code_unary(Op::Unm, e, line)
            }
            UnOp::BNot => {
                if let ExpKind::KInt(i) = e.kind {
                    if !e.has_jumps() {
                        e.kind = ExpKind::KInt(!i);
                        return Ok(());
                    }
                }
                self.code_unary(Op::BNot, e, line)
            }
            UnOp::Len => self.code_unary(Op::Len, e, line),
            UnOp::Not => self.code_not(e),
        }
    }

    fn code_unary(&mut self, o: Op, e: &mut ExpDesc, line: u32) -> Result<(), SyntaxError> {
        let r = self.exp_to_any_reg(e)?;
        self.free_exp(e);
        let pc = self.emit_abc(o, 0, r as u32, 0, line);
        e.kind = ExpKind::Reloc(pc as usize);
        Ok(())
    }

    fn code_not(&mut self, e: &mut ExpDesc) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        self.discharge_vars(e);
        match e.kind {
            ExpKind::Nil | ExpKind::False => e.kind = ExpKind::True,
            ExpKind::True | ExpKind::KInt(_) | ExpKind::KFlt(_) | ExpKind::KStr(_)
            | ExpKind::K(_) => e.kind = ExpKind::False,
            ExpKind::Jump(pc) => self.negate_condition(pc as i32),
            ExpKind::Reloc(_) | ExpKind::NonReloc(_) => {
                self.discharge_to_any_reg(e)?;
                self.free_exp(e);
                let r = match e.kind {
                    ExpKind::NonReloc(r) => r,
                    _ => unreachable!(),
                };
                let pc = self.emit_abc(Op::Not, 0, r as u32, 0, line);
                e.kind = ExpKind::Reloc(pc as usize);
            }
            _ => unreachable!(),
        }
        std::mem::swap(&mut e.t, &mut e.f);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(())
    }

    /// Work done when the operator token is seen, before the right
    /// operand is parsed.
    pub(crate) fn infix(&mut self, bop: BinOp, e: &mut ExpDesc) -> Result<(), SyntaxError> {
        match bop {
            BinOp::And => self.go_if_true(e),
            BinOp::Or => self.go_if_false(e),
            BinOp::Concat => self.exp_to_next_reg(e),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::IDiv | BinOp::Mod
            | BinOp::Pow | BinOp::BAnd | BinOp::BOr | BinOp::BXor | BinOp::Shl | BinOp::Shr => {
                if !e.is_numeral() {
                    self.exp_to_any_reg(e)?;
                }
                Ok(())
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if !e.is_const() {
                    self.exp_to_any_reg(e)?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn posfix(
        &mut self,
        bop: BinOp,
        e1: &mut ExpDesc,
        mut e2: ExpDesc,
        line: u32,
    ) -> Result<(), SyntaxError> {
        match bop {
            BinOp::And => {
                debug_assert!(e1.t == NO_JUMP);
                self.discharge_vars(&mut e2);
                let mut f = e2.f;
                self.concat_jumps(&mut f, e1.f)?;
                e2.f = f;
                *e1 = e2;
                Ok(())
            }
            BinOp::Or => {
                debug_assert!(e1.f == NO_JUMP);
                self.discharge_vars(&mut e2);
                let mut t = e2.t;
                self.concat_jumps(&mut t, e1.t)?;
                e2.t = t;
                *e1 = e2;
                Ok(())
            }
            BinOp::Concat => {
                self.exp_to_val(&mut e2)?;
                let r1 = match e1.kind {
                    ExpKind::NonReloc(r) => r,
                    _ => unreachable!("concat left operand not materialized"),
                };
                let prev_pc = self.fs().pc() - 1;
                let mergeable = prev_pc >= 0 && {
                    let prev = self.fs().code[prev_pc as usize];
                    op::get_op(prev) == Op::Concat
                        && op::get_a(prev) == r1 as usize + 1
                        && matches!(e2.kind, ExpKind::NonReloc(r2) if r2 as usize == r1 as usize + 1)
                };
                if mergeable {
                    // fold into the previous CONCAT: one more operand
                    let prev = prev_pc as usize;
                    let b = op::get_b(self.fs().code[prev]);
                    op::set_a(&mut self.fs_mut().code[prev], r1 as u32);
                    op::set_b(&mut self.fs_mut().code[prev], b as u32 + 1);
                    self.free_exp(&e2);
                } else {
                    self.exp_to_next_reg(&mut e2)?;
                    self.free_exp(&e2);
                    self.emit_abc(Op::Concat, r1 as u32, 2, 0, line);
                }
                e1.kind = ExpKind::NonReloc(r1);
                e1.t = NO_JUMP;
                e1.f = NO_JUMP;
                Ok(())
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.code_comparison(bop, e1, e2, line)
            }
            _ => self.code_arith(bop, e1, e2, line),
        }
    }

    fn code_arith(
        &mut self,
        bop: BinOp,
        e1: &mut ExpDesc,
        mut e2: ExpDesc,
        line: u32,
    ) -> Result<(), SyntaxError> {
        let aop = arith_of(bop);
        // constant folding when the operation cannot raise
        if e1.is_numeral() && e2.is_numeral() {
            if let Some(folded) = fold(aop, e1, &e2) {
                e1.kind = folded;
                return Ok(());
            }
        }
        // immediate form: integer right operand in sC range
        let imm = match e2.kind {
            ExpKind::KInt(i) if !e2.has_jumps() && fits_sc(i) => Some(i),
            _ => None,
        };
        let (base_op, use_imm, imm_val, flip) = match (aop, imm) {
            (ArithOp::Add, Some(i)) => (Op::AddI, true, i, false),
            (ArithOp::Sub, Some(i)) if fits_sc(-i) => (Op::AddI, true, -i, false),
            (ArithOp::Shr, Some(i)) => (Op::ShrI, true, i, false),
            (ArithOp::Shl, Some(i)) if fits_sc(-i) => (Op::ShrI, true, -i, false),
            _ => (Op::Add, false, 0, false),
        };
        if use_imm {
            let r1 = self.exp_to_any_reg(e1)?;
            self.free_exp(e1);
            let pc = self.emit_abc(
                base_op,
                0,
                r1 as u32,
                (imm_val + op::OFFSET_SC as i64) as u32,
                line,
            );
            // the original immediate rides the metamethod fallback
            let orig = match imm {
                Some(i) => i,
                None => unreachable!(),
            };
            self.emit_abck(
                Op::MmBinI,
                r1 as u32,
                (orig + op::OFFSET_SB as i64) as u32,
                aop.event() as u32,
                flip,
                line,
            );
            e1.kind = ExpKind::Reloc(pc as usize);
            return Ok(());
        }
        // constant form: numeric right operand in the pool
        let k_form = matches!(
            aop,
            ArithOp::Add
                | ArithOp::Sub
                | ArithOp::Mul
                | ArithOp::Mod
                | ArithOp::Pow
                | ArithOp::Div
                | ArithOp::IDiv
                | ArithOp::BAnd
                | ArithOp::BOr
                | ArithOp::BXor
        );
        if k_form && e2.is_numeral() && !e2.has_jumps() {
            if let Some(kidx) = self.const_index(&e2) {
                if kidx <= op::MAX_C as usize {
                    let r1 = self.exp_to_any_reg(e1)?;
                    self.free_exp(e1);
                    let ko = k_op_of(aop);
                    let pc = self.emit_abc(ko, 0, r1 as u32, kidx as u32, line);
                    self.emit_abck(
                        Op::MmBinK,
                        r1 as u32,
                        kidx as u32,
                        aop.event() as u32,
                        false,
                        line,
                    );
                    e1.kind = ExpKind::Reloc(pc as usize);
                    return Ok(());
                }
            }
        }
        // general register form
        let r1 = self.exp_to_any_reg(e1)?;
        let r2 = self.exp_to_any_reg(&mut e2)?;
        self.fs_mut().free_two(r1, r2);
        let pc = self.emit_abc(reg_op_of(aop), 0, r1 as u32, r2 as u32, line);
        self.emit_abck(
            Op::MmBin,
            r1 as u32,
            r2 as u32,
            aop.event() as u32,
            false,
            line,
        );
        e1.kind = ExpKind::Reloc(pc as usize);
        Ok(())
    }

    fn code_comparison(
        &mut self,
        bop: BinOp,
        e1: &mut ExpDesc,
        mut e2: ExpDesc,
        line: u32,
    ) -> Result<(), SyntaxError> {
        // normalize: Gt/Ge swap operands into Lt/Le unless an immediate
        // right operand lets us use the *I forms directly
        let (op_eff, swap) = match bop {
            BinOp::Gt => (BinOp::Lt, true),
            BinOp::Ge => (BinOp::Le, true),
            other => (other, false),
        };
        let k_sense = bop != BinOp::Ne;
        if matches!(bop, BinOp::Eq | BinOp::Ne) {
            // EQ / EQK / EQI
            let r1 = if e1.is_const() {
                // constant on the left: move it right (== is symmetric)
                std::mem::swap(e1, &mut e2);
                self.exp_to_any_reg(e1)?
            } else {
                self.exp_to_any_reg(e1)?
            };
            let pc;
            match e2.kind {
                ExpKind::KInt(i) if fits_sb(i) && !e2.has_jumps() => {
                    self.free_exp(e1);
                    self.emit_abck(
                        Op::EqI,
                        r1 as u32,
                        (i + op::OFFSET_SB as i64) as u32,
                        0,
                        k_sense,
                        line,
                    );
                    pc = self.jump();
                }
                _ if e2.is_const() => {
                    let kidx = match self.const_index(&e2) {
                        Some(k) => k,
                        None => unreachable!(),
                    };
                    if kidx <= op::MAX_B as usize {
                        self.free_exp(e1);
                        self.emit_abck(Op::EqK, r1 as u32, kidx as u32, 0, k_sense, line);
                        pc = self.jump();
                    } else {
                        let r2 = self.exp_to_any_reg(&mut e2)?;
                        self.fs_mut().free_two(r1, r2);
                        self.emit_abck(Op::Eq, r1 as u32, r2 as u32, 0, k_sense, line);
                        pc = self.jump();
                    }
                }
                _ => {
                    let r2 = self.exp_to_any_reg(&mut e2)?;
                    self.fs_mut().free_two(r1, r2);
                    self.emit_abck(Op::Eq, r1 as u32, r2 as u32, 0, k_sense, line);
                    pc = self.jump();
                }
            }
            *e1 = ExpDesc::new(ExpKind::Jump(pc as usize));
            return Ok(());
        }
        // ordered comparisons
        // immediate forms: R < imm → LTI; R > imm → GTI (no swap needed)
        if let ExpKind::KInt(i) = e2.kind {
            if fits_sb(i) && !e2.has_jumps() {
                let r1 = self.exp_to_any_reg(e1)?;
                self.free_exp(e1);
                let o = match bop {
                    BinOp::Lt => Op::LtI,
                    BinOp::Le => Op::LeI,
                    BinOp::Gt => Op::GtI,
                    BinOp::Ge => Op::GeI,
                    _ => unreachable!(),
                };
                self.emit_abck(o, r1 as u32, (i + op::OFFSET_SB as i64) as u32, 0, true, line);
                let pc = self.jump();
                *e1 = ExpDesc::new(ExpKind::Jump(pc as usize));
                return Ok(());
            }
        }
        let (ra, rb) = if swap {
            let r2 = self.exp_to_any_reg(&mut e2)?;
            let r1 = match e1.kind {
                ExpKind::NonReloc(r) => r,
                _ => self.exp_to_any_reg(e1)?,
            };
            (r2, r1)
        } else {
            let r1 = self.exp_to_any_reg(e1)?;
            let r2 = self.exp_to_any_reg(&mut e2)?;
            (r1, r2)
        };
        self.fs_mut().free_two(ra, rb);
        let o = match op_eff {
            BinOp::Lt => Op::Lt,
            BinOp::Le => Op::Le,
            _ => unreachable!(),
        };
        self.emit_abck(o, ra as u32, rb as u32, 0, true, line);
        let pc = self.jump();
        *e1 = ExpDesc::new(ExpKind::Jump(pc as usize));
        Ok(())
    }

    // ---- multiple results ----

    pub(crate) fn set_returns(&mut self, e: &mut ExpDesc, nresults: i32) {
        match e.kind {
            ExpKind::Call(pc) => {
                op::set_c(&mut self.fs_mut().code[pc], (nresults + 1) as u32);
            }
            ExpKind::Vararg(pc) => {
                let reg = self.fs().free_reg;
                op::set_c(&mut self.fs_mut().code[pc], (nresults + 1) as u32);
                op::set_a(&mut self.fs_mut().code[pc], reg as u32);
                let line = self.tok_line;
                let _ = self.fs_mut().reserve(1, line);
            }
            _ => {}
        }
    }

    pub(crate) fn set_multret(&mut self, e: &mut ExpDesc) {
        self.set_returns(e, -1);
    }
}

fn is_test_like(o: Op) -> bool {
    matches!(
        o,
        Op::Test
            | Op::TestSet
            | Op::Eq
            | Op::Lt
            | Op::Le
            | Op::EqK
            | Op::EqI
            | Op::LtI
            | Op::LeI
            | Op::GtI
            | Op::GeI
    )
}

#[inline]
fn fits_sbx(i: i64) -> bool {
    (-(op::OFFSET_SBX as i64)..=op::OFFSET_SBX as i64).contains(&i)
}

#[inline]
fn fits_sc(i: i64) -> bool {
    (-(op::OFFSET_SC as i64)..=(op::MAX_C as i64 - op::OFFSET_SC as i64)).contains(&i)
}

#[inline]
fn fits_sb(i: i64) -> bool {
    (-(op::OFFSET_SB as i64)..=(op::MAX_B as i64 - op::OFFSET_SB as i64)).contains(&i)
}

fn arith_of(bop: BinOp) -> ArithOp {
    match bop {
        BinOp::Add => ArithOp::Add,
        BinOp::Sub => ArithOp::Sub,
        BinOp::Mul => ArithOp::Mul,
        BinOp::Div => ArithOp::Div,
        BinOp::IDiv => ArithOp::IDiv,
        BinOp::Mod => ArithOp::Mod,
        BinOp::Pow => ArithOp::Pow,
        BinOp::BAnd => ArithOp::BAnd,
        BinOp::BOr => ArithOp::BOr,
        BinOp::BXor => ArithOp::BXor,
        BinOp::Shl => ArithOp::Shl,
        BinOp::Shr => ArithOp::Shr,
        _ => unreachable!("not an arithmetic operator"),
    }
}

fn reg_op_of(aop: ArithOp) -> Op {
    match aop {
        ArithOp::Add => Op::Add,
        ArithOp::Sub => Op::Sub,
        ArithOp::Mul => Op::Mul,
        ArithOp::Mod => Op::Mod,
        ArithOp::Pow => Op::Pow,
        ArithOp::Div => Op::Div,
        ArithOp::IDiv => Op::IDiv,
        ArithOp::BAnd => Op::BAnd,
        ArithOp::BOr => Op::BOr,
        ArithOp::BXor => Op::BXor,
        ArithOp::Shl => Op::Shl,
        ArithOp::Shr => Op::Shr,
        _ => unreachable!(),
    }
}

fn k_op_of(aop: ArithOp) -> Op {
    match aop {
        ArithOp::Add => Op::AddK,
        ArithOp::Sub => Op::SubK,
        ArithOp::Mul => Op::MulK,
        ArithOp::Mod => Op::ModK,
        ArithOp::Pow => Op::PowK,
        ArithOp::Div => Op::DivK,
        ArithOp::IDiv => Op::IDivK,
        ArithOp::BAnd => Op::BAndK,
        ArithOp::BOr => Op::BOrK,
        ArithOp::BXor => Op::BXorK,
        _ => unreachable!(),
    }
}

/// Compile-time folding, skipped when the operation could raise at
/// runtime (division by integer zero, bitwise on non-integer floats).
fn fold(aop: ArithOp, e1: &ExpDesc, e2: &ExpDesc) -> Option<ExpKind> {
    let (a, b) = (num_of(e1)?, num_of(e2)?);
    if aop.is_bitwise() {
        let x = int_of(a)?;
        let y = int_of(b)?;
        return int_arith(aop, x, y).map(ExpKind::KInt);
    }
    match (a, b) {
        (ParsedNumber::Int(x), ParsedNumber::Int(y))
            if !matches!(aop, ArithOp::Div | ArithOp::Pow) =>
        {
            if matches!(aop, ArithOp::Mod | ArithOp::IDiv) && y == 0 {
                return None;
            }
            int_arith(aop, x, y).map(ExpKind::KInt)
        }
        _ => {
            let x = flt_of(a);
            let y = flt_of(b);
            let r = float_arith(aop, x, y);
            // keep NaN results unfolded so `0/0` stays a runtime value
            if r.is_nan() {
                None
            } else {
                Some(ExpKind::KFlt(r))
            }
        }
    }
}

fn num_of(e: &ExpDesc) -> Option<ParsedNumber> {
    match e.kind {
        ExpKind::KInt(i) => Some(ParsedNumber::Int(i)),
        ExpKind::KFlt(f) => Some(ParsedNumber::Float(f)),
        _ => None,
    }
}

fn int_of(n: ParsedNumber) -> Option<i64> {
    match n {
        ParsedNumber::Int(i) => Some(i),
        ParsedNumber::Float(f) => crate::value::float_to_int_exact(f),
    }
}

fn flt_of(n: ParsedNumber) -> f64 {
    match n {
        ParsedNumber::Int(i) => i as f64,
        ParsedNumber::Float(f) => f,
    }
}
