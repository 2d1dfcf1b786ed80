// Expression parsing: precedence climbing, driving the emitter as it
// goes.

use crate::compiler::token::Tok;
use crate::compiler::{BinOp, ExpDesc, ExpKind, Parser, UnOp, UNARY_PRIORITY};
use crate::limits;
use crate::vm::opcode::{self as op, Op};
use crate::vm::SyntaxError;

impl Parser<'_, '_> {
    pub(crate) fn expr(&mut self) -> Result<ExpDesc, SyntaxError> {
        let (e, _) = self.sub_expr(0)?;
        Ok(e)
    }

    /// Parses a subexpression with operators binding tighter than
    /// `limit`; returns the unconsumed operator, if any.
    fn sub_expr(&mut self, limit: u8) -> Result<(ExpDesc, Option<BinOp>), SyntaxError> {
        self.depth += 1;
        if self.depth > 220 {
            self.depth -= 1;
            return Err(self.error("chunk has too many syntax levels"));
        }
        let r = self.sub_expr_inner(limit);
        self.depth -= 1;
        r
    }

    fn sub_expr_inner(&mut self, limit: u8) -> Result<(ExpDesc, Option<BinOp>), SyntaxError> {
        let mut e = match unary_of(&self.tok) {
            Some(uop) => {
                let line = self.tok_line;
                self.advance()?;
                let (mut operand, _pending) = {
                    let (operand, pending) = self.sub_expr(UNARY_PRIORITY)?;
                    (operand, pending)
                };
                self.apply_unary(uop, &mut operand, line)?;
                operand
            }
            None => self.simple_exp()?,
        };
        let mut bop = binary_of(&self.tok);
        while let Some(op_now) = bop {
            let (left, right) = op_now.priority();
            if left <= limit {
                break;
            }
            let line = self.tok_line;
            self.advance()?;
            self.infix(op_now, &mut e)?;
            let (e2, next) = self.sub_expr(right)?;
            self.posfix(op_now, &mut e, e2, line)?;
            bop = next;
        }
        Ok((e, bop))
    }

    fn simple_exp(&mut self) -> Result<ExpDesc, SyntaxError> {
        let e = match &self.tok {
            Tok::Nil => ExpDesc::new(ExpKind::Nil),
            Tok::True => ExpDesc::new(ExpKind::True),
            Tok::False => ExpDesc::new(ExpKind::False),
            Tok::Int(i) => ExpDesc::new(ExpKind::KInt(*i)),
            Tok::Float(f) => ExpDesc::new(ExpKind::KFlt(*f)),
            Tok::Str(s) => {
                let id = self.lua.heap.intern(s);
                ExpDesc::new(ExpKind::KStr(id))
            }
            Tok::Ellipsis => {
                if !self.fs().is_vararg {
                    return Err(self.error("cannot use '...' outside a vararg function"));
                }
                let line = self.tok_line;
                let pc = self.emit_abc(Op::Vararg, 0, 0, 0, line);
                ExpDesc::new(ExpKind::Vararg(pc as usize))
            }
            Tok::LBrace => return self.constructor(),
            Tok::Function => {
                let line = self.tok_line;
                self.advance()?;
                return self.body(false, line);
            }
            _ => return self.suffixed_exp(),
        };
        self.advance()?;
        Ok(e)
    }

    fn primary_exp(&mut self) -> Result<ExpDesc, SyntaxError> {
        match &self.tok {
            Tok::Name(_) => {
                let name = self.expect_name()?;
                self.single_var(&name)
            }
            Tok::LParen => {
                let line = self.tok_line;
                self.advance()?;
                let mut e = self.expr()?;
                self.expect_match(Tok::RParen, "(", line)?;
                // parentheses truncate to a single value
                self.discharge_vars(&mut e);
                Ok(e)
            }
            _ => Err(self.error("unexpected symbol")),
        }
    }

    pub(crate) fn suffixed_exp(&mut self) -> Result<ExpDesc, SyntaxError> {
        let mut e = self.primary_exp()?;
        loop {
            match &self.tok {
                Tok::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    let id = self.lua.heap.intern(name.as_bytes());
                    let mut key = ExpDesc::new(ExpKind::KStr(id));
                    e = self.indexed(&mut e, &mut key)?;
                }
                Tok::LBracket => {
                    self.advance()?;
                    let mut key = self.expr()?;
                    self.exp_to_val(&mut key)?;
                    self.expect(Tok::RBracket)?;
                    e = self.indexed(&mut e, &mut key)?;
                }
                Tok::Colon => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    self.method_call_base(&mut e, &name)?;
                    self.func_args(&mut e)?;
                }
                Tok::LParen | Tok::Str(_) | Tok::LBrace => {
                    self.exp_to_next_reg(&mut e)?;
                    self.func_args(&mut e)?;
                }
                _ => return Ok(e),
            }
        }
    }

    /// `obj:m` — SELF leaves the method at `base` and the receiver at
    /// `base + 1`.
    fn method_call_base(&mut self, e: &mut ExpDesc, name: &str) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        let id = self.lua.heap.intern(name.as_bytes());
        let mut key = ExpDesc::new(ExpKind::KStr(id));
        let ereg = self.exp_to_any_reg(e)?;
        self.free_exp(e);
        let base = self.fs().free_reg;
        self.fs_mut().reserve(2, line)?;
        let (k, c) = self.exp_to_rk(&mut key)?;
        self.emit_abck(Op::SelfGet, base as u32, ereg as u32, c, k, line);
        // a register-resident key was only needed for the SELF itself
        self.fs_mut().free_reg = base + 2;
        *e = ExpDesc::new(ExpKind::NonReloc(base));
        Ok(())
    }

    pub(crate) fn func_args(&mut self, f: &mut ExpDesc) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        let base = match f.kind {
            ExpKind::NonReloc(r) => r,
            _ => unreachable!("callee not materialized"),
        };
        let nparams: i32;
        match self.tok.clone() {
            Tok::LParen => {
                self.advance()?;
                if self.check(&Tok::RParen) {
                    self.advance()?;
                    nparams = (self.fs().free_reg - base - 1) as i32;
                } else {
                    let (mut last, _n) = self.exp_list()?;
                    if last.is_multiret() {
                        self.set_multret(&mut last);
                        self.expect_match(Tok::RParen, "(", line)?;
                        nparams = -1;
                    } else {
                        self.exp_to_next_reg(&mut last)?;
                        self.expect_match(Tok::RParen, "(", line)?;
                        nparams = (self.fs().free_reg - base - 1) as i32;
                    }
                }
            }
            Tok::Str(s) => {
                let id = self.lua.heap.intern(&s);
                let mut arg = ExpDesc::new(ExpKind::KStr(id));
                self.advance()?;
                self.exp_to_next_reg(&mut arg)?;
                nparams = (self.fs().free_reg - base - 1) as i32;
            }
            Tok::LBrace => {
                let mut arg = self.constructor()?;
                self.exp_to_next_reg(&mut arg)?;
                nparams = (self.fs().free_reg - base - 1) as i32;
            }
            _ => return Err(self.error("function arguments expected")),
        }
        let pc = self.emit_abc(Op::Call, base as u32, (nparams + 1) as u32, 2, line);
        *f = ExpDesc::new(ExpKind::Call(pc as usize));
        // the call consumes everything above its own register
        self.fs_mut().free_reg = base + 1;
        Ok(())
    }

    pub(crate) fn exp_list(&mut self) -> Result<(ExpDesc, usize), SyntaxError> {
        let mut n = 1usize;
        let mut e = self.expr()?;
        while self.test_next(&Tok::Comma)? {
            self.exp_to_next_reg(&mut e)?;
            e = self.expr()?;
            n += 1;
        }
        Ok((e, n))
    }

    // ---- variables ----

    pub(crate) fn single_var(&mut self, name: &str) -> Result<ExpDesc, SyntaxError> {
        let top = self.fstack.len() - 1;
        let e = self.single_var_aux(top, name, true)?;
        if !matches!(e.kind, ExpKind::Void) {
            return Ok(e);
        }
        // free name: `_ENV[name]`
        let mut env = self.single_var_aux(top, "_ENV", true)?;
        debug_assert!(
            !matches!(env.kind, ExpKind::Void),
            "_ENV is always reachable"
        );
        let id = self.lua.heap.intern(name.as_bytes());
        let mut key = ExpDesc::new(ExpKind::KStr(id));
        self.indexed(&mut env, &mut key)
    }

    fn single_var_aux(
        &mut self,
        level: usize,
        name: &str,
        base: bool,
    ) -> Result<ExpDesc, SyntaxError> {
        if let Some(r) = self.fstack[level].search_local(name) {
            if !base {
                self.fstack[level].mark_upval_block(r);
            }
            return Ok(ExpDesc::new(ExpKind::Local(r)));
        }
        if let Some(u) = self.fstack[level].search_upval(name) {
            return Ok(ExpDesc::new(ExpKind::Upval(u)));
        }
        if level == 0 {
            return Ok(ExpDesc::void());
        }
        let outer = self.single_var_aux(level - 1, name, false)?;
        let line = self.tok_line;
        let name_id = self.lua.heap.intern(name.as_bytes());
        match outer.kind {
            ExpKind::Void => Ok(ExpDesc::void()),
            ExpKind::Local(r) => {
                let u = self.fstack[level].add_upval(name, true, r, Some(name_id), line)?;
                Ok(ExpDesc::new(ExpKind::Upval(u)))
            }
            ExpKind::Upval(ou) => {
                let u = self.fstack[level].add_upval(name, false, ou, Some(name_id), line)?;
                Ok(ExpDesc::new(ExpKind::Upval(u)))
            }
            _ => unreachable!(),
        }
    }

    // ---- table constructors ----

    pub(crate) fn constructor(&mut self) -> Result<ExpDesc, SyntaxError> {
        let line = self.tok_line;
        let pc = self.emit_abc(Op::NewTable, 0, 0, 0, line);
        let mut t = ExpDesc::new(ExpKind::Reloc(pc as usize));
        self.exp_to_next_reg(&mut t)?;
        let treg = match t.kind {
            ExpKind::NonReloc(r) => r,
            _ => unreachable!(),
        };
        self.expect(Tok::LBrace)?;
        let mut pending = 0usize; // array items not yet flushed
        let mut stored = 0usize; // array items already flushed
        let mut nhash = 0usize;
        let mut last_multi: Option<ExpDesc> = None;
        loop {
            if self.check(&Tok::RBrace) {
                break;
            }
            if let Some(mut e) = last_multi.take() {
                // previous array item turned out not to be last
                self.exp_to_next_reg(&mut e)?;
                pending += 1;
                if pending >= limits::FIELDS_PER_FLUSH {
                    self.flush_list(treg, pending, stored, line)?;
                    stored += pending;
                    pending = 0;
                }
            }
            let named_field =
                matches!(&self.tok, Tok::Name(_)) && *self.peek_ahead()? == Tok::Assign;
            if named_field {
                let saved_free = self.fs().free_reg;
                let name = self.expect_name()?;
                self.advance()?; // '='
                let id = self.lua.heap.intern(name.as_bytes());
                let mut key = ExpDesc::new(ExpKind::KStr(id));
                let mut tt = ExpDesc::new(ExpKind::NonReloc(treg));
                let target = self.indexed(&mut tt, &mut key)?;
                let mut v = self.expr()?;
                self.store_var(&target, &mut v)?;
                self.fs_mut().free_reg = saved_free;
                nhash += 1;
            } else if self.check(&Tok::LBracket) {
                let saved_free = self.fs().free_reg;
                self.advance()?;
                let mut key = self.expr()?;
                self.exp_to_val(&mut key)?;
                self.expect(Tok::RBracket)?;
                self.expect(Tok::Assign)?;
                let mut tt = ExpDesc::new(ExpKind::NonReloc(treg));
                let target = self.indexed(&mut tt, &mut key)?;
                let mut v = self.expr()?;
                self.store_var(&target, &mut v)?;
                self.fs_mut().free_reg = saved_free;
                nhash += 1;
            } else {
                let e = self.expr()?;
                if e.is_multiret() {
                    last_multi = Some(e);
                } else {
                    let mut e = e;
                    self.exp_to_next_reg(&mut e)?;
                    pending += 1;
                    if pending >= limits::FIELDS_PER_FLUSH {
                        self.flush_list(treg, pending, stored, line)?;
                        stored += pending;
                        pending = 0;
                    }
                }
            }
            if !self.test_next(&Tok::Comma)? && !self.test_next(&Tok::Semi)? {
                break;
            }
        }
        self.expect_match(Tok::RBrace, "{", line)?;
        if let Some(mut e) = last_multi {
            // trailing multi-value expression: spread it
            self.set_multret(&mut e);
            self.emit_setlist(treg, 0, stored, line)?;
            self.fs_mut().free_reg = treg + 1;
        } else if pending > 0 {
            self.flush_list(treg, pending, stored, line)?;
        }
        // size hints
        let total_array = (stored + pending).min(op::MAX_B as usize);
        let nhash = nhash.min(op::MAX_C as usize);
        let code_pc = pc as usize;
        op::set_b(&mut self.fs_mut().code[code_pc], total_array as u32);
        op::set_c(&mut self.fs_mut().code[code_pc], nhash as u32);
        t.kind = ExpKind::NonReloc(treg);
        Ok(t)
    }

    fn flush_list(
        &mut self,
        treg: u8,
        count: usize,
        stored: usize,
        line: u32,
    ) -> Result<(), SyntaxError> {
        self.emit_setlist(treg, count, stored, line)?;
        self.fs_mut().free_reg = treg + 1;
        Ok(())
    }

    fn emit_setlist(
        &mut self,
        treg: u8,
        count: usize,
        stored: usize,
        line: u32,
    ) -> Result<(), SyntaxError> {
        if stored <= op::MAX_C as usize {
            self.emit_abck(Op::SetList, treg as u32, count as u32, stored as u32, false, line);
        } else {
            let main = stored % (op::MAX_C as usize + 1);
            let extra = stored / (op::MAX_C as usize + 1);
            self.emit_abck(Op::SetList, treg as u32, count as u32, main as u32, true, line);
            let ax = op::ax(Op::ExtraArg, extra as u32);
            self.fs_mut().emit(ax, line);
        }
        Ok(())
    }
}

fn unary_of(t: &Tok) -> Option<UnOp> {
    Some(match t {
        Tok::Not => UnOp::Not,
        Tok::Minus => UnOp::Minus,
        Tok::Hash => UnOp::Len,
        Tok::Tilde => UnOp::BNot,
        _ => return None,
    })
}

fn binary_of(t: &Tok) -> Option<BinOp> {
    Some(match t {
        Tok::Plus => BinOp::Add,
        Tok::Minus => BinOp::Sub,
        Tok::Star => BinOp::Mul,
        Tok::Slash => BinOp::Div,
        Tok::DSlash => BinOp::IDiv,
        Tok::Percent => BinOp::Mod,
        Tok::Caret => BinOp::Pow,
        Tok::Concat => BinOp::Concat,
        Tok::Eq => BinOp::Eq,
        Tok::Ne => BinOp::Ne,
        Tok::Lt => BinOp::Lt,
        Tok::Le => BinOp::Le,
        Tok::Gt => BinOp::Gt,
        Tok::Ge => BinOp::Ge,
        Tok::And => BinOp::And,
        Tok::Or => BinOp::Or,
        Tok::Amp => BinOp::BAnd,
        Tok::Pipe => BinOp::BOr,
        Tok::Tilde => BinOp::BXor,
        Tok::Shl => BinOp::Shl,
        Tok::Shr => BinOp::Shr,
        _ => return None,
    })
}
