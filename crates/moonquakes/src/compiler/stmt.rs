// Statement parsing. Each statement leaves the register file at the
// level of the active locals.

use crate::compiler::funcstate::{BlockCx, LabelDesc, LocalVar, PendingGoto, VarAttrib};
use crate::compiler::token::Tok;
use crate::compiler::{ExpDesc, ExpKind, Parser};
use crate::limits;
use crate::vm::opcode::{self as op, Op, NO_JUMP};
use crate::vm::SyntaxError;
use std::rc::Rc;

impl Parser<'_, '_> {
    pub(crate) fn statement_list(&mut self) -> Result<(), SyntaxError> {
        while !self.block_follow(true) {
            if self.check(&Tok::Return) {
                self.ret_stat()?;
                return Ok(()); // 'return' must be the last statement
            }
            self.statement()?;
            let live = self.fs().active.len() as u8;
            self.fs_mut().free_reg = live;
        }
        Ok(())
    }

    fn block_follow(&self, with_until: bool) -> bool {
        match self.tok {
            Tok::Else | Tok::Elseif | Tok::End | Tok::Eof => true,
            Tok::Until => with_until,
            _ => false,
        }
    }

    fn statement(&mut self) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth > 220 {
            self.depth -= 1;
            return Err(self.error("chunk has too many syntax levels"));
        }
        let r = self.statement_inner();
        self.depth -= 1;
        r
    }

    fn statement_inner(&mut self) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        match self.tok {
            Tok::Semi => {
                self.advance()?;
            }
            Tok::If => self.if_stat(line)?,
            Tok::While => self.while_stat(line)?,
            Tok::Do => {
                self.advance()?;
                self.enter_block(false);
                self.statement_list()?;
                self.leave_block()?;
                self.expect_match(Tok::End, "do", line)?;
            }
            Tok::For => self.for_stat(line)?,
            Tok::Repeat => self.repeat_stat(line)?,
            Tok::Function => self.func_stat(line)?,
            Tok::Local => {
                self.advance()?;
                if self.test_next(&Tok::Function)? {
                    self.local_func(line)?;
                } else {
                    self.local_stat()?;
                }
            }
            Tok::DColon => self.label_stat()?,
            Tok::Break => {
                self.advance()?;
                let pc = self.jump();
                let nactvar = self.fs().active.len();
                self.fs_mut().gotos.push(PendingGoto {
                    name: "break".to_string(),
                    pc,
                    line,
                    nactvar,
                });
            }
            Tok::Goto => {
                self.advance()?;
                let name = self.expect_name()?;
                self.goto_stat(name, line)?;
            }
            Tok::Return => unreachable!("handled in statement_list"),
            _ => self.expr_stat()?,
        }
        Ok(())
    }

    // ---- blocks ----

    pub(crate) fn enter_block(&mut self, is_loop: bool) {
        let fs = self.fs_mut();
        fs.blocks.push(BlockCx {
            first_local: fs.active.len(),
            first_label: fs.labels.len(),
            first_goto: fs.gotos.len(),
            is_loop,
            upval: false,
            has_tbc: false,
        });
    }

    pub(crate) fn leave_block(&mut self) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        let bl = match self.fs_mut().blocks.pop() {
            Some(bl) => bl,
            None => unreachable!("block underflow"),
        };
        // the exit label sits on the CLOSE so breaks run it too
        let exit_pc = self.fs().pc();
        if bl.upval || bl.has_tbc {
            self.emit_abc(Op::Close, bl.first_local as u32, 0, 0, line);
        }
        if bl.is_loop {
            self.fs_mut().last_target = exit_pc;
            let mut pending = Vec::new();
            let fs = self.fs_mut();
            let mut i = bl.first_goto;
            while i < fs.gotos.len() {
                if fs.gotos[i].name == "break" {
                    pending.push(fs.gotos.remove(i).pc);
                } else {
                    i += 1;
                }
            }
            for pc in pending {
                self.patch_list(pc, exit_pc)?;
            }
        }
        let fs = self.fs_mut();
        fs.labels.truncate(bl.first_label);
        fs.active.truncate(bl.first_local);
        fs.free_reg = bl.first_local as u8;
        // gotos born in this block now answer to the enclosing one
        for g in fs.gotos.iter_mut().skip(bl.first_goto) {
            if g.nactvar > bl.first_local {
                g.nactvar = bl.first_local;
            }
        }
        // propagate outward: enclosing exits (and break targets) must
        // still close captured or to-be-closed locals from inner scopes
        if bl.upval || bl.has_tbc {
            if let Some(parent) = fs.blocks.last_mut() {
                parent.upval = true;
            }
        }
        Ok(())
    }

    // ---- labels and gotos ----

    fn label_stat(&mut self) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        self.advance()?; // '::'
        let name = self.expect_name()?;
        self.expect(Tok::DColon)?;
        if self.fs().labels.iter().any(|l| l.name == name) {
            return Err(self.error_at(line, format!("label '{}' already defined", name)));
        }
        // skip no-op statements so a trailing label closes the block
        while self.check(&Tok::Semi) {
            self.advance()?;
        }
        let pc = self.here();
        let nactvar = self.fs().active.len();
        self.fs_mut().labels.push(LabelDesc {
            name: name.clone(),
            pc,
            nactvar,
        });
        // resolve forward gotos waiting on this label
        let mut matched = Vec::new();
        {
            let fs = self.fs_mut();
            let mut i = 0;
            while i < fs.gotos.len() {
                if fs.gotos[i].name == name {
                    let g = fs.gotos.remove(i);
                    matched.push(g);
                } else {
                    i += 1;
                }
            }
        }
        for g in matched {
            if g.nactvar < nactvar {
                return Err(self.error_at(
                    g.line,
                    format!("<goto {}> jumps into the scope of a local", name),
                ));
            }
            self.patch_list(g.pc, pc)?;
        }
        Ok(())
    }

    fn goto_stat(&mut self, name: String, line: u32) -> Result<(), SyntaxError> {
        // backward jump to a visible label?
        let found = self
            .fs()
            .labels
            .iter()
            .rev()
            .find(|l| l.name == name)
            .map(|l| (l.pc, l.nactvar));
        if let Some((pc, label_nactvar)) = found {
            // leaving scopes: close captured locals above the label level
            if self.fs().active.len() > label_nactvar {
                self.emit_abc(Op::Close, label_nactvar as u32, 0, 0, line);
            }
            let j = self.jump();
            self.patch_list(j, pc)?;
        } else {
            let pc = self.jump();
            let nactvar = self.fs().active.len();
            self.fs_mut().gotos.push(PendingGoto {
                name,
                pc,
                line,
                nactvar,
            });
        }
        Ok(())
    }

    // ---- control statements ----

    /// `cond`: parses an expression, leaving its false-list to patch.
    fn cond(&mut self) -> Result<i32, SyntaxError> {
        let mut v = self.expr()?;
        if matches!(v.kind, ExpKind::Nil) {
            v.kind = ExpKind::False; // 'falses' are all equal here
        }
        self.go_if_true(&mut v)?;
        Ok(v.f)
    }

    fn if_stat(&mut self, line: u32) -> Result<(), SyntaxError> {
        let mut escape = NO_JUMP;
        self.advance()?; // 'if'
        let mut flist = self.cond()?;
        self.expect(Tok::Then)?;
        self.enter_block(false);
        self.statement_list()?;
        self.leave_block()?;
        loop {
            if self.check(&Tok::Elseif) || self.check(&Tok::Else) {
                let j = self.jump();
                self.concat_jumps(&mut escape, j)?;
            }
            self.patch_to_here(flist)?;
            if self.test_next(&Tok::Elseif)? {
                flist = self.cond()?;
                self.expect(Tok::Then)?;
                self.enter_block(false);
                self.statement_list()?;
                self.leave_block()?;
                continue;
            }
            break;
        }
        if self.test_next(&Tok::Else)? {
            self.enter_block(false);
            self.statement_list()?;
            self.leave_block()?;
        }
        self.expect_match(Tok::End, "if", line)?;
        self.patch_to_here(escape)?;
        Ok(())
    }

    fn while_stat(&mut self, line: u32) -> Result<(), SyntaxError> {
        self.advance()?; // 'while'
        let top = self.here();
        let exit = self.cond()?;
        self.enter_block(true);
        self.expect(Tok::Do)?;
        self.enter_block(false);
        self.statement_list()?;
        self.leave_block()?;
        let back = self.jump();
        self.patch_list(back, top)?;
        self.expect_match(Tok::End, "while", line)?;
        self.leave_block()?; // loop block: breaks land here
        self.patch_to_here(exit)?;
        Ok(())
    }

    fn repeat_stat(&mut self, line: u32) -> Result<(), SyntaxError> {
        self.advance()?; // 'repeat'
        let top = self.here();
        self.enter_block(true);
        self.enter_block(false);
        self.statement_list()?;
        self.expect_match(Tok::Until, "repeat", line)?;
        // the condition still sees the body's locals
        let mut condexit = self.cond()?;
        let inner_upval = {
            let fs = self.fs();
            match fs.blocks.last() {
                Some(bl) => bl.upval || bl.has_tbc,
                None => false,
            }
        };
        if inner_upval {
            // repetition must close captured locals before looping
            let exit = self.jump();
            self.patch_to_here(condexit)?;
            let level = {
                let fs = self.fs();
                match fs.blocks.last() {
                    Some(bl) => bl.first_local,
                    None => 0,
                }
            };
            self.emit_abc(Op::Close, level as u32, 0, 0, self.tok_line);
            condexit = self.jump();
            self.patch_to_here(exit)?;
        }
        self.patch_list(condexit, top)?;
        self.leave_block()?; // scope of the body
        self.leave_block()?; // loop block: breaks land here
        Ok(())
    }

    fn for_stat(&mut self, line: u32) -> Result<(), SyntaxError> {
        self.advance()?; // 'for'
        let name = self.expect_name()?;
        match self.tok {
            Tok::Assign => self.for_num(name, line),
            Tok::Comma | Tok::In => self.for_list(name, line),
            _ => Err(self.error("'=' or 'in' expected")),
        }
    }

    fn for_num(&mut self, varname: String, line: u32) -> Result<(), SyntaxError> {
        let base = self.fs().free_reg;
        self.advance()?; // '='
        // init, limit, step
        let mut e = self.expr()?;
        self.exp_to_next_reg(&mut e)?;
        self.expect(Tok::Comma)?;
        let mut e = self.expr()?;
        self.exp_to_next_reg(&mut e)?;
        if self.test_next(&Tok::Comma)? {
            let mut e = self.expr()?;
            self.exp_to_next_reg(&mut e)?;
        } else {
            let step = self.fs().free_reg;
            self.fs_mut().reserve(1, line)?;
            self.emit_asbx(Op::LoadI, step as u32, 1, line);
        }
        // hidden control variables
        for n in ["(for state)", "(for state)", "(for state)"] {
            self.fs_mut().active.push(LocalVar {
                name: n.to_string(),
                attrib: VarAttrib::Regular,
            });
        }
        self.expect(Tok::Do)?;
        self.enter_block(true);
        let prep = self.fs().pc();
        self.emit_abx(Op::ForPrep, base as u32, 0, line);
        self.enter_block(false);
        // the user's loop variable
        self.fs_mut().reserve(1, line)?;
        self.fs_mut().active.push(LocalVar {
            name: varname,
            attrib: VarAttrib::Regular,
        });
        self.statement_list()?;
        self.leave_block()?;
        let floop = self.fs().pc();
        self.emit_abx(Op::ForLoop, base as u32, (floop - prep) as u32, line);
        op::set_bx(
            &mut self.fs_mut().code[prep as usize],
            (floop - prep - 1) as u32,
        );
        self.expect_match(Tok::End, "for", line)?;
        self.leave_block()?; // breaks land after FORLOOP
        // drop the three hidden locals
        let fs = self.fs_mut();
        fs.active.truncate(fs.active.len().saturating_sub(3));
        fs.free_reg = fs.active.len() as u8;
        Ok(())
    }

    fn for_list(&mut self, first_name: String, line: u32) -> Result<(), SyntaxError> {
        let base = self.fs().free_reg;
        let mut names = vec![first_name];
        while self.test_next(&Tok::Comma)? {
            names.push(self.expect_name()?);
        }
        self.expect(Tok::In)?;
        // iterator, state, control, closing value
        let (mut e, n) = self.exp_list()?;
        self.adjust_assign(4, n, &mut e)?;
        for nm in ["(for state)", "(for state)", "(for state)", "(for state)"] {
            self.fs_mut().active.push(LocalVar {
                name: nm.to_string(),
                attrib: VarAttrib::Regular,
            });
        }
        self.expect(Tok::Do)?;
        self.enter_block(true);
        if let Some(bl) = self.fs_mut().blocks.last_mut() {
            bl.has_tbc = true; // the closing slot is released at loop end
        }
        let prep = self.fs().pc();
        self.emit_abx(Op::TForPrep, base as u32, 0, line);
        self.enter_block(false);
        let nvars = names.len();
        self.fs_mut().reserve(nvars as u8, line)?;
        for nm in names {
            self.fs_mut().active.push(LocalVar {
                name: nm,
                attrib: VarAttrib::Regular,
            });
        }
        self.statement_list()?;
        self.leave_block()?;
        // prep jumps here, to the call at the bottom
        let l2 = self.fs().pc();
        op::set_bx(&mut self.fs_mut().code[prep as usize], (l2 - prep - 1) as u32);
        self.emit_abc(Op::TForCall, base as u32, 0, nvars as u32, line);
        let tfl = self.fs().pc();
        self.emit_abx(Op::TForLoop, base as u32 + 2, (tfl - prep) as u32, line);
        self.expect_match(Tok::End, "for", line)?;
        self.leave_block()?; // break label; CLOSE releases the closing slot
        let fs = self.fs_mut();
        fs.active.truncate(fs.active.len().saturating_sub(4));
        fs.free_reg = fs.active.len() as u8;
        Ok(())
    }

    // ---- declarations ----

    fn func_stat(&mut self, line: u32) -> Result<(), SyntaxError> {
        self.advance()?; // 'function'
        let mut name = self.expect_name()?;
        let mut target = self.single_var(&name)?;
        let mut is_method = false;
        loop {
            match self.tok {
                Tok::Dot => {
                    self.advance()?;
                    name = self.expect_name()?;
                    let id = self.lua.heap.intern(name.as_bytes());
                    let mut key = ExpDesc::new(ExpKind::KStr(id));
                    target = self.indexed(&mut target, &mut key)?;
                }
                Tok::Colon => {
                    self.advance()?;
                    name = self.expect_name()?;
                    let id = self.lua.heap.intern(name.as_bytes());
                    let mut key = ExpDesc::new(ExpKind::KStr(id));
                    target = self.indexed(&mut target, &mut key)?;
                    is_method = true;
                    break;
                }
                _ => break,
            }
        }
        self.check_assignable(&target, line)?;
        let mut body = self.body(is_method, line)?;
        self.store_var(&target, &mut body)?;
        Ok(())
    }

    fn local_func(&mut self, line: u32) -> Result<(), SyntaxError> {
        let name = self.expect_name()?;
        // the function sees itself: activate before the body
        self.fs_mut().active.push(LocalVar {
            name,
            attrib: VarAttrib::Regular,
        });
        let mut b = self.body(false, line)?;
        self.exp_to_next_reg(&mut b)?;
        Ok(())
    }

    fn local_stat(&mut self) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        let mut names: Vec<(String, VarAttrib)> = Vec::new();
        loop {
            let name = self.expect_name()?;
            let attrib = if self.test_next(&Tok::Lt)? {
                let a = self.expect_name()?;
                self.expect(Tok::Gt)?;
                match a.as_str() {
                    "const" => VarAttrib::Const,
                    "close" => VarAttrib::Close,
                    other => {
                        return Err(
                            self.error_at(line, format!("unknown attribute '{}'", other))
                        )
                    }
                }
            } else {
                VarAttrib::Regular
            };
            names.push((name, attrib));
            if !self.test_next(&Tok::Comma)? {
                break;
            }
        }
        let n_close = names
            .iter()
            .filter(|(_, a)| *a == VarAttrib::Close)
            .count();
        if n_close > 1 {
            return Err(self.error_at(
                line,
                "multiple to-be-closed variables in local list".to_string(),
            ));
        }
        let nvars = names.len();
        let (mut e, nexps) = if self.test_next(&Tok::Assign)? {
            self.exp_list()?
        } else {
            (ExpDesc::void(), 0)
        };
        self.adjust_assign(nvars, nexps, &mut e)?;
        let base = self.fs().active.len();
        for (i, (name, attrib)) in names.into_iter().enumerate() {
            let is_close = attrib == VarAttrib::Close;
            self.fs_mut().active.push(LocalVar { name, attrib });
            if is_close {
                let reg = (base + i) as u32;
                self.emit_abc(Op::Tbc, reg, 0, 0, line);
                if let Some(bl) = self.fs_mut().blocks.last_mut() {
                    bl.has_tbc = true;
                }
            }
        }
        Ok(())
    }

    // ---- assignment / call statements ----

    fn check_assignable(&self, e: &ExpDesc, line: u32) -> Result<(), SyntaxError> {
        match e.kind {
            ExpKind::Local(r) => {
                let lv = &self.fs().active[r as usize];
                if lv.attrib != VarAttrib::Regular {
                    return Err(self.error_at(
                        line,
                        format!("attempt to assign to const variable '{}'", lv.name),
                    ));
                }
                Ok(())
            }
            ExpKind::Upval(_)
            | ExpKind::IndexUp { .. }
            | ExpKind::IndexI { .. }
            | ExpKind::IndexStr { .. }
            | ExpKind::Indexed { .. } => Ok(()),
            _ => Err(self.error_at(line, "syntax error: cannot assign".to_string())),
        }
    }

    fn expr_stat(&mut self) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        let first = self.suffixed_exp()?;
        if self.check(&Tok::Assign) || self.check(&Tok::Comma) {
            let mut targets = vec![first];
            while self.test_next(&Tok::Comma)? {
                targets.push(self.suffixed_exp()?);
            }
            for t in &targets {
                self.check_assignable(t, line)?;
            }
            self.expect(Tok::Assign)?;
            let (mut e, nexps) = self.exp_list()?;
            let nvars = targets.len();
            if nvars == 1 && nexps == 1 {
                // common single assignment: feed the value straight in
                self.store_var(&targets[0], &mut e)?;
                return Ok(());
            }
            self.adjust_assign(nvars, nexps, &mut e)?;
            // values sit in the top `nvars` registers; store backwards
            let value_base = self.fs().free_reg - nvars as u8;
            for (i, target) in targets.iter().enumerate().rev() {
                let mut v = ExpDesc::new(ExpKind::NonReloc(value_base + i as u8));
                self.store_var(target, &mut v)?;
            }
            Ok(())
        } else {
            // statement-level call: discard results
            match first.kind {
                ExpKind::Call(pc) => {
                    op::set_c(&mut self.fs_mut().code[pc], 1);
                    Ok(())
                }
                _ => Err(self.error("syntax error")),
            }
        }
    }

    pub(crate) fn adjust_assign(
        &mut self,
        nvars: usize,
        nexps: usize,
        e: &mut ExpDesc,
    ) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        let needed = nvars as i32 - nexps as i32;
        if e.is_multiret() {
            let extra = (needed + 1).max(0);
            self.set_returns(e, extra);
        } else {
            if !matches!(e.kind, ExpKind::Void) {
                self.exp_to_next_reg(e)?;
            }
            if needed > 0 {
                let reg = self.fs().free_reg;
                self.emit_abc(Op::LoadNil, reg as u32, needed as u32 - 1, 0, line);
            }
        }
        if needed > 0 {
            self.fs_mut().reserve(needed as u8, line)?;
        } else {
            let fs = self.fs_mut();
            fs.free_reg = (fs.free_reg as i32 + needed) as u8;
        }
        Ok(())
    }

    // ---- return ----

    fn ret_stat(&mut self) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        self.advance()?; // 'return'
        let first = self.fs().active.len() as u32;
        if self.block_follow(true) || self.check(&Tok::Semi) {
            self.emit_abc(Op::Return0, first, 1, 0, line);
        } else {
            let (mut e, nexps) = self.exp_list()?;
            if e.is_multiret() {
                self.set_multret(&mut e);
                if nexps == 1 && !self.in_tbc_scope() {
                    if let ExpKind::Call(pc) = e.kind {
                        // a lone call in return position becomes a tail call
                        let i = &mut self.fs_mut().code[pc];
                        *i = (*i & !0x7Fu32) | Op::TailCall as u32;
                    }
                }
                self.emit_abc(Op::Return, first, 0, 0, line);
            } else if nexps == 1 {
                let r = self.exp_to_any_reg(&mut e)?;
                self.emit_abc(Op::Return1, r as u32, 2, 0, line);
            } else {
                self.exp_to_next_reg(&mut e)?;
                self.emit_abc(Op::Return, first, nexps as u32 + 1, 0, line);
            }
        }
        self.test_next(&Tok::Semi)?;
        Ok(())
    }

    fn in_tbc_scope(&self) -> bool {
        self.fs().blocks.iter().any(|bl| bl.has_tbc)
    }

    // ---- function bodies ----

    pub(crate) fn body(&mut self, is_method: bool, line: u32) -> Result<ExpDesc, SyntaxError> {
        self.open_func(line);
        self.enter_block(false);
        self.expect(Tok::LParen)?;
        let mut nparams: u8 = 0;
        if is_method {
            self.fs_mut().active.push(LocalVar {
                name: "self".to_string(),
                attrib: VarAttrib::Regular,
            });
            nparams += 1;
        }
        if !self.check(&Tok::RParen) {
            loop {
                match self.tok.clone() {
                    Tok::Name(_) => {
                        let name = self.expect_name()?;
                        if nparams as usize >= limits::MAX_LOCALS {
                            return Err(self.error("too many parameters"));
                        }
                        self.fs_mut().active.push(LocalVar {
                            name,
                            attrib: VarAttrib::Regular,
                        });
                        nparams += 1;
                    }
                    Tok::Ellipsis => {
                        self.advance()?;
                        self.fs_mut().is_vararg = true;
                        break;
                    }
                    _ => return Err(self.error("<name> expected")),
                }
                if !self.test_next(&Tok::Comma)? {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;
        self.fs_mut().num_params = nparams;
        self.fs_mut().free_reg = nparams;
        if self.fs().max_stack < nparams {
            self.fs_mut().max_stack = nparams;
        }
        if self.fs().is_vararg {
            self.emit_abc(Op::VarargPrep, nparams as u32, 0, 0, line);
        }
        self.statement_list()?;
        self.expect_match(Tok::End, "function", line)?;
        self.leave_block()?;
        let proto = self.close_func(nparams)?;
        // register in the enclosing function and emit CLOSURE
        let idx = {
            let fs = self.fs_mut();
            fs.protos.push(Rc::new(proto));
            fs.protos.len() - 1
        };
        let pc = self.emit_abx(Op::Closure, 0, idx as u32, line);
        Ok(ExpDesc::new(ExpKind::Reloc(pc as usize)))
    }
}
