// Single-pass compiler: the statement parser drives the code generator
// directly; no AST is built.

mod code;
mod expdesc;
mod expr;
mod funcstate;
mod lexer;
mod stmt;
mod token;

pub(crate) use expdesc::{BinOp, ExpDesc, ExpKind, UnOp, UNARY_PRIORITY};
pub(crate) use funcstate::FuncState;

use crate::gc::StrId;
use crate::value::Proto;
use crate::vm::opcode::{self as op, Op};
use crate::vm::{Lua, SyntaxError};
use lexer::Lexer;
use token::Tok;

/// Compiles one chunk. The chunk is compiled as a vararg function with
/// `_ENV` as its sole upvalue.
pub fn compile(lua: &mut Lua, source: &[u8], chunk_name: &str) -> Result<Proto, SyntaxError> {
    let source_id = lua.heap.intern(chunk_name.as_bytes());
    let mut p = Parser::new(lua, source, source_id)?;
    p.main_chunk()
}

pub(crate) struct Parser<'a, 's> {
    pub(crate) lua: &'a mut Lua,
    lex: Lexer<'s>,
    pub(crate) tok: Tok,
    pub(crate) tok_line: u32,
    ahead: Option<(Tok, u32)>,
    pub(crate) fstack: Vec<FuncState>,
    /// Expression/statement nesting depth, bounding parser recursion.
    pub(crate) depth: u32,
    source: StrId,
}

impl<'a, 's> Parser<'a, 's> {
    fn new(lua: &'a mut Lua, source: &'s [u8], source_id: StrId) -> Result<Self, SyntaxError> {
        let mut lex = Lexer::new(source);
        let (tok, tok_line) = lex.next_token()?;
        Ok(Parser {
            lua,
            lex,
            tok,
            tok_line,
            ahead: None,
            fstack: Vec::new(),
            depth: 0,
            source: source_id,
        })
    }

    // ---- function-state stack ----

    #[inline]
    pub(crate) fn fs(&self) -> &FuncState {
        match self.fstack.last() {
            Some(fs) => fs,
            None => unreachable!("no function under compilation"),
        }
    }

    #[inline]
    pub(crate) fn fs_mut(&mut self) -> &mut FuncState {
        match self.fstack.last_mut() {
            Some(fs) => fs,
            None => unreachable!("no function under compilation"),
        }
    }

    pub(crate) fn open_func(&mut self, line_defined: u32) {
        let fs = FuncState::new(self.source, line_defined);
        self.fstack.push(fs);
    }

    pub(crate) fn close_func(&mut self, num_params: u8) -> Result<Proto, SyntaxError> {
        self.emit_final_return()?;
        let fs = match self.fstack.pop() {
            Some(fs) => fs,
            None => unreachable!("close without open"),
        };
        if let Some(g) = fs.gotos.first() {
            let message = if g.name == "break" {
                "break outside a loop".to_string()
            } else {
                format!("no visible label '{}' for goto", g.name)
            };
            return Err(SyntaxError {
                line: g.line,
                message,
            });
        }
        Ok(fs.into_proto(num_params))
    }

    fn main_chunk(&mut self) -> Result<Proto, SyntaxError> {
        self.open_func(0);
        self.fs_mut().is_vararg = true;
        // the chunk's `_ENV`
        let env = self.lua.heap.intern(b"_ENV");
        self.fs_mut()
            .add_upval("_ENV", false, 0, Some(env), 0)?;
        let line = self.tok_line;
        self.emit_abc(Op::VarargPrep, 0, 0, 0, line);
        self.enter_block(false);
        self.statement_list()?;
        self.expect(Tok::Eof)?;
        self.leave_block()?;
        self.close_func(0)
    }

    // ---- token plumbing ----

    pub(crate) fn advance(&mut self) -> Result<(), SyntaxError> {
        let (tok, line) = match self.ahead.take() {
            Some(pair) => pair,
            None => self.lex.next_token()?,
        };
        self.tok = tok;
        self.tok_line = line;
        Ok(())
    }

    pub(crate) fn peek_ahead(&mut self) -> Result<&Tok, SyntaxError> {
        if self.ahead.is_none() {
            self.ahead = Some(self.lex.next_token()?);
        }
        match &self.ahead {
            Some((t, _)) => Ok(t),
            None => unreachable!(),
        }
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            line: self.tok_line,
            message: format!("{} near '{}'", message.into(), self.tok.describe()),
        }
    }

    pub(crate) fn error_at(&self, line: u32, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn check(&self, tok: &Tok) -> bool {
        &self.tok == tok
    }

    /// Consumes the token if it matches.
    pub(crate) fn test_next(&mut self, tok: &Tok) -> Result<bool, SyntaxError> {
        if self.check(tok) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn expect(&mut self, tok: Tok) -> Result<(), SyntaxError> {
        if self.tok == tok {
            if self.tok != Tok::Eof {
                self.advance()?;
            }
            Ok(())
        } else {
            Err(self.error(format!("'{}' expected", tok.describe())))
        }
    }

    /// `end`-style closers carry the line of the opener in the message.
    pub(crate) fn expect_match(
        &mut self,
        tok: Tok,
        opener: &str,
        opener_line: u32,
    ) -> Result<(), SyntaxError> {
        if self.tok == tok {
            self.advance()?;
            Ok(())
        } else if opener_line == self.tok_line {
            Err(self.error(format!("'{}' expected", tok.describe())))
        } else {
            Err(self.error(format!(
                "'{}' expected (to close '{}' at line {})",
                tok.describe(),
                opener,
                opener_line
            )))
        }
    }

    pub(crate) fn expect_name(&mut self) -> Result<String, SyntaxError> {
        match std::mem::replace(&mut self.tok, Tok::Eof) {
            Tok::Name(n) => {
                self.advance()?;
                Ok(n)
            }
            other => {
                self.tok = other;
                Err(self.error("<name> expected"))
            }
        }
    }

    // ---- small shared emitters ----

    pub(crate) fn emit_abc(&mut self, o: Op, a: u32, b: u32, c: u32, line: u32) -> i32 {
        self.fs_mut().emit(op::abc(o, a, b, c), line)
    }

    pub(crate) fn emit_abck(
        &mut self,
        o: Op,
        a: u32,
        b: u32,
        c: u32,
        k: bool,
        line: u32,
    ) -> i32 {
        self.fs_mut().emit(op::abck(o, a, b, c, k), line)
    }

    pub(crate) fn emit_abx(&mut self, o: Op, a: u32, bx: u32, line: u32) -> i32 {
        self.fs_mut().emit(op::abx(o, a, bx), line)
    }

    pub(crate) fn emit_asbx(&mut self, o: Op, a: u32, sbx: i32, line: u32) -> i32 {
        self.fs_mut().emit(op::asbx(o, a, sbx), line)
    }

    fn emit_final_return(&mut self) -> Result<(), SyntaxError> {
        let line = self.tok_line;
        let first = self.fs().active.len() as u32;
        self.emit_abc(Op::Return0, first, 1, 0, line);
        Ok(())
    }
}
