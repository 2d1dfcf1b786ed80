// Per-function emission state: code under construction, constants,
// scopes, labels and register bookkeeping.

use std::collections::HashMap;
use std::rc::Rc;

use crate::gc::StrId;
use crate::limits;
use crate::value::{Proto, UpvalDesc, Value};
use crate::vm::SyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarAttrib {
    Regular,
    Const,
    Close,
}

pub struct LocalVar {
    pub name: String,
    pub attrib: VarAttrib,
}

pub struct BlockCx {
    /// Number of active locals outside this block.
    pub first_local: usize,
    pub first_label: usize,
    pub first_goto: usize,
    pub is_loop: bool,
    /// A local in this block was captured as an upvalue.
    pub upval: bool,
    /// A to-be-closed local lives in this block.
    pub has_tbc: bool,
}

pub struct PendingGoto {
    pub name: String,
    /// pc of the JMP to patch.
    pub pc: i32,
    pub line: u32,
    pub nactvar: usize,
}

pub struct LabelDesc {
    pub name: String,
    pub pc: i32,
    pub nactvar: usize,
}

#[derive(PartialEq, Eq, Hash)]
pub enum ConstKey {
    Nil,
    True,
    False,
    Int(i64),
    Flt(u64),
    Str(StrId),
}

pub struct FuncState {
    pub code: Vec<u32>,
    pub lines: Vec<u32>,
    pub consts: Vec<Value>,
    pub const_map: HashMap<ConstKey, usize>,
    pub protos: Vec<Rc<Proto>>,
    pub upvals: Vec<UpvalDesc>,
    pub upval_names: Vec<String>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack: u8,
    pub free_reg: u8,
    pub active: Vec<LocalVar>,
    pub blocks: Vec<BlockCx>,
    pub gotos: Vec<PendingGoto>,
    pub labels: Vec<LabelDesc>,
    pub line_defined: u32,
    /// pc considered a jump target; controls line bookkeeping of tests.
    pub last_target: i32,
    pub source: StrId,
}

impl FuncState {
    pub fn new(source: StrId, line_defined: u32) -> Self {
        FuncState {
            code: Vec::new(),
            lines: Vec::new(),
            consts: Vec::new(),
            const_map: HashMap::new(),
            protos: Vec::new(),
            upvals: Vec::new(),
            upval_names: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack: 2,
            free_reg: 0,
            active: Vec::new(),
            blocks: Vec::new(),
            gotos: Vec::new(),
            labels: Vec::new(),
            line_defined,
            last_target: -1,
            source,
        }
    }

    #[inline]
    pub fn pc(&self) -> i32 {
        self.code.len() as i32
    }

    pub fn emit(&mut self, i: u32, line: u32) -> i32 {
        self.code.push(i);
        self.lines.push(line);
        self.pc() - 1
    }

    /// Reserves `n` registers, tracking the frame high-water mark.
    pub fn reserve(&mut self, n: u8, line: u32) -> Result<(), SyntaxError> {
        let new_top = self.free_reg as usize + n as usize;
        if new_top > limits::MAX_REGS {
            return Err(SyntaxError {
                line,
                message: "function or expression needs too many registers".to_string(),
            });
        }
        self.free_reg = new_top as u8;
        if new_top as u8 > self.max_stack {
            self.max_stack = new_top as u8;
        }
        Ok(())
    }

    /// Frees one register if it is a temporary (above the locals).
    pub fn free_reg_if_temp(&mut self, r: u8) {
        if (r as usize) >= self.active.len() && self.free_reg > 0 {
            self.free_reg -= 1;
            debug_assert_eq!(self.free_reg, r, "register free out of order");
        }
    }

    pub fn free_two(&mut self, r1: u8, r2: u8) {
        if r1 > r2 {
            self.free_reg_if_temp(r1);
            self.free_reg_if_temp(r2);
        } else {
            self.free_reg_if_temp(r2);
            self.free_reg_if_temp(r1);
        }
    }

    /// Adds a constant, deduplicating by value.
    pub fn add_const(&mut self, key: ConstKey, v: Value) -> usize {
        if let Some(&idx) = self.const_map.get(&key) {
            return idx;
        }
        let idx = self.consts.len();
        self.consts.push(v);
        self.const_map.insert(key, idx);
        idx
    }

    /// Resolves a name among the active locals, innermost first.
    pub fn search_local(&self, name: &str) -> Option<u8> {
        for (i, lv) in self.active.iter().enumerate().rev() {
            if lv.name == name {
                return Some(i as u8);
            }
        }
        None
    }

    pub fn search_upval(&self, name: &str) -> Option<u8> {
        self.upval_names
            .iter()
            .position(|n| n == name)
            .map(|i| i as u8)
    }

    pub fn add_upval(
        &mut self,
        name: &str,
        in_stack: bool,
        index: u8,
        name_id: Option<StrId>,
        line: u32,
    ) -> Result<u8, SyntaxError> {
        if self.upvals.len() >= limits::MAX_UPVALS {
            return Err(SyntaxError {
                line,
                message: "too many upvalues".to_string(),
            });
        }
        self.upvals.push(UpvalDesc {
            in_stack,
            index,
            name: name_id,
        });
        self.upval_names.push(name.to_string());
        Ok((self.upvals.len() - 1) as u8)
    }

    /// Marks the innermost block containing register `level` as having a
    /// captured local, so the block close emits a CLOSE.
    pub fn mark_upval_block(&mut self, level: u8) {
        for bl in self.blocks.iter_mut().rev() {
            if bl.first_local <= level as usize {
                bl.upval = true;
                return;
            }
        }
    }

    pub fn into_proto(self, num_params: u8) -> Proto {
        Proto {
            code: self.code,
            consts: self.consts,
            protos: self.protos,
            upvals: self.upvals,
            num_params,
            is_vararg: self.is_vararg,
            max_stack: self.max_stack.max(2),
            source: self.source,
            lines: self.lines,
            line_defined: self.line_defined,
        }
    }
}
