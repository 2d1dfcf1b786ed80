// Compiled function bodies. A Proto is immutable once the code generator
// finishes it and is shared by every closure built from it.

use std::rc::Rc;

use crate::gc::StrId;
use crate::value::Value;

/// How a closure binds one upvalue at creation time.
#[derive(Debug, Clone, Copy)]
pub struct UpvalDesc {
    /// True: capture the enclosing frame's register `index`.
    /// False: share the enclosing closure's upvalue `index`.
    pub in_stack: bool,
    pub index: u8,
    /// Variable name, kept for error messages and tracebacks.
    pub name: Option<StrId>,
}

pub struct Proto {
    pub code: Vec<u32>,
    pub consts: Vec<Value>,
    pub protos: Vec<Rc<Proto>>,
    pub upvals: Vec<UpvalDesc>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack: u8,
    /// Chunk name, e.g. `@script.lua` or `=stdin`.
    pub source: StrId,
    /// Source line per instruction.
    pub lines: Vec<u32>,
    pub line_defined: u32,
}

impl Proto {
    pub fn line_at(&self, pc: usize) -> u32 {
        self.lines.get(pc).copied().unwrap_or(self.line_defined)
    }
}
