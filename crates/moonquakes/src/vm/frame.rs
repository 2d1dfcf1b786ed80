// Activation records. Only bytecode closures get a frame; native calls
// run directly on the Rust stack.

use std::rc::Rc;

use crate::gc::FnId;
use crate::value::{Proto, Value};

pub mod frame_flags {
    /// Errors unwinding past this frame are caught here (pcall/xpcall).
    pub const PROTECTED: u8 = 1 << 0;
    /// Frame was reused by a tail call; tracebacks show a marker.
    pub const TAIL: u8 = 1 << 1;
    /// xpcall frame: `handler` holds the message handler.
    pub const HAS_HANDLER: u8 = 1 << 2;
}

pub struct CallInfo {
    /// The closure value being executed (kept for GC and tracebacks).
    pub func: Value,
    pub fn_id: FnId,
    /// Cached prototype so instruction fetch never touches the pool.
    pub proto: Rc<Proto>,
    /// Absolute stack index of register 0.
    pub base: usize,
    pub pc: usize,
    /// Results the caller expects; -1 means all.
    pub nresults: i32,
    pub flags: u8,
    /// xpcall message handler, nil otherwise.
    pub handler: Value,
    /// Extra arguments captured by VARARG_PREP.
    pub varargs: Vec<Value>,
    /// Absolute stack indexes of to-be-closed slots, oldest first.
    pub tbc: Vec<usize>,
}

impl CallInfo {
    pub fn new(func: Value, fn_id: FnId, proto: Rc<Proto>, base: usize, nresults: i32) -> Self {
        CallInfo {
            func,
            fn_id,
            proto,
            base,
            pc: 0,
            nresults,
            flags: 0,
            handler: Value::Nil,
            varargs: Vec::new(),
            tbc: Vec::new(),
        }
    }

    #[inline(always)]
    pub fn is_protected(&self) -> bool {
        self.flags & frame_flags::PROTECTED != 0
    }

    #[inline(always)]
    pub fn is_tail(&self) -> bool {
        self.flags & frame_flags::TAIL != 0
    }
}
