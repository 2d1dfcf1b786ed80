// The runtime context: owns the heap, the shared tables, the thread
// registry and the interned metamethod keys. Everything else receives a
// `&mut Lua`.

pub(crate) mod arith;
pub(crate) mod dump;
mod error;
mod exec;
mod frame;
pub mod opcode;
mod thread;

pub use arith::ArithOp;
pub use dump::{dump_proto, undump_proto};
pub use error::{Fault, LuaResult, MoonError, Status, SyntaxError};
pub use frame::{CallInfo, frame_flags};
pub use thread::{LuaThread, ThreadStatus};

use std::rc::Rc;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::gc::{
    FnId, FunctionBody, Heap, StrId, TableId, ThreadId, UpvalCell, UpvalId,
};
use crate::limits;
use crate::value::{
    float_to_display, int_to_display, Mm, Proto, TableKey, Value, MM_COUNT,
    normalize_float_key,
};

pub struct Lua {
    pub(crate) heap: Heap,
    pub(crate) globals: TableId,
    pub(crate) registry: TableId,
    /// Metamethod names, interned once so hot paths compare ids.
    pub(crate) mm_keys: [StrId; MM_COUNT],
    pub(crate) main_thread: ThreadId,
    pub(crate) current: ThreadId,
    /// Error object in flight while a `Fault::Error` unwinds.
    pub(crate) fault: Value,
    pub(crate) fault_status: Status,
    /// Traceback captured where the error was raised.
    pub(crate) saved_traceback: Option<String>,
    /// Shared metatable of all strings (`__index` = string library).
    pub(crate) string_meta: Option<TableId>,
    /// The native closure currently executing, for upvalue access.
    pub(crate) native_self: Value,
    pub(crate) native_depth: u32,
    /// Values pinned by natives across allocations.
    pub(crate) scratch: Vec<Value>,
    /// Objects awaiting their `__gc` call.
    pub(crate) finalize_queue: Vec<Value>,
    pub(crate) rng: SmallRng,
    pub(crate) warn_on: bool,
    pub(crate) warn_buf: String,
    pub(crate) start_time: Instant,
}

impl Lua {
    pub fn new() -> Lua {
        let mut heap = Heap::new();
        let mut mm_keys = [StrId(0); MM_COUNT];
        for mm in Mm::ALL {
            mm_keys[mm as usize] = heap.intern(mm.key().as_bytes());
        }
        let globals = heap.new_table(0, 32);
        let registry = heap.new_table(0, 8);
        let main_thread = heap.new_thread(LuaThread::new());
        let mut lua = Lua {
            heap,
            globals,
            registry,
            mm_keys,
            main_thread,
            current: main_thread,
            fault: Value::Nil,
            fault_status: Status::Ok,
            saved_traceback: None,
            string_meta: None,
            native_self: Value::Nil,
            native_depth: 0,
            scratch: Vec::new(),
            finalize_queue: Vec::new(),
            rng: SmallRng::seed_from_u64(0x2a_5eed),
            warn_on: false,
            warn_buf: String::new(),
            start_time: Instant::now(),
        };
        lua.heap.thread_mut(main_thread).status = ThreadStatus::Running;
        let g = Value::Table(lua.globals);
        lua.set_global("_G", g);
        lua
    }

    /// Installs the standard libraries into the globals table.
    pub fn open_libs(&mut self) {
        crate::stdlib::open_all(self);
    }

    // ---- strings ----

    pub fn new_string(&mut self, s: &str) -> Value {
        Value::Str(self.heap.intern(s.as_bytes()))
    }

    pub fn new_string_bytes(&mut self, b: &[u8]) -> Value {
        Value::Str(self.heap.intern(b))
    }

    pub fn str_text(&self, id: StrId) -> String {
        self.heap.str(id).to_str_lossy().into_owned()
    }

    // ---- errors ----

    /// Raises an arbitrary error object.
    pub(crate) fn throw(&mut self, v: Value) -> Fault {
        self.fault = v;
        self.fault_status = Status::ErrRun;
        Fault::Error
    }

    /// Raises a runtime error string, prefixed with the current source
    /// position when a frame is live.
    pub(crate) fn rt_error(&mut self, msg: impl Into<String>) -> Fault {
        let text = format!("{}{}", self.where_prefix(), msg.into());
        let v = self.new_string(&text);
        self.throw(v)
    }

    pub(crate) fn take_fault(&mut self) -> Value {
        std::mem::replace(&mut self.fault, Value::Nil)
    }

    /// "src:line: " of the innermost live frame.
    pub(crate) fn where_prefix(&self) -> String {
        let th = self.heap.thread(self.current);
        match th.frames.last() {
            Some(ci) => {
                let line = ci.proto.line_at(ci.pc.saturating_sub(1));
                format!("{}:{}: ", self.chunk_name(ci.proto.source), line)
            }
            None => String::new(),
        }
    }

    /// Chunk display name: strips the `@`/`=` prefix convention.
    pub(crate) fn chunk_name(&self, source: StrId) -> String {
        let text = self.str_text(source);
        match text.as_bytes().first() {
            Some(b'@') | Some(b'=') => text[1..].to_string(),
            _ => format!("[string \"{}\"]", text.lines().next().unwrap_or("")),
        }
    }

    pub(crate) fn type_error(&mut self, action: &str, v: Value) -> Fault {
        self.rt_error(format!("attempt to {} a {} value", action, v.type_name()))
    }

    // ---- metatables ----

    pub fn metatable_of(&self, v: Value) -> Option<TableId> {
        match v {
            Value::Table(id) => self.heap.table(id).metatable,
            Value::Userdata(id) => self.heap.userdata(id).metatable,
            Value::Str(_) => self.string_meta,
            _ => None,
        }
    }

    /// Raw metamethod lookup; nil when absent.
    pub(crate) fn metamethod(&self, v: Value, mm: Mm) -> Value {
        match self.metatable_of(v) {
            Some(mt) => self.table_mm(mt, mm),
            None => Value::Nil,
        }
    }

    /// Raw fetch of `mt[mm]` by interned key id.
    pub(crate) fn table_mm(&self, mt: TableId, mm: Mm) -> Value {
        let key = self.mm_keys[mm as usize];
        let t = self.heap.table(mt);
        let keyed = TableKey::Str {
            id: key,
            hash: self.heap.str(key).hash,
            bytes: self.heap.str(key).bytes.clone(),
        };
        t.get_key(&keyed)
    }

    // ---- raw table access ----

    /// Normalizes a Lua value into a hashable table key. `None` for nil
    /// and NaN, which cannot key a table.
    pub(crate) fn table_key(&self, k: Value) -> Option<TableKey> {
        match k {
            Value::Nil => None,
            Value::Boolean(b) => Some(TableKey::Bool(b)),
            Value::Integer(i) => Some(TableKey::Int(i)),
            Value::Float(f) => normalize_float_key(f),
            Value::Str(id) => {
                let s = self.heap.str(id);
                Some(TableKey::Str {
                    id,
                    hash: s.hash,
                    bytes: s.bytes.clone(),
                })
            }
            other => Some(TableKey::Obj(other)),
        }
    }

    pub fn raw_get(&self, t: TableId, k: Value) -> Value {
        match self.table_key(k) {
            Some(key) => self.heap.table(t).get_key(&key),
            None => Value::Nil,
        }
    }

    pub fn raw_set(&mut self, t: TableId, k: Value, v: Value) -> LuaResult<()> {
        let key = match self.table_key(k) {
            Some(key) => key,
            None => {
                let what = if k.is_nil() { "nil" } else { "NaN" };
                return Err(self.rt_error(format!("table index is {}", what)));
            }
        };
        self.heap.table_mut(t).set_key(key, v);
        Ok(())
    }

    /// Convenience for integer keys.
    pub fn raw_seti(&mut self, t: TableId, i: i64, v: Value) {
        self.heap.table_mut(t).set_int(i, v);
    }

    pub fn raw_geti(&self, t: TableId, i: i64) -> Value {
        self.heap.table(t).get_int(i)
    }

    // ---- indexing with metamethods ----

    pub(crate) fn index_value(&mut self, obj: Value, key: Value) -> LuaResult<Value> {
        let mut cur = obj;
        for _ in 0..limits::MAX_TAG_LOOP {
            let mm = match cur {
                Value::Table(tid) => {
                    let key_n = self.table_key(key);
                    if let Some(k) = key_n {
                        let v = self.heap.table(tid).get_key(&k);
                        if !v.is_nil() {
                            return Ok(v);
                        }
                    }
                    match self.heap.table(tid).metatable {
                        None => return Ok(Value::Nil),
                        Some(mt) => {
                            let h = self.table_mm(mt, Mm::Index);
                            if h.is_nil() {
                                return Ok(Value::Nil);
                            }
                            h
                        }
                    }
                }
                other => {
                    let h = self.metamethod(other, Mm::Index);
                    if h.is_nil() {
                        return Err(self.index_error(other, key));
                    }
                    h
                }
            };
            if mm.is_function() {
                return self.call_single(mm, &[cur, key]);
            }
            cur = mm;
        }
        Err(self.rt_error("'__index' chain too long; possible loop"))
    }

    fn index_error(&mut self, obj: Value, key: Value) -> Fault {
        let hint = if let Value::Str(id) = key {
            format!(" (field '{}')", self.str_text(id))
        } else {
            String::new()
        };
        self.rt_error(format!(
            "attempt to index a {} value{}",
            obj.type_name(),
            hint
        ))
    }

    pub(crate) fn setindex_value(&mut self, obj: Value, key: Value, val: Value) -> LuaResult<()> {
        let mut cur = obj;
        for _ in 0..limits::MAX_TAG_LOOP {
            let mm = match cur {
                Value::Table(tid) => {
                    let existing = self.raw_get(tid, key);
                    if !existing.is_nil() {
                        return self.raw_set(tid, key, val);
                    }
                    match self.heap.table(tid).metatable {
                        None => return self.raw_set(tid, key, val),
                        Some(mt) => {
                            let h = self.table_mm(mt, Mm::NewIndex);
                            if h.is_nil() {
                                return self.raw_set(tid, key, val);
                            }
                            h
                        }
                    }
                }
                other => {
                    let h = self.metamethod(other, Mm::NewIndex);
                    if h.is_nil() {
                        return Err(self.index_error(other, key));
                    }
                    h
                }
            };
            if mm.is_function() {
                self.call_value(mm, &[cur, key, val], 0)?;
                return Ok(());
            }
            cur = mm;
        }
        Err(self.rt_error("'__newindex' chain too long; possible loop"))
    }

    // ---- equality and ordering ----

    /// Raw (metamethod-free) equality.
    pub fn raw_equals(&self, a: Value, b: Value) -> bool {
        match a.raw_eq_shallow(b) {
            Some(r) => r,
            None => match (a, b) {
                (Value::Str(x), Value::Str(y)) => self.heap.str_eq(x, y),
                _ => false,
            },
        }
    }

    /// Full `==` including `__eq` on table/table and userdata/userdata.
    pub(crate) fn values_equal(&mut self, a: Value, b: Value) -> LuaResult<bool> {
        if self.raw_equals(a, b) {
            return Ok(true);
        }
        let comparable = matches!(
            (a, b),
            (Value::Table(_), Value::Table(_)) | (Value::Userdata(_), Value::Userdata(_))
        );
        if !comparable {
            return Ok(false);
        }
        let mut mm = self.metamethod(a, Mm::Eq);
        if mm.is_nil() {
            mm = self.metamethod(b, Mm::Eq);
        }
        if mm.is_nil() {
            return Ok(false);
        }
        let r = self.call_single(mm, &[a, b])?;
        Ok(r.is_truthy())
    }

    // ---- display ----

    /// tostring without metamethods.
    pub(crate) fn raw_display(&self, v: Value) -> String {
        match v {
            Value::Nil => "nil".to_string(),
            Value::Boolean(true) => "true".to_string(),
            Value::Boolean(false) => "false".to_string(),
            Value::Integer(i) => int_to_display(i),
            Value::Float(f) => float_to_display(f),
            Value::Str(id) => self.str_text(id),
            Value::Table(id) => format!("table: 0x{:08x}", id.0),
            Value::Function(id) => format!("function: 0x{:08x}", id.0),
            Value::Userdata(id) => format!("userdata: 0x{:08x}", id.0),
            Value::Thread(id) => format!("thread: 0x{:08x}", id.0),
        }
    }

    /// tostring with `__tostring`/`__name` honored.
    pub(crate) fn display_value(&mut self, v: Value) -> LuaResult<String> {
        let mm = self.metamethod(v, Mm::ToString);
        if !mm.is_nil() {
            let r = self.call_single(mm, &[v])?;
            return match r {
                Value::Str(id) => Ok(self.str_text(id)),
                Value::Integer(i) => Ok(int_to_display(i)),
                Value::Float(f) => Ok(float_to_display(f)),
                _ => Err(self.rt_error("'__tostring' must return a string")),
            };
        }
        if let Some(mt) = self.metatable_of(v) {
            let name = self.table_mm(mt, Mm::Name);
            if let Value::Str(id) = name {
                return Ok(format!("{}: 0x{:08x}", self.str_text(id), heap_id_of(v)));
            }
        }
        Ok(self.raw_display(v))
    }

    // ---- numeric coercion (arith on strings) ----

    /// A number, coercing numeric strings the way arithmetic does.
    pub(crate) fn coerce_number(&self, v: Value) -> Option<Value> {
        match v {
            Value::Integer(_) | Value::Float(_) => Some(v),
            Value::Str(id) => {
                let text = self.heap.str(id);
                let text = std::str::from_utf8(text.as_bytes()).ok()?;
                match crate::value::parse_number(text)? {
                    crate::value::ParsedNumber::Int(i) => Some(Value::Integer(i)),
                    crate::value::ParsedNumber::Float(f) => Some(Value::Float(f)),
                }
            }
            _ => None,
        }
    }

    /// An integer, accepting exact-valued floats and numeric strings.
    pub(crate) fn coerce_integer(&self, v: Value) -> Option<i64> {
        match self.coerce_number(v)? {
            Value::Integer(i) => Some(i),
            Value::Float(f) => crate::value::float_to_int_exact(f),
            _ => None,
        }
    }

    // ---- globals ----

    pub fn set_global(&mut self, name: &str, v: Value) {
        let key = self.new_string(name);
        let g = self.globals;
        // raw_set on a string key cannot fail
        let _ = self.raw_set(g, key, v);
    }

    pub fn get_global(&mut self, name: &str) -> Value {
        let key = self.new_string(name);
        self.raw_get(self.globals, key)
    }

    // ---- upvalues ----

    pub(crate) fn upval_get(&self, id: UpvalId) -> Value {
        match self.heap.upval(id) {
            UpvalCell::Open(tid, idx) => self.heap.thread(*tid).stack[*idx],
            UpvalCell::Closed(v) => *v,
        }
    }

    pub(crate) fn upval_set(&mut self, id: UpvalId, v: Value) {
        match self.heap.upval(id) {
            UpvalCell::Open(tid, idx) => {
                let (tid, idx) = (*tid, *idx);
                self.heap.thread_mut(tid).stack[idx] = v;
            }
            UpvalCell::Closed(_) => {
                *self.heap.upval_mut(id) = UpvalCell::Closed(v);
            }
        }
    }

    /// Finds the open upvalue for a stack slot, creating and linking one
    /// when no closure has captured that slot yet.
    pub(crate) fn find_or_create_upval(&mut self, tid: ThreadId, idx: usize) -> UpvalId {
        let pos = {
            let th = self.heap.thread(tid);
            th.open_upvals.binary_search_by_key(&idx, |&(i, _)| i)
        };
        match pos {
            Ok(at) => self.heap.thread(tid).open_upvals[at].1,
            Err(insert_at) => {
                let id = self.heap.new_upval(UpvalCell::Open(tid, idx));
                self.heap
                    .thread_mut(tid)
                    .open_upvals
                    .insert(insert_at, (idx, id));
                id
            }
        }
    }

    /// Closes every open upvalue at or above `level`, moving the stack
    /// values into their cells.
    pub(crate) fn close_upvalues(&mut self, tid: ThreadId, level: usize) {
        loop {
            let last = {
                let th = self.heap.thread(tid);
                match th.open_upvals.last() {
                    Some(&(idx, id)) if idx >= level => Some((idx, id)),
                    _ => None,
                }
            };
            let (idx, id) = match last {
                Some(x) => x,
                None => break,
            };
            let v = self.heap.thread(tid).stack[idx];
            *self.heap.upval_mut(id) = UpvalCell::Closed(v);
            self.heap.thread_mut(tid).open_upvals.pop();
        }
    }

    // ---- closures ----

    /// Builds a closure for `proto`, resolving each upvalue descriptor
    /// against the enclosing frame and closure.
    pub(crate) fn make_closure(
        &mut self,
        proto: Rc<Proto>,
        tid: ThreadId,
        enclosing_base: usize,
        enclosing: Option<FnId>,
    ) -> FnId {
        let mut ups = Vec::with_capacity(proto.upvals.len());
        for desc in proto.upvals.iter() {
            if desc.in_stack {
                let idx = enclosing_base + desc.index as usize;
                ups.push(self.find_or_create_upval(tid, idx));
            } else {
                let parent = match enclosing {
                    Some(fid) => match self.heap.function(fid) {
                        FunctionBody::Lua(_, parent_ups) => parent_ups[desc.index as usize],
                        FunctionBody::Native(_, _) => {
                            unreachable!("native enclosing closure has no upvalue cells")
                        }
                    },
                    None => unreachable!("upvalue binding without enclosing closure"),
                };
                ups.push(parent);
            }
        }
        self.heap.new_function(FunctionBody::Lua(proto, ups))
    }

    /// Wraps a compiled main chunk into a closure whose single upvalue
    /// (`_ENV`) is the given environment, defaulting to the globals.
    pub fn closure_from_proto(&mut self, proto: Rc<Proto>, env: Option<Value>) -> Value {
        let env = env.unwrap_or(Value::Table(self.globals));
        let mut ups = Vec::with_capacity(proto.upvals.len());
        for _ in proto.upvals.iter() {
            let cell = self.heap.new_upval(UpvalCell::Closed(Value::Nil));
            ups.push(cell);
        }
        if let Some(&first) = ups.first() {
            *self.heap.upval_mut(first) = UpvalCell::Closed(env);
        }
        Value::Function(self.heap.new_function(FunctionBody::Lua(proto, ups)))
    }

    // ---- native helpers ----

    pub(crate) fn check_native_depth(&mut self) -> LuaResult<()> {
        if self.native_depth >= limits::MAX_NATIVE_DEPTH {
            return Err(self.rt_error("stack overflow"));
        }
        Ok(())
    }

    /// Pins a value against collection while a native builds structures.
    pub(crate) fn protect(&mut self, v: Value) {
        self.scratch.push(v);
    }

    pub(crate) fn unprotect(&mut self, n: usize) {
        let keep = self.scratch.len().saturating_sub(n);
        self.scratch.truncate(keep);
    }

    // ---- warnings ----

    /// The 5.4 warning system: `@on`/`@off` toggle emission, `tocont`
    /// buffers message pieces.
    pub fn emit_warning(&mut self, msg: &str, tocont: bool) {
        if self.warn_buf.is_empty() {
            match msg {
                "@on" => {
                    self.warn_on = true;
                    return;
                }
                "@off" => {
                    self.warn_on = false;
                    return;
                }
                _ => {}
            }
        }
        self.warn_buf.push_str(msg);
        if !tocont {
            if self.warn_on {
                eprintln!("Lua warning: {}", self.warn_buf);
            }
            self.warn_buf.clear();
        }
    }

    // ---- tracebacks ----

    /// Renders the current thread's frame chain.
    pub fn traceback_string(&self, msg: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(m) = msg {
            out.push_str(m);
            out.push('\n');
        }
        out.push_str("stack traceback:");
        let th = self.heap.thread(self.current);
        for ci in th.frames.iter().rev() {
            let name = self.chunk_name(ci.proto.source);
            let line = ci.proto.line_at(ci.pc.saturating_sub(1));
            if ci.proto.line_defined == 0 {
                out.push_str(&format!("\n\t{}:{}: in main chunk", name, line));
            } else {
                out.push_str(&format!(
                    "\n\t{}:{}: in function <{}:{}>",
                    name, line, name, ci.proto.line_defined
                ));
            }
            if ci.is_tail() {
                out.push_str("\n\t(...tail calls...)");
            }
        }
        out
    }

    pub(crate) fn take_traceback(&mut self) -> Option<String> {
        self.saved_traceback.take()
    }

    // ---- public entry points ----

    /// Compiles source into a main-chunk closure bound to the globals.
    pub fn load_str(&mut self, source: &str, chunk_name: &str) -> Result<Value, MoonError> {
        let proto = crate::compiler::compile(self, source.as_bytes(), chunk_name)
            .map_err(MoonError::syntax)?;
        Ok(self.closure_from_proto(Rc::new(proto), None))
    }

    /// Calls a function with a protective boundary, translating faults
    /// into the embedder error type.
    pub fn call(&mut self, f: Value, args: &[Value]) -> Result<Vec<Value>, MoonError> {
        match self.call_value(f, args, -1) {
            Ok(vs) => Ok(vs),
            Err(Fault::Yield) => {
                // a stray yield reaching the outermost boundary is an error
                let tb = self.take_traceback();
                Err(MoonError {
                    status: Status::Yield,
                    message: "attempt to yield from outside a coroutine".to_string(),
                    traceback: tb,
                })
            }
            Err(Fault::Error) => {
                let obj = self.take_fault();
                let message = self.raw_display(obj);
                let status = self.fault_status;
                self.fault_status = Status::Ok;
                let traceback = self.take_traceback();
                Err(MoonError {
                    status: if status == Status::Ok { Status::ErrRun } else { status },
                    message,
                    traceback,
                })
            }
        }
    }

    /// Compile-and-run convenience used by tests and the REPL.
    pub fn execute_string(&mut self, source: &str) -> Result<Vec<Value>, MoonError> {
        let f = self.load_str(source, "=(load)")?;
        self.call(f, &[])
    }

    pub fn globals(&self) -> TableId {
        self.globals
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    /// Public table construction for embedders.
    pub fn new_table(&mut self, narr: usize, nrec: usize) -> TableId {
        self.heap.new_table(narr, nrec)
    }

    /// `tostring` for embedders; metamethod failures fall back to the
    /// raw rendering.
    pub fn display(&mut self, v: Value) -> String {
        match self.display_value(v) {
            Ok(s) => s,
            Err(_) => {
                let _ = self.take_fault();
                self.raw_display(v)
            }
        }
    }
}

impl Default for Lua {
    fn default() -> Self {
        Self::new()
    }
}

fn heap_id_of(v: Value) -> u32 {
    match v {
        Value::Str(id) => id.0,
        Value::Table(id) => id.0,
        Value::Function(id) => id.0,
        Value::Userdata(id) => id.0,
        Value::Thread(id) => id.0,
        _ => 0,
    }
}
