// The native-function surface: a stable id per native, dispatched
// through a table indexed by discriminant. Libraries install closures
// over these ids into the globals at startup.

mod basic;
mod coroutine;
mod debug;
mod io;
mod math;
mod os;
mod pattern;
mod string;
mod table;
mod utf8;

use crate::gc::{FunctionBody, TableId};
use crate::value::Value;
use crate::vm::{Lua, LuaResult};

pub type NativeResult = LuaResult<Vec<Value>>;
pub type NativeImpl = fn(&mut Lua, &[Value]) -> NativeResult;

macro_rules! natives {
    ($(($variant:ident, $name:expr, $func:path)),* $(,)?) => {
        /// Every native function the runtime knows, by stable id.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u16)]
        pub enum NativeId {
            $($variant),*
        }

        pub const NATIVE_COUNT: usize = [$(NativeId::$variant),*].len();

        /// Dispatch table, indexed by `NativeId` discriminant.
        pub const NATIVE_TABLE: [NativeImpl; NATIVE_COUNT] = [$($func),*];

        impl NativeId {
            /// The Lua-visible name, used in error messages.
            pub fn name(self) -> &'static str {
                match self {
                    $(NativeId::$variant => $name),*
                }
            }
        }
    };
}

natives! {
    // basic library
    (Print, "print", basic::print),
    (Type, "type", basic::type_),
    (ToString, "tostring", basic::tostring),
    (ToNumber, "tonumber", basic::tonumber),
    (IPairs, "ipairs", basic::ipairs),
    (IPairsIter, "ipairs_iterator", basic::ipairs_iter),
    (Pairs, "pairs", basic::pairs),
    (Next, "next", basic::next),
    (Select, "select", basic::select),
    (RawGet, "rawget", basic::rawget),
    (RawSet, "rawset", basic::rawset),
    (RawEqual, "rawequal", basic::rawequal),
    (RawLen, "rawlen", basic::rawlen),
    (SetMetatable, "setmetatable", basic::setmetatable),
    (GetMetatable, "getmetatable", basic::getmetatable),
    (Assert, "assert", basic::assert),
    (Error, "error", basic::error),
    (Pcall, "pcall", basic::pcall_stub),
    (Xpcall, "xpcall", basic::pcall_stub),
    (Load, "load", basic::load),
    (LoadFile, "loadfile", basic::loadfile),
    (DoFile, "dofile", basic::dofile),
    (CollectGarbage, "collectgarbage", basic::collectgarbage),
    (Warn, "warn", basic::warn),
    (Require, "require", basic::require),

    // string
    (StrLen, "len", string::len),
    (StrSub, "sub", string::sub),
    (StrUpper, "upper", string::upper),
    (StrLower, "lower", string::lower),
    (StrRep, "rep", string::rep),
    (StrReverse, "reverse", string::reverse),
    (StrByte, "byte", string::byte),
    (StrChar, "char", string::char_),
    (StrFormat, "format", string::format),
    (StrFind, "find", string::find),
    (StrMatch, "match", string::match_),
    (StrGmatch, "gmatch", string::gmatch),
    (StrGmatchIter, "gmatch_iterator", string::gmatch_iter),
    (StrGsub, "gsub", string::gsub),
    (StrDump, "dump", string::dump),

    // table
    (TblInsert, "insert", table::insert),
    (TblRemove, "remove", table::remove),
    (TblConcat, "concat", table::concat),
    (TblUnpack, "unpack", table::unpack),
    (TblPack, "pack", table::pack),
    (TblSort, "sort", table::sort),

    // math
    (MathAbs, "abs", math::abs),
    (MathCeil, "ceil", math::ceil),
    (MathFloor, "floor", math::floor),
    (MathSqrt, "sqrt", math::sqrt),
    (MathSin, "sin", math::sin),
    (MathCos, "cos", math::cos),
    (MathTan, "tan", math::tan),
    (MathAsin, "asin", math::asin),
    (MathAcos, "acos", math::acos),
    (MathAtan, "atan", math::atan),
    (MathExp, "exp", math::exp),
    (MathLog, "log", math::log),
    (MathFmod, "fmod", math::fmod),
    (MathModf, "modf", math::modf),
    (MathToInteger, "tointeger", math::tointeger),
    (MathType, "type", math::type_),
    (MathMax, "max", math::max),
    (MathMin, "min", math::min),
    (MathRandom, "random", math::random),
    (MathRandomSeed, "randomseed", math::randomseed),
    (MathUlt, "ult", math::ult),

    // os
    (OsTime, "time", os::time),
    (OsClock, "clock", os::clock),
    (OsDate, "date", os::date),
    (OsDiffTime, "difftime", os::difftime),
    (OsGetenv, "getenv", os::getenv),
    (OsRemove, "remove", os::remove),
    (OsRename, "rename", os::rename),
    (OsTmpname, "tmpname", os::tmpname),
    (OsExit, "exit", os::exit),

    // io
    (IoWrite, "write", io::write),
    (IoRead, "read", io::read),
    (IoOpen, "open", io::open),
    (IoLines, "lines", io::lines),
    (IoClose, "close", io::close),
    (FileRead, "read", io::file_read),
    (FileWrite, "write", io::file_write),
    (FileLines, "lines", io::file_lines),
    (FileLinesIter, "lines_iterator", io::file_lines_iter),
    (FileClose, "close", io::file_close),
    (FileSeek, "seek", io::file_seek),
    (FileFlush, "flush", io::file_flush),

    // coroutine
    (CoroutineCreate, "create", coroutine::create),
    (CoroutineResume, "resume", coroutine::resume),
    (CoroutineYield, "yield", coroutine::yield_stub),
    (CoroutineStatus, "status", coroutine::status),
    (CoroutineRunning, "running", coroutine::running),
    (CoroutineWrap, "wrap", coroutine::wrap),
    (CoroutineWrapCall, "wrapped_coroutine", coroutine::wrap_call),
    (CoroutineIsYieldable, "isyieldable", coroutine::isyieldable),
    (CoroutineClose, "close", coroutine::close),

    // utf8
    (Utf8Char, "char", utf8::char_),
    (Utf8Codepoint, "codepoint", utf8::codepoint),
    (Utf8Len, "len", utf8::len),
    (Utf8Offset, "offset", utf8::offset),
    (Utf8Codes, "codes", utf8::codes),
    (Utf8CodesIter, "codes_iterator", utf8::codes_iter),

    // debug
    (DebugTraceback, "traceback", debug::traceback),
    (DebugGetInfo, "getinfo", debug::getinfo),
}

#[inline]
pub(crate) fn dispatch(lua: &mut Lua, id: NativeId, args: &[Value]) -> NativeResult {
    NATIVE_TABLE[id as usize](lua, args)
}

/// Installs every standard library.
pub fn open_all(lua: &mut Lua) {
    // package.loaded must exist before libraries register themselves
    let package = lua.heap.new_table(0, 4);
    let loaded = lua.heap.new_table(0, 12);
    let loaded_v = Value::Table(loaded);
    set_field(lua, package, "loaded", loaded_v);
    let path = lua.new_string("./?.lua;./?/init.lua");
    set_field(lua, package, "path", path);
    lua.set_global("package", Value::Table(package));

    basic::open(lua);
    string::open(lua);
    table::open(lua);
    math::open(lua);
    io::open_lib(lua);
    os::open(lua);
    utf8::open(lua);
    coroutine::open(lua);
    debug::open(lua);
}

impl Lua {
    pub fn new_native(&mut self, id: NativeId) -> Value {
        Value::Function(self.heap.new_function(FunctionBody::Native(id, Vec::new())))
    }

    pub fn new_native_closure(&mut self, id: NativeId, upvalues: Vec<Value>) -> Value {
        Value::Function(self.heap.new_function(FunctionBody::Native(id, upvalues)))
    }

    /// Upvalue `i` of the native closure currently executing.
    pub(crate) fn native_upvalue(&self, i: usize) -> Value {
        if let Value::Function(fid) = self.native_self {
            if let FunctionBody::Native(_, ups) = self.heap.function(fid) {
                return ups.get(i).copied().unwrap_or(Value::Nil);
            }
        }
        Value::Nil
    }
}

/// Builds a library table, sets it as a global and registers it in
/// `package.loaded`.
pub(crate) fn new_lib(lua: &mut Lua, name: &str, entries: &[(&str, NativeId)]) -> TableId {
    let t = lua.heap.new_table(0, entries.len());
    for &(field, id) in entries {
        let f = lua.new_native(id);
        set_field(lua, t, field, f);
    }
    lua.set_global(name, Value::Table(t));
    register_loaded(lua, name, Value::Table(t));
    t
}

pub(crate) fn set_field(lua: &mut Lua, t: TableId, name: &str, v: Value) {
    let key = lua.new_string(name);
    let _ = lua.raw_set(t, key, v);
}

pub(crate) fn register_loaded(lua: &mut Lua, name: &str, v: Value) {
    let package = lua.get_global("package");
    if let Value::Table(p) = package {
        let loaded_key = lua.new_string("loaded");
        if let Value::Table(loaded) = lua.raw_get(p, loaded_key) {
            let key = lua.new_string(name);
            let _ = lua.raw_set(loaded, key, v);
        }
    }
}

// ---- argument helpers ----

#[inline]
pub(crate) fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).copied().unwrap_or(Value::Nil)
}

pub(crate) fn bad_arg(lua: &mut Lua, i: usize, name: &str, expected: &str, got: Value) -> crate::vm::Fault {
    let got = if got.is_nil() {
        "no value".to_string()
    } else {
        got.type_name().to_string()
    };
    lua.rt_error(format!(
        "bad argument #{} to '{}' ({} expected, got {})",
        i + 1,
        name,
        expected,
        got
    ))
}

pub(crate) fn check_table(
    lua: &mut Lua,
    args: &[Value],
    i: usize,
    name: &str,
) -> Result<crate::gc::TableId, crate::vm::Fault> {
    match arg(args, i) {
        Value::Table(t) => Ok(t),
        other => Err(bad_arg(lua, i, name, "table", other)),
    }
}

pub(crate) fn check_str(
    lua: &mut Lua,
    args: &[Value],
    i: usize,
    name: &str,
) -> Result<std::rc::Rc<[u8]>, crate::vm::Fault> {
    match arg(args, i) {
        Value::Str(id) => Ok(lua.heap.str_bytes(id)),
        Value::Integer(n) => Ok(crate::value::int_to_display(n).into_bytes().into()),
        Value::Float(f) => Ok(crate::value::float_to_display(f).into_bytes().into()),
        other => Err(bad_arg(lua, i, name, "string", other)),
    }
}

pub(crate) fn check_int(
    lua: &mut Lua,
    args: &[Value],
    i: usize,
    name: &str,
) -> Result<i64, crate::vm::Fault> {
    let v = arg(args, i);
    match lua.coerce_integer(v) {
        Some(n) => Ok(n),
        None => {
            if v.is_number() {
                Err(lua.rt_error(format!(
                    "bad argument #{} to '{}' (number has no integer representation)",
                    i + 1,
                    name
                )))
            } else {
                Err(bad_arg(lua, i, name, "number", v))
            }
        }
    }
}

pub(crate) fn opt_int(
    lua: &mut Lua,
    args: &[Value],
    i: usize,
    name: &str,
    default: i64,
) -> Result<i64, crate::vm::Fault> {
    if arg(args, i).is_nil() {
        Ok(default)
    } else {
        check_int(lua, args, i, name)
    }
}

pub(crate) fn check_num(
    lua: &mut Lua,
    args: &[Value],
    i: usize,
    name: &str,
) -> Result<f64, crate::vm::Fault> {
    let v = arg(args, i);
    match lua.coerce_number(v) {
        Some(Value::Integer(n)) => Ok(n as f64),
        Some(Value::Float(f)) => Ok(f),
        _ => Err(bad_arg(lua, i, name, "number", v)),
    }
}

pub(crate) fn check_function(
    lua: &mut Lua,
    args: &[Value],
    i: usize,
    name: &str,
) -> Result<Value, crate::vm::Fault> {
    let v = arg(args, i);
    if v.is_function() {
        Ok(v)
    } else {
        Err(bad_arg(lua, i, name, "function", v))
    }
}
