// The basic library: globals installed directly into _G.

use std::io::Write;

use crate::gc::TableId;
use crate::stdlib::{arg, bad_arg, check_int, check_str, check_table, NativeId, NativeResult};
use crate::value::{Mm, TableKey, Value};
use crate::vm::Lua;

pub(crate) fn open(lua: &mut Lua) {
    const GLOBALS: &[(&str, NativeId)] = &[
        ("print", NativeId::Print),
        ("type", NativeId::Type),
        ("tostring", NativeId::ToString),
        ("tonumber", NativeId::ToNumber),
        ("ipairs", NativeId::IPairs),
        ("pairs", NativeId::Pairs),
        ("next", NativeId::Next),
        ("select", NativeId::Select),
        ("rawget", NativeId::RawGet),
        ("rawset", NativeId::RawSet),
        ("rawequal", NativeId::RawEqual),
        ("rawlen", NativeId::RawLen),
        ("setmetatable", NativeId::SetMetatable),
        ("getmetatable", NativeId::GetMetatable),
        ("assert", NativeId::Assert),
        ("error", NativeId::Error),
        ("pcall", NativeId::Pcall),
        ("xpcall", NativeId::Xpcall),
        ("load", NativeId::Load),
        ("loadfile", NativeId::LoadFile),
        ("dofile", NativeId::DoFile),
        ("collectgarbage", NativeId::CollectGarbage),
        ("warn", NativeId::Warn),
        ("require", NativeId::Require),
    ];
    for &(name, id) in GLOBALS {
        let f = lua.new_native(id);
        lua.set_global(name, f);
    }
    let version = lua.new_string("Lua 5.4");
    lua.set_global("_VERSION", version);
}

pub(crate) fn print(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let mut out = String::new();
    for (i, &v) in args.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        out.push_str(&lua.display_value(v)?);
    }
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    let _ = writeln!(handle, "{}", out);
    Ok(Vec::new())
}

pub(crate) fn type_(lua: &mut Lua, args: &[Value]) -> NativeResult {
    if args.is_empty() {
        return Err(bad_arg(lua, 0, "type", "value", Value::Nil));
    }
    let name = lua.new_string(args[0].type_name());
    Ok(vec![name])
}

pub(crate) fn tostring(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let text = lua.display_value(arg(args, 0))?;
    Ok(vec![lua.new_string(&text)])
}

pub(crate) fn tonumber(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let v = arg(args, 0);
    if arg(args, 1).is_nil() {
        let r = match v {
            Value::Integer(_) | Value::Float(_) => v,
            Value::Str(_) => lua.coerce_number(v).unwrap_or(Value::Nil),
            _ => Value::Nil,
        };
        return Ok(vec![r]);
    }
    let base = check_int(lua, args, 1, "tonumber")?;
    if !(2..=36).contains(&base) {
        return Err(lua.rt_error("bad argument #2 to 'tonumber' (base out of range)"));
    }
    let s = check_str(lua, args, 0, "tonumber")?;
    let text = String::from_utf8_lossy(&s);
    let text = text.trim();
    if text.is_empty() {
        return Ok(vec![Value::Nil]);
    }
    let (neg, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let mut acc: i64 = 0;
    for c in digits.chars() {
        let d = match c.to_digit(36) {
            Some(d) if (d as i64) < base => d as i64,
            _ => return Ok(vec![Value::Nil]),
        };
        acc = acc.wrapping_mul(base).wrapping_add(d);
    }
    if digits.is_empty() {
        return Ok(vec![Value::Nil]);
    }
    Ok(vec![Value::Integer(if neg { acc.wrapping_neg() } else { acc })])
}

pub(crate) fn ipairs(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = arg(args, 0);
    if t.is_nil() {
        return Err(bad_arg(lua, 0, "ipairs", "table", t));
    }
    let iter = lua.new_native(NativeId::IPairsIter);
    Ok(vec![iter, t, Value::Integer(0)])
}

pub(crate) fn ipairs_iter(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = arg(args, 0);
    let i = match arg(args, 1) {
        Value::Integer(i) => i + 1,
        _ => 1,
    };
    let v = lua.index_value(t, Value::Integer(i))?;
    if v.is_nil() {
        Ok(vec![Value::Nil])
    } else {
        Ok(vec![Value::Integer(i), v])
    }
}

pub(crate) fn pairs(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = arg(args, 0);
    if !t.is_table() {
        return Err(bad_arg(lua, 0, "pairs", "table", t));
    }
    let iter = lua.new_native(NativeId::Next);
    Ok(vec![iter, t, Value::Nil])
}

pub(crate) fn next(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = check_table(lua, args, 0, "next")?;
    next_entry(lua, t, arg(args, 1))
}

pub(crate) fn next_entry(lua: &mut Lua, t: TableId, key: Value) -> NativeResult {
    let from: Option<TableKey> = if key.is_nil() {
        None
    } else {
        match lua.table_key(key) {
            Some(k) => Some(k),
            None => return Err(lua.rt_error("invalid key to 'next'")),
        }
    };
    let step = lua.heap.table(t).next_entry(from.as_ref());
    match step {
        Ok(Some((k, v))) => Ok(vec![k, v]),
        Ok(None) => Ok(vec![Value::Nil]),
        Err(()) => Err(lua.rt_error("invalid key to 'next'")),
    }
}

pub(crate) fn select(lua: &mut Lua, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Str(id) if lua.heap.str(id).as_bytes() == b"#" => {
            Ok(vec![Value::Integer(args.len() as i64 - 1)])
        }
        v => {
            let n = match lua.coerce_integer(v) {
                Some(n) => n,
                None => return Err(bad_arg(lua, 0, "select", "number", v)),
            };
            let rest = args.len() as i64 - 1;
            let start = if n < 0 {
                let s = rest + n;
                if s < 0 {
                    return Err(lua.rt_error("bad argument #1 to 'select' (index out of range)"));
                }
                s
            } else if n == 0 {
                return Err(lua.rt_error("bad argument #1 to 'select' (index out of range)"));
            } else {
                n - 1
            };
            Ok(args[(start as usize + 1).min(args.len())..].to_vec())
        }
    }
}

pub(crate) fn rawget(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = check_table(lua, args, 0, "rawget")?;
    Ok(vec![lua.raw_get(t, arg(args, 1))])
}

pub(crate) fn rawset(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = check_table(lua, args, 0, "rawset")?;
    lua.raw_set(t, arg(args, 1), arg(args, 2))?;
    Ok(vec![arg(args, 0)])
}

pub(crate) fn rawequal(lua: &mut Lua, args: &[Value]) -> NativeResult {
    Ok(vec![Value::Boolean(
        lua.raw_equals(arg(args, 0), arg(args, 1)),
    )])
}

pub(crate) fn rawlen(lua: &mut Lua, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Table(t) => Ok(vec![Value::Integer(lua.heap.table(t).boundary())]),
        Value::Str(s) => Ok(vec![Value::Integer(lua.heap.str(s).len() as i64)]),
        other => Err(bad_arg(lua, 0, "rawlen", "table or string", other)),
    }
}

pub(crate) fn setmetatable(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = check_table(lua, args, 0, "setmetatable")?;
    let mt = arg(args, 1);
    if let Some(cur) = lua.heap.table(t).metatable {
        if !lua.table_mm(cur, Mm::Metatable).is_nil() {
            return Err(lua.rt_error("cannot change a protected metatable"));
        }
    }
    match mt {
        Value::Nil => lua.heap.table_mut(t).metatable = None,
        Value::Table(m) => lua.heap.table_mut(t).metatable = Some(m),
        other => return Err(bad_arg(lua, 1, "setmetatable", "nil or table", other)),
    }
    Ok(vec![arg(args, 0)])
}

pub(crate) fn getmetatable(lua: &mut Lua, args: &[Value]) -> NativeResult {
    match lua.metatable_of(arg(args, 0)) {
        None => Ok(vec![Value::Nil]),
        Some(mt) => {
            let protected = lua.table_mm(mt, Mm::Metatable);
            if protected.is_nil() {
                Ok(vec![Value::Table(mt)])
            } else {
                Ok(vec![protected])
            }
        }
    }
}

pub(crate) fn assert(lua: &mut Lua, args: &[Value]) -> NativeResult {
    if arg(args, 0).is_truthy() {
        return Ok(args.to_vec());
    }
    match arg(args, 1) {
        Value::Nil => Err(lua.rt_error("assertion failed!")),
        msg => Err(lua.throw(msg)),
    }
}

pub(crate) fn error(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let v = arg(args, 0);
    let level = match arg(args, 1) {
        Value::Nil => 1,
        other => lua.coerce_integer(other).unwrap_or(1),
    };
    if level > 0 {
        if let Value::Str(id) = v {
            // string errors get a position prefix
            let text = format!("{}{}", lua.where_prefix(), lua.str_text(id));
            let v = lua.new_string(&text);
            return Err(lua.throw(v));
        }
    }
    Err(lua.throw(v))
}

/// pcall/xpcall are intrinsics of the call machinery; this entry exists
/// only so the dispatch table is total.
pub(crate) fn pcall_stub(lua: &mut Lua, _args: &[Value]) -> NativeResult {
    Err(lua.rt_error("protected call intrinsic invoked as a plain native"))
}

pub(crate) fn load(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let chunk = arg(args, 0);
    let chunk_name = match arg(args, 1) {
        Value::Str(id) => lua.str_text(id),
        _ => "=(load)".to_string(),
    };
    let env = match arg(args, 3) {
        Value::Nil => None,
        other => Some(other),
    };
    let source: Vec<u8> = match chunk {
        Value::Str(id) => lua.heap.str_bytes(id).to_vec(),
        Value::Function(_) => {
            // reader function: concatenate pieces until nil
            let mut buf = Vec::new();
            loop {
                let piece = lua.call_single(chunk, &[])?;
                match piece {
                    Value::Nil => break,
                    Value::Str(id) => {
                        let bytes = lua.heap.str_bytes(id);
                        if bytes.is_empty() {
                            break;
                        }
                        buf.extend_from_slice(&bytes);
                    }
                    _ => {
                        let msg = lua.new_string("reader function must return a string");
                        return Ok(vec![Value::Nil, msg]);
                    }
                }
            }
            buf
        }
        other => return Err(bad_arg(lua, 0, "load", "string or function", other)),
    };
    load_source(lua, &source, &chunk_name, env)
}

pub(crate) fn load_source(
    lua: &mut Lua,
    source: &[u8],
    chunk_name: &str,
    env: Option<Value>,
) -> NativeResult {
    if source.starts_with(crate::vm::dump::DUMP_MAGIC) {
        return match crate::vm::undump_proto(lua, source) {
            Ok(proto) => Ok(vec![lua.closure_from_proto(std::rc::Rc::new(proto), env)]),
            Err(e) => {
                let msg = lua.new_string(&e);
                Ok(vec![Value::Nil, msg])
            }
        };
    }
    match crate::compiler::compile(lua, source, chunk_name) {
        Ok(proto) => Ok(vec![lua.closure_from_proto(std::rc::Rc::new(proto), env)]),
        Err(e) => {
            let msg = lua.new_string(&format!("{}:{}: {}", chunk_name, e.line, e.message));
            Ok(vec![Value::Nil, msg])
        }
    }
}

pub(crate) fn loadfile(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let path = match arg(args, 0) {
        Value::Str(id) => lua.str_text(id),
        other => return Err(bad_arg(lua, 0, "loadfile", "string", other)),
    };
    match std::fs::read(&path) {
        Ok(bytes) => {
            let name = format!("@{}", path);
            load_source(lua, &bytes, &name, None)
        }
        Err(e) => {
            let msg = lua.new_string(&format!("cannot open {}: {}", path, e));
            Ok(vec![Value::Nil, msg])
        }
    }
}

pub(crate) fn dofile(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let loaded = loadfile(lua, args)?;
    match loaded.first() {
        Some(&f) if f.is_function() => lua.call_value(f, &[], -1),
        _ => {
            let msg = loaded.get(1).copied().unwrap_or(Value::Nil);
            Err(lua.throw(msg))
        }
    }
}

pub(crate) fn collectgarbage(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let opt = match arg(args, 0) {
        Value::Str(id) => lua.str_text(id),
        Value::Nil => "collect".to_string(),
        other => return Err(bad_arg(lua, 0, "collectgarbage", "string", other)),
    };
    match opt.as_str() {
        "collect" | "step" => {
            lua.collect_garbage();
            Ok(vec![Value::Integer(0)])
        }
        "count" => {
            let kb = lua.heap.allocated as f64 / 1024.0;
            Ok(vec![Value::Float(kb)])
        }
        "isrunning" => Ok(vec![Value::Boolean(true)]),
        _ => Ok(vec![Value::Integer(0)]),
    }
}

pub(crate) fn warn(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let mut pieces = Vec::with_capacity(args.len());
    for (i, _) in args.iter().enumerate() {
        pieces.push(check_str(lua, args, i, "warn")?);
    }
    if pieces.is_empty() {
        return Err(bad_arg(lua, 0, "warn", "string", Value::Nil));
    }
    let last = pieces.len() - 1;
    for (i, p) in pieces.iter().enumerate() {
        let text = String::from_utf8_lossy(p).into_owned();
        lua.emit_warning(&text, i < last);
    }
    Ok(Vec::new())
}

pub(crate) fn require(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let name = match arg(args, 0) {
        Value::Str(id) => lua.str_text(id),
        other => return Err(bad_arg(lua, 0, "require", "string", other)),
    };
    let package = lua.get_global("package");
    let p = match package {
        Value::Table(p) => p,
        _ => return Err(lua.rt_error("'package' table missing")),
    };
    let loaded_key = lua.new_string("loaded");
    let loaded = match lua.raw_get(p, loaded_key) {
        Value::Table(l) => l,
        _ => return Err(lua.rt_error("'package.loaded' missing")),
    };
    let name_key = lua.new_string(&name);
    let cached = lua.raw_get(loaded, name_key);
    if !cached.is_nil() {
        return Ok(vec![cached]);
    }
    // search package.path
    let path_key = lua.new_string("path");
    let search_path = match lua.raw_get(p, path_key) {
        Value::Str(id) => lua.str_text(id),
        _ => "./?.lua".to_string(),
    };
    let module_path = name.replace('.', "/");
    let mut tried = Vec::new();
    for template in search_path.split(';') {
        let candidate = template.replace('?', &module_path);
        match std::fs::read(&candidate) {
            Ok(bytes) => {
                let chunk_name = format!("@{}", candidate);
                let loaded_fn = load_source(lua, &bytes, &chunk_name, None)?;
                let f = match loaded_fn.first() {
                    Some(&f) if f.is_function() => f,
                    _ => {
                        let msg = loaded_fn.get(1).copied().unwrap_or(Value::Nil);
                        return Err(lua.throw(msg));
                    }
                };
                let name_arg = lua.new_string(&name);
                let results = lua.call_value(f, &[name_arg], -1)?;
                let value = results
                    .first()
                    .copied()
                    .filter(|v| !v.is_nil())
                    .unwrap_or(Value::Boolean(true));
                let name_key = lua.new_string(&name);
                lua.raw_set(loaded, name_key, value)?;
                let path_v = lua.new_string(&candidate);
                return Ok(vec![value, path_v]);
            }
            Err(_) => tried.push(format!("\n\tno file '{}'", candidate)),
        }
    }
    Err(lua.rt_error(format!(
        "module '{}' not found:{}",
        name,
        tried.join("")
    )))
}
