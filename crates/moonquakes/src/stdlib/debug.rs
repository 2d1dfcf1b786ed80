// A minimal debug library: traceback and a getinfo subset.

use crate::stdlib::{arg, new_lib, NativeId, NativeResult};
use crate::value::Value;
use crate::vm::Lua;

pub(crate) fn open(lua: &mut Lua) {
    new_lib(
        lua,
        "debug",
        &[
            ("traceback", NativeId::DebugTraceback),
            ("getinfo", NativeId::DebugGetInfo),
        ],
    );
}

pub(crate) fn traceback(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let msg = match arg(args, 0) {
        Value::Nil => None,
        Value::Str(id) => Some(lua.str_text(id)),
        other => {
            // non-string messages pass through untouched
            return Ok(vec![other]);
        }
    };
    let text = lua.traceback_string(msg.as_deref());
    Ok(vec![lua.new_string(&text)])
}

pub(crate) fn getinfo(lua: &mut Lua, args: &[Value]) -> NativeResult {
    // level (number) or function; returns source/line/what
    let t = lua.heap.new_table(0, 4);
    match arg(args, 0) {
        Value::Integer(level) => {
            let th = lua.heap.thread(lua.current);
            let idx = th.frames.len().checked_sub(level.max(1) as usize);
            let info = idx.and_then(|i| th.frames.get(i)).map(|ci| {
                (
                    ci.proto.source,
                    ci.proto.line_at(ci.pc.saturating_sub(1)),
                    ci.proto.line_defined,
                )
            });
            match info {
                None => return Ok(vec![Value::Nil]),
                Some((source, line, defined)) => {
                    let src = lua.chunk_name(source);
                    let src_v = lua.new_string(&src);
                    let short_v = lua.new_string(&src);
                    set(lua, t, "source", src_v)?;
                    set(lua, t, "short_src", short_v)?;
                    set(lua, t, "currentline", Value::Integer(line as i64))?;
                    set(lua, t, "linedefined", Value::Integer(defined as i64))?;
                    let what = lua.new_string(if defined == 0 { "main" } else { "Lua" });
                    set(lua, t, "what", what)?;
                }
            }
        }
        Value::Function(fid) => {
            match lua.heap.function(fid) {
                crate::gc::FunctionBody::Lua(p, _) => {
                    let (source, defined) = (p.source, p.line_defined);
                    let src = lua.chunk_name(source);
                    let src_v = lua.new_string(&src);
                    set(lua, t, "source", src_v)?;
                    set(lua, t, "linedefined", Value::Integer(defined as i64))?;
                    let what = lua.new_string(if defined == 0 { "main" } else { "Lua" });
                    set(lua, t, "what", what)?;
                }
                crate::gc::FunctionBody::Native(_, _) => {
                    let src = lua.new_string("=[C]");
                    set(lua, t, "source", src)?;
                    let what = lua.new_string("C");
                    set(lua, t, "what", what)?;
                    set(lua, t, "currentline", Value::Integer(-1))?;
                }
            };
        }
        other => return Err(crate::stdlib::bad_arg(lua, 0, "getinfo", "function or level", other)),
    }
    Ok(vec![Value::Table(t)])
}

fn set(
    lua: &mut Lua,
    t: crate::gc::TableId,
    name: &str,
    v: Value,
) -> Result<(), crate::vm::Fault> {
    let key = lua.new_string(name);
    lua.raw_set(t, key, v)
}
