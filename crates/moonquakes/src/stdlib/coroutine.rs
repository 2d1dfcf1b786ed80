// The coroutine library. resume/yield are thin wrappers over the
// engine in the VM; yield itself is a call-machinery intrinsic.

use crate::gc::ThreadId;
use crate::stdlib::{arg, bad_arg, new_lib, NativeId, NativeResult};
use crate::value::Value;
use crate::vm::{Lua, ThreadStatus};

pub(crate) fn open(lua: &mut Lua) {
    new_lib(
        lua,
        "coroutine",
        &[
            ("create", NativeId::CoroutineCreate),
            ("resume", NativeId::CoroutineResume),
            ("yield", NativeId::CoroutineYield),
            ("status", NativeId::CoroutineStatus),
            ("running", NativeId::CoroutineRunning),
            ("wrap", NativeId::CoroutineWrap),
            ("isyieldable", NativeId::CoroutineIsYieldable),
            ("close", NativeId::CoroutineClose),
        ],
    );
}

fn check_thread(
    lua: &mut Lua,
    args: &[Value],
    i: usize,
    name: &str,
) -> Result<ThreadId, crate::vm::Fault> {
    match arg(args, i) {
        Value::Thread(t) => Ok(t),
        other => Err(bad_arg(lua, i, name, "coroutine", other)),
    }
}

pub(crate) fn create(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let f = arg(args, 0);
    if !f.is_function() {
        return Err(bad_arg(lua, 0, "create", "function", f));
    }
    Ok(vec![lua.new_coroutine(f)])
}

pub(crate) fn resume(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let co = check_thread(lua, args, 0, "resume")?;
    let rest = args.get(1..).unwrap_or(&[]).to_vec();
    match resume_guarded(lua, co, rest) {
        Ok(mut results) => {
            let mut out = vec![Value::Boolean(true)];
            out.append(&mut results);
            Ok(out)
        }
        Err(err) => Ok(vec![Value::Boolean(false), err]),
    }
}

/// Status checks shared by resume and wrap.
fn resume_guarded(lua: &mut Lua, co: ThreadId, args: Vec<Value>) -> Result<Vec<Value>, Value> {
    let status = lua.heap.thread(co).status;
    match status {
        ThreadStatus::Dead => {
            return Err(lua.new_string("cannot resume dead coroutine"));
        }
        ThreadStatus::Running | ThreadStatus::Normal => {
            return Err(lua.new_string("cannot resume non-suspended coroutine"));
        }
        ThreadStatus::Suspended => {}
    }
    lua.resume_thread(co, args).map(|(_done, values)| values)
}

/// The dispatcher intercepts yield before it gets here; the stub keeps
/// the table total.
pub(crate) fn yield_stub(lua: &mut Lua, _args: &[Value]) -> NativeResult {
    Err(lua.rt_error("attempt to yield from outside a coroutine"))
}

pub(crate) fn status(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let co = check_thread(lua, args, 0, "status")?;
    let name = if co == lua.current {
        "running"
    } else {
        lua.heap.thread(co).status.name()
    };
    Ok(vec![lua.new_string(name)])
}

pub(crate) fn running(lua: &mut Lua, _args: &[Value]) -> NativeResult {
    let co = lua.current;
    let is_main = co == lua.main_thread;
    Ok(vec![Value::Thread(co), Value::Boolean(is_main)])
}

pub(crate) fn wrap(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let f = arg(args, 0);
    if !f.is_function() {
        return Err(bad_arg(lua, 0, "wrap", "function", f));
    }
    let co = lua.new_coroutine(f);
    let wrapper = lua.new_native_closure(NativeId::CoroutineWrapCall, vec![co]);
    Ok(vec![wrapper])
}

pub(crate) fn wrap_call(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let co = match lua.native_upvalue(0) {
        Value::Thread(t) => t,
        _ => return Err(lua.rt_error("invalid wrapped coroutine")),
    };
    match resume_guarded(lua, co, args.to_vec()) {
        Ok(results) => Ok(results),
        // a wrapped coroutine re-raises the error in the caller
        Err(err) => Err(lua.throw(err)),
    }
}

pub(crate) fn isyieldable(lua: &mut Lua, _args: &[Value]) -> NativeResult {
    let co = lua.current;
    let yieldable = co != lua.main_thread && lua.heap.thread(co).ccalls == 0;
    Ok(vec![Value::Boolean(yieldable)])
}

pub(crate) fn close(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let co = check_thread(lua, args, 0, "close")?;
    if co == lua.current || co == lua.main_thread {
        return Err(lua.rt_error("cannot close a running coroutine"));
    }
    match lua.heap.thread(co).status {
        ThreadStatus::Running | ThreadStatus::Normal => {
            return Err(lua.rt_error("cannot close a non-suspended coroutine"));
        }
        ThreadStatus::Dead => return Ok(vec![Value::Boolean(true)]),
        ThreadStatus::Suspended => {}
    }
    match lua.close_thread(co) {
        Ok(()) => Ok(vec![Value::Boolean(true)]),
        Err(e) => Ok(vec![Value::Boolean(false), e]),
    }
}
