// C-compatible embedding surface: an opaque state handle plus a small
// set of entry points returning `Status` codes.

use std::ffi::{c_char, c_int, CStr};

use crate::value::Value;
use crate::vm::{Lua, Status};

/// Opaque state: the runtime plus the embedder-visible value stack that
/// `get_top`/`set_top` manipulate.
pub struct MqState {
    pub lua: Lua,
    pub stack: Vec<Value>,
}

const VERSION_STRING: &[u8] = b"moonquakes 5.4\0";

/// # Safety
/// The returned pointer must be released with [`mq_close`].
#[unsafe(no_mangle)]
pub extern "C" fn mq_new_state() -> *mut MqState {
    let mut lua = Lua::new();
    lua.open_libs();
    Box::into_raw(Box::new(MqState {
        lua,
        stack: Vec::new(),
    }))
}

/// # Safety
/// `state` must be a pointer returned by [`mq_new_state`], not yet
/// closed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mq_close(state: *mut MqState) {
    if !state.is_null() {
        drop(unsafe { Box::from_raw(state) });
    }
}

/// # Safety
/// `state` must be a live state pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mq_gc_collect(state: *mut MqState) -> c_int {
    match unsafe { state.as_mut() } {
        Some(s) => {
            s.lua.collect_garbage();
            Status::Ok as c_int
        }
        None => Status::ErrRun as c_int,
    }
}

/// # Safety
/// `state` must be a live state pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mq_get_top(state: *mut MqState) -> c_int {
    match unsafe { state.as_ref() } {
        Some(s) => s.stack.len() as c_int,
        None => 0,
    }
}

/// # Safety
/// `state` must be a live state pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mq_set_top(state: *mut MqState, index: c_int) {
    if let Some(s) = unsafe { state.as_mut() } {
        let want = index.max(0) as usize;
        s.stack.resize(want, Value::Nil);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn mq_version() -> *const c_char {
    VERSION_STRING.as_ptr() as *const c_char
}

/// Compiles and runs a NUL-terminated source string; results land on
/// the embedder stack.
///
/// # Safety
/// `state` must be a live state pointer and `source` a valid
/// NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mq_do_string(state: *mut MqState, source: *const c_char) -> c_int {
    let s = match unsafe { state.as_mut() } {
        Some(s) => s,
        None => return Status::ErrRun as c_int,
    };
    if source.is_null() {
        return Status::ErrRun as c_int;
    }
    let text = match unsafe { CStr::from_ptr(source) }.to_str() {
        Ok(t) => t,
        Err(_) => return Status::ErrSyntax as c_int,
    };
    let f = match s.lua.load_str(text, "=(C)") {
        Ok(f) => f,
        Err(e) => return e.status as c_int,
    };
    match s.lua.call(f, &[]) {
        Ok(results) => {
            s.stack.extend(results);
            Status::Ok as c_int
        }
        Err(e) => e.status as c_int,
    }
}
