// moonquakes
// An embeddable Lua 5.4 core: bytecode compiler, register VM, tracing GC

#[cfg(test)]
mod test;

pub mod capi;
pub mod compiler;
pub mod gc;
pub mod limits;
pub mod stdlib;
pub mod value;
pub mod vm;

pub use gc::{FnId, StrId, TableId, ThreadId, UserdataId};
pub use value::{Proto, Value};
pub use vm::{Fault, Lua, LuaResult, MoonError, Status, SyntaxError, ThreadStatus};

/// Compile-and-run convenience: a fresh runtime with the standard
/// libraries, one chunk, its results.
pub fn execute(source: &str) -> Result<Vec<Value>, MoonError> {
    let mut lua = Lua::new();
    lua.open_libs();
    lua.execute_string(source)
}
