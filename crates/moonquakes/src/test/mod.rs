// Script-driven tests: each builds a runtime, opens the stdlib and
// runs a chunk whose asserts do the checking.

mod test_basic;
mod test_closures;
mod test_coroutine;
mod test_dump;
mod test_gc;
mod test_metamethods;
mod test_operators;
mod test_string;
mod test_syntax;
mod test_table;
mod test_tbc;

use crate::{Lua, Value};

/// Runs a chunk and panics with the Lua error if it fails.
pub(crate) fn run(source: &str) {
    let mut lua = Lua::new();
    lua.open_libs();
    if let Err(e) = lua.execute_string(source) {
        panic!("script failed: {}", e.message);
    }
}

/// Runs a chunk and returns its results.
pub(crate) fn run_values(source: &str) -> Vec<Value> {
    let mut lua = Lua::new();
    lua.open_libs();
    match lua.execute_string(source) {
        Ok(vs) => vs,
        Err(e) => panic!("script failed: {}", e.message),
    }
}

/// Runs a chunk, expecting a runtime error; returns the message.
pub(crate) fn run_error(source: &str) -> String {
    let mut lua = Lua::new();
    lua.open_libs();
    match lua.execute_string(source) {
        Ok(_) => panic!("script unexpectedly succeeded"),
        Err(e) => e.message,
    }
}
