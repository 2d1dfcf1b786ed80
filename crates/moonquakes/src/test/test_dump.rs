// string.dump / load round-trips.

use super::run;
use crate::Lua;

#[test]
fn test_round_trip_simple() {
    run(r#"
        local function add(a, b) return a + b end
        local blob = string.dump(add)
        assert(type(blob) == "string")
        assert(#blob > 4)
        local clone = load(blob)
        assert(clone(2, 3) == add(2, 3))
        assert(clone(10, -4) == 6)
    "#);
}

#[test]
fn test_magic_prefix() {
    let mut lua = Lua::new();
    lua.open_libs();
    let vs = lua
        .execute_string(r#"return string.dump(function() end)"#)
        .unwrap();
    match vs[0] {
        crate::Value::Str(id) => {
            let bytes = lua.heap.str_bytes(id);
            assert_eq!(&bytes[0..4], b"\x1bMQK");
        }
        _ => panic!("expected string"),
    }
}

#[test]
fn test_round_trip_control_flow() {
    run(r#"
        local function classify(n)
            if n < 0 then return "neg" end
            local total = 0
            for i = 1, n do total = total + i end
            return total
        end
        local clone = load(string.dump(classify))
        assert(clone(-5) == "neg")
        assert(clone(10) == 55)
        assert(clone(0) == 0)
    "#);
}

#[test]
fn test_round_trip_nested_functions() {
    run(r#"
        local function outer()
            local function inner(x) return x * 2 end
            return inner(21)
        end
        local clone = load(string.dump(outer))
        assert(clone() == 42)
    "#);
}

#[test]
fn test_round_trip_varargs_and_strings() {
    run(r#"
        local function join(...)
            return table.concat({...}, "|")
        end
        local clone = load(string.dump(join))
        assert(clone("a", "b", "c") == "a|b|c")
    "#);
}

#[test]
fn test_stripped_dump_still_runs() {
    run(r#"
        local function f() return 123 end
        local blob = string.dump(f, true)
        assert(load(blob)() == 123)
    "#);
}

#[test]
fn test_dump_native_rejected() {
    run(r#"
        local ok = pcall(string.dump, print)
        assert(ok == false)
    "#);
}

#[test]
fn test_bad_blob_rejected() {
    run(r#"
        local f, err = load("\27MQK\255garbage")
        assert(f == nil and type(err) == "string")
    "#);
}

#[test]
fn test_loaded_chunk_uses_given_env() {
    run(r#"
        local function read_global() return marker end
        local blob = string.dump(read_global)
        local clone = load(blob, "=clone", "bt", {marker = "custom"})
        assert(clone() == "custom")
    "#);
}
