// Collector behavior: reachability, finalizers, weak tables.

use super::run;
use crate::{Lua, Value};

#[test]
fn test_collect_frees_garbage() {
    let mut lua = Lua::new();
    lua.open_libs();
    lua.execute_string(
        r#"
        local junk = {}
        for i = 1, 1000 do junk[i] = {payload = string.rep("x", 50) .. i} end
        junk = nil
    "#,
    )
    .unwrap();
    let before = lua.heap.live_objects();
    lua.collect_garbage();
    let after = lua.heap.live_objects();
    assert!(after < before, "collection should free the junk tables");
}

#[test]
fn test_reachable_objects_survive() {
    run(r#"
        local keep = {}
        for i = 1, 100 do keep[i] = {n = i} end
        collectgarbage()
        for i = 1, 100 do assert(keep[i].n == i) end
    "#);
}

#[test]
fn test_finalizer_runs_once() {
    run(r#"
        local count = 0
        do
            local obj = setmetatable({}, {__gc = function() count = count + 1 end})
        end
        collectgarbage()   -- queues and runs the finalizer
        collectgarbage()   -- the object is gone for real now
        collectgarbage()
        assert(count == 1)
    "#);
}

#[test]
fn test_finalizer_sees_object() {
    run(r#"
        local seen
        do
            local obj = setmetatable({tag = "mine"}, {__gc = function(o)
                seen = o.tag
            end})
        end
        collectgarbage()
        assert(seen == "mine")
    "#);
}

#[test]
fn test_finalizer_errors_do_not_propagate() {
    run(r#"
        do
            local obj = setmetatable({}, {__gc = function() error("in gc") end})
        end
        collectgarbage()   -- the error goes to the warn hook, not here
        assert(true)
    "#);
}

#[test]
fn test_weak_values_cleared() {
    run(r#"
        local cache = setmetatable({}, {__mode = "v"})
        local strong = {}
        cache.kept = strong
        cache.dropped = {}
        collectgarbage()
        assert(cache.kept == strong)
        assert(cache.dropped == nil)
    "#);
}

#[test]
fn test_weak_keys_cleared() {
    run(r#"
        local attrs = setmetatable({}, {__mode = "k"})
        local live_key = {}
        attrs[live_key] = "live"
        attrs[{}] = "dead"
        collectgarbage()
        assert(attrs[live_key] == "live")
        local remaining = 0
        for _ in pairs(attrs) do remaining = remaining + 1 end
        assert(remaining == 1)
    "#);
}

#[test]
fn test_ephemeron_chain() {
    run(r#"
        -- value reachable only through its own key must die with it
        local t = setmetatable({}, {__mode = "k"})
        local live = {}
        t[live] = {payload = 1}
        do
            local dead = {}
            t[dead] = {payload = 2}
        end
        collectgarbage()
        assert(t[live].payload == 1)
        local n = 0
        for _ in pairs(t) do n = n + 1 end
        assert(n == 1)
    "#);
}

#[test]
fn test_strings_survive_interning_pressure() {
    run(r#"
        local fixed = "constant"
        for i = 1, 2000 do
            local _ = "temp" .. i
        end
        collectgarbage()
        assert(fixed == "constant")
        assert(("const" .. "ant") == fixed)
    "#);
}

#[test]
fn test_collection_during_execution() {
    let mut lua = Lua::new();
    lua.open_libs();
    // small threshold forces cycles mid-run
    lua.heap.pending = true;
    let r = lua.execute_string(
        r#"
        local acc = {}
        for i = 1, 5000 do
            acc[#acc + 1] = tostring(i)
            if i % 1000 == 0 then acc = {acc[#acc]} end
        end
        return #acc
    "#,
    );
    assert!(r.is_ok());
}

#[test]
fn test_open_upvalues_root_their_values() {
    let mut lua = Lua::new();
    lua.open_libs();
    let vs = lua
        .execute_string(
            r#"
        local function capture()
            local payload = {mark = "safe"}
            collectgarbage()
            return function() return payload.mark end
        end
        local f = capture()
        collectgarbage()
        return f()
    "#,
        )
        .unwrap();
    match vs[0] {
        Value::Str(id) => assert_eq!(lua.heap.str(id).as_bytes(), b"safe"),
        _ => panic!("expected string"),
    }
}
