// Metatable protocol coverage.

use super::{run, run_error};

#[test]
fn test_index_function() {
    run(r#"
        local t = setmetatable({}, {__index = function(_, k) return k .. k end})
        assert(t.ab == "abab")
        assert(t["x"] == "xx")
        t.real = 1
        assert(t.real == 1)    -- raw hit wins over the metamethod
    "#);
}

#[test]
fn test_index_table_chain() {
    run(r#"
        local base = {greet = "hello"}
        local mid = setmetatable({extra = 1}, {__index = base})
        local leaf = setmetatable({}, {__index = mid})
        assert(leaf.greet == "hello")
        assert(leaf.extra == 1)
        assert(leaf.missing == nil)
    "#);
}

#[test]
fn test_index_loop_detected() {
    let msg = run_error(
        r#"
        local a, b = {}, {}
        setmetatable(a, {__index = b})
        setmetatable(b, {__index = a})
        return a.x
    "#,
    );
    assert!(msg.contains("__index") || msg.contains("loop"));
}

#[test]
fn test_newindex() {
    run(r#"
        local store = {}
        local proxy = setmetatable({}, {
            __newindex = function(_, k, v) store[k] = v end,
            __index = store,
        })
        proxy.a = 10
        assert(rawget(proxy, "a") == nil)
        assert(proxy.a == 10)

        -- __newindex as a table redirects the write
        local target = {}
        local p2 = setmetatable({}, {__newindex = target})
        p2.k = "v"
        assert(target.k == "v" and rawget(p2, "k") == nil)
    "#);
}

#[test]
fn test_arith_metamethods() {
    run(r#"
        local meta = {
            __add = function(a, b) return a.v + b.v end,
            __sub = function(a, b) return a.v - b.v end,
            __mul = function(a, b) return a.v * b.v end,
            __unm = function(a) return -a.v end,
            __idiv = function(a, b) return a.v // b.v end,
        }
        local function box(v) return setmetatable({v = v}, meta) end
        assert(box(3) + box(4) == 7)
        assert(box(9) - box(5) == 4)
        assert(box(3) * box(5) == 15)
        assert(-box(8) == -8)
        assert(box(9) // box(2) == 4)
    "#);
}

#[test]
fn test_mixed_operand_metamethod() {
    run(r#"
        local meta
        meta = {__add = function(a, b)
            local av = type(a) == "table" and a.v or a
            local bv = type(b) == "table" and b.v or b
            return setmetatable({v = av + bv}, meta)
        end}
        local x = setmetatable({v = 5}, meta)
        assert((x + 1).v == 6)
        assert((1 + x).v == 6)   -- immediate on the left
        assert((x + 2.5).v == 7.5)
    "#);
}

#[test]
fn test_comparison_metamethods() {
    run(r#"
        local meta = {
            __lt = function(a, b) return a.v < b.v end,
            __le = function(a, b) return a.v <= b.v end,
            __eq = function(a, b) return a.v == b.v end,
        }
        local function box(v) return setmetatable({v = v}, meta) end
        assert(box(1) < box(2))
        assert(box(2) <= box(2))
        assert(box(3) > box(2))
        assert(box(1) == box(1))
        assert(box(1) ~= box(2))
        -- __eq only fires for same-kind operands
        assert(box(1) ~= 1)
    "#);
}

#[test]
fn test_call_metamethod() {
    run(r##"
        local callable = setmetatable({}, {__call = function(self, a, b)
            return a + b
        end})
        assert(callable(2, 3) == 5)
        assert(select("#", callable(1, 1)) == 1)
    "##);
    let msg = run_error("local t = {} t()");
    assert!(msg.contains("call"));
}

#[test]
fn test_len_and_concat_metamethods() {
    run(r#"
        local sized = setmetatable({}, {__len = function() return 42 end})
        assert(#sized == 42)

        local tagged = setmetatable({}, {__concat = function(a, b)
            return "tag"
        end})
        assert(("x" .. tagged) == "tag")
        assert((tagged .. "x") == "tag")
    "#);
}

#[test]
fn test_tostring_metamethod() {
    run(r#"
        local named = setmetatable({}, {__tostring = function() return "I AM" end})
        assert(tostring(named) == "I AM")
    "#);
}

#[test]
fn test_protected_metatable() {
    run(r#"
        local locked = setmetatable({}, {__metatable = "locked"})
        assert(getmetatable(locked) == "locked")
        local ok = pcall(setmetatable, locked, {})
        assert(ok == false)
    "#);
}

#[test]
fn test_self_call_through_index() {
    run(r#"
        local Account = {}
        Account.__index = Account
        function Account.new(balance)
            return setmetatable({balance = balance}, Account)
        end
        function Account:deposit(n)
            self.balance = self.balance + n
        end
        local acct = Account.new(100)
        acct:deposit(50)
        assert(acct.balance == 150)
    "#);
}
