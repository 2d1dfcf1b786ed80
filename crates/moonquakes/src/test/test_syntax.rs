// Control flow, scoping and the statement grammar.

use super::{run, run_error};
use crate::{Lua, Value};

#[test]
fn test_if_chains() {
    run(r#"
        local function pick(n)
            if n < 0 then return "neg"
            elseif n == 0 then return "zero"
            elseif n < 10 then return "small"
            else return "big" end
        end
        assert(pick(-1) == "neg")
        assert(pick(0) == "zero")
        assert(pick(5) == "small")
        assert(pick(50) == "big")
    "#);
}

#[test]
fn test_while_and_repeat() {
    run(r#"
        local n, i = 0, 1
        while i <= 10 do n = n + i; i = i + 1 end
        assert(n == 55)

        local count = 0
        repeat count = count + 1 until count >= 3
        assert(count == 3)

        -- until sees body locals
        local x = 0
        repeat
            local done = x >= 2
            x = x + 1
        until done
        assert(x == 3)
    "#);
}

#[test]
fn test_numeric_for() {
    run(r#"
        local sum = 0
        for i = 1, 10 do sum = sum + i end
        assert(sum == 55)

        local down = {}
        for i = 3, 1, -1 do down[#down + 1] = i end
        assert(down[1] == 3 and down[3] == 1)

        local never = true
        for i = 1, 0 do never = false end
        assert(never)

        local fsum = 0.0
        for x = 0.5, 2.5, 0.5 do fsum = fsum + x end
        assert(fsum == 7.5)

        -- loop variable is per-iteration and does not leak
        for i = 1, 3 do local _ = i end
        assert(i == nil)
    "#);
    let msg = run_error("for i = 1, 10, 0 do end");
    assert!(msg.contains("'for' step is zero"));
}

#[test]
fn test_numeric_for_near_overflow() {
    run(r#"
        local steps = 0
        for i = math.maxinteger - 2, math.maxinteger do
            steps = steps + 1
        end
        assert(steps == 3)
    "#);
}

#[test]
fn test_generic_for() {
    run(r#"
        local t = {"a", "b", "c"}
        local joined = ""
        for _, v in ipairs(t) do joined = joined .. v end
        assert(joined == "abc")

        local keys = {}
        for k in pairs({x = 1, y = 2}) do keys[k] = true end
        assert(keys.x and keys.y)

        -- custom stateless iterator
        local function range(n)
            return function(_, i)
                i = i + 1
                if i <= n then return i end
            end, nil, 0
        end
        local total = 0
        for i in range(4) do total = total + i end
        assert(total == 10)
    "#);
}

#[test]
fn test_break_and_goto() {
    run(r#"
        local found
        for i = 1, 100 do
            if i * i > 50 then found = i break end
        end
        assert(found == 8)

        -- goto over a loop
        local log = {}
        for i = 1, 3 do
            if i == 2 then goto continue end
            log[#log + 1] = i
            ::continue::
        end
        assert(#log == 2 and log[1] == 1 and log[2] == 3)
    "#);
    let msg = run_error("goto nowhere");
    assert!(msg.contains("nowhere"));
    let msg = run_error("break");
    assert!(msg.contains("break"));
}

#[test]
fn test_multiple_assignment() {
    run(r#"
        local a, b, c = 1, 2
        assert(a == 1 and b == 2 and c == nil)

        a, b = b, a
        assert(a == 2 and b == 1)

        local t = {}
        t.x, t.y = 10, 20
        assert(t.x == 10 and t.y == 20)

        local function three() return 1, 2, 3 end
        local p, q, r = three()
        assert(p == 1 and q == 2 and r == 3)

        local u, v = three(), 10
        assert(u == 1 and v == 10)
    "#);
}

#[test]
fn test_varargs() {
    run(r##"
        local function count(...) return select("#", ...) end
        assert(count() == 0)
        assert(count(1, nil, 3) == 3)

        local function tail(...) return ... end
        local a, b = tail(7, 8)
        assert(a == 7 and b == 8)

        local function mid(...)
            local t = {...}
            return #t
        end
        assert(mid(1, 2, 3) == 3)

        -- vararg truncates to one value mid-list
        local function pair(...) return {...}, "x" end
        local t1 = pair(1, 2)
        assert(#t1 == 2)
    "##);
}

#[test]
fn test_local_attribs() {
    run(r#"
        local ok <const> = 42
        assert(ok == 42)
    "#);
    let msg = run_error(
        r#"
        local fixed <const> = 1
        fixed = 2
    "#,
    );
    assert!(msg.contains("const"));
}

#[test]
fn test_method_definitions() {
    run(r#"
        local obj = {items = {}}
        function obj:add(x)
            self.items[#self.items + 1] = x
            return self
        end
        obj:add(1):add(2)
        assert(#obj.items == 2)

        local lib = {}
        function lib.helper() return "free" end
        assert(lib.helper() == "free")

        local nested = {inner = {}}
        function nested.inner.deep() return "deep" end
        assert(nested.inner.deep() == "deep")
    "#);
}

#[test]
fn test_long_strings_and_comments() {
    run(r#"
        local s = [[line1
line2]]
        assert(s == "line1\nline2")
        local lv = [==[has ]] inside]==]
        assert(lv == "has ]] inside")
        --[[ a long
             comment ]]
        assert(true)
    "#);
}

#[test]
fn test_syntax_errors_report_line() {
    let mut lua = Lua::new();
    lua.open_libs();
    let err = lua.execute_string("local x =\n= 2").unwrap_err();
    assert_eq!(err.status, crate::Status::ErrSyntax);

    let err = lua.execute_string("return 1 +").unwrap_err();
    assert_eq!(err.status, crate::Status::ErrSyntax);

    // the failed compile leaves the runtime usable
    let vs = lua.execute_string("return 1 + 1").unwrap();
    assert_eq!(vs, vec![Value::Integer(2)]);
}
