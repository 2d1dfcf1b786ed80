// Tests for basic library functions.

use super::{run, run_error, run_values};
use crate::Value;

#[test]
fn test_type() {
    run(r#"
        assert(type(nil) == "nil")
        assert(type(true) == "boolean")
        assert(type(42) == "number")
        assert(type(3.14) == "number")
        assert(type("hello") == "string")
        assert(type({}) == "table")
        assert(type(print) == "function")
        assert(type(coroutine.create(print)) == "thread")
    "#);
}

#[test]
fn test_tostring() {
    run(r#"
        assert(tostring(123) == "123")
        assert(tostring(1.5) == "1.5")
        assert(tostring(120.0) == "120.0")
        assert(tostring(true) == "true")
        assert(tostring(nil) == "nil")
        assert(type(tostring({})) == "string")
    "#);
}

#[test]
fn test_tonumber() {
    run(r#"
        assert(tonumber("123") == 123)
        assert(tonumber("3.14") == 3.14)
        assert(tonumber("0x10") == 16)
        assert(tonumber("  42  ") == 42)
        assert(tonumber("FF", 16) == 255)
        assert(tonumber("z") == nil)
        assert(tonumber("10", 2) == 2)
        assert(math.type(tonumber("1e2")) == "float")
    "#);
}

#[test]
fn test_assert_and_error() {
    run(r#"
        local a, b = assert(1, "two")
        assert(a == 1 and b == "two")
    "#);
    let msg = run_error(r#"error("boom")"#);
    assert!(msg.contains("boom"));
    let msg = run_error(r#"assert(false, "sunk")"#);
    assert!(msg.contains("sunk"));
}

#[test]
fn test_pcall() {
    run(r#"
        local ok, err = pcall(function() error("boom") end)
        assert(ok == false)
        assert(string.find(err, "boom") ~= nil)

        local ok2, a, b = pcall(function() return 1, 2 end)
        assert(ok2 == true and a == 1 and b == 2)

        -- non-string error objects come back untouched
        local ok3, obj = pcall(function() error({code = 7}) end)
        assert(ok3 == false and obj.code == 7)

        -- nested protection
        local ok4 = pcall(function()
            local inner_ok = pcall(error)
            assert(inner_ok == false)
            error("outer")
        end)
        assert(ok4 == false)
    "#);
}

#[test]
fn test_xpcall() {
    run(r#"
        local ok, res = xpcall(function() error("original") end, function(e)
            return "handled: " .. e
        end)
        assert(ok == false)
        assert(string.find(res, "handled: ") == 1)
        assert(string.find(res, "original") ~= nil)
    "#);
}

#[test]
fn test_select() {
    run(r##"
        assert(select("#", 1, 2, 3) == 3)
        assert(select("#") == 0)
        assert(select(2, "a", "b", "c") == "b")
        local x, y = select(2, "a", "b", "c")
        assert(x == "b" and y == "c")
        assert(select(-1, "a", "b", "c") == "c")
    "##);
}

#[test]
fn test_raw_access() {
    run(r#"
        local t = setmetatable({}, {__index = function() return "meta" end,
                                    __newindex = function() error("blocked") end})
        assert(t.missing == "meta")
        assert(rawget(t, "missing") == nil)
        rawset(t, "k", 1)
        assert(rawget(t, "k") == 1)
        assert(rawequal(t, t))
        assert(not rawequal(t, {}))
        assert(rawlen({1, 2, 3}) == 3)
        assert(rawlen("abcd") == 4)
    "#);
}

#[test]
fn test_ipairs_pairs_next() {
    run(r#"
        local t = {10, 20, 30, x = 1, y = 2}
        local sum = 0
        for i, v in ipairs(t) do sum = sum + i * v end
        assert(sum == 10 + 40 + 90)

        local seen = 0
        for k, v in pairs(t) do seen = seen + 1 end
        assert(seen == 5)

        local k, v = next({}, nil)
        assert(k == nil and v == nil)
    "#);
}

#[test]
fn test_load() {
    run(r#"
        local f = load("return 1 + 2")
        assert(f() == 3)

        local bad, msg = load("return +")
        assert(bad == nil and type(msg) == "string")

        -- custom environment
        local env = {value = 42}
        local g = load("return value", "=chunk", "t", env)
        assert(g() == 42)

        -- reader function
        local parts = {"return ", "7 * ", "6"}
        local i = 0
        local r = load(function()
            i = i + 1
            return parts[i]
        end)
        assert(r() == 42)
    "#);
}

#[test]
fn test_recursive_global_function() {
    let vs = run_values(
        r#"
        function f(n)
            if n <= 1 then return 1 end
            return n * _ENV.f(n - 1)
        end
        return f(5)
    "#,
    );
    assert_eq!(vs, vec![Value::Integer(120)]);
}

#[test]
fn test_fizzbuzz() {
    run(r#"
        local out = {}
        for i = 1, 15 do
            if i % 15 == 0 then out[#out + 1] = "FizzBuzz"
            elseif i % 3 == 0 then out[#out + 1] = "Fizz"
            elseif i % 5 == 0 then out[#out + 1] = "Buzz"
            else out[#out + 1] = tostring(i) end
        end
        local expected = "1\n2\nFizz\n4\nBuzz\nFizz\n7\n8\nFizz\nBuzz\n11\nFizz\n13\n14\nFizzBuzz"
        assert(table.concat(out, "\n") == expected)
    "#);
}

#[test]
fn test_warn_toggles() {
    run(r#"
        warn("@on")
        warn("@off")
        warn("never printed while off")
    "#);
}
