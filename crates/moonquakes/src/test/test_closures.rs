// Closures, upvalue capture/sharing and tail calls.

use super::run;

#[test]
fn test_counter_independence() {
    run(r#"
        local function make()
            local n = 0
            return function() n = n + 1 return n end
        end
        local c1, c2 = make(), make()
        assert(c1() == 1)
        assert(c1() == 2)
        assert(c2() == 1)   -- separate upvalue vectors
        assert(c1() == 3)
    "#);
}

#[test]
fn test_shared_upvalue() {
    run(r#"
        local function pair()
            local n = 0
            local function inc() n = n + 1 end
            local function get() return n end
            return inc, get
        end
        local inc, get = pair()
        inc(); inc()
        assert(get() == 2)   -- both closures share one cell
    "#);
}

#[test]
fn test_loop_captures_are_fresh() {
    run(r#"
        local fs = {}
        for i = 1, 3 do
            fs[i] = function() return i end
        end
        assert(fs[1]() == 1 and fs[2]() == 2 and fs[3]() == 3)

        local gs = {}
        local j = 1
        while j <= 3 do
            local v = j * 10
            gs[j] = function() return v end
            j = j + 1
        end
        assert(gs[1]() == 10 and gs[3]() == 30)
    "#);
}

#[test]
fn test_upvalue_through_levels() {
    run(r#"
        local x = "outer"
        local function level1()
            local function level2()
                local function level3()
                    return x
                end
                return level3()
            end
            return level2()
        end
        assert(level1() == "outer")
        x = "changed"
        assert(level1() == "changed")
    "#);
}

#[test]
fn test_closure_survives_scope() {
    run(r#"
        local f
        do
            local hidden = {secret = 99}
            f = function() return hidden.secret end
        end
        collectgarbage()
        assert(f() == 99)   -- closed upvalue keeps the table alive
    "#);
}

#[test]
fn test_tail_call_depth() {
    run(r#"
        local function loop(n)
            if n == 0 then return "done" end
            return loop(n - 1)
        end
        assert(loop(1000000) == "done")
    "#);
}

#[test]
fn test_mutual_tail_calls() {
    run(r#"
        local odd, even
        function odd(n) if n == 0 then return false end return even(n - 1) end
        function even(n) if n == 0 then return true end return odd(n - 1) end
        assert(even(100000))
        assert(not even(100001))
    "#);
}

#[test]
fn test_recursion_without_tail_position() {
    run(r#"
        local function fib(n)
            if n < 2 then return n end
            return fib(n - 1) + fib(n - 2)
        end
        assert(fib(15) == 610)
    "#);
}

#[test]
fn test_self_reference_local_function() {
    run(r#"
        local function fact(n)
            if n <= 1 then return 1 end
            return n * fact(n - 1)   -- sees itself through its own local
        end
        assert(fact(6) == 720)
    "#);
}
