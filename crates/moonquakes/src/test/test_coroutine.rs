// Coroutine engine: resume/yield pairing, status transitions, wrap,
// close, and yielding through protected calls.

use super::{run, run_values};
use crate::Value;

#[test]
fn test_yield_resume_values() {
    run(r#"
        local co = coroutine.create(function(x)
            local y = coroutine.yield(x + 1)
            return x + 2, y
        end)
        local ok, v1 = coroutine.resume(co, 10)
        assert(ok and v1 == 11)
        local ok2, v2, v3 = coroutine.resume(co, "back")
        assert(ok2 and v2 == 12 and v3 == "back")
        assert(coroutine.status(co) == "dead")
    "#);
}

#[test]
fn test_resume_yield_inverse() {
    run(r#"
        local co = coroutine.create(function(...)
            local got = {coroutine.yield(...)}
            assert(got[1] == "w1" and got[2] == "w2")
            return "end"
        end)
        local ok, a, b, c = coroutine.resume(co, "v1", "v2", "v3")
        assert(ok and a == "v1" and b == "v2" and c == "v3")
        local ok2, last = coroutine.resume(co, "w1", "w2")
        assert(ok2 and last == "end")
    "#);
}

#[test]
fn test_status_transitions() {
    run(r#"
        local main_co = coroutine.running()
        local co
        co = coroutine.create(function()
            assert(coroutine.status(co) == "running")
            assert(coroutine.status(main_co) == "normal")
            coroutine.yield()
        end)
        assert(coroutine.status(co) == "suspended")
        coroutine.resume(co)
        assert(coroutine.status(co) == "suspended")
        coroutine.resume(co)
        assert(coroutine.status(co) == "dead")

        local ok, err = coroutine.resume(co)
        assert(ok == false)
        assert(string.find(err, "dead") ~= nil)
    "#);
}

#[test]
fn test_wrap() {
    run(r#"
        local gen = coroutine.wrap(function(n)
            for i = 1, n do coroutine.yield(i) end
            return "fin"
        end)
        assert(gen(3) == 1)
        assert(gen() == 2)
        assert(gen() == 3)
        assert(gen() == "fin")
    "#);
}

#[test]
fn test_wrap_propagates_errors() {
    run(r#"
        local w = coroutine.wrap(function() error("inner") end)
        local ok, err = pcall(w)
        assert(ok == false)
        assert(string.find(err, "inner") ~= nil)
    "#);
}

#[test]
fn test_error_kills_coroutine() {
    run(r#"
        local co = coroutine.create(function() error("died") end)
        local ok, err = coroutine.resume(co)
        assert(ok == false)
        assert(string.find(err, "died") ~= nil)
        assert(coroutine.status(co) == "dead")
    "#);
}

#[test]
fn test_yield_inside_pcall() {
    run(r#"
        -- a protected frame must not block the yield
        local co = coroutine.create(function()
            local ok, v = pcall(function()
                local got = coroutine.yield("from-pcall")
                return got
            end)
            return ok, v
        end)
        local alive, first = coroutine.resume(co)
        assert(alive and first == "from-pcall")
        local alive2, ok, v = coroutine.resume(co, "answer")
        assert(alive2 and ok == true and v == "answer")
    "#);
}

#[test]
fn test_error_inside_pcall_inside_coroutine() {
    run(r#"
        local co = coroutine.create(function()
            local ok, err = pcall(error, "caught")
            assert(ok == false)
            return "survived"
        end)
        local alive, result = coroutine.resume(co)
        assert(alive and result == "survived")
    "#);
}

#[test]
fn test_yield_in_generic_for_iterator() {
    run(r#"
        local co = coroutine.create(function()
            for v in function() return coroutine.yield() end do
                -- unreachable: the iterator itself yields first
            end
        end)
        assert(coroutine.resume(co))
        assert(coroutine.status(co) == "suspended")
    "#);
}

#[test]
fn test_nested_coroutines() {
    run(r#"
        local inner = coroutine.create(function()
            coroutine.yield("inner-1")
            return "inner-done"
        end)
        local outer = coroutine.create(function()
            local _, v = coroutine.resume(inner)
            coroutine.yield("outer saw " .. v)
            local _, final = coroutine.resume(inner)
            return final
        end)
        local _, first = coroutine.resume(outer)
        assert(first == "outer saw inner-1")
        local _, last = coroutine.resume(outer)
        assert(last == "inner-done")
    "#);
}

#[test]
fn test_isyieldable() {
    run(r#"
        assert(coroutine.isyieldable() == false)   -- main thread
        local co = coroutine.create(function()
            assert(coroutine.isyieldable() == true)
        end)
        assert(coroutine.resume(co))
    "#);
}

#[test]
fn test_close_runs_pending_closers() {
    run(r#"
        local closed = false
        local co = coroutine.create(function()
            local _ <close> = setmetatable({}, {__close = function()
                closed = true
            end})
            coroutine.yield()
        end)
        coroutine.resume(co)
        assert(closed == false)
        assert(coroutine.close(co) == true)
        assert(closed == true)
        assert(coroutine.status(co) == "dead")
    "#);
}

#[test]
fn test_yield_from_main_fails() {
    let vs = run_values(
        r#"
        local ok, err = pcall(coroutine.yield)
        return ok, err
    "#,
    );
    assert_eq!(vs[0], Value::Boolean(false));
}

#[test]
fn test_select_over_resume() {
    run(r#"
        local co = coroutine.create(function(x)
            coroutine.yield(x + 1)
            return x + 2
        end)
        assert(select(2, coroutine.resume(co, 10)) == 11)
        assert(select(2, coroutine.resume(co)) == 12)
    "#);
}
