// To-be-closed variables: scope exit, LIFO ordering, error paths.

use super::{run, run_error};

#[test]
fn test_close_on_scope_exit() {
    run(r#"
        local done = false
        do
            local _ <close> = setmetatable({}, {__close = function() done = true end})
        end
        assert(done == true)
    "#);
}

#[test]
fn test_close_lifo_order() {
    run(r#"
        local order = {}
        local function closer(tag)
            return setmetatable({}, {__close = function()
                order[#order + 1] = tag
            end})
        end
        do
            local a <close> = closer("a")
            local b <close> = closer("b")
            local c <close> = closer("c")
        end
        assert(#order == 3)
        assert(order[1] == "c" and order[2] == "b" and order[3] == "a")
    "#);
}

#[test]
fn test_close_on_break_and_return() {
    run(r#"
        local closed = 0
        local function closer()
            return setmetatable({}, {__close = function() closed = closed + 1 end})
        end
        for i = 1, 3 do
            local _ <close> = closer()
            if i == 2 then break end
        end
        assert(closed == 2)

        local function leaves()
            local _ <close> = closer()
            return "left"
        end
        assert(leaves() == "left")
        assert(closed == 3)
    "#);
}

#[test]
fn test_close_receives_error_object() {
    run(r#"
        local received
        local ok = pcall(function()
            local _ <close> = setmetatable({}, {__close = function(_, err)
                received = err
            end})
            error("blown")
        end)
        assert(ok == false)
        assert(string.find(received, "blown") ~= nil)
    "#);
}

#[test]
fn test_close_false_is_ignored() {
    run(r#"
        do
            local a <close> = false    -- allowed and ignored
            local b <close> = nil
        end
        assert(true)
    "#);
}

#[test]
fn test_non_closable_value_rejected() {
    let msg = run_error(
        r#"
        local x <close> = {}
    "#,
    );
    assert!(msg.contains("non-closable"));
}

#[test]
fn test_error_in_close_propagates() {
    run(r#"
        local ok, err = pcall(function()
            local _ <close> = setmetatable({}, {__close = function()
                error("close failed")
            end})
        end)
        assert(ok == false)
        assert(string.find(err, "close failed") ~= nil)
    "#);
}

#[test]
fn test_generic_for_closing_slot() {
    run(r#"
        local released = false
        local function iter_with_resource()
            local resource = setmetatable({}, {__close = function()
                released = true
            end})
            local i = 0
            return function()
                i = i + 1
                if i <= 2 then return i end
            end, nil, nil, resource
        end
        for v in iter_with_resource() do end
        assert(released == true)
    "#);
}
