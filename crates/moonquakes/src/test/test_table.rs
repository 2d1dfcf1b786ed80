// Table semantics and the table library.

use super::{run, run_error};

#[test]
fn test_sequence_length() {
    run(r#"
        local t = {}
        for i = 1, 100 do t[i] = i * i end
        assert(#t == 100)
        t[101] = 1
        assert(#t == 101)
    "#);
}

#[test]
fn test_constructor_forms() {
    run(r#"
        local t = {1, 2, 3, x = "a", ["y z"] = "b", [10] = "c"}
        assert(t[1] == 1 and t[3] == 3)
        assert(t.x == "a")
        assert(t["y z"] == "b")
        assert(t[10] == "c")

        local function multi() return 4, 5, 6 end
        local m = {0, multi()}
        assert(#m == 4 and m[4] == 6)

        local single = {(multi())}
        assert(#single == 1)

        -- more than one SETLIST batch
        local big = {}
        local src = {}
        for i = 1, 120 do src[i] = "v" .. i end
        assert(#src == 120 and src[120] == "v120")
    "#);
}

#[test]
fn test_nil_and_nan_keys() {
    let msg = run_error("local t = {}; t[nil] = 1");
    assert!(msg.contains("nil"));
    let msg = run_error("local t = {}; t[0/0] = 1");
    assert!(msg.contains("NaN"));
    run(r#"
        local t = {}
        assert(t[nil] == nil)   -- reading a nil key is fine
    "#);
}

#[test]
fn test_float_keys_normalize() {
    run(r#"
        local t = {}
        t[1.0] = "one"
        assert(t[1] == "one")
        t[2] = "two"
        assert(t[2.0] == "two")
        t[0.5] = "half"
        assert(t[0.5] == "half" and t[1] == "one")
    "#);
}

#[test]
fn test_insert_remove() {
    run(r#"
        local t = {1, 2, 3}
        table.insert(t, 4)
        assert(#t == 4 and t[4] == 4)
        table.insert(t, 1, 0)
        assert(t[1] == 0 and t[5] == 4)
        local popped = table.remove(t)
        assert(popped == 4 and #t == 4)
        local head = table.remove(t, 1)
        assert(head == 0 and t[1] == 1)
    "#);
}

#[test]
fn test_concat_unpack_pack() {
    run(r#"
        assert(table.concat({1, 2, 3}, "-") == "1-2-3")
        assert(table.concat({}) == "")
        assert(table.concat({"a", "b"}, "", 2, 2) == "b")

        local a, b, c = table.unpack({10, 20, 30})
        assert(a == 10 and b == 20 and c == 30)
        local x, y = table.unpack({1, 2, 3}, 2, 3)
        assert(x == 2 and y == 3)

        local packed = table.pack("p", "q")
        assert(packed.n == 2 and packed[1] == "p" and packed[2] == "q")
    "#);
}

#[test]
fn test_sort() {
    run(r#"
        local t = {5, 2, 8, 1, 9, 3}
        table.sort(t)
        for i = 1, #t - 1 do assert(t[i] <= t[i + 1]) end

        table.sort(t, function(a, b) return a > b end)
        for i = 1, #t - 1 do assert(t[i] >= t[i + 1]) end

        local words = {"pear", "apple", "mango"}
        table.sort(words)
        assert(words[1] == "apple" and words[3] == "pear")
    "#);
}

#[test]
fn test_sparse_arrays_move_to_hash() {
    run(r#"
        local t = {}
        t[1] = "a"
        t[1000000] = "far"
        assert(t[1] == "a" and t[1000000] == "far")
        t[1000000] = nil
        assert(t[1000000] == nil)
    "#);
}

#[test]
fn test_hash_part_growth_and_deletion() {
    run(r#"
        local t = {}
        for i = 1, 200 do t["k" .. i] = i end
        for i = 1, 200, 2 do t["k" .. i] = nil end
        local remaining = 0
        for _ in pairs(t) do remaining = remaining + 1 end
        assert(remaining == 100)
        assert(t.k2 == 2 and t.k1 == nil)
    "#);
}

#[test]
fn test_assign_nil_during_traversal() {
    run(r#"
        local t = {a = 1, b = 2, c = 3, d = 4}
        local visited = 0
        for k in pairs(t) do
            visited = visited + 1
            t[k] = nil   -- clearing the current key is allowed
        end
        assert(visited == 4)
        assert(next(t) == nil)
    "#);
}
