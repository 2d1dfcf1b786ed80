// The string library and string interning behavior.

use super::run;
use crate::{Lua, Value};

#[test]
fn test_basics() {
    run(r#"
        assert(string.len("hello") == 5)
        assert(("hello"):len() == 5)      -- method syntax via the shared metatable
        assert(string.sub("hello", 2, 4) == "ell")
        assert(string.sub("hello", -3) == "llo")
        assert(string.sub("hello", 2) == "ello")
        assert(string.sub("hello", 10) == "")
        assert(string.upper("mixed42") == "MIXED42")
        assert(string.lower("MiXeD") == "mixed")
        assert(string.rep("ab", 3) == "ababab")
        assert(string.rep("x", 3, "-") == "x-x-x")
        assert(string.rep("x", 0) == "")
        assert(string.reverse("abc") == "cba")
    "#);
}

#[test]
fn test_byte_char() {
    run(r#"
        assert(string.byte("A") == 65)
        local a, b = string.byte("AB", 1, 2)
        assert(a == 65 and b == 66)
        assert(string.char(104, 105) == "hi")
        assert(string.byte("x", 2) == nil)
    "#);
}

#[test]
fn test_format() {
    run(r#"
        assert(string.format("%d", 42) == "42")
        assert(string.format("%5d", 42) == "   42")
        assert(string.format("%-5d|", 42) == "42   |")
        assert(string.format("%05d", 42) == "00042")
        assert(string.format("%x", 255) == "ff")
        assert(string.format("%X", 255) == "FF")
        assert(string.format("%o", 8) == "10")
        assert(string.format("%c", 65) == "A")
        assert(string.format("%.2f", 3.14159) == "3.14")
        assert(string.format("%s=%s", "k", 10) == "k=10")
        assert(string.format("%.3s", "abcdef") == "abc")
        assert(string.format("%%") == "%")
        assert(string.format("%e", 1500.0) == "1.500000e+03")
        assert(string.format("%g", 0.5) == "0.5")
        assert(string.format("%q", 'he said "hi"\n') == '"he said \\"hi\\"\\n"')
    "#);
}

#[test]
fn test_find_and_match() {
    run(r#"
        assert(string.find("hello world", "world") == 7)
        local s, e = string.find("hello", "ll")
        assert(s == 3 and e == 4)
        assert(string.find("hello", "xyz") == nil)
        assert(string.find("a.b", ".", 1, true) == 2)  -- plain search

        assert(string.match("hello 42 end", "%d+") == "42")
        assert(string.match("key=value", "(%w+)=(%w+)") == "key")
        local k, v = string.match("key=value", "(%w+)=(%w+)")
        assert(k == "key" and v == "value")
        assert(string.match("abc", "^a") == "a")
        assert(string.match("abc", "^b") == nil)
        assert(string.match("abc", "c$") == "c")
        assert(string.match("  trim  ", "^%s*(.-)%s*$") == "trim")
    "#);
}

#[test]
fn test_pattern_classes() {
    run(r#"
        assert(string.match("a1 b2", "%a%d") == "a1")
        assert(string.match("foo_bar", "[%a_]+") == "foo_bar")
        assert(string.match("x!y", "%p") == "!")
        assert(string.match("deadBEEF", "%x+") == "deadBEEF")
        assert(string.match("no digits", "%D+") == "no digits")
        assert(string.match("[bracket]", "%[(%a+)%]") == "bracket")
        assert(string.match("(nested (deep))", "%b()") == "(nested (deep))")
        assert(string.match("THE end", "%f[%l]%l+") == "end")
        assert(string.match("aaa", "(a)%1") == "a")
    "#);
}

#[test]
fn test_gmatch() {
    run(r#"
        local words = {}
        for w in string.gmatch("one two three", "%a+") do
            words[#words + 1] = w
        end
        assert(#words == 3 and words[2] == "two")

        local pairs_found = {}
        for k, v in string.gmatch("a=1,b=2", "(%w+)=(%w+)") do
            pairs_found[k] = v
        end
        assert(pairs_found.a == "1" and pairs_found.b == "2")
    "#);
}

#[test]
fn test_gsub() {
    run(r#"
        local s, n = string.gsub("hello world", "o", "0")
        assert(s == "hell0 w0rld" and n == 2)

        local once = string.gsub("aaa", "a", "b", 1)
        assert(once == "baa")

        local swapped = string.gsub("key=value", "(%w+)=(%w+)", "%2=%1")
        assert(swapped == "value=key")

        local via_table = string.gsub("$name", "%$(%w+)", {name = "moon"})
        assert(via_table == "moon")

        local via_fn = string.gsub("1 2 3", "%d", function(d)
            return tostring(tonumber(d) * 2)
        end)
        assert(via_fn == "2 4 6")

        -- nil replacement keeps the original match
        local kept = string.gsub("abc", "%a", function() return nil end)
        assert(kept == "abc")
    "#);
}

#[test]
fn test_short_strings_intern() {
    let mut lua = Lua::new();
    lua.open_libs();
    let a = lua.new_string("interned");
    let b = lua.new_string("interned");
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => assert_eq!(x, y),
        _ => panic!("expected strings"),
    }
    // long strings allocate separately but still compare equal
    let long = "x".repeat(100);
    let l1 = lua.new_string(&long);
    let l2 = lua.new_string(&long);
    match (l1, l2) {
        (Value::Str(x), Value::Str(y)) => {
            assert_ne!(x, y);
            assert!(lua.raw_equals(l1, l2));
        }
        _ => panic!("expected strings"),
    }
}

#[test]
fn test_long_string_table_keys() {
    run(r#"
        local k1 = string.rep("long", 20)
        local k2 = string.rep("long", 20)
        local t = {}
        t[k1] = "stored"
        assert(t[k2] == "stored")   -- equal content, equal key
    "#);
}
