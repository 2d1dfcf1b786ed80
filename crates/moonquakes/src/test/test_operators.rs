// Arithmetic, comparison, bitwise and concatenation semantics.

use super::{run, run_error};

#[test]
fn test_integer_float_split() {
    run(r#"
        assert(math.type(1) == "integer")
        assert(math.type(1.0) == "float")
        assert(1 == 1.0)            -- cross-subtype compare by value
        assert(math.type(3 + 4) == "integer")
        assert(math.type(3 + 4.0) == "float")
        assert(math.type(7 / 2) == "float")   -- / always floats
        assert(7 / 2 == 3.5)
        assert(7 // 2 == 3)
        assert(math.type(7 // 2) == "integer")
        assert(math.type(2 ^ 2) == "float")   -- ^ always floats
        assert(2 ^ 10 == 1024.0)
    "#);
}

#[test]
fn test_floor_division_and_modulo() {
    run(r#"
        -- quotient-remainder identity and divisor-signed remainder
        local cases = {
            {7, 3}, {-7, 3}, {7, -3}, {-7, -3}, {9, 2}, {-9, 2}, {1, 5},
        }
        for _, c in ipairs(cases) do
            local a, b = c[1], c[2]
            assert((a // b) * b + (a % b) == a)
            local r = a % b
            assert(r == 0 or (r > 0) == (b > 0))
        end
        assert(-7 % 3 == 2)
        assert(7 % -3 == -2)
        assert(-7 // 3 == -3)
    "#);
}

#[test]
fn test_integer_wrapping() {
    run(r#"
        assert(math.maxinteger + 1 == math.mininteger)
        assert(math.mininteger - 1 == math.maxinteger)
        assert(-math.mininteger == math.mininteger)
    "#);
}

#[test]
fn test_division_by_zero() {
    run(r#"
        assert(1 / 0 == math.huge)
        assert(-1 / 0 == -math.huge)
        local nan = 0 / 0
        assert(nan ~= nan)
    "#);
    let msg = run_error("return 1 // 0");
    assert!(msg.contains("n//0"));
    let msg = run_error("return 1 % 0");
    assert!(msg.contains("n%0"));
}

#[test]
fn test_equality_reflexive() {
    run(r#"
        local values = {nil, true, false, 0, 1, -1, 0.5, "x", "", {}, print}
        for i = 1, 11 do
            local v = values[i]
            assert(v == v)
        end
        local nan = 0 / 0
        assert(nan ~= nan)
        assert(0.0 == -0.0)
    "#);
}

#[test]
fn test_comparisons() {
    run(r#"
        assert(1 < 2)
        assert(2 <= 2)
        assert(not (2 < 2))
        assert(1 < 1.5)
        assert(1.5 < 2)
        assert("a" < "b")
        assert("abc" < "abd")
        assert("ab" < "abc")
        assert(2 > 1)
        assert(2 >= 2)
        -- huge integers against floats compare exactly
        assert(math.maxinteger < math.huge)
        assert(math.mininteger > -math.huge)
    "#);
    let msg = run_error("return 1 < 'x'");
    assert!(msg.contains("compare"));
}

#[test]
fn test_bitwise() {
    run(r#"
        assert(0xF0 & 0x0F == 0)
        assert(0xF0 | 0x0F == 0xFF)
        assert(0xFF ~ 0x0F == 0xF0)
        assert(~0 == -1)
        assert(1 << 4 == 16)
        assert(256 >> 4 == 16)
        assert(1 << 64 == 0)          -- shifts past width give zero
        assert(1 >> 64 == 0)
        assert(1 << -1 == 0)          -- negative shift reverses
        assert(2 >> -1 == 4)
        assert(3.0 & 1 == 1)          -- exact floats coerce
    "#);
    let msg = run_error("return 1.5 & 1");
    assert!(msg.contains("no integer representation"));
}

#[test]
fn test_concat() {
    run(r#"
        assert("a" .. "b" == "ab")
        assert("n=" .. 5 == "n=5")
        assert(1 .. 2 == "12")
        assert("pi~" .. 1.5 == "pi~1.5")
        local parts = "a" .. "b" .. "c" .. "d"
        assert(parts == "abcd")
    "#);
    let msg = run_error("return 'a' .. {}");
    assert!(msg.contains("concatenate"));
}

#[test]
fn test_string_number_coercion() {
    run(r#"
        assert("10" + 5 == 15)
        assert("0x10" * 1 == 16)
        assert("3" * "4" == 12)
    "#);
}

#[test]
fn test_not_and_truthiness() {
    run(r#"
        assert(not nil)
        assert(not false)
        assert(not not 0)          -- zero is truthy
        assert(not not "")
        local t = false
        assert((t and 1) == false)
        assert((t or 2) == 2)
        assert((nil and 1) == nil)
        assert((1 and 2) == 2)
        assert((1 or 2) == 1)
    "#);
}

#[test]
fn test_length_operator() {
    run(r#"
        assert(#"" == 0)
        assert(#"abc" == 3)
        assert(#{} == 0)
        assert(#{1, 2, 3} == 3)
    "#);
}
