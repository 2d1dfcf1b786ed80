// The utf8 library: codepoint access over byte strings.

use crate::stdlib::{arg, bad_arg, check_int, check_str, new_lib, opt_int, set_field, NativeId, NativeResult};
use crate::value::Value;
use crate::vm::Lua;

pub(crate) fn open(lua: &mut Lua) {
    let t = new_lib(
        lua,
        "utf8",
        &[
            ("char", NativeId::Utf8Char),
            ("codepoint", NativeId::Utf8Codepoint),
            ("len", NativeId::Utf8Len),
            ("offset", NativeId::Utf8Offset),
            ("codes", NativeId::Utf8Codes),
        ],
    );
    let pat = lua.new_string_bytes(b"[\x00-\x7F\xC2-\xFD][\x80-\xBF]*");
    set_field(lua, t, "charpattern", pat);
}

fn encode(cp: u32, out: &mut Vec<u8>) {
    if cp < 0x80 {
        out.push(cp as u8);
    } else if cp < 0x800 {
        out.push(0xC0 | (cp >> 6) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else if cp < 0x10000 {
        out.push(0xE0 | (cp >> 12) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    } else {
        out.push(0xF0 | (cp >> 18) as u8);
        out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
        out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
        out.push(0x80 | (cp & 0x3F) as u8);
    }
}

/// Decodes one sequence starting at `i`; `None` on malformed input.
fn decode(s: &[u8], i: usize) -> Option<(u32, usize)> {
    let b0 = *s.get(i)? as u32;
    if b0 < 0x80 {
        return Some((b0, 1));
    }
    let len = match b0 {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => return None,
    };
    let mut cp = b0 & (0x7F >> len);
    for k in 1..len {
        let b = *s.get(i + k)? as u32;
        if b & 0xC0 != 0x80 {
            return None;
        }
        cp = (cp << 6) | (b & 0x3F);
    }
    Some((cp, len))
}

pub(crate) fn char_(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let mut out = Vec::new();
    for i in 0..args.len() {
        let cp = check_int(lua, args, i, "char")?;
        if !(0..=0x7FFF_FFFF).contains(&cp) {
            return Err(lua.rt_error(format!(
                "bad argument #{} to 'char' (value out of range)",
                i + 1
            )));
        }
        encode(cp as u32, &mut out);
    }
    Ok(vec![lua.new_string_bytes(&out)])
}

fn str_pos(pos: i64, len: usize) -> i64 {
    if pos >= 0 {
        pos
    } else if (-pos) as usize > len {
        0
    } else {
        len as i64 + pos + 1
    }
}

pub(crate) fn codepoint(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "codepoint")?;
    let i = str_pos(opt_int(lua, args, 1, "codepoint", 1)?, s.len());
    let j = str_pos(opt_int(lua, args, 2, "codepoint", i)?, s.len());
    if i < 1 || j > s.len() as i64 {
        return Err(lua.rt_error("bad argument #2 to 'codepoint' (out of bounds)"));
    }
    let mut out = Vec::new();
    let mut at = i as usize - 1;
    while at < j as usize {
        match decode(&s, at) {
            Some((cp, n)) => {
                out.push(Value::Integer(cp as i64));
                at += n;
            }
            None => return Err(lua.rt_error("invalid UTF-8 code")),
        }
    }
    Ok(out)
}

pub(crate) fn len(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "len")?;
    let i = str_pos(opt_int(lua, args, 1, "len", 1)?, s.len());
    let j = str_pos(opt_int(lua, args, 2, "len", -1)?, s.len());
    let mut at = (i.max(1) as usize).saturating_sub(1);
    let end = j.max(0) as usize;
    let mut count: i64 = 0;
    while at < end {
        match decode(&s, at) {
            Some((_, n)) => {
                count += 1;
                at += n;
            }
            None => {
                // report the failing position
                return Ok(vec![Value::Nil, Value::Integer(at as i64 + 1)]);
            }
        }
    }
    Ok(vec![Value::Integer(count)])
}

pub(crate) fn offset(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "offset")?;
    let n = check_int(lua, args, 1, "offset")?;
    let default_i = if n >= 0 { 1 } else { s.len() as i64 + 1 };
    let i = str_pos(opt_int(lua, args, 2, "offset", default_i)?, s.len());
    if i < 1 || i > s.len() as i64 + 1 {
        return Err(lua.rt_error("bad argument #3 to 'offset' (position out of bounds)"));
    }
    let is_cont = |at: usize| at < s.len() && s[at] & 0xC0 == 0x80;
    let mut at = i as usize - 1;
    if n == 0 {
        while at > 0 && is_cont(at) {
            at -= 1;
        }
        return Ok(vec![Value::Integer(at as i64 + 1)]);
    }
    if is_cont(at) {
        return Err(lua.rt_error("initial position is a continuation byte"));
    }
    let mut n = n;
    if n > 0 {
        n -= 1;
        while n > 0 && at < s.len() {
            at += 1;
            while is_cont(at) {
                at += 1;
            }
            n -= 1;
        }
        if n > 0 {
            return Ok(vec![Value::Nil]);
        }
    } else {
        while n < 0 && at > 0 {
            at -= 1;
            while at > 0 && is_cont(at) {
                at -= 1;
            }
            n += 1;
        }
        if n < 0 {
            return Ok(vec![Value::Nil]);
        }
    }
    Ok(vec![Value::Integer(at as i64 + 1)])
}

pub(crate) fn codes(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = arg(args, 0);
    if !s.is_string() {
        return Err(bad_arg(lua, 0, "codes", "string", s));
    }
    let iter = lua.new_native(NativeId::Utf8CodesIter);
    Ok(vec![iter, s, Value::Integer(0)])
}

pub(crate) fn codes_iter(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "codes")?;
    let prev = check_int(lua, args, 1, "codes")?;
    let mut at = prev.max(0) as usize;
    // skip the sequence we already delivered
    if at > 0 {
        match decode(&s, at - 1) {
            Some((_, n)) => at = at - 1 + n,
            None => return Err(lua.rt_error("invalid UTF-8 code")),
        }
    }
    if at >= s.len() {
        return Ok(vec![Value::Nil]);
    }
    match decode(&s, at) {
        Some((cp, _)) => Ok(vec![Value::Integer(at as i64 + 1), Value::Integer(cp as i64)]),
        None => Err(lua.rt_error("invalid UTF-8 code")),
    }
}
