// The string library. Strings are byte arrays; indices are 1-based and
// may be negative to count from the end.

use crate::gc::FunctionBody;
use crate::stdlib::pattern::{self, Capture};
use crate::stdlib::{
    arg, bad_arg, check_int, check_str, new_lib, opt_int, set_field, NativeId, NativeResult,
};
use crate::value::{int_to_display, Mm, Value};
use crate::vm::{dump_proto, Lua};

pub(crate) fn open(lua: &mut Lua) {
    let t = new_lib(
        lua,
        "string",
        &[
            ("len", NativeId::StrLen),
            ("sub", NativeId::StrSub),
            ("upper", NativeId::StrUpper),
            ("lower", NativeId::StrLower),
            ("rep", NativeId::StrRep),
            ("reverse", NativeId::StrReverse),
            ("byte", NativeId::StrByte),
            ("char", NativeId::StrChar),
            ("format", NativeId::StrFormat),
            ("find", NativeId::StrFind),
            ("match", NativeId::StrMatch),
            ("gmatch", NativeId::StrGmatch),
            ("gsub", NativeId::StrGsub),
            ("dump", NativeId::StrDump),
        ],
    );
    // every string indexes through this shared metatable
    let meta = lua.heap.new_table(0, 1);
    set_field(lua, meta, Mm::Index.key(), Value::Table(t));
    lua.string_meta = Some(meta);
}

/// Translates a 1-based, possibly negative index to a byte offset.
fn abs_index(pos: i64, len: usize) -> i64 {
    if pos >= 0 {
        pos
    } else if (-pos) as usize > len {
        0
    } else {
        len as i64 + pos + 1
    }
}

pub(crate) fn len(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "len")?;
    Ok(vec![Value::Integer(s.len() as i64)])
}

pub(crate) fn sub(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "sub")?;
    let len = s.len();
    let mut i = abs_index(opt_int(lua, args, 1, "sub", 1)?, len);
    let mut j = abs_index(opt_int(lua, args, 2, "sub", -1)?, len);
    if i < 1 {
        i = 1;
    }
    if j > len as i64 {
        j = len as i64;
    }
    let out: &[u8] = if i > j {
        &[]
    } else {
        &s[i as usize - 1..j as usize]
    };
    Ok(vec![lua.new_string_bytes(out)])
}

pub(crate) fn upper(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "upper")?;
    let out: Vec<u8> = s.iter().map(|b| b.to_ascii_uppercase()).collect();
    Ok(vec![lua.new_string_bytes(&out)])
}

pub(crate) fn lower(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "lower")?;
    let out: Vec<u8> = s.iter().map(|b| b.to_ascii_lowercase()).collect();
    Ok(vec![lua.new_string_bytes(&out)])
}

pub(crate) fn rep(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "rep")?;
    let n = check_int(lua, args, 1, "rep")?;
    let sep = if arg(args, 2).is_nil() {
        Vec::new()
    } else {
        check_str(lua, args, 2, "rep")?.to_vec()
    };
    if n <= 0 {
        return Ok(vec![lua.new_string_bytes(b"")]);
    }
    let total = (s.len() + sep.len())
        .checked_mul(n as usize)
        .unwrap_or(usize::MAX);
    if total > (1 << 30) {
        return Err(lua.rt_error("resulting string too large"));
    }
    let mut out = Vec::with_capacity(total);
    for k in 0..n {
        if k > 0 {
            out.extend_from_slice(&sep);
        }
        out.extend_from_slice(&s);
    }
    Ok(vec![lua.new_string_bytes(&out)])
}

pub(crate) fn reverse(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "reverse")?;
    let out: Vec<u8> = s.iter().rev().copied().collect();
    Ok(vec![lua.new_string_bytes(&out)])
}

pub(crate) fn byte(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "byte")?;
    let len = s.len();
    let i = abs_index(opt_int(lua, args, 1, "byte", 1)?, len).max(1);
    let j = abs_index(opt_int(lua, args, 2, "byte", i)?, len).min(len as i64);
    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        out.push(Value::Integer(s[k as usize - 1] as i64));
        k += 1;
    }
    Ok(out)
}

pub(crate) fn char_(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let mut out = Vec::with_capacity(args.len());
    for i in 0..args.len() {
        let c = check_int(lua, args, i, "char")?;
        if !(0..=255).contains(&c) {
            return Err(lua.rt_error(format!(
                "bad argument #{} to 'char' (value out of range)",
                i + 1
            )));
        }
        out.push(c as u8);
    }
    Ok(vec![lua.new_string_bytes(&out)])
}

pub(crate) fn dump(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let f = match arg(args, 0) {
        Value::Function(fid) => fid,
        other => return Err(bad_arg(lua, 0, "dump", "function", other)),
    };
    let strip = arg(args, 1).is_truthy();
    let proto = match lua.heap.function(f) {
        FunctionBody::Lua(p, _) => p.clone(),
        FunctionBody::Native(_, _) => {
            return Err(lua.rt_error("unable to dump given function"));
        }
    };
    let bytes = dump_proto(lua, &proto, strip);
    Ok(vec![lua.new_string_bytes(&bytes)])
}

// ---- pattern entry points ----

fn capture_value(lua: &mut Lua, src: &[u8], cap: &Capture) -> Value {
    match cap {
        Capture::Position(p) => Value::Integer(*p as i64 + 1),
        Capture::Span(s, e) => lua.new_string_bytes(&src[*s..*e]),
    }
}

fn captures_or_whole(
    lua: &mut Lua,
    src: &[u8],
    m: &pattern::MatchResult,
) -> Vec<Value> {
    if m.captures.is_empty() {
        vec![lua.new_string_bytes(&src[m.start..m.end])]
    } else {
        m.captures
            .iter()
            .map(|c| capture_value(lua, src, c))
            .collect()
    }
}

pub(crate) fn find(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "find")?;
    let p = check_str(lua, args, 1, "find")?;
    let init = abs_index(opt_int(lua, args, 2, "find", 1)?, s.len()).max(1) as usize - 1;
    if init > s.len() {
        return Ok(vec![Value::Nil]);
    }
    let plain = arg(args, 3).is_truthy();
    if plain || pattern::is_plain(&p) {
        return match pattern::plain_find(&s, &p, init) {
            Some(at) => Ok(vec![
                Value::Integer(at as i64 + 1),
                Value::Integer((at + p.len()) as i64),
            ]),
            None => Ok(vec![Value::Nil]),
        };
    }
    match pattern::find(&s, &p, init) {
        Ok(Some(m)) => {
            let mut out = vec![
                Value::Integer(m.start as i64 + 1),
                Value::Integer(m.end as i64),
            ];
            for c in &m.captures {
                out.push(capture_value(lua, &s, c));
            }
            Ok(out)
        }
        Ok(None) => Ok(vec![Value::Nil]),
        Err(e) => Err(lua.rt_error(e)),
    }
}

pub(crate) fn match_(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "match")?;
    let p = check_str(lua, args, 1, "match")?;
    let init = abs_index(opt_int(lua, args, 2, "match", 1)?, s.len()).max(1) as usize - 1;
    if init > s.len() {
        return Ok(vec![Value::Nil]);
    }
    match pattern::find(&s, &p, init) {
        Ok(Some(m)) => Ok(captures_or_whole(lua, &s, &m)),
        Ok(None) => Ok(vec![Value::Nil]),
        Err(e) => Err(lua.rt_error(e)),
    }
}

pub(crate) fn gmatch(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = arg(args, 0);
    let p = arg(args, 1);
    check_str(lua, args, 0, "gmatch")?;
    check_str(lua, args, 1, "gmatch")?;
    // iteration state rides a table upvalue
    let state = lua.heap.new_table(0, 1);
    set_field(lua, state, "pos", Value::Integer(0));
    let iter = lua.new_native_closure(NativeId::StrGmatchIter, vec![s, p, Value::Table(state)]);
    Ok(vec![iter])
}

pub(crate) fn gmatch_iter(lua: &mut Lua, _args: &[Value]) -> NativeResult {
    let s_v = lua.native_upvalue(0);
    let p_v = lua.native_upvalue(1);
    let state = match lua.native_upvalue(2) {
        Value::Table(t) => t,
        _ => return Ok(vec![Value::Nil]),
    };
    let s = match s_v {
        Value::Str(id) => lua.heap.str_bytes(id),
        _ => return Ok(vec![Value::Nil]),
    };
    let p = match p_v {
        Value::Str(id) => lua.heap.str_bytes(id),
        _ => return Ok(vec![Value::Nil]),
    };
    let pos_key = lua.new_string("pos");
    let pos = match lua.raw_get(state, pos_key) {
        Value::Integer(i) => i as usize,
        _ => 0,
    };
    if pos > s.len() {
        return Ok(vec![Value::Nil]);
    }
    match pattern::find(&s, &p, pos) {
        Ok(Some(m)) => {
            // an empty match still advances
            let next = if m.end > m.start { m.end } else { m.end + 1 };
            let pos_key = lua.new_string("pos");
            lua.raw_set(state, pos_key, Value::Integer(next as i64))?;
            Ok(captures_or_whole(lua, &s, &m))
        }
        Ok(None) => Ok(vec![Value::Nil]),
        Err(e) => Err(lua.rt_error(e)),
    }
}

pub(crate) fn gsub(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let s = check_str(lua, args, 0, "gsub")?;
    let p = check_str(lua, args, 1, "gsub")?;
    let repl = arg(args, 2);
    let max_n = opt_int(lua, args, 3, "gsub", i64::MAX)?;
    let mut out: Vec<u8> = Vec::with_capacity(s.len());
    let mut pos = 0usize;
    let mut count: i64 = 0;
    while count < max_n && pos <= s.len() {
        let m = match pattern::find(&s, &p, pos) {
            Ok(Some(m)) => m,
            Ok(None) => break,
            Err(e) => return Err(lua.rt_error(e)),
        };
        if m.start > pos {
            out.extend_from_slice(&s[pos..m.start]);
        }
        count += 1;
        let whole = &s[m.start..m.end];
        let replaced: Option<Vec<u8>> = match repl {
            Value::Str(id) => {
                let r = lua.heap.str_bytes(id);
                let mut piece = Vec::with_capacity(r.len());
                let mut i = 0;
                while i < r.len() {
                    if r[i] == b'%' && i + 1 < r.len() {
                        let d = r[i + 1];
                        if d == b'%' {
                            piece.push(b'%');
                        } else if d.is_ascii_digit() {
                            let idx = (d - b'0') as usize;
                            if idx == 0 {
                                piece.extend_from_slice(whole);
                            } else if idx <= m.captures.len() {
                                match &m.captures[idx - 1] {
                                    Capture::Span(cs, ce) => {
                                        piece.extend_from_slice(&s[*cs..*ce])
                                    }
                                    Capture::Position(cp) => piece
                                        .extend_from_slice(
                                            int_to_display(*cp as i64 + 1).as_bytes(),
                                        ),
                                }
                            } else if idx == 1 && m.captures.is_empty() {
                                piece.extend_from_slice(whole);
                            } else {
                                return Err(lua.rt_error(format!(
                                    "invalid capture index %{} in replacement string",
                                    idx
                                )));
                            }
                        } else {
                            return Err(lua.rt_error(
                                "invalid use of '%' in replacement string",
                            ));
                        }
                        i += 2;
                    } else {
                        piece.push(r[i]);
                        i += 1;
                    }
                }
                Some(piece)
            }
            Value::Table(t) => {
                let key = match m.captures.first() {
                    Some(c) => capture_value(lua, &s, c),
                    None => lua.new_string_bytes(whole),
                };
                let v = lua.raw_get(t, key);
                value_to_piece(lua, v, whole)?
            }
            Value::Function(_) => {
                let call_args = captures_or_whole(lua, &s, &m);
                let r = lua.call_single(repl, &call_args)?;
                value_to_piece(lua, r, whole)?
            }
            other => return Err(bad_arg(lua, 2, "gsub", "string/function/table", other)),
        };
        match replaced {
            Some(piece) => out.extend_from_slice(&piece),
            None => out.extend_from_slice(whole),
        }
        pos = if m.end > m.start {
            m.end
        } else {
            // empty match: copy one byte forward and continue
            if m.end < s.len() {
                out.push(s[m.end]);
            }
            m.end + 1
        };
    }
    if pos < s.len() {
        out.extend_from_slice(&s[pos..]);
    }
    Ok(vec![lua.new_string_bytes(&out), Value::Integer(count)])
}

/// gsub replacement value: false/nil keeps the match, a string or
/// number substitutes.
fn value_to_piece(
    lua: &mut Lua,
    v: Value,
    _whole: &[u8],
) -> Result<Option<Vec<u8>>, crate::vm::Fault> {
    match v {
        Value::Nil | Value::Boolean(false) => Ok(None),
        Value::Str(id) => Ok(Some(lua.heap.str_bytes(id).to_vec())),
        Value::Integer(i) => Ok(Some(int_to_display(i).into_bytes())),
        Value::Float(f) => Ok(Some(crate::value::float_to_display(f).into_bytes())),
        other => Err(lua.rt_error(format!(
            "invalid replacement value (a {})",
            other.type_name()
        ))),
    }
}

// ---- string.format ----

pub(crate) fn format(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let fmt = check_str(lua, args, 0, "format")?;
    let mut out: Vec<u8> = Vec::with_capacity(fmt.len());
    let mut argi = 1usize;
    let mut i = 0usize;
    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        i += 1;
        if i < fmt.len() && fmt[i] == b'%' {
            out.push(b'%');
            i += 1;
            continue;
        }
        // flags, width, precision
        let spec_start = i;
        while i < fmt.len() && b"-+ #0".contains(&fmt[i]) {
            i += 1;
        }
        while i < fmt.len() && fmt[i].is_ascii_digit() {
            i += 1;
        }
        let mut precision: Option<usize> = None;
        if i < fmt.len() && fmt[i] == b'.' {
            i += 1;
            let ps = i;
            while i < fmt.len() && fmt[i].is_ascii_digit() {
                i += 1;
            }
            precision = Some(
                std::str::from_utf8(&fmt[ps..i])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            );
        }
        if i >= fmt.len() {
            return Err(lua.rt_error("invalid conversion to 'format'"));
        }
        let spec = std::str::from_utf8(&fmt[spec_start..i])
            .map_err(|_| lua.rt_error("invalid format string"))?
            .to_string();
        let conv = fmt[i];
        i += 1;
        let (flags, width) = split_spec(&spec);
        let piece: Vec<u8> = match conv {
            b'd' | b'i' => {
                let n = check_int(lua, args, argi, "format")?;
                argi += 1;
                pad_number(int_to_display(n), &flags, width, false)
            }
            b'u' => {
                let n = check_int(lua, args, argi, "format")?;
                argi += 1;
                pad_number(format!("{}", n as u64), &flags, width, false)
            }
            b'o' => {
                let n = check_int(lua, args, argi, "format")?;
                argi += 1;
                pad_number(format!("{:o}", n as u64), &flags, width, false)
            }
            b'x' => {
                let n = check_int(lua, args, argi, "format")?;
                argi += 1;
                pad_number(format!("{:x}", n as u64), &flags, width, false)
            }
            b'X' => {
                let n = check_int(lua, args, argi, "format")?;
                argi += 1;
                pad_number(format!("{:X}", n as u64), &flags, width, false)
            }
            b'c' => {
                let n = check_int(lua, args, argi, "format")?;
                argi += 1;
                vec![n as u8]
            }
            b'f' | b'F' => {
                let n = crate::stdlib::check_num(lua, args, argi, "format")?;
                argi += 1;
                let p = precision.unwrap_or(6);
                pad_number(format!("{:.*}", p, n), &flags, width, true)
            }
            b'e' | b'E' => {
                let n = crate::stdlib::check_num(lua, args, argi, "format")?;
                argi += 1;
                let p = precision.unwrap_or(6);
                let s = format_exp(n, p, conv == b'E');
                pad_number(s, &flags, width, true)
            }
            b'g' | b'G' => {
                let n = crate::stdlib::check_num(lua, args, argi, "format")?;
                argi += 1;
                let p = precision.unwrap_or(6).max(1);
                let mut s = crate::value::fmt_g(n, p);
                if conv == b'G' {
                    s = s.to_ascii_uppercase();
                }
                pad_number(s, &flags, width, true)
            }
            b's' => {
                let v = arg(args, argi);
                argi += 1;
                let mut text = lua.display_value(v)?.into_bytes();
                if let Some(p) = precision {
                    text.truncate(p);
                }
                pad_bytes(text, &flags, width)
            }
            b'q' => {
                let s = check_str(lua, args, argi, "format")?;
                argi += 1;
                quote_bytes(&s)
            }
            other => {
                return Err(lua.rt_error(format!(
                    "invalid conversion '%{}' to 'format'",
                    other as char
                )))
            }
        };
        out.extend_from_slice(&piece);
    }
    Ok(vec![lua.new_string_bytes(&out)])
}

struct Flags {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
}

fn split_spec(spec: &str) -> (Flags, usize) {
    let mut flags = Flags {
        left: false,
        zero: false,
        plus: false,
        space: false,
    };
    let mut width = 0usize;
    for c in spec.chars() {
        match c {
            '-' => flags.left = true,
            '0' if width == 0 => flags.zero = true,
            '+' => flags.plus = true,
            ' ' => flags.space = true,
            '#' => {}
            d if d.is_ascii_digit() => {
                width = width * 10 + d.to_digit(10).unwrap_or(0) as usize;
            }
            _ => {}
        }
    }
    (flags, width)
}

fn pad_number(mut s: String, flags: &Flags, width: usize, _float: bool) -> Vec<u8> {
    if flags.plus && !s.starts_with('-') {
        s.insert(0, '+');
    } else if flags.space && !s.starts_with('-') {
        s.insert(0, ' ');
    }
    if s.len() >= width {
        return s.into_bytes();
    }
    let pad = width - s.len();
    if flags.left {
        s.push_str(&" ".repeat(pad));
        s.into_bytes()
    } else if flags.zero {
        let insert_at = usize::from(s.starts_with('-') || s.starts_with('+'));
        let mut out = s.into_bytes();
        for _ in 0..pad {
            out.insert(insert_at, b'0');
        }
        out
    } else {
        let mut out = " ".repeat(pad).into_bytes();
        out.extend(s.into_bytes());
        out
    }
}

fn pad_bytes(mut b: Vec<u8>, flags: &Flags, width: usize) -> Vec<u8> {
    if b.len() >= width {
        return b;
    }
    let pad = width - b.len();
    if flags.left {
        b.extend(std::iter::repeat(b' ').take(pad));
        b
    } else {
        let mut out = vec![b' '; pad];
        out.extend(b);
        out
    }
}

fn format_exp(n: f64, precision: usize, upper: bool) -> String {
    let s = format!("{:.*e}", precision, n);
    // Rust prints "1.5e2"; C prints "1.5e+02"
    let fixed = match s.split_once('e') {
        Some((m, e)) => {
            let exp: i32 = e.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", m, sign, exp.abs())
        }
        None => s,
    };
    if upper {
        fixed.to_ascii_uppercase()
    } else {
        fixed
    }
}

fn quote_bytes(s: &[u8]) -> Vec<u8> {
    let mut out = vec![b'"'];
    for &b in s {
        match b {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            0 => out.extend_from_slice(b"\\0"),
            b if b < 32 || b == 127 => {
                out.extend_from_slice(format!("\\{}", b).as_bytes());
            }
            b => out.push(b),
        }
    }
    out.push(b'"');
    out
}
