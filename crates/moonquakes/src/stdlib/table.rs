// The table library.

use crate::stdlib::{arg, bad_arg, check_int, check_table, new_lib, opt_int, NativeId, NativeResult};
use crate::value::Value;
use crate::vm::{Fault, Lua};

pub(crate) fn open(lua: &mut Lua) {
    new_lib(
        lua,
        "table",
        &[
            ("insert", NativeId::TblInsert),
            ("remove", NativeId::TblRemove),
            ("concat", NativeId::TblConcat),
            ("unpack", NativeId::TblUnpack),
            ("pack", NativeId::TblPack),
            ("sort", NativeId::TblSort),
        ],
    );
    // table.unpack doubles as the global of the same name in many
    // embedding setups; 5.4 keeps it in the library only
}

pub(crate) fn insert(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = check_table(lua, args, 0, "insert")?;
    let n = lua.heap.table(t).boundary();
    match args.len() {
        2 => {
            lua.raw_seti(t, n + 1, arg(args, 1));
            Ok(Vec::new())
        }
        3 => {
            let pos = check_int(lua, args, 1, "insert")?;
            if pos < 1 || pos > n + 1 {
                return Err(lua.rt_error("bad argument #2 to 'insert' (position out of bounds)"));
            }
            let mut i = n;
            while i >= pos {
                let v = lua.raw_geti(t, i);
                lua.raw_seti(t, i + 1, v);
                i -= 1;
            }
            lua.raw_seti(t, pos, arg(args, 2));
            Ok(Vec::new())
        }
        _ => Err(lua.rt_error("wrong number of arguments to 'insert'")),
    }
}

pub(crate) fn remove(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = check_table(lua, args, 0, "remove")?;
    let n = lua.heap.table(t).boundary();
    let pos = opt_int(lua, args, 1, "remove", n)?;
    if n == 0 && args.len() < 2 {
        return Ok(vec![Value::Nil]);
    }
    if n > 0 && (pos < 1 || pos > n + 1) {
        return Err(lua.rt_error("bad argument #2 to 'remove' (position out of bounds)"));
    }
    let removed = lua.raw_geti(t, pos);
    let mut i = pos;
    while i < n {
        let v = lua.raw_geti(t, i + 1);
        lua.raw_seti(t, i, v);
        i += 1;
    }
    if pos <= n {
        lua.raw_seti(t, n, Value::Nil);
    }
    Ok(vec![removed])
}

pub(crate) fn concat(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = check_table(lua, args, 0, "concat")?;
    let sep: Vec<u8> = match arg(args, 1) {
        Value::Nil => Vec::new(),
        Value::Str(id) => lua.heap.str_bytes(id).to_vec(),
        Value::Integer(i) => crate::value::int_to_display(i).into_bytes(),
        Value::Float(f) => crate::value::float_to_display(f).into_bytes(),
        other => return Err(bad_arg(lua, 1, "concat", "string", other)),
    };
    let first = opt_int(lua, args, 2, "concat", 1)?;
    let default_last = lua.heap.table(t).boundary();
    let last = opt_int(lua, args, 3, "concat", default_last)?;
    let mut out: Vec<u8> = Vec::new();
    let mut i = first;
    while i <= last {
        let v = lua.raw_geti(t, i);
        match v {
            Value::Str(id) => out.extend_from_slice(&lua.heap.str_bytes(id)),
            Value::Integer(n) => out.extend_from_slice(crate::value::int_to_display(n).as_bytes()),
            Value::Float(f) => {
                out.extend_from_slice(crate::value::float_to_display(f).as_bytes())
            }
            _ => {
                return Err(lua.rt_error(format!(
                    "invalid value (at index {}) in table for 'concat'",
                    i
                )))
            }
        }
        if i < last {
            out.extend_from_slice(&sep);
        }
        i += 1;
    }
    Ok(vec![lua.new_string_bytes(&out)])
}

pub(crate) fn unpack(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = check_table(lua, args, 0, "unpack")?;
    let first = opt_int(lua, args, 1, "unpack", 1)?;
    let default_last = lua.heap.table(t).boundary();
    let last = opt_int(lua, args, 2, "unpack", default_last)?;
    if first > last {
        return Ok(Vec::new());
    }
    let count = (last - first + 1) as usize;
    if count > 1_000_000 {
        return Err(lua.rt_error("too many results to unpack"));
    }
    let mut out = Vec::with_capacity(count);
    let mut i = first;
    while i <= last {
        out.push(lua.raw_geti(t, i));
        i += 1;
    }
    Ok(out)
}

pub(crate) fn pack(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = lua.heap.new_table(args.len(), 1);
    for (i, &v) in args.iter().enumerate() {
        lua.raw_seti(t, i as i64 + 1, v);
    }
    let n_key = lua.new_string("n");
    lua.raw_set(t, n_key, Value::Integer(args.len() as i64))?;
    Ok(vec![Value::Table(t)])
}

pub(crate) fn sort(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t = check_table(lua, args, 0, "sort")?;
    let cmp = arg(args, 1);
    if !cmp.is_nil() && !cmp.is_function() {
        return Err(bad_arg(lua, 1, "sort", "function", cmp));
    }
    let n = lua.heap.table(t).boundary();
    let mut items: Vec<Value> = Vec::with_capacity(n as usize);
    for i in 1..=n {
        items.push(lua.raw_geti(t, i));
    }
    // merge sort keeps comparator calls at n·log n and tolerates a
    // comparator that errors mid-way
    let sorted = merge_sort(lua, items, cmp)?;
    for (i, v) in sorted.into_iter().enumerate() {
        lua.raw_seti(t, i as i64 + 1, v);
    }
    Ok(Vec::new())
}

fn lt(lua: &mut Lua, cmp: Value, a: Value, b: Value) -> Result<bool, Fault> {
    if cmp.is_nil() {
        lua.less_than(a, b)
    } else {
        let r = lua.call_single(cmp, &[a, b])?;
        Ok(r.is_truthy())
    }
}

fn merge_sort(lua: &mut Lua, items: Vec<Value>, cmp: Value) -> Result<Vec<Value>, Fault> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mid = items.len() / 2;
    let mut right = items;
    let left = right.drain(..mid).collect::<Vec<_>>();
    let left = merge_sort(lua, left, cmp)?;
    let right = merge_sort(lua, right, cmp)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut li = 0;
    let mut ri = 0;
    while li < left.len() && ri < right.len() {
        if lt(lua, cmp, right[ri], left[li])? {
            out.push(right[ri]);
            ri += 1;
        } else {
            out.push(left[li]);
            li += 1;
        }
    }
    out.extend_from_slice(&left[li..]);
    out.extend_from_slice(&right[ri..]);
    Ok(out)
}
