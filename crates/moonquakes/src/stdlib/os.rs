// The os library. Calendar work goes through chrono.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};

use crate::stdlib::{arg, bad_arg, check_str, new_lib, NativeId, NativeResult};
use crate::value::Value;
use crate::vm::Lua;

pub(crate) fn open(lua: &mut Lua) {
    new_lib(
        lua,
        "os",
        &[
            ("time", NativeId::OsTime),
            ("clock", NativeId::OsClock),
            ("date", NativeId::OsDate),
            ("difftime", NativeId::OsDiffTime),
            ("getenv", NativeId::OsGetenv),
            ("remove", NativeId::OsRemove),
            ("rename", NativeId::OsRename),
            ("tmpname", NativeId::OsTmpname),
            ("exit", NativeId::OsExit),
        ],
    );
}

fn field_int(lua: &mut Lua, t: crate::gc::TableId, name: &str, default: Option<i64>) -> Result<i64, crate::vm::Fault> {
    let key = lua.new_string(name);
    match lua.raw_get(t, key) {
        Value::Nil => match default {
            Some(d) => Ok(d),
            None => Err(lua.rt_error(format!("field '{}' missing in date table", name))),
        },
        v => match lua.coerce_integer(v) {
            Some(i) => Ok(i),
            None => Err(lua.rt_error(format!("field '{}' is not an integer", name))),
        },
    }
}

pub(crate) fn time(lua: &mut Lua, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Nil => {
            let now = Utc::now().timestamp();
            Ok(vec![Value::Integer(now)])
        }
        Value::Table(t) => {
            let year = field_int(lua, t, "year", None)?;
            let month = field_int(lua, t, "month", None)?;
            let day = field_int(lua, t, "day", None)?;
            let hour = field_int(lua, t, "hour", Some(12))?;
            let min = field_int(lua, t, "min", Some(0))?;
            let sec = field_int(lua, t, "sec", Some(0))?;
            let dt = Local
                .with_ymd_and_hms(
                    year as i32,
                    month as u32,
                    day as u32,
                    hour as u32,
                    min as u32,
                    sec as u32,
                )
                .single();
            match dt {
                Some(dt) => Ok(vec![Value::Integer(dt.timestamp())]),
                None => Ok(vec![Value::Nil]),
            }
        }
        other => Err(bad_arg(lua, 0, "time", "table", other)),
    }
}

pub(crate) fn clock(lua: &mut Lua, _args: &[Value]) -> NativeResult {
    let secs = lua.start_time.elapsed().as_secs_f64();
    Ok(vec![Value::Float(secs)])
}

pub(crate) fn difftime(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let t2 = crate::stdlib::check_num(lua, args, 0, "difftime")?;
    let t1 = if arg(args, 1).is_nil() {
        0.0
    } else {
        crate::stdlib::check_num(lua, args, 1, "difftime")?
    };
    Ok(vec![Value::Float(t2 - t1)])
}

pub(crate) fn date(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let mut spec = match arg(args, 0) {
        Value::Nil => "%c".to_string(),
        Value::Str(id) => lua.str_text(id),
        other => return Err(bad_arg(lua, 0, "date", "string", other)),
    };
    let when = match arg(args, 1) {
        Value::Nil => Utc::now().timestamp(),
        v => match lua.coerce_integer(v) {
            Some(i) => i,
            None => return Err(bad_arg(lua, 1, "date", "number", v)),
        },
    };
    let utc = spec.starts_with('!');
    if utc {
        spec.remove(0);
    }
    let dt_utc: DateTime<Utc> = match Utc.timestamp_opt(when, 0).single() {
        Some(dt) => dt,
        None => return Err(lua.rt_error("time value out of range")),
    };
    if spec.starts_with("*t") {
        let (y, mo, d, h, mi, s, wday, yday, isdst) = if utc {
            let d = dt_utc;
            (
                d.year(),
                d.month(),
                d.day(),
                d.hour(),
                d.minute(),
                d.second(),
                d.weekday().num_days_from_sunday() + 1,
                d.ordinal(),
                false,
            )
        } else {
            let d = dt_utc.with_timezone(&Local);
            (
                d.year(),
                d.month(),
                d.day(),
                d.hour(),
                d.minute(),
                d.second(),
                d.weekday().num_days_from_sunday() + 1,
                d.ordinal(),
                false,
            )
        };
        let t = lua.heap.new_table(0, 9);
        let fields: &[(&str, Value)] = &[
            ("year", Value::Integer(y as i64)),
            ("month", Value::Integer(mo as i64)),
            ("day", Value::Integer(d as i64)),
            ("hour", Value::Integer(h as i64)),
            ("min", Value::Integer(mi as i64)),
            ("sec", Value::Integer(s as i64)),
            ("wday", Value::Integer(wday as i64)),
            ("yday", Value::Integer(yday as i64)),
            ("isdst", Value::Boolean(isdst)),
        ];
        for &(name, v) in fields {
            let key = lua.new_string(name);
            lua.raw_set(t, key, v)?;
        }
        return Ok(vec![Value::Table(t)]);
    }
    let rendered = if utc {
        dt_utc.format(&spec).to_string()
    } else {
        dt_utc.with_timezone(&Local).format(&spec).to_string()
    };
    Ok(vec![lua.new_string(&rendered)])
}

pub(crate) fn getenv(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let name = check_str(lua, args, 0, "getenv")?;
    let name = String::from_utf8_lossy(&name).into_owned();
    match std::env::var(&name) {
        Ok(v) => Ok(vec![lua.new_string(&v)]),
        Err(_) => Ok(vec![Value::Nil]),
    }
}

pub(crate) fn remove(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let path = check_str(lua, args, 0, "remove")?;
    let path = String::from_utf8_lossy(&path).into_owned();
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(vec![Value::Boolean(true)]),
        Err(e) => {
            let msg = lua.new_string(&format!("{}: {}", path, e));
            Ok(vec![Value::Nil, msg])
        }
    }
}

pub(crate) fn rename(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let from = check_str(lua, args, 0, "rename")?;
    let to = check_str(lua, args, 1, "rename")?;
    let from = String::from_utf8_lossy(&from).into_owned();
    let to = String::from_utf8_lossy(&to).into_owned();
    match std::fs::rename(&from, &to) {
        Ok(()) => Ok(vec![Value::Boolean(true)]),
        Err(e) => {
            let msg = lua.new_string(&format!("{} -> {}: {}", from, to, e));
            Ok(vec![Value::Nil, msg])
        }
    }
}

pub(crate) fn tmpname(lua: &mut Lua, _args: &[Value]) -> NativeResult {
    let n: u64 = rand::Rng::r#gen(&mut lua.rng);
    let path = std::env::temp_dir().join(format!("lua_{:016x}", n));
    Ok(vec![lua.new_string(&path.to_string_lossy())])
}

pub(crate) fn exit(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let code = match arg(args, 0) {
        Value::Nil | Value::Boolean(true) => 0,
        Value::Boolean(false) => 1,
        v => lua.coerce_integer(v).unwrap_or(0) as i32,
    };
    std::process::exit(code);
}
