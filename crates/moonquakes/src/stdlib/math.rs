// The math library.

use rand::Rng;
use rand::SeedableRng;

use crate::stdlib::{
    arg, bad_arg, check_int, check_num, new_lib, set_field, NativeId, NativeResult,
};
use crate::value::{float_to_int_exact, Value};
use crate::vm::Lua;

pub(crate) fn open(lua: &mut Lua) {
    let t = new_lib(
        lua,
        "math",
        &[
            ("abs", NativeId::MathAbs),
            ("ceil", NativeId::MathCeil),
            ("floor", NativeId::MathFloor),
            ("sqrt", NativeId::MathSqrt),
            ("sin", NativeId::MathSin),
            ("cos", NativeId::MathCos),
            ("tan", NativeId::MathTan),
            ("asin", NativeId::MathAsin),
            ("acos", NativeId::MathAcos),
            ("atan", NativeId::MathAtan),
            ("exp", NativeId::MathExp),
            ("log", NativeId::MathLog),
            ("fmod", NativeId::MathFmod),
            ("modf", NativeId::MathModf),
            ("tointeger", NativeId::MathToInteger),
            ("type", NativeId::MathType),
            ("max", NativeId::MathMax),
            ("min", NativeId::MathMin),
            ("random", NativeId::MathRandom),
            ("randomseed", NativeId::MathRandomSeed),
            ("ult", NativeId::MathUlt),
        ],
    );
    set_field(lua, t, "pi", Value::Float(std::f64::consts::PI));
    set_field(lua, t, "huge", Value::Float(f64::INFINITY));
    set_field(lua, t, "maxinteger", Value::Integer(i64::MAX));
    set_field(lua, t, "mininteger", Value::Integer(i64::MIN));
}

macro_rules! float_fn {
    ($fname:ident, $method:ident) => {
        pub(crate) fn $fname(lua: &mut Lua, args: &[Value]) -> NativeResult {
            let n = check_num(lua, args, 0, stringify!($method))?;
            Ok(vec![Value::Float(n.$method())])
        }
    };
}

float_fn!(sqrt, sqrt);
float_fn!(sin, sin);
float_fn!(cos, cos);
float_fn!(tan, tan);
float_fn!(asin, asin);
float_fn!(acos, acos);
float_fn!(exp, exp);

pub(crate) fn atan(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let y = check_num(lua, args, 0, "atan")?;
    let x = if arg(args, 1).is_nil() {
        1.0
    } else {
        check_num(lua, args, 1, "atan")?
    };
    Ok(vec![Value::Float(y.atan2(x))])
}

pub(crate) fn abs(lua: &mut Lua, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Integer(i) => Ok(vec![Value::Integer(i.wrapping_abs())]),
        Value::Float(f) => Ok(vec![Value::Float(f.abs())]),
        other => match lua.coerce_number(other) {
            Some(Value::Integer(i)) => Ok(vec![Value::Integer(i.wrapping_abs())]),
            Some(Value::Float(f)) => Ok(vec![Value::Float(f.abs())]),
            _ => Err(bad_arg(lua, 0, "abs", "number", other)),
        },
    }
}

fn round_to_int(lua: &mut Lua, f: f64, name: &str) -> Result<Value, crate::vm::Fault> {
    match float_to_int_exact(f) {
        Some(i) => Ok(Value::Integer(i)),
        None => Err(lua.rt_error(format!(
            "number has no integer representation in '{}'",
            name
        ))),
    }
}

pub(crate) fn floor(lua: &mut Lua, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Integer(i) => Ok(vec![Value::Integer(i)]),
        _ => {
            let n = check_num(lua, args, 0, "floor")?;
            Ok(vec![round_to_int(lua, n.floor(), "floor")?])
        }
    }
}

pub(crate) fn ceil(lua: &mut Lua, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Integer(i) => Ok(vec![Value::Integer(i)]),
        _ => {
            let n = check_num(lua, args, 0, "ceil")?;
            Ok(vec![round_to_int(lua, n.ceil(), "ceil")?])
        }
    }
}

pub(crate) fn log(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let x = check_num(lua, args, 0, "log")?;
    let r = if arg(args, 1).is_nil() {
        x.ln()
    } else {
        let base = check_num(lua, args, 1, "log")?;
        if base == 2.0 {
            x.log2()
        } else if base == 10.0 {
            x.log10()
        } else {
            x.ln() / base.ln()
        }
    };
    Ok(vec![Value::Float(r)])
}

pub(crate) fn fmod(lua: &mut Lua, args: &[Value]) -> NativeResult {
    match (arg(args, 0), arg(args, 1)) {
        (Value::Integer(a), Value::Integer(b)) => {
            if b == 0 {
                return Err(lua.rt_error("bad argument #2 to 'fmod' (zero)"));
            }
            Ok(vec![Value::Integer(a.wrapping_rem(b))])
        }
        _ => {
            let a = check_num(lua, args, 0, "fmod")?;
            let b = check_num(lua, args, 1, "fmod")?;
            Ok(vec![Value::Float(a % b)])
        }
    }
}

pub(crate) fn modf(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let n = check_num(lua, args, 0, "modf")?;
    let int_part = n.trunc();
    let int_v = match float_to_int_exact(int_part) {
        Some(i) => Value::Integer(i),
        None => Value::Float(int_part),
    };
    let frac = if n.is_infinite() { 0.0 } else { n - int_part };
    Ok(vec![int_v, Value::Float(frac)])
}

pub(crate) fn tointeger(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let r = match lua.coerce_integer(arg(args, 0)) {
        Some(i) => Value::Integer(i),
        None => Value::Nil,
    };
    Ok(vec![r])
}

pub(crate) fn type_(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let r = match arg(args, 0) {
        Value::Integer(_) => lua.new_string("integer"),
        Value::Float(_) => lua.new_string("float"),
        _ => Value::Nil,
    };
    Ok(vec![r])
}

pub(crate) fn max(lua: &mut Lua, args: &[Value]) -> NativeResult {
    if args.is_empty() {
        return Err(bad_arg(lua, 0, "max", "number", Value::Nil));
    }
    let mut best = args[0];
    for i in 1..args.len() {
        if lua.less_than(best, args[i])? {
            best = args[i];
        }
    }
    Ok(vec![best])
}

pub(crate) fn min(lua: &mut Lua, args: &[Value]) -> NativeResult {
    if args.is_empty() {
        return Err(bad_arg(lua, 0, "min", "number", Value::Nil));
    }
    let mut best = args[0];
    for i in 1..args.len() {
        if lua.less_than(args[i], best)? {
            best = args[i];
        }
    }
    Ok(vec![best])
}

pub(crate) fn random(lua: &mut Lua, args: &[Value]) -> NativeResult {
    match args.len() {
        0 => {
            let r: f64 = lua.rng.r#gen();
            Ok(vec![Value::Float(r)])
        }
        1 => {
            let m = check_int(lua, args, 0, "random")?;
            if m == 0 {
                // random(0): raw 64 random bits as an integer
                let r: i64 = lua.rng.r#gen();
                return Ok(vec![Value::Integer(r)]);
            }
            if m < 1 {
                return Err(lua.rt_error("bad argument #1 to 'random' (interval is empty)"));
            }
            let r = lua.rng.gen_range(1..=m);
            Ok(vec![Value::Integer(r)])
        }
        _ => {
            let lo = check_int(lua, args, 0, "random")?;
            let hi = check_int(lua, args, 1, "random")?;
            if lo > hi {
                return Err(lua.rt_error("bad argument #2 to 'random' (interval is empty)"));
            }
            let r = lua.rng.gen_range(lo..=hi);
            Ok(vec![Value::Integer(r)])
        }
    }
}

pub(crate) fn randomseed(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let seed = match arg(args, 0) {
        Value::Nil => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15),
        Value::Integer(i) => i as u64,
        Value::Float(f) => f.to_bits(),
        other => return Err(bad_arg(lua, 0, "randomseed", "number", other)),
    };
    lua.rng = rand::rngs::SmallRng::seed_from_u64(seed);
    Ok(vec![
        Value::Integer(seed as i64),
        Value::Integer((seed >> 32) as i64),
    ])
}

pub(crate) fn ult(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let a = check_int(lua, args, 0, "ult")? as u64;
    let b = check_int(lua, args, 1, "ult")? as u64;
    Ok(vec![Value::Boolean(a < b)])
}
