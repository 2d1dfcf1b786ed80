// The io library. File handles are full userdata carrying a shared
// metatable whose __index exposes the method table and whose __close
// lets `local f <close> = io.open(...)` work.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};

use crate::gc::{LuaUserdata, TableId, UserdataId};
use crate::stdlib::{arg, bad_arg, check_str, new_lib, set_field, NativeId, NativeResult};
use crate::value::{Mm, Value};
use crate::vm::Lua;

pub(crate) enum FileHandle {
    Reader(BufReader<File>),
    Writer(File),
    Stdout,
    Stderr,
    Closed,
}

impl FileHandle {
    fn name(&self) -> &'static str {
        match self {
            FileHandle::Reader(_) => "file",
            FileHandle::Writer(_) => "file",
            FileHandle::Stdout => "stdout",
            FileHandle::Stderr => "stderr",
            FileHandle::Closed => "closed file",
        }
    }
}

pub(crate) fn open_lib(lua: &mut Lua) {
    let io_table = new_lib(
        lua,
        "io",
        &[
            ("write", NativeId::IoWrite),
            ("read", NativeId::IoRead),
            ("open", NativeId::IoOpen),
            ("lines", NativeId::IoLines),
            ("close", NativeId::IoClose),
        ],
    );
    // shared file metatable: methods plus __close/__gc
    let methods = lua.heap.new_table(0, 6);
    for (name, id) in [
        ("read", NativeId::FileRead),
        ("write", NativeId::FileWrite),
        ("lines", NativeId::FileLines),
        ("close", NativeId::FileClose),
        ("seek", NativeId::FileSeek),
        ("flush", NativeId::FileFlush),
    ] {
        let f = lua.new_native(id);
        set_field(lua, methods, name, f);
    }
    let meta = lua.heap.new_table(0, 3);
    set_field(lua, meta, Mm::Index.key(), Value::Table(methods));
    let close_fn = lua.new_native(NativeId::FileClose);
    set_field(lua, meta, Mm::Close.key(), close_fn);
    let gc_fn = lua.new_native(NativeId::FileClose);
    set_field(lua, meta, Mm::Gc.key(), gc_fn);
    let name_v = lua.new_string("FILE*");
    set_field(lua, meta, Mm::Name.key(), name_v);
    let key = lua.new_string("moonquakes.file_meta");
    let registry = lua.registry;
    let _ = lua.raw_set(registry, key, Value::Table(meta));
    // io.stdout so `io.stdout:write(...)` works
    let stdout = new_file(lua, FileHandle::Stdout);
    set_field(lua, io_table, "stdout", stdout);
    let stderr = new_file(lua, FileHandle::Stderr);
    set_field(lua, io_table, "stderr", stderr);
}

fn file_meta(lua: &mut Lua) -> Option<TableId> {
    let key = lua.new_string("moonquakes.file_meta");
    match lua.raw_get(lua.registry, key) {
        Value::Table(t) => Some(t),
        _ => None,
    }
}

fn new_file(lua: &mut Lua, handle: FileHandle) -> Value {
    let meta = file_meta(lua);
    let id = lua.heap.new_userdata(LuaUserdata {
        data: Box::new(handle),
        metatable: meta,
    });
    Value::Userdata(id)
}

fn as_file<'l>(lua: &'l mut Lua, v: Value) -> Option<(&'l mut FileHandle, UserdataId)> {
    if let Value::Userdata(id) = v {
        let ud = lua.heap.userdata_mut(id);
        if let Some(h) = ud.data.downcast_mut::<FileHandle>() {
            return Some((h, id));
        }
    }
    None
}

// ---- io.* ----

pub(crate) fn open(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let path = check_str(lua, args, 0, "open")?;
    let path = String::from_utf8_lossy(&path).into_owned();
    let mode = match arg(args, 1) {
        Value::Nil => "r".to_string(),
        Value::Str(id) => lua.str_text(id),
        other => return Err(bad_arg(lua, 1, "open", "string", other)),
    };
    let result = match mode.trim_end_matches('b') {
        "r" => File::open(&path).map(|f| FileHandle::Reader(BufReader::new(f))),
        "w" => File::create(&path).map(FileHandle::Writer),
        "a" => OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map(FileHandle::Writer),
        "r+" | "w+" | "a+" => OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map(FileHandle::Writer),
        other => {
            return Err(lua.rt_error(format!("invalid mode '{}' to 'open'", other)));
        }
    };
    match result {
        Ok(handle) => Ok(vec![new_file(lua, handle)]),
        Err(e) => {
            let msg = lua.new_string(&format!("{}: {}", path, e));
            Ok(vec![Value::Nil, msg, Value::Integer(e.raw_os_error().unwrap_or(-1) as i64)])
        }
    }
}

pub(crate) fn write(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    for i in 0..args.len() {
        let piece = check_str(lua, args, i, "write")?;
        if handle.write_all(&piece).is_err() {
            let msg = lua.new_string("write error");
            return Ok(vec![Value::Nil, msg]);
        }
    }
    let _ = handle.flush();
    Ok(Vec::new())
}

pub(crate) fn read(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let stdin = std::io::stdin();
    let mut reader = stdin.lock();
    read_formats(lua, &mut reader, args, 0)
}

pub(crate) fn lines(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let opened = open(lua, args)?;
    match opened.first() {
        Some(&f) if !f.is_nil() => {
            lua.protect(f);
            let iter = lua.new_native_closure(NativeId::FileLinesIter, vec![f]);
            lua.unprotect(1);
            Ok(vec![iter])
        }
        _ => {
            let msg = opened.get(1).copied().unwrap_or(Value::Nil);
            Err(lua.throw(msg))
        }
    }
}

pub(crate) fn close(lua: &mut Lua, args: &[Value]) -> NativeResult {
    if args.is_empty() {
        return Ok(vec![Value::Boolean(true)]);
    }
    file_close(lua, args)
}

// ---- file methods ----

fn check_file_arg(
    lua: &mut Lua,
    args: &[Value],
    name: &str,
) -> Result<UserdataId, crate::vm::Fault> {
    let v = arg(args, 0);
    match as_file(lua, v) {
        Some((_, id)) => Ok(id),
        None => Err(bad_arg(lua, 0, name, "file", v)),
    }
}

pub(crate) fn file_read(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let id = check_file_arg(lua, args, "read")?;
    // formats are read with the handle detached so `lua` stays usable
    let mut handle = std::mem::replace(
        match lua.heap.userdata_mut(id).data.downcast_mut::<FileHandle>() {
            Some(h) => h,
            None => return Err(lua.rt_error("not a file handle")),
        },
        FileHandle::Closed,
    );
    let result = match &mut handle {
        FileHandle::Reader(r) => read_formats(lua, r, args, 1),
        FileHandle::Closed => Err(lua.rt_error("attempt to use a closed file")),
        _ => Err(lua.rt_error("file not opened for reading")),
    };
    if let Some(slot) = lua.heap.userdata_mut(id).data.downcast_mut::<FileHandle>() {
        *slot = handle;
    }
    result
}

fn read_formats<R: BufRead>(
    lua: &mut Lua,
    reader: &mut R,
    args: &[Value],
    first: usize,
) -> NativeResult {
    let mut formats: Vec<String> = Vec::new();
    for &a in args.iter().skip(first) {
        match a {
            Value::Str(idv) => formats.push(lua.str_text(idv)),
            Value::Integer(n) => formats.push(format!("#{}", n)),
            other => return Err(bad_arg(lua, first, "read", "string", other)),
        }
    }
    if formats.is_empty() {
        formats.push("l".to_string());
    }
    let mut out = Vec::new();
    for f in formats {
        let fmt = f.trim_start_matches('*');
        let v = if let Some(count) = fmt.strip_prefix('#') {
            let n: usize = count.parse().unwrap_or(0);
            let mut buf = vec![0u8; n];
            match reader.read(&mut buf) {
                Ok(0) if n > 0 => Value::Nil,
                Ok(got) => {
                    buf.truncate(got);
                    lua.new_string_bytes(&buf)
                }
                Err(_) => Value::Nil,
            }
        } else {
            match fmt.chars().next() {
                Some('l') | Some('L') => {
                    let keep = fmt.starts_with('L');
                    let mut line = Vec::new();
                    match reader.read_until(b'\n', &mut line) {
                        Ok(0) => Value::Nil,
                        Ok(_) => {
                            if !keep {
                                if line.last() == Some(&b'\n') {
                                    line.pop();
                                }
                                if line.last() == Some(&b'\r') {
                                    line.pop();
                                }
                            }
                            lua.new_string_bytes(&line)
                        }
                        Err(_) => Value::Nil,
                    }
                }
                Some('a') => {
                    let mut buf = Vec::new();
                    let _ = reader.read_to_end(&mut buf);
                    lua.new_string_bytes(&buf)
                }
                Some('n') => {
                    let mut text = String::new();
                    // numbers are read a line at a time
                    let mut line = Vec::new();
                    match reader.read_until(b'\n', &mut line) {
                        Ok(0) => Value::Nil,
                        Ok(_) => {
                            text.push_str(&String::from_utf8_lossy(&line));
                            match crate::value::parse_number(text.trim()) {
                                Some(crate::value::ParsedNumber::Int(i)) => Value::Integer(i),
                                Some(crate::value::ParsedNumber::Float(fl)) => Value::Float(fl),
                                None => Value::Nil,
                            }
                        }
                        Err(_) => Value::Nil,
                    }
                }
                _ => {
                    return Err(lua.rt_error(format!("invalid format '{}' to 'read'", f)));
                }
            }
        };
        let done = v.is_nil();
        out.push(v);
        if done {
            break;
        }
    }
    Ok(out)
}

pub(crate) fn file_write(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let id = check_file_arg(lua, args, "write")?;
    let mut pieces: Vec<std::rc::Rc<[u8]>> = Vec::new();
    for i in 1..args.len() {
        pieces.push(check_str(lua, args, i, "write")?);
    }
    let ud = lua.heap.userdata_mut(id);
    let handle = match ud.data.downcast_mut::<FileHandle>() {
        Some(h) => h,
        None => return Err(lua.rt_error("not a file handle")),
    };
    let ok = match handle {
        FileHandle::Writer(f) => pieces.iter().all(|p| f.write_all(p).is_ok()),
        FileHandle::Stdout => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            pieces.iter().all(|p| lock.write_all(p).is_ok())
        }
        FileHandle::Stderr => {
            let stderr = std::io::stderr();
            let mut lock = stderr.lock();
            pieces.iter().all(|p| lock.write_all(p).is_ok())
        }
        FileHandle::Closed => return Err(lua.rt_error("attempt to use a closed file")),
        FileHandle::Reader(_) => return Err(lua.rt_error("file not opened for writing")),
    };
    if ok {
        Ok(vec![arg(args, 0)])
    } else {
        let msg = lua.new_string("write error");
        Ok(vec![Value::Nil, msg])
    }
}

pub(crate) fn file_lines(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let _ = check_file_arg(lua, args, "lines")?;
    let iter = lua.new_native_closure(NativeId::FileLinesIter, vec![arg(args, 0)]);
    Ok(vec![iter])
}

pub(crate) fn file_lines_iter(lua: &mut Lua, _args: &[Value]) -> NativeResult {
    let file = lua.native_upvalue(0);
    let line_args = [file, lua.new_string("l")];
    let r = file_read(lua, &line_args)?;
    Ok(r)
}

pub(crate) fn file_close(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let v = arg(args, 0);
    if let Some((h, _)) = as_file(lua, v) {
        *h = FileHandle::Closed;
        return Ok(vec![Value::Boolean(true)]);
    }
    Ok(vec![Value::Boolean(true)])
}

pub(crate) fn file_seek(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let id = check_file_arg(lua, args, "seek")?;
    let whence = match arg(args, 1) {
        Value::Nil => "cur".to_string(),
        Value::Str(s) => lua.str_text(s),
        other => return Err(bad_arg(lua, 1, "seek", "string", other)),
    };
    let offset = match arg(args, 2) {
        Value::Nil => 0,
        v => match lua.coerce_integer(v) {
            Some(i) => i,
            None => return Err(bad_arg(lua, 2, "seek", "number", v)),
        },
    };
    let pos = match whence.as_str() {
        "set" => SeekFrom::Start(offset.max(0) as u64),
        "cur" => SeekFrom::Current(offset),
        "end" => SeekFrom::End(offset),
        other => return Err(lua.rt_error(format!("invalid option '{}' to 'seek'", other))),
    };
    let ud = lua.heap.userdata_mut(id);
    let handle = match ud.data.downcast_mut::<FileHandle>() {
        Some(h) => h,
        None => return Err(lua.rt_error("not a file handle")),
    };
    let result = match handle {
        FileHandle::Reader(r) => r.seek(pos),
        FileHandle::Writer(f) => f.seek(pos),
        FileHandle::Closed => return Err(lua.rt_error("attempt to use a closed file")),
        _ => return Err(lua.rt_error("cannot seek this file")),
    };
    match result {
        Ok(at) => Ok(vec![Value::Integer(at as i64)]),
        Err(e) => {
            let msg = lua.new_string(&format!("seek error: {}", e));
            Ok(vec![Value::Nil, msg])
        }
    }
}

pub(crate) fn file_flush(lua: &mut Lua, args: &[Value]) -> NativeResult {
    let id = check_file_arg(lua, args, "flush")?;
    let ud = lua.heap.userdata_mut(id);
    if let Some(FileHandle::Writer(f)) = ud.data.downcast_mut::<FileHandle>() {
        let _ = f.flush();
    }
    Ok(vec![arg(args, 0)])
}
