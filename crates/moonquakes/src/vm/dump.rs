// Binary chunk format for string.dump/load. The 4-byte magic makes
// dumps sniffable; the payload is a little-endian preorder walk of the
// prototype tree.

use std::rc::Rc;

use crate::value::{Proto, UpvalDesc, Value};
use crate::vm::Lua;

pub const DUMP_MAGIC: &[u8; 4] = b"\x1bMQK";
const DUMP_VERSION: u8 = 1;

const TAG_NIL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STR: u8 = 5;

pub fn dump_proto(lua: &Lua, proto: &Proto, strip: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(DUMP_MAGIC);
    out.push(DUMP_VERSION);
    out.push(strip as u8);
    write_proto(lua, proto, strip, &mut out);
    out
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, b: &[u8]) {
    write_u32(out, b.len() as u32);
    out.extend_from_slice(b);
}

fn write_proto(lua: &Lua, p: &Proto, strip: bool, out: &mut Vec<u8>) {
    if strip {
        write_bytes(out, b"=?");
    } else {
        write_bytes(out, lua.heap.str(p.source).as_bytes());
    }
    write_u32(out, p.line_defined);
    out.push(p.num_params);
    out.push(p.is_vararg as u8);
    out.push(p.max_stack);
    write_u32(out, p.code.len() as u32);
    for &i in &p.code {
        write_u32(out, i);
    }
    write_u32(out, p.consts.len() as u32);
    for &k in &p.consts {
        match k {
            Value::Nil => out.push(TAG_NIL),
            Value::Boolean(false) => out.push(TAG_FALSE),
            Value::Boolean(true) => out.push(TAG_TRUE),
            Value::Integer(i) => {
                out.push(TAG_INT);
                write_u64(out, i as u64);
            }
            Value::Float(f) => {
                out.push(TAG_FLOAT);
                write_u64(out, f.to_bits());
            }
            Value::Str(id) => {
                out.push(TAG_STR);
                write_bytes(out, lua.heap.str(id).as_bytes());
            }
            _ => unreachable!("non-constant value in constant pool"),
        }
    }
    write_u32(out, p.upvals.len() as u32);
    for d in &p.upvals {
        out.push(d.in_stack as u8);
        out.push(d.index);
    }
    write_u32(out, p.protos.len() as u32);
    for child in &p.protos {
        write_proto(lua, child, strip, out);
    }
    if strip {
        write_u32(out, 0);
    } else {
        write_u32(out, p.lines.len() as u32);
        for &l in &p.lines {
            write_u32(out, l);
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.pos + n > self.data.len() {
            return Err("truncated binary chunk".to_string());
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, String> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    fn bytes(&mut self) -> Result<&'a [u8], String> {
        let n = self.u32()? as usize;
        self.take(n)
    }
}

/// Rebuilds a prototype from dumped bytes. The caller has already
/// checked the magic.
pub fn undump_proto(lua: &mut Lua, data: &[u8]) -> Result<Proto, String> {
    if data.len() < 6 || &data[0..4] != DUMP_MAGIC {
        return Err("bad binary format (wrong magic)".to_string());
    }
    if data[4] != DUMP_VERSION {
        return Err("bad binary format (version mismatch)".to_string());
    }
    let mut r = Reader { data, pos: 6 };
    let proto = read_proto(lua, &mut r)?;
    Ok(proto)
}

fn read_proto(lua: &mut Lua, r: &mut Reader<'_>) -> Result<Proto, String> {
    let source_bytes = r.bytes()?.to_vec();
    let source = lua.heap.intern(&source_bytes);
    let line_defined = r.u32()?;
    let num_params = r.u8()?;
    let is_vararg = r.u8()? != 0;
    let max_stack = r.u8()?;
    let ncode = r.u32()? as usize;
    let mut code = Vec::with_capacity(ncode.min(1 << 20));
    for _ in 0..ncode {
        code.push(r.u32()?);
    }
    let nconsts = r.u32()? as usize;
    let mut consts = Vec::with_capacity(nconsts.min(1 << 16));
    for _ in 0..nconsts {
        let v = match r.u8()? {
            TAG_NIL => Value::Nil,
            TAG_FALSE => Value::Boolean(false),
            TAG_TRUE => Value::Boolean(true),
            TAG_INT => Value::Integer(r.u64()? as i64),
            TAG_FLOAT => Value::Float(f64::from_bits(r.u64()?)),
            TAG_STR => {
                let b = r.bytes()?.to_vec();
                Value::Str(lua.heap.intern(&b))
            }
            _ => return Err("bad constant tag in binary chunk".to_string()),
        };
        consts.push(v);
    }
    let nups = r.u32()? as usize;
    let mut upvals = Vec::with_capacity(nups.min(256));
    for _ in 0..nups {
        let in_stack = r.u8()? != 0;
        let index = r.u8()?;
        upvals.push(UpvalDesc {
            in_stack,
            index,
            name: None,
        });
    }
    let nprotos = r.u32()? as usize;
    let mut protos = Vec::with_capacity(nprotos.min(1 << 12));
    for _ in 0..nprotos {
        protos.push(Rc::new(read_proto(lua, r)?));
    }
    let nlines = r.u32()? as usize;
    let mut lines = Vec::with_capacity(nlines.min(1 << 20));
    for _ in 0..nlines {
        lines.push(r.u32()?);
    }
    Ok(Proto {
        code,
        consts,
        protos,
        upvals,
        num_params,
        is_vararg,
        max_stack,
        source,
        lines,
        line_defined,
    })
}
