// Tables: a dense 1-based array part plus an order-preserving hash part.
// Hash entries are tombstoned (value set to nil) rather than removed, so
// `next` stays valid across assignments inside a traversal; tombstones
// are dropped when the table rehashes.

use std::hash::{Hash, Hasher};
use std::rc::Rc;

use ahash::RandomState;
use indexmap::IndexMap;

use crate::gc::{StrId, TableId};
use crate::value::{Value, float_to_int_exact};

/// Hashable key wrapper. Strings carry their bytes and precomputed hash
/// so equality holds across distinct long-string allocations; other heap
/// values key by identity.
#[derive(Debug, Clone)]
pub enum TableKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str { id: StrId, hash: u64, bytes: Rc<[u8]> },
    Obj(Value),
}

impl TableKey {
    /// The key as a plain value, for `next` and for GC marking.
    pub fn as_value(&self) -> Value {
        match self {
            TableKey::Bool(b) => Value::Boolean(*b),
            TableKey::Int(i) => Value::Integer(*i),
            TableKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            TableKey::Str { id, .. } => Value::Str(*id),
            TableKey::Obj(v) => *v,
        }
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableKey::Bool(a), TableKey::Bool(b)) => a == b,
            (TableKey::Int(a), TableKey::Int(b)) => a == b,
            (TableKey::Float(a), TableKey::Float(b)) => a == b,
            (
                TableKey::Str { id: a, bytes: ab, .. },
                TableKey::Str { id: b, bytes: bb, .. },
            ) => a == b || ab == bb,
            (TableKey::Obj(a), TableKey::Obj(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TableKey {}

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            TableKey::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            TableKey::Int(i) => {
                state.write_u8(2);
                i.hash(state);
            }
            TableKey::Float(bits) => {
                state.write_u8(3);
                bits.hash(state);
            }
            TableKey::Str { hash, .. } => {
                state.write_u8(4);
                state.write_u64(*hash);
            }
            TableKey::Obj(v) => {
                state.write_u8(5);
                match v {
                    Value::Table(id) => state.write_u32(id.0),
                    Value::Function(id) => state.write_u32(id.0 | 0x4000_0000),
                    Value::Userdata(id) => state.write_u32(id.0 | 0x8000_0000),
                    Value::Thread(id) => state.write_u32(id.0 | 0xc000_0000),
                    _ => state.write_u32(0),
                }
            }
        }
    }
}

/// Weakness, read off the metatable's `__mode` at collection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeakMode {
    #[default]
    Strong,
    Keys,
    Values,
    Both,
}

pub struct LuaTable {
    pub array: Vec<Value>,
    pub hash: IndexMap<TableKey, Value, RandomState>,
    pub metatable: Option<TableId>,
}

impl LuaTable {
    pub fn with_capacity(narr: usize, nrec: usize) -> Self {
        LuaTable {
            array: Vec::with_capacity(narr),
            hash: IndexMap::with_capacity_and_hasher(nrec, RandomState::new()),
            metatable: None,
        }
    }

    /// Raw get with an already-normalized key. Integer keys in the array
    /// window hit the array part.
    pub fn get_key(&self, key: &TableKey) -> Value {
        if let TableKey::Int(i) = key {
            if let Some(v) = self.array_slot(*i) {
                return v;
            }
        }
        self.hash.get(key).copied().unwrap_or(Value::Nil)
    }

    pub fn get_int(&self, i: i64) -> Value {
        if let Some(v) = self.array_slot(i) {
            return v;
        }
        self.hash.get(&TableKey::Int(i)).copied().unwrap_or(Value::Nil)
    }

    #[inline]
    fn array_slot(&self, i: i64) -> Option<Value> {
        if i >= 1 && (i as usize) <= self.array.len() {
            Some(self.array[i as usize - 1])
        } else {
            None
        }
    }

    /// Raw set. Integer keys extend the array part when they append to
    /// it; an append also migrates any hash-part successors into the
    /// array, which is what keeps sequential fills dense.
    pub fn set_key(&mut self, key: TableKey, value: Value) {
        if let TableKey::Int(i) = key {
            self.set_int(i, value);
            return;
        }
        if value.is_nil() {
            if let Some(slot) = self.hash.get_mut(&key) {
                *slot = Value::Nil; // tombstone, cleared on rehash
            }
        } else {
            self.hash.insert(key, value);
            self.maybe_rehash();
        }
    }

    pub fn set_int(&mut self, i: i64, value: Value) {
        let len = self.array.len() as i64;
        if i >= 1 && i <= len {
            self.array[i as usize - 1] = value;
            return;
        }
        if i == len + 1 && !value.is_nil() {
            self.array.push(value);
            // pull any successors out of the hash part
            let mut next = len + 2;
            while let Some(v) = self.hash.get(&TableKey::Int(next)).copied() {
                if v.is_nil() {
                    break;
                }
                self.hash.insert(TableKey::Int(next), Value::Nil);
                self.array.push(v);
                next += 1;
            }
            return;
        }
        if value.is_nil() {
            if let Some(slot) = self.hash.get_mut(&TableKey::Int(i)) {
                *slot = Value::Nil;
            }
        } else {
            self.hash.insert(TableKey::Int(i), value);
            self.maybe_rehash();
        }
    }

    /// A border: n where t[n] is non-nil and t[n+1] is nil. Binary search
    /// over the array part, probing the hash part when the array is full.
    pub fn boundary(&self) -> i64 {
        let alen = self.array.len();
        if alen > 0 && self.array[alen - 1].is_nil() {
            // nil somewhere in the array: binary search for a border
            let mut lo = 0usize; // array[lo-1] non-nil (or lo == 0)
            let mut hi = alen; // array[hi-1] is nil
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if self.array[mid - 1].is_nil() {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo as i64;
        }
        if self.hash.is_empty() {
            return alen as i64;
        }
        // array part full; search the hash part by doubling
        let mut i = alen as i64;
        let mut j = i + 1;
        while !self.get_int(j).is_nil() {
            i = j;
            if j > i64::MAX / 2 {
                // pathological: fall back to linear scan
                let mut n = alen as i64 + 1;
                while !self.get_int(n).is_nil() {
                    n += 1;
                }
                return n - 1;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(m).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    /// Traversal step. `from` of `None` starts at the beginning; returns
    /// the next key/value pair or `None` at the end. The caller converts
    /// a value key into a `TableKey` before calling.
    pub fn next_entry(&self, from: Option<&TableKey>) -> Result<Option<(Value, Value)>, ()> {
        let start = match from {
            None => 0usize,
            Some(TableKey::Int(i)) if *i >= 1 && (*i as usize) <= self.array.len() => *i as usize,
            Some(key) => {
                // resume inside the hash part
                let idx = self.hash.get_index_of(key).ok_or(())?;
                return Ok(self.next_hash(idx + 1));
            }
        };
        for i in start..self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((Value::Integer(i as i64 + 1), self.array[i])));
            }
        }
        Ok(self.next_hash(0))
    }

    fn next_hash(&self, start: usize) -> Option<(Value, Value)> {
        for idx in start..self.hash.len() {
            let (k, v) = self.hash.get_index(idx)?;
            if !v.is_nil() {
                return Some((k.as_value(), *v));
            }
        }
        None
    }

    /// Count of live hash entries (tombstones excluded).
    pub fn hash_live(&self) -> usize {
        self.hash.values().filter(|v| !v.is_nil()).count()
    }

    /// When tombstones dominate, rebuild the hash part and migrate any
    /// integer keys that now belong in the array. Census over power-of-2
    /// slices picks the array size with >50% occupancy.
    fn maybe_rehash(&mut self) {
        if self.hash.len() < 8 || self.hash.len() < 2 * self.hash_live() {
            return;
        }
        self.rehash();
    }

    fn rehash(&mut self) {
        let mut ints: Vec<(i64, Value)> = Vec::new();
        let mut others: Vec<(TableKey, Value)> = Vec::new();
        for (k, v) in self.hash.drain(..) {
            if v.is_nil() {
                continue;
            }
            match k {
                TableKey::Int(i) if i >= 1 => ints.push((i, v)),
                other => others.push((other, v)),
            }
        }
        // census: counts[k] = positive integer keys in (2^k / 2, 2^k]
        let mut counts = [0usize; 64];
        let mut total = 0usize;
        for &(i, _) in &ints {
            counts[(64 - (i as u64).leading_zeros()) as usize - 1] += 1;
            total += 1;
        }
        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() {
                counts[(64 - (i as u64 + 1).leading_zeros()) as usize - 1] += 1;
                total += 1;
            }
        }
        // largest power of two where more than half the slots are used
        let mut best = 0usize;
        let mut running = 0usize;
        for k in 0..40usize {
            running += counts[k];
            let size = 1usize << k;
            if running > size / 2 {
                best = size;
            }
            if running >= total {
                break;
            }
        }
        let old_array = std::mem::take(&mut self.array);
        self.array = vec![Value::Nil; best];
        for (i, v) in old_array.into_iter().enumerate() {
            if v.is_nil() {
                continue;
            }
            if i < best {
                self.array[i] = v;
            } else {
                others.push((TableKey::Int(i as i64 + 1), v));
            }
        }
        for (i, v) in ints {
            if i >= 1 && (i as usize) <= best {
                self.array[i as usize - 1] = v;
            } else {
                others.push((TableKey::Int(i), v));
            }
        }
        let mut rebuilt =
            IndexMap::with_capacity_and_hasher(others.len(), RandomState::new());
        for (k, v) in others {
            rebuilt.insert(k, v);
        }
        self.hash = rebuilt;
        // trim trailing nils so boundary stays cheap
        while matches!(self.array.last(), Some(Value::Nil)) {
            self.array.pop();
        }
    }
}

/// Normalizes a float key: exact-integer floats collapse onto integer
/// keys, NaN is rejected, negative zero folds onto zero.
pub fn normalize_float_key(f: f64) -> Option<TableKey> {
    if f.is_nan() {
        return None;
    }
    match float_to_int_exact(f) {
        Some(i) => Some(TableKey::Int(i)),
        None => Some(TableKey::Float(f.to_bits())),
    }
}
