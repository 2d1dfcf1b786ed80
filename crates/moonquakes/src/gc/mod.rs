// GC heap: allocation, typed access, and the stop-the-world collector.

mod collect;
mod ids;
mod interner;
mod object;
mod pool;

pub use ids::{FnId, GcId, StrId, TableId, ThreadId, UpvalId, UserdataId};
pub use object::{Color, FunctionBody, GcBox, GcData, GcHeader, LuaUserdata, UpvalCell};
pub use pool::GcPool;

use std::rc::Rc;

use interner::Interner;

use crate::limits;
use crate::value::{LuaStr, LuaTable, Value};
use crate::vm::LuaThread;

pub struct Heap {
    pub(crate) pool: GcPool,
    pub(crate) interner: Interner,
    /// Running total of accounted payload bytes.
    pub(crate) allocated: usize,
    /// A full cycle is scheduled once `allocated` passes this.
    pub(crate) threshold: usize,
    /// Set by the allocator, consumed at safe points.
    pub(crate) pending: bool,
    pub(crate) in_gc: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            pool: GcPool::new(),
            interner: Interner::new(),
            allocated: 0,
            threshold: limits::GC_INITIAL_THRESHOLD,
            pending: false,
            in_gc: false,
        }
    }

    #[inline]
    fn account(&mut self, size: usize) {
        self.allocated += size;
        if self.allocated > self.threshold {
            self.pending = true;
        }
    }

    // ---- allocation ----

    /// Interns short strings; long strings allocate uninterned.
    pub fn intern(&mut self, bytes: &[u8]) -> StrId {
        let hash = self.interner.hash_bytes(bytes);
        if bytes.len() > limits::MAX_SHORT_LEN {
            return self.alloc_str(bytes, hash, true);
        }
        for &id in self.interner.bucket(hash) {
            if self.str(id).as_bytes() == bytes {
                return id;
            }
        }
        let id = self.alloc_str(bytes, hash, false);
        self.interner.insert(hash, id);
        id
    }

    fn alloc_str(&mut self, bytes: &[u8], hash: u64, long: bool) -> StrId {
        let size = std::mem::size_of::<LuaStr>() + bytes.len();
        let s = LuaStr {
            bytes: Rc::from(bytes),
            hash,
            long,
        };
        self.account(size);
        StrId(self.pool.alloc(GcBox::new(GcData::Str(s), size)))
    }

    pub fn str_value(&mut self, s: &str) -> Value {
        Value::Str(self.intern(s.as_bytes()))
    }

    pub fn new_table(&mut self, narr: usize, nrec: usize) -> TableId {
        let size = std::mem::size_of::<LuaTable>() + narr * 16 + nrec * 32;
        self.account(size);
        TableId(
            self.pool
                .alloc(GcBox::new(GcData::Table(LuaTable::with_capacity(narr, nrec)), size)),
        )
    }

    pub fn new_function(&mut self, body: FunctionBody) -> FnId {
        let size = 64 + match &body {
            FunctionBody::Lua(p, ups) => p.code.len() * 4 + ups.len() * 8,
            FunctionBody::Native(_, ups) => ups.len() * 16,
        };
        self.account(size);
        FnId(self.pool.alloc(GcBox::new(GcData::Function(body), size)))
    }

    pub fn new_userdata(&mut self, ud: LuaUserdata) -> UserdataId {
        let size = 64;
        self.account(size);
        UserdataId(self.pool.alloc(GcBox::new(GcData::Userdata(ud), size)))
    }

    pub fn new_thread(&mut self, thread: LuaThread) -> ThreadId {
        let size = std::mem::size_of::<LuaThread>() + 64;
        self.account(size);
        ThreadId(self.pool.alloc(GcBox::new(GcData::Thread(thread), size)))
    }

    pub fn new_upval(&mut self, cell: UpvalCell) -> UpvalId {
        let size = 32;
        self.account(size);
        UpvalId(self.pool.alloc(GcBox::new(GcData::Upval(cell), size)))
    }

    // ---- typed access ----

    #[inline]
    pub fn str(&self, id: StrId) -> &LuaStr {
        match &self.pool.get(id.0).map(|b| &b.data) {
            Some(GcData::Str(s)) => s,
            _ => unreachable!("stale string id {:?}", id),
        }
    }

    #[inline]
    pub fn str_bytes(&self, id: StrId) -> Rc<[u8]> {
        self.str(id).bytes.clone()
    }

    #[inline]
    pub fn table(&self, id: TableId) -> &LuaTable {
        match &self.pool.get(id.0).map(|b| &b.data) {
            Some(GcData::Table(t)) => t,
            _ => unreachable!("stale table id {:?}", id),
        }
    }

    #[inline]
    pub fn table_mut(&mut self, id: TableId) -> &mut LuaTable {
        match self.pool.get_mut(id.0).map(|b| &mut b.data) {
            Some(GcData::Table(t)) => t,
            _ => unreachable!("stale table id {:?}", id),
        }
    }

    #[inline]
    pub fn function(&self, id: FnId) -> &FunctionBody {
        match &self.pool.get(id.0).map(|b| &b.data) {
            Some(GcData::Function(f)) => f,
            _ => unreachable!("stale function id {:?}", id),
        }
    }

    #[inline]
    pub fn userdata(&self, id: UserdataId) -> &LuaUserdata {
        match &self.pool.get(id.0).map(|b| &b.data) {
            Some(GcData::Userdata(u)) => u,
            _ => unreachable!("stale userdata id {:?}", id),
        }
    }

    #[inline]
    pub fn userdata_mut(&mut self, id: UserdataId) -> &mut LuaUserdata {
        match self.pool.get_mut(id.0).map(|b| &mut b.data) {
            Some(GcData::Userdata(u)) => u,
            _ => unreachable!("stale userdata id {:?}", id),
        }
    }

    #[inline]
    pub fn thread(&self, id: ThreadId) -> &LuaThread {
        match &self.pool.get(id.0).map(|b| &b.data) {
            Some(GcData::Thread(t)) => t,
            _ => unreachable!("stale thread id {:?}", id),
        }
    }

    #[inline]
    pub fn thread_mut(&mut self, id: ThreadId) -> &mut LuaThread {
        match self.pool.get_mut(id.0).map(|b| &mut b.data) {
            Some(GcData::Thread(t)) => t,
            _ => unreachable!("stale thread id {:?}", id),
        }
    }

    #[inline]
    pub fn upval(&self, id: UpvalId) -> &UpvalCell {
        match &self.pool.get(id.0).map(|b| &b.data) {
            Some(GcData::Upval(u)) => u,
            _ => unreachable!("stale upvalue id {:?}", id),
        }
    }

    #[inline]
    pub fn upval_mut(&mut self, id: UpvalId) -> &mut UpvalCell {
        match self.pool.get_mut(id.0).map(|b| &mut b.data) {
            Some(GcData::Upval(u)) => u,
            _ => unreachable!("stale upvalue id {:?}", id),
        }
    }

    /// Two strings are equal when interned ids match or, for long
    /// strings, when the bytes match.
    pub fn str_eq(&self, a: StrId, b: StrId) -> bool {
        a == b || self.str(a).as_bytes() == self.str(b).as_bytes()
    }

    pub fn live_objects(&self) -> usize {
        self.pool.len()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
