// The collection cycle: stop-the-world tri-color mark and sweep, with
// ephemeron fixpoint for weak-key tables and a finalization queue that
// resurrects objects exactly once.

use crate::gc::object::{Color, GcData, UpvalCell};
use crate::gc::{GcId, StrId, TableId};
use crate::limits;
use crate::value::{Mm, Value, WeakMode};
use crate::vm::{Fault, Lua};

impl Lua {
    /// Runs a pending cycle if the allocator scheduled one. Called at
    /// safe points only.
    pub fn maybe_gc(&mut self) {
        if self.heap.pending && !self.heap.in_gc {
            self.collect_garbage();
        }
    }

    /// One full cycle: mark from roots, settle weak tables, queue
    /// finalizers, sweep, then run the queued finalizers.
    pub fn collect_garbage(&mut self) {
        if self.heap.in_gc {
            return;
        }
        self.heap.in_gc = true;
        let mut cycle = MarkCycle::default();

        self.mark_roots(&mut cycle);
        self.drain_gray(&mut cycle);
        self.ephemeron_fixpoint(&mut cycle);
        self.queue_finalizable(&mut cycle);
        self.clear_weak_tables(&cycle);
        self.sweep();

        let pause = self.heap.allocated / 100 * limits::GC_PAUSE_PERCENT;
        self.heap.threshold = pause.max(limits::GC_INITIAL_THRESHOLD);
        self.heap.pending = false;
        self.heap.in_gc = false;

        self.run_finalizers();
    }

    fn mark_roots(&mut self, cycle: &mut MarkCycle) {
        let mut roots: Vec<Value> = Vec::with_capacity(16);
        roots.push(Value::Table(self.globals));
        roots.push(Value::Table(self.registry));
        roots.push(Value::Thread(self.main_thread));
        roots.push(Value::Thread(self.current));
        if let Some(sm) = self.string_meta {
            roots.push(Value::Table(sm));
        }
        roots.push(self.fault);
        roots.push(self.native_self);
        roots.extend(self.scratch.iter().copied());
        roots.extend(self.finalize_queue.iter().copied());
        for key in self.mm_keys {
            self.mark_id(GcId::Str(key), cycle);
        }
        for v in roots {
            self.mark_value(v, cycle);
        }
    }

    fn mark_value(&mut self, v: Value, cycle: &mut MarkCycle) {
        if let Some(id) = gc_id_of(v) {
            self.mark_id(id, cycle);
        }
    }

    fn mark_id(&mut self, id: GcId, cycle: &mut MarkCycle) {
        let obj = match self.heap.pool.get_mut(id.index()) {
            Some(o) => o,
            None => return,
        };
        if obj.header.color != Color::White {
            return;
        }
        obj.header.color = Color::Gray;
        cycle.gray.push(id);
    }

    fn drain_gray(&mut self, cycle: &mut MarkCycle) {
        while let Some(id) = cycle.gray.pop() {
            self.blacken(id, cycle);
        }
    }

    /// Traces one object's children and paints it black.
    fn blacken(&mut self, id: GcId, cycle: &mut MarkCycle) {
        if let Some(obj) = self.heap.pool.get_mut(id.index()) {
            obj.header.color = Color::Black;
        }
        let mut children: Vec<GcId> = Vec::new();
        let mut push = |out: &mut Vec<GcId>, v: Value| {
            if let Some(id) = gc_id_of(v) {
                out.push(id);
            }
        };
        match id {
            GcId::Str(_) => {}
            GcId::Table(tid) => {
                let weak = self.weak_mode_of(tid);
                if weak != WeakMode::Strong {
                    cycle.weak.push((tid, weak));
                }
                let t = self.heap.table(tid);
                if let Some(mt) = t.metatable {
                    children.push(GcId::Table(mt));
                }
                match weak {
                    WeakMode::Strong => {
                        for v in t.array.iter() {
                            push(&mut children, *v);
                        }
                        for (k, v) in t.hash.iter() {
                            push(&mut children, k.as_value());
                            push(&mut children, *v);
                        }
                    }
                    WeakMode::Values => {
                        // keys stay strong, values wait for the weak pass
                        for (k, _) in t.hash.iter() {
                            push(&mut children, k.as_value());
                        }
                    }
                    WeakMode::Keys | WeakMode::Both => {
                        // ephemeron: hash values marked only for live
                        // keys, settled in the fixpoint pass; array
                        // values are integer-keyed and therefore strong
                        // unless values are weak too
                        if weak == WeakMode::Keys {
                            for v in t.array.iter() {
                                push(&mut children, *v);
                            }
                        }
                    }
                }
            }
            GcId::Function(fid) => match self.heap.function(fid) {
                crate::gc::FunctionBody::Lua(proto, ups) => {
                    let mut vals: Vec<Value> = Vec::new();
                    proto_children(proto, &mut vals);
                    for v in vals {
                        push(&mut children, v);
                    }
                    for up in ups {
                        children.push(GcId::Upval(*up));
                    }
                }
                crate::gc::FunctionBody::Native(_, ups) => {
                    for v in ups.iter() {
                        push(&mut children, *v);
                    }
                }
            },
            GcId::Userdata(uid) => {
                if let Some(mt) = self.heap.userdata(uid).metatable {
                    children.push(GcId::Table(mt));
                }
            }
            GcId::Thread(tid) => {
                let th = self.heap.thread(tid);
                let mut extent = th.top;
                for ci in th.frames.iter() {
                    extent = extent.max(ci.base + ci.proto.max_stack as usize);
                }
                extent = extent.min(th.stack.len());
                let mut vals: Vec<Value> = Vec::new();
                vals.extend(th.stack[0..extent].iter().copied());
                vals.extend(th.transfer.iter().copied());
                for ci in th.frames.iter() {
                    vals.push(ci.func);
                    vals.push(ci.handler);
                    vals.extend(ci.varargs.iter().copied());
                    proto_children(&ci.proto, &mut vals);
                }
                for v in vals {
                    push(&mut children, v);
                }
                for &(_, up) in th.open_upvals.iter() {
                    children.push(GcId::Upval(up));
                }
            }
            GcId::Upval(uid) => match self.heap.upval(uid) {
                UpvalCell::Open(owner, _) => {
                    children.push(GcId::Thread(*owner));
                }
                UpvalCell::Closed(v) => push(&mut children, *v),
            },
        }
        for c in children {
            self.mark_id(c, cycle);
        }
    }

    /// Weakness is read off the metatable's `__mode` each cycle.
    fn weak_mode_of(&self, tid: TableId) -> WeakMode {
        let mt = match self.heap.table(tid).metatable {
            Some(mt) => mt,
            None => return WeakMode::Strong,
        };
        let mode = self.table_mm(mt, Mm::Mode);
        let id = match mode {
            Value::Str(id) => id,
            _ => return WeakMode::Strong,
        };
        let bytes = self.heap.str(id).bytes.clone();
        let k = bytes.contains(&b'k');
        let v = bytes.contains(&b'v');
        match (k, v) {
            (true, true) => WeakMode::Both,
            (true, false) => WeakMode::Keys,
            (false, true) => WeakMode::Values,
            (false, false) => WeakMode::Strong,
        }
    }

    /// Repeatedly re-scans weak-key tables, marking values whose keys
    /// turned out reachable, until nothing changes.
    fn ephemeron_fixpoint(&mut self, cycle: &mut MarkCycle) {
        loop {
            let mut changed = false;
            for &(tid, mode) in cycle.weak.clone().iter() {
                if !matches!(mode, WeakMode::Keys) {
                    continue;
                }
                let pairs: Vec<(Value, Value)> = {
                    let t = self.heap.table(tid);
                    t.hash
                        .iter()
                        .map(|(k, v)| (k.as_value(), *v))
                        .collect()
                };
                for (k, v) in pairs {
                    if self.is_marked_or_immediate(k) && !self.is_marked_or_immediate(v) {
                        self.mark_value(v, cycle);
                        changed = true;
                    }
                }
                self.drain_gray(cycle);
            }
            if !changed {
                return;
            }
        }
    }

    fn is_marked_or_immediate(&self, v: Value) -> bool {
        match gc_id_of(v) {
            None => true,
            Some(id) => match self.heap.pool.get(id.index()) {
                Some(o) => o.header.color != Color::White,
                None => false,
            },
        }
    }

    /// White objects with a `__gc` metamethod are resurrected, flagged,
    /// and queued; their finalizer runs after the sweep.
    fn queue_finalizable(&mut self, cycle: &mut MarkCycle) {
        let ids = self.heap.pool.ids();
        let mut newly: Vec<Value> = Vec::new();
        for raw in ids {
            let (kind, finalized, white) = match self.heap.pool.get(raw) {
                Some(o) => {
                    let kind = match &o.data {
                        GcData::Table(_) => Some(false),
                        GcData::Userdata(_) => Some(true),
                        _ => None,
                    };
                    (kind, o.header.finalized, o.header.color == Color::White)
                }
                None => continue,
            };
            let is_ud = match kind {
                Some(x) => x,
                None => continue,
            };
            if !white || finalized {
                continue;
            }
            let v = if is_ud {
                Value::Userdata(crate::gc::UserdataId(raw))
            } else {
                Value::Table(TableId(raw))
            };
            let mm = self.metamethod(v, Mm::Gc);
            if mm.is_nil() {
                continue;
            }
            if let Some(o) = self.heap.pool.get_mut(raw) {
                o.header.finalized = true;
            }
            newly.push(v);
        }
        // resurrect: the object and everything it references survive
        // this cycle so the finalizer sees a consistent world
        for &v in &newly {
            self.mark_value(v, cycle);
        }
        self.drain_gray(cycle);
        self.finalize_queue.extend(newly);
    }

    /// Clears weak entries whose key or value died. Runs after marking,
    /// before the sweep frees the bodies.
    fn clear_weak_tables(&mut self, cycle: &MarkCycle) {
        for &(tid, mode) in cycle.weak.iter() {
            let dead_keys: Vec<crate::value::TableKey> = {
                let t = self.heap.table(tid);
                t.hash
                    .iter()
                    .filter(|(k, v)| {
                        let key_dead = matches!(mode, WeakMode::Keys | WeakMode::Both)
                            && !self.is_marked_or_immediate(k.as_value());
                        let val_dead = matches!(mode, WeakMode::Values | WeakMode::Both)
                            && !v.is_nil()
                            && !self.is_marked_or_immediate(**v);
                        key_dead || val_dead
                    })
                    .map(|(k, _)| k.clone())
                    .collect()
            };
            let t = self.heap.table_mut(tid);
            for k in dead_keys {
                if let Some(slot) = t.hash.get_mut(&k) {
                    *slot = Value::Nil;
                }
            }
            if matches!(mode, WeakMode::Values | WeakMode::Both) {
                let dead_idx: Vec<usize> = {
                    let t = self.heap.table(tid);
                    (0..t.array.len())
                        .filter(|&idx| {
                            let v = t.array[idx];
                            !v.is_nil() && !self.is_marked_or_immediate(v)
                        })
                        .collect()
                };
                let t = self.heap.table_mut(tid);
                for idx in dead_idx {
                    t.array[idx] = Value::Nil;
                }
            }
        }
    }

    /// Frees white objects and repaints survivors white for the next
    /// cycle. Dead short strings leave the intern table with them.
    fn sweep(&mut self) {
        let ids = self.heap.pool.ids();
        for raw in ids {
            let color = match self.heap.pool.get(raw) {
                Some(o) => o.header.color,
                None => continue,
            };
            if color == Color::White {
                if let Some(o) = self.heap.pool.get(raw) {
                    if let GcData::Str(s) = &o.data {
                        if !s.long {
                            let hash = s.hash;
                            self.heap.interner.remove(hash, StrId(raw));
                        }
                    }
                }
                let freed = self.heap.pool.free(raw);
                self.heap.allocated = self.heap.allocated.saturating_sub(freed);
            } else if let Some(o) = self.heap.pool.get_mut(raw) {
                o.header.color = Color::White;
            }
        }
    }

    /// Runs queued `__gc` metamethods. Each runs protected; an error is
    /// delivered to the warn hook and never propagates.
    fn run_finalizers(&mut self) {
        if self.finalize_queue.is_empty() {
            return;
        }
        let queue = std::mem::take(&mut self.finalize_queue);
        for v in queue {
            let mm = self.metamethod(v, Mm::Gc);
            if mm.is_nil() {
                continue;
            }
            match self.call_value(mm, &[v], 0) {
                Ok(_) => {}
                Err(Fault::Error) => {
                    let err = self.take_fault();
                    let text = self.raw_display(err);
                    self.emit_warning(&format!("error in __gc metamethod ({})", text), false);
                }
                Err(Fault::Yield) => {
                    self.emit_warning("error in __gc metamethod (attempt to yield)", false);
                }
            }
        }
    }
}

#[derive(Default)]
struct MarkCycle {
    gray: Vec<GcId>,
    /// Weak tables seen during marking, with their mode.
    weak: Vec<(TableId, WeakMode)>,
}

fn gc_id_of(v: Value) -> Option<GcId> {
    match v {
        Value::Str(id) => Some(GcId::Str(id)),
        Value::Table(id) => Some(GcId::Table(id)),
        Value::Function(id) => Some(GcId::Function(id)),
        Value::Userdata(id) => Some(GcId::Userdata(id)),
        Value::Thread(id) => Some(GcId::Thread(id)),
        _ => None,
    }
}

fn proto_children(proto: &crate::value::Proto, out: &mut Vec<Value>) {
    out.push(Value::Str(proto.source));
    out.extend(proto.consts.iter().copied());
    for d in proto.upvals.iter() {
        if let Some(name) = d.name {
            out.push(Value::Str(name));
        }
    }
    for child in proto.protos.iter() {
        proto_children(child, out);
    }
}
