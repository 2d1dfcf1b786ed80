// Id-keyed object pool. The map itself is the all-objects list the
// sweep phase walks; freed ids go on a free list for reuse.

use ahash::RandomState;
use indexmap::IndexMap;

use crate::gc::object::GcBox;

pub struct GcPool {
    map: IndexMap<u32, GcBox, RandomState>,
    free_list: Vec<u32>,
    next_id: u32,
}

impl GcPool {
    pub fn new() -> Self {
        GcPool {
            map: IndexMap::with_capacity_and_hasher(256, RandomState::new()),
            free_list: Vec::new(),
            next_id: 0,
        }
    }

    pub fn alloc(&mut self, obj: GcBox) -> u32 {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                debug_assert!(self.next_id != 0, "object pool exhausted u32 ids");
                id
            }
        };
        self.map.insert(id, obj);
        id
    }

    #[inline(always)]
    pub fn get(&self, id: u32) -> Option<&GcBox> {
        self.map.get(&id)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, id: u32) -> Option<&mut GcBox> {
        self.map.get_mut(&id)
    }

    /// Removes the object, returning its accounted size.
    pub fn free(&mut self, id: u32) -> usize {
        match self.map.swap_remove(&id) {
            Some(obj) => {
                self.free_list.push(id);
                obj.header.size as usize
            }
            None => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.map.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &GcBox)> + '_ {
        self.map.iter().map(|(&id, obj)| (id, obj))
    }
}

impl Default for GcPool {
    fn default() -> Self {
        Self::new()
    }
}
