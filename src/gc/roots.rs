//! GC root tracking for references that cross the call boundary
//!
//! The registry is the table the collector scans: every non-null slot is a
//! live root. Slots are handed out as single-value [`Root`] holders or as
//! fixed-capacity [`RootBuffer`]s, and return to the free list when the
//! holder drops.

use crate::interop::ObjectRef;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Debug, Default)]
struct RootSlots {
    /// `None` marks a free slot, `Some(NULL)` an allocated empty one
    values: Vec<Option<ObjectRef>>,
    free: Vec<usize>,
}

impl RootSlots {
    fn alloc(&mut self) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.values[index] = Some(ObjectRef::NULL);
                index
            }
            None => {
                self.values.push(Some(ObjectRef::NULL));
                self.values.len() - 1
            }
        }
    }

    fn release(&mut self, index: usize) {
        if let Some(slot) = self.values.get_mut(index) {
            if slot.take().is_some() {
                self.free.push(index);
            }
        }
    }
}

/// Registry of rooted managed references
#[derive(Debug, Default)]
pub struct RootRegistry {
    slots: Mutex<RootSlots>,
}

impl RootRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate a single-slot root holder
    pub fn new_root(self: &Arc<Self>) -> Root {
        let index = self.slots.lock().alloc();
        Root {
            registry: Arc::clone(self),
            index,
        }
    }

    /// Allocate a buffer of `capacity` root slots
    pub fn new_buffer(self: &Arc<Self>, capacity: usize) -> RootBuffer {
        let mut slots = self.slots.lock();
        let indices = (0..capacity).map(|_| slots.alloc()).collect();
        drop(slots);

        RootBuffer {
            registry: Arc::clone(self),
            indices,
        }
    }

    /// Slots currently handed out, empty or not
    pub fn allocated_slots(&self) -> usize {
        self.slots.lock().values.iter().filter(|v| v.is_some()).count()
    }

    /// Non-null references currently kept alive
    pub fn live_references(&self) -> usize {
        self.slots
            .lock()
            .values
            .iter()
            .filter(|v| matches!(v, Some(r) if !r.is_null()))
            .count()
    }

    /// Whether `obj` is held by any slot
    pub fn is_rooted(&self, obj: ObjectRef) -> bool {
        !obj.is_null() && self.slots.lock().values.iter().any(|v| *v == Some(obj))
    }

    /// All live references, for the collector's mark phase
    pub fn snapshot(&self) -> Vec<ObjectRef> {
        self.slots
            .lock()
            .values
            .iter()
            .filter_map(|v| v.filter(|r| !r.is_null()))
            .collect()
    }

    fn store(&self, index: usize, value: ObjectRef) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.values.get_mut(index) {
            if slot.is_some() {
                *slot = Some(value);
            }
        }
    }

    fn load(&self, index: usize) -> ObjectRef {
        self.slots
            .lock()
            .values
            .get(index)
            .copied()
            .flatten()
            .unwrap_or(ObjectRef::NULL)
    }
}

/// Single-slot root holder
///
/// Keeps one reference reachable until cleared or dropped.
#[derive(Debug)]
pub struct Root {
    registry: Arc<RootRegistry>,
    index: usize,
}

impl Root {
    #[inline]
    pub fn set(&self, value: ObjectRef) {
        self.registry.store(self.index, value);
    }

    #[inline]
    pub fn get(&self) -> ObjectRef {
        self.registry.load(self.index)
    }

    #[inline]
    pub fn clear(&self) {
        self.set(ObjectRef::NULL);
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        self.registry.slots.lock().release(self.index);
    }
}

/// Fixed-capacity table of roots, one slot per rooting parameter
#[derive(Debug)]
pub struct RootBuffer {
    registry: Arc<RootRegistry>,
    indices: SmallVec<[usize; 4]>,
}

impl RootBuffer {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.indices.len()
    }

    /// Root `value` in slot `slot`; out-of-range slots are ignored
    pub fn set(&mut self, slot: usize, value: ObjectRef) {
        if let Some(&index) = self.indices.get(slot) {
            self.registry.store(index, value);
        }
    }

    pub fn get(&self, slot: usize) -> ObjectRef {
        self.indices
            .get(slot)
            .map(|&index| self.registry.load(index))
            .unwrap_or(ObjectRef::NULL)
    }

    /// Drop every reference held by the buffer, keeping its slots
    pub fn clear(&mut self) {
        let mut slots = self.registry.slots.lock();
        for &index in &self.indices {
            if let Some(slot) = slots.values.get_mut(index) {
                if slot.is_some() {
                    *slot = Some(ObjectRef::NULL);
                }
            }
        }
    }
}

impl Drop for RootBuffer {
    fn drop(&mut self) {
        let mut slots = self.registry.slots.lock();
        for &index in &self.indices {
            slots.release(index);
        }
    }
}
