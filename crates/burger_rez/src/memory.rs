//! Handle-based memory manager contract used by the resource cache.
//!
//! The archive never owns resource bytes directly; it allocates relocatable,
//! purgeable blocks from a [`HandleMemory`] implementation and stores the
//! opaque [`Handle`] in the directory entry. A handle whose reference count
//! has dropped to zero is marked purgeable and the manager may discard its
//! payload at its own discretion; the loader detects that and reloads.

/// Opaque identifier for one managed allocation
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle(u32);

/// Relocatable, lockable, purgeable allocations identified by [`Handle`]
pub trait HandleMemory {
    /// Allocate `size` bytes, optionally in fixed/high memory.
    ///
    /// Returns `None` when the manager cannot satisfy the request.
    fn alloc(&mut self, size: usize, fixed: bool) -> Option<Handle>;

    /// Release an allocation. The handle is invalid afterwards.
    fn free(&mut self, handle: Handle);

    /// Pin the allocation so it cannot move or be purged
    fn lock(&mut self, handle: Handle);

    /// Undo one [`HandleMemory::lock`]
    fn unlock(&mut self, handle: Handle);

    /// Mark whether the payload may be discarded under memory pressure
    fn set_purge_flag(&mut self, handle: Handle, purgeable: bool);

    /// Tag the allocation with a diagnostic id (the resource number)
    fn set_id(&mut self, handle: Handle, id: u32);

    /// Payload bytes, `None` if the handle is unknown or was purged
    fn bytes(&self, handle: Handle) -> Option<&[u8]>;

    /// Mutable payload bytes, `None` if the handle is unknown or was purged
    fn bytes_mut(&mut self, handle: Handle) -> Option<&mut [u8]>;

    /// Whether the handle still exists but its payload was discarded
    fn is_purged(&self, handle: Handle) -> bool;
}

#[derive(Debug)]
struct Slot {
    /// `None` once the payload has been purged
    data: Option<Vec<u8>>,
    locks: u32,
    purgeable: bool,
    fixed: bool,
    id: u32,
}

/// Plain heap-backed [`HandleMemory`]
///
/// Stand-in for a real relocatable-handle allocator: every handle is a heap
/// buffer in a slot table. [`HeapHandles::compact`] models the manager-side
/// reclamation sweep by discarding the payload of every unlocked purgeable
/// handle.
#[derive(Debug, Default)]
pub struct HeapHandles {
    slots: Vec<Option<Slot>>,
}

impl HeapHandles {
    /// Create an empty manager
    pub fn new() -> HeapHandles {
        HeapHandles::default()
    }

    /// Discard the payload of every unlocked purgeable handle
    pub fn compact(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            if slot.purgeable && slot.locks == 0 {
                slot.data = None;
            }
        }
    }

    /// Number of handles currently allocated
    pub fn live_handles(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Diagnostic id of a handle, if it exists
    pub fn id(&self, handle: Handle) -> Option<u32> {
        self.slot(handle).map(|s| s.id)
    }

    /// Whether a handle is marked purgeable
    pub fn is_purgeable(&self, handle: Handle) -> bool {
        self.slot(handle).is_some_and(|s| s.purgeable)
    }

    /// Whether a handle was placed in fixed/high memory
    pub fn is_fixed(&self, handle: Handle) -> bool {
        self.slot(handle).is_some_and(|s| s.fixed)
    }

    fn slot(&self, handle: Handle) -> Option<&Slot> {
        self.slots.get(handle.0 as usize)?.as_ref()
    }

    fn slot_mut(&mut self, handle: Handle) -> Option<&mut Slot> {
        self.slots.get_mut(handle.0 as usize)?.as_mut()
    }
}

impl HandleMemory for HeapHandles {
    fn alloc(&mut self, size: usize, fixed: bool) -> Option<Handle> {
        let slot = Slot {
            data: Some(vec![0u8; size]),
            locks: 0,
            purgeable: false,
            fixed,
            id: 0,
        };
        let index = self.slots.iter().position(|s| s.is_none());
        match index {
            Some(index) => {
                self.slots[index] = Some(slot);
                Some(Handle(index as u32))
            }
            None => {
                self.slots.push(Some(slot));
                Some(Handle(self.slots.len() as u32 - 1))
            }
        }
    }

    fn free(&mut self, handle: Handle) {
        if let Some(slot) = self.slots.get_mut(handle.0 as usize) {
            *slot = None;
        }
    }

    fn lock(&mut self, handle: Handle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.locks += 1;
        }
    }

    fn unlock(&mut self, handle: Handle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.locks = slot.locks.saturating_sub(1);
        }
    }

    fn set_purge_flag(&mut self, handle: Handle, purgeable: bool) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.purgeable = purgeable;
        }
    }

    fn set_id(&mut self, handle: Handle, id: u32) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.id = id;
        }
    }

    fn bytes(&self, handle: Handle) -> Option<&[u8]> {
        self.slot(handle)?.data.as_deref()
    }

    fn bytes_mut(&mut self, handle: Handle) -> Option<&mut [u8]> {
        self.slot_mut(handle)?.data.as_deref_mut()
    }

    fn is_purged(&self, handle: Handle) -> bool {
        self.slot(handle).is_some_and(|s| s.data.is_none())
    }
}
