//! Per-type instance storage.
//!
//! Instance data lives in a single type-erased buffer addressed by *physical* slot. Handles
//! carry a *logical* slot which the `indexes` table maps to a physical one. Removal swaps the
//! removed logical slot with the last live one, so live logical slots are always
//! `0..len`. The data of an instance never moves between physical slots for its lifetime.

pub(crate) mod buffer;
pub(crate) mod instance;

use crate::component::ComponentVTable;
use crate::error::{ComponentError, Result};
use crate::handle::{Handle, Slot};
use buffer::RawBuffer;
use instance::{InstanceDesc, Owner};

pub(crate) struct ComponentStorage {
    stride: usize,
    align: usize,
    grow_count: u32,
    cur_idx: u32,
    data: RawBuffer,
    /// Indexed by physical slot.
    instances: Vec<InstanceDesc>,
    /// Logical slot -> physical slot.
    indexes: Vec<u32>,
    /// Physical slots of the instances scheduled for update.
    update_refs: Vec<u32>,
    needs_drop: bool,
    drop_fn: unsafe fn(*mut u8),
}

fn oom(what: &'static str) -> ComponentError {
    ComponentError::OutOfMemory { what }
}

impl ComponentStorage {
    pub fn new(vtable: &ComponentVTable, initial_count: u32, grow_count: u32) -> Result<Self> {
        let capacity = initial_count.min(Handle::MAX_SLOT);

        let data = RawBuffer::with_elements(capacity as usize, vtable.size, vtable.align)?;

        let mut instances = Vec::new();
        instances
            .try_reserve_exact(capacity as usize)
            .map_err(|_| oom("instance descriptors"))?;
        instances.resize_with(capacity as usize, Default::default);

        let mut indexes = Vec::new();
        indexes
            .try_reserve_exact(capacity as usize)
            .map_err(|_| oom("instance indexes"))?;
        indexes.extend(0..capacity);

        let mut update_refs = Vec::new();
        update_refs
            .try_reserve_exact(capacity as usize)
            .map_err(|_| oom("update list"))?;

        Ok(ComponentStorage {
            stride: vtable.size,
            align: vtable.align,
            grow_count,
            cur_idx: 0,
            data,
            instances,
            indexes,
            update_refs,
            needs_drop: vtable.needs_drop,
            drop_fn: vtable.drop_fn,
        })
    }

    /// Number of live instances.
    pub fn len(&self) -> u32 {
        self.cur_idx
    }

    pub fn capacity(&self) -> u32 {
        self.instances.len() as u32
    }

    pub fn is_full(&self) -> bool {
        self.cur_idx == self.capacity()
    }

    /// Adds `grow_count` slots. On failure the storage is left untouched.
    pub fn grow(&mut self, name: &str) -> Result<u32> {
        let capacity = self.capacity();
        let new_capacity = capacity
            .saturating_add(self.grow_count)
            .min(Handle::MAX_SLOT);
        if new_capacity == capacity {
            return Err(ComponentError::CapacityExceeded(name.to_string()));
        }
        let added = (new_capacity - capacity) as usize;

        let mut data = RawBuffer::with_elements(new_capacity as usize, self.stride, self.align)?;
        self.instances
            .try_reserve_exact(added)
            .map_err(|_| oom("instance descriptors"))?;
        self.indexes
            .try_reserve_exact(added)
            .map_err(|_| oom("instance indexes"))?;
        self.update_refs
            .try_reserve_exact(new_capacity as usize - self.update_refs.len())
            .map_err(|_| oom("update list"))?;

        // Values are moved bitwise; the old buffer is freed without dropping them.
        unsafe { data.copy_from(&self.data, self.data.size()) };
        self.data = data;

        self.instances.resize_with(new_capacity as usize, Default::default);
        self.indexes.extend(capacity..new_capacity);

        Ok(new_capacity)
    }

    /// Returns the physical slot of a live logical slot.
    #[inline]
    pub fn physical(&self, slot: Slot) -> Option<u32> {
        (slot < self.cur_idx).then(|| self.indexes[slot as usize])
    }

    #[inline]
    pub fn data_ptr(&self, phys: u32) -> *mut u8 {
        unsafe { self.data.ptr().add(phys as usize * self.stride) }
    }

    #[inline]
    pub fn instance(&self, phys: u32) -> &InstanceDesc {
        &self.instances[phys as usize]
    }

    #[inline]
    pub fn instance_mut(&mut self, phys: u32) -> &mut InstanceDesc {
        &mut self.instances[phys as usize]
    }

    /// Physical slots of live instances in logical order.
    pub fn live(&self) -> &[u32] {
        &self.indexes[..self.cur_idx as usize]
    }

    /// Occupies the next logical slot and initializes its data with `init_fn`.
    /// The storage must not be full. Returns the physical slot.
    pub fn push(&mut self, handle: Handle, owner: Owner, init_fn: unsafe fn(*mut u8)) -> u32 {
        debug_assert!(!self.is_full());
        debug_assert_eq!(handle.slot(), self.cur_idx);

        let phys = self.indexes[self.cur_idx as usize];
        self.instances[phys as usize] = InstanceDesc::new(handle, owner);
        unsafe { init_fn(self.data_ptr(phys)) };
        self.cur_idx += 1;

        phys
    }

    /// Frees logical slot `slot` whose value has already been dropped.
    ///
    /// The last live logical slot takes the place of `slot`. Returns the old handle of the
    /// moved instance. Its descriptor still carries that handle and must be rewritten by the
    /// caller.
    pub fn swap_remove(&mut self, slot: Slot) -> Option<Handle> {
        let last = self.cur_idx - 1;
        let phys = self.indexes[slot as usize];
        debug_assert!(self.instances[phys as usize].update_idx.is_none());

        self.instances[phys as usize] = InstanceDesc::default();
        self.indexes.swap(slot as usize, last as usize);
        self.cur_idx = last;

        if slot != last {
            let moved = self.indexes[slot as usize];
            Some(self.instances[moved as usize].handle)
        } else {
            None
        }
    }

    pub fn update_refs(&self) -> &[u32] {
        &self.update_refs
    }

    /// Returns `false` if already subscribed.
    pub fn subscribe(&mut self, phys: u32) -> bool {
        let inst = &mut self.instances[phys as usize];
        if inst.update_idx.is_some() {
            return false;
        }
        inst.update_idx = Some(self.update_refs.len() as u32);
        self.update_refs.push(phys);
        true
    }

    /// Returns `false` if not subscribed.
    pub fn unsubscribe(&mut self, phys: u32) -> bool {
        let Some(idx) = self.instances[phys as usize].update_idx.take() else {
            return false;
        };

        self.update_refs.swap_remove(idx as usize);
        if let Some(&moved) = self.update_refs.get(idx as usize) {
            self.instances[moved as usize].update_idx = Some(idx);
        }
        true
    }

    pub fn clear_updates(&mut self) {
        for phys in self.update_refs.drain(..) {
            self.instances[phys as usize].update_idx = None;
        }
    }
}

impl Drop for ComponentStorage {
    fn drop(&mut self) {
        if !self.needs_drop {
            return;
        }
        for &phys in &self.indexes[..self.cur_idx as usize] {
            unsafe { (self.drop_fn)(self.data.ptr().add(phys as usize * self.stride)) };
        }
    }
}

#[cfg(test)]
fn test_storage<T: crate::Component>(initial: u32, grow: u32) -> ComponentStorage {
    ComponentStorage::new(&ComponentVTable::of::<T>(), initial, grow).unwrap()
}

#[test]
fn test_storage_swap_remove() {
    #[derive(Default)]
    struct Num(u64);
    impl crate::Values for Num {}
    impl crate::Component for Num {}

    let vtable = ComponentVTable::of::<Num>();
    let mut storage = test_storage::<Num>(4, 4);

    let handles: Vec<_> = (0..3).map(|i| Handle::new(1, 0, i)).collect();
    for (i, h) in handles.iter().enumerate() {
        let phys = storage.push(*h, Owner::Detached, vtable.init_fn);
        unsafe { *(storage.data_ptr(phys) as *mut u64) = i as u64 * 10 };
    }
    assert_eq!(storage.len(), 3);

    let phys_c = storage.physical(2).unwrap();
    let moved = storage.swap_remove(1);
    assert_eq!(moved, Some(handles[2]));
    assert_eq!(storage.len(), 2);
    assert_eq!(storage.physical(1), Some(phys_c));
    assert_eq!(storage.physical(2), None);
    assert_eq!(unsafe { *(storage.data_ptr(phys_c) as *const u64) }, 20);

    assert_eq!(storage.swap_remove(1), None);
    assert_eq!(storage.len(), 1);
}

#[test]
fn test_storage_grow() {
    #[derive(Default)]
    struct Name(String);
    impl crate::Values for Name {}
    impl crate::Component for Name {}

    let vtable = ComponentVTable::of::<Name>();
    let mut storage = test_storage::<Name>(2, 3);

    for i in 0..2 {
        let phys = storage.push(Handle::new(1, 0, i), Owner::Detached, vtable.init_fn);
        unsafe { (*(storage.data_ptr(phys) as *mut Name)).0 = format!("n{i}") };
        storage.subscribe(phys);
    }
    assert!(storage.is_full());

    assert_eq!(storage.grow("name").unwrap(), 5);
    assert_eq!(storage.capacity(), 5);
    assert!(!storage.is_full());
    assert_eq!(storage.update_refs().len(), 2);

    for (i, &phys) in storage.live().iter().enumerate() {
        let name = unsafe { &*(storage.data_ptr(phys) as *const Name) };
        assert_eq!(name.0, format!("n{i}"));
    }
}

#[test]
fn test_storage_update_list() {
    #[derive(Default)]
    struct Unit;
    impl crate::Values for Unit {}
    impl crate::Component for Unit {}

    let vtable = ComponentVTable::of::<Unit>();
    let mut storage = test_storage::<Unit>(4, 1);
    let slots: Vec<_> = (0..3)
        .map(|i| storage.push(Handle::new(1, 0, i), Owner::Detached, vtable.init_fn))
        .collect();

    for &p in &slots {
        assert!(storage.subscribe(p));
    }
    assert!(!storage.subscribe(slots[1]));
    assert_eq!(storage.update_refs(), &slots[..]);

    assert!(storage.unsubscribe(slots[0]));
    assert!(!storage.unsubscribe(slots[0]));
    assert_eq!(storage.update_refs(), &[slots[2], slots[1]]);
    assert_eq!(storage.instance(slots[2]).update_idx, Some(0));

    storage.clear_updates();
    assert!(storage.update_refs().is_empty());
    assert!(slots.iter().all(|&p| storage.instance(p).update_idx.is_none()));
}
