use crate::handle::{Handle, TypeTag};
use index_pool::IndexPool;
use smallvec::SmallVec;

/// An object identifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ObjectId {
    index: u32,
    gen: u32,
}

impl ObjectId {
    pub const NULL: Self = ObjectId {
        index: u32::MAX,
        gen: u32::MAX,
    };

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        ObjectId::NULL
    }
}

/// A game object as seen by the component runtime: a name, the chain of directly attached
/// component instances and shortcut handles for frequently accessed component types.
#[derive(Debug)]
pub struct Object {
    name: String,
    chain: SmallVec<[Handle; 8]>,
    shortcuts: SmallVec<[(TypeTag, Handle); 4]>,
}

impl Object {
    pub(crate) fn new(name: String) -> Self {
        Object {
            name,
            chain: SmallVec::new(),
            shortcuts: SmallVec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns handles of the directly attached components in attachment order.
    pub fn components(&self) -> &[Handle] {
        &self.chain
    }

    /// Returns the shortcut handle stored for component type `tag`.
    pub fn shortcut(&self, tag: TypeTag) -> Option<Handle> {
        self.shortcuts
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, h)| *h)
    }

    /// Stores a shortcut handle for component type `tag`. [Handle::INVALID] removes it.
    pub(crate) fn set_shortcut(&mut self, tag: TypeTag, handle: Handle) {
        let pos = self.shortcuts.iter().position(|(t, _)| *t == tag);
        match (pos, handle.is_valid()) {
            (Some(pos), true) => self.shortcuts[pos].1 = handle,
            (Some(pos), false) => {
                self.shortcuts.swap_remove(pos);
            }
            (None, true) => self.shortcuts.push((tag, handle)),
            (None, false) => {}
        }
    }

    pub(crate) fn link(&mut self, handle: Handle) {
        self.chain.push(handle);
    }

    /// Removes `handle` from the chain and from the shortcuts.
    pub(crate) fn unlink(&mut self, handle: Handle) -> bool {
        self.shortcuts.retain(|(_, h)| *h != handle);
        match self.chain.iter().position(|h| *h == handle) {
            Some(pos) => {
                self.chain.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Rewrites every reference to `old` with `new`.
    pub(crate) fn replace(&mut self, old: Handle, new: Handle) {
        if let Some(h) = self.chain.iter_mut().find(|h| **h == old) {
            *h = new;
        }
        for (_, h) in self.shortcuts.iter_mut().filter(|(_, h)| *h == old) {
            *h = new;
        }
    }
}

#[derive(Default)]
struct ObjectSlot {
    gen: u32,
    object: Option<Object>,
}

/// Objects addressed by generational ids. Freed indices are recycled.
#[derive(Default)]
pub(crate) struct ObjectTable {
    ids: IndexPool,
    slots: Vec<ObjectSlot>,
}

impl ObjectTable {
    pub fn insert(&mut self, object: Object) -> ObjectId {
        let index = self.ids.new_id();
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, Default::default);
        }

        let slot = &mut self.slots[index];
        slot.object = Some(object);

        ObjectId {
            index: index as u32,
            gen: slot.gen,
        }
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<Object> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        let object = slot.object.take()?;
        slot.gen = slot.gen.wrapping_add(1);

        let returned = self.ids.return_id(id.index as usize);
        debug_assert!(returned.is_ok());

        Some(object)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.object.as_ref()
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.object.as_mut()
    }

    /// Returns the first object named `name`.
    pub fn find(&self, name: &str) -> Option<ObjectId> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let object = slot.object.as_ref()?;
            (object.name == name).then_some(ObjectId {
                index: index as u32,
                gen: slot.gen,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.ids.in_use()
    }
}

#[test]
fn test_object_ids_are_generational() {
    let mut table = ObjectTable::default();
    let a = table.insert(Object::new("a".to_string()));
    let b = table.insert(Object::new("b".to_string()));
    assert_eq!(table.len(), 2);

    assert!(table.remove(a).is_some());
    assert!(table.remove(a).is_none());
    assert!(!table.contains(a));

    let c = table.insert(Object::new("c".to_string()));
    assert_eq!(c.index(), a.index());
    assert_ne!(c, a);
    assert_eq!(table.get(c).map(|o| o.name()), Some("c"));
    assert_eq!(table.find("b"), Some(b));
}

#[test]
fn test_object_shortcuts() {
    let mut obj = Object::new("obj".to_string());
    let h1 = Handle::new(7, 0, 0);
    let h2 = Handle::new(7, 0, 1);

    obj.link(h1);
    obj.set_shortcut(7, h1);
    obj.replace(h1, h2);
    assert_eq!(obj.components(), &[h2]);
    assert_eq!(obj.shortcut(7), Some(h2));

    assert!(obj.unlink(h2));
    assert!(obj.components().is_empty());
    assert_eq!(obj.shortcut(7), None);
}
