mod debug;
mod values;

use crate::component::{
    Component, ComponentFlags, ComponentId, ComponentParams, ComponentVTable, CreateCtx,
    DestroyCtx, InstanceOwner,
};
use crate::error::{ComponentError, Result};
use crate::handle::{Handle, TypeTag};
use crate::object::{Object, ObjectId, ObjectTable};
use crate::storage::instance::{InstanceFlags, Owner};
use crate::storage::ComponentStorage;
use crate::value::ValueTable;
use log::{debug, error, warn};
use smallvec::SmallVec;
use std::any::TypeId;
use std::mem;

/// A registered component type together with its storage.
pub(crate) struct ComponentType {
    pub name: String,
    pub tag: TypeTag,
    pub flags: ComponentFlags,
    pub vtable: ComponentVTable,
    pub values: ValueTable,
    /// Values that have a modify callback.
    pub modify_mask: u64,
    pub storage: ComponentStorage,
}

/// Owns every component type, its instances and the objects they are attached to.
///
/// # Examples
///
/// ```
/// use component_runtime::{Component, ComponentParams, ComponentRegistry, InstanceOwner, Values};
///
/// #[derive(Default, Values)]
/// struct Health {
///     #[value]
///     hp: i32,
/// }
///
/// impl Component for Health {}
///
/// let mut registry = ComponentRegistry::new();
/// let health = registry.register::<Health>(ComponentParams::new("health", 1)).unwrap();
///
/// let player = registry.create_object("player");
/// let h = registry.create_instance(health, InstanceOwner::Object(player)).unwrap();
/// registry.instance_mut::<Health>(h).unwrap().hp = 100;
///
/// assert_eq!(registry.find_instance(player, health).unwrap(), h);
/// registry.destroy_object(player).unwrap();
/// assert!(!registry.is_alive(h));
/// ```
#[derive(Default)]
pub struct ComponentRegistry {
    pub(crate) types: Vec<ComponentType>,
    pub(crate) objects: ObjectTable,
    /// Instances with dirty values awaiting [flush_deferred](Self::flush_deferred).
    pub(crate) deferred: Vec<Handle>,
    pub(crate) debug_list: SmallVec<[Handle; 8]>,
    /// Children of destroyed instances, destroyed right after their parent.
    pub(crate) orphans: Vec<Handle>,
    /// Update requests issued from update callbacks.
    pub(crate) pending: Vec<Handle>,
}

fn replace_handle(list: &mut [Handle], old: Handle, new: Handle) {
    for h in list.iter_mut().filter(|h| **h == old) {
        *h = new;
    }
}

/// Safety: `data` must point to a live instance that has a `Handle` value at `offset`.
unsafe fn handle_field(data: *mut u8, offset: usize) -> *mut Handle {
    data.add(offset) as *mut Handle
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers component type `T`. Ids are assigned sequentially starting from 1.
    pub fn register<T: Component>(&mut self, params: ComponentParams) -> Result<ComponentId> {
        let values = self.check_registration::<T>(&params).map_err(|err| {
            warn!("Rejected component '{}': {err}", params.name);
            err
        })?;
        let vtable = ComponentVTable::of::<T>();
        let storage = ComponentStorage::new(&vtable, params.initial_count, params.grow_count)
            .map_err(|err| {
                error!("Failed to allocate storage of component '{}': {err}", params.name);
                err
            })?;

        let id = ComponentId::from_index(self.types.len());
        debug!(
            "Registered component '{}' ({}) as {id:?}, {} values, capacity {}",
            params.name,
            vtable.type_name,
            values.entries().len(),
            storage.capacity()
        );

        self.types.push(ComponentType {
            modify_mask: values.modify_mask(),
            name: params.name,
            tag: params.tag,
            flags: params.flags,
            vtable,
            values,
            storage,
        });

        Ok(id)
    }

    fn check_registration<T: Component>(&self, params: &ComponentParams) -> Result<ValueTable> {
        params.validate()?;

        if self.types.len() >= Handle::MAX_TYPES {
            return Err(ComponentError::TooManyTypes);
        }
        if self
            .types
            .iter()
            .any(|ty| ty.name.eq_ignore_ascii_case(&params.name))
        {
            return Err(ComponentError::DuplicateName(params.name.clone()));
        }
        if self.types.iter().any(|ty| ty.tag == params.tag) {
            return Err(ComponentError::DuplicateTag(params.tag));
        }

        ValueTable::new::<T>(&params.name, T::values())
    }

    /// Number of registered component types.
    pub fn component_count(&self) -> usize {
        self.types.len()
    }

    /// Finds a component type by name, ignoring ASCII case.
    pub fn find_by_name(&self, name: &str) -> Option<ComponentId> {
        self.types
            .iter()
            .position(|ty| ty.name.eq_ignore_ascii_case(name))
            .map(ComponentId::from_index)
    }

    pub fn find_by_tag(&self, tag: TypeTag) -> Option<ComponentId> {
        self.types
            .iter()
            .position(|ty| ty.tag == tag)
            .map(ComponentId::from_index)
    }

    /// Returns the id of the first component type registered for `T`.
    pub fn component_id<T: Component>(&self) -> Option<ComponentId> {
        let type_id = TypeId::of::<T>();
        self.types
            .iter()
            .position(|ty| ty.vtable.type_id == type_id)
            .map(ComponentId::from_index)
    }

    pub fn component_name(&self, id: ComponentId) -> Result<&str> {
        Ok(&self.component_type(id)?.name)
    }

    pub fn component_tag(&self, id: ComponentId) -> Result<TypeTag> {
        Ok(self.component_type(id)?.tag)
    }

    pub fn component_flags(&self, id: ComponentId) -> Result<ComponentFlags> {
        Ok(self.component_type(id)?.flags)
    }

    /// Number of live instances of a component type.
    pub fn instance_count(&self, id: ComponentId) -> Result<usize> {
        Ok(self.component_type(id)?.storage.len() as usize)
    }

    /// Number of instances a component type can hold before its storage grows.
    pub fn capacity(&self, id: ComponentId) -> Result<usize> {
        Ok(self.component_type(id)?.storage.capacity() as usize)
    }

    pub(crate) fn component_type(&self, id: ComponentId) -> Result<&ComponentType> {
        self.types
            .get(id.index())
            .ok_or_else(|| ComponentError::UnknownComponent(format!("{id:?}")))
    }

    /// Maps a live handle to its type index and physical slot.
    pub(crate) fn resolve(&self, handle: Handle) -> Result<(usize, u32)> {
        let ti = handle.type_index();
        self.types
            .get(ti)
            .filter(|ty| ty.tag == handle.tag())
            .and_then(|ty| {
                ty.storage
                    .physical(handle.slot())
                    .filter(|&phys| ty.storage.instance(phys).handle == handle)
            })
            .map(|phys| (ti, phys))
            .ok_or(ComponentError::InvalidHandle(handle))
    }

    pub fn create_object(&mut self, name: impl Into<String>) -> ObjectId {
        self.objects.insert(Object::new(name.into()))
    }

    /// Destroys every component attached to the object, then the object itself.
    pub fn destroy_object(&mut self, id: ObjectId) -> Result<()> {
        loop {
            let last = self
                .objects
                .get(id)
                .ok_or(ComponentError::UnknownObject(id))?
                .components()
                .last()
                .copied();
            match last {
                Some(handle) => self.destroy_instance(handle)?,
                None => break,
            }
        }
        self.objects.remove(id);
        Ok(())
    }

    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.get_mut(id)
    }

    pub fn find_object(&self, name: &str) -> Option<ObjectId> {
        self.objects.find(name)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Creates an instance of component `id` owned by `owner`.
    ///
    /// The instance starts as `T::default()`, is linked to its owner, initialized by
    /// [Component::create] and scheduled for update. If `create` fails every step is undone.
    pub fn create_instance(&mut self, id: ComponentId, owner: InstanceOwner) -> Result<Handle> {
        let ti = self.component_type(id).map(|_| id.index())?;

        match owner {
            InstanceOwner::Object(object) => {
                if !self.objects.contains(object) {
                    return Err(ComponentError::UnknownObject(object));
                }
            }
            InstanceOwner::Parent { handle, offset } => {
                let (pti, _) = self.resolve(handle)?;
                let parent = &self.types[pti];
                if !parent.values.is_handle_offset(offset) {
                    return Err(ComponentError::InvalidParentOffset {
                        component: parent.name.clone(),
                        offset,
                    });
                }
            }
        }

        let ty = &mut self.types[ti];
        if ty.flags.contains(ComponentFlags::SINGLETON) && ty.storage.len() > 0 {
            return Err(ComponentError::SingletonViolation(ty.name.clone()));
        }
        if ty.storage.is_full() {
            let capacity = ty.storage.grow(&ty.name)?;
            debug!("Component '{}' grew to {capacity} instances", ty.name);
        }

        let handle = Handle::new(ty.tag, ti as u16, ty.storage.len());
        let owner_state = Owner::from(owner);
        let phys = ty.storage.push(handle, owner_state, ty.vtable.init_fn);
        let replaced = self.link(handle, owner_state);

        let ty = &self.types[ti];
        let ctx = CreateCtx {
            handle,
            owner,
            host: owner_state.object().and_then(|id| self.objects.get(id)),
        };
        let created = unsafe { (ty.vtable.create_fn)(ty.storage.data_ptr(phys), &ctx) };

        if let Err(source) = created {
            self.unlink(handle, owner_state, replaced);
            let ty = &mut self.types[ti];
            unsafe { (ty.vtable.drop_fn)(ty.storage.data_ptr(phys)) };
            ty.storage.swap_remove(handle.slot());
            return Err(ComponentError::CreateFailed {
                component: ty.name.clone(),
                source,
            });
        }

        let ty = &mut self.types[ti];
        ty.storage.subscribe(phys);
        if ty.flags.contains(ComponentFlags::DEFERRED_MODIFY) && ty.modify_mask != 0 {
            ty.storage.instance_mut(phys).dirty = ty.modify_mask;
            self.deferred.push(handle);
        }

        Ok(handle)
    }

    /// Creates an instance of the component named `name` attached to `object`.
    pub fn create_instance_by_name(&mut self, name: &str, object: ObjectId) -> Result<Handle> {
        let id = self
            .find_by_name(name)
            .ok_or_else(|| ComponentError::UnknownComponent(name.to_string()))?;
        self.create_instance(id, InstanceOwner::Object(object))
    }

    /// Destroys an instance together with all of its children.
    ///
    /// The last instance of the same type takes over the freed logical slot, so after this call
    /// it is addressed by `handle`. Every stored reference to it is rewritten accordingly.
    pub fn destroy_instance(&mut self, handle: Handle) -> Result<()> {
        self.destroy_one(handle)?;

        while let Some(orphan) = self.orphans.pop() {
            if let Err(err) = self.destroy_one(orphan) {
                warn!("Failed to destroy child instance {orphan:?}: {err}");
            }
        }
        Ok(())
    }

    fn destroy_one(&mut self, handle: Handle) -> Result<()> {
        let (ti, phys) = self.resolve(handle)?;

        self.debug_list.retain(|h| *h != handle);
        self.deferred.retain(|h| *h != handle);

        let ty = &mut self.types[ti];
        ty.storage.unsubscribe(phys);

        let owner = ty.storage.instance(phys).owner;
        let ctx = DestroyCtx {
            handle,
            host: owner.object().and_then(|id| self.objects.get(id)),
        };
        let data = ty.storage.data_ptr(phys);
        unsafe {
            (ty.vtable.destroy_fn)(data, &ctx);
            (ty.vtable.drop_fn)(data);
        }
        let children = mem::take(&mut ty.storage.instance_mut(phys).children);

        self.unlink(handle, owner, Handle::INVALID);

        for &child in &children {
            if let Ok((cti, cphys)) = self.resolve(child) {
                self.types[cti].storage.instance_mut(cphys).owner = Owner::Detached;
            }
        }
        self.orphans.extend(children);

        if let Some(moved) = self.types[ti].storage.swap_remove(handle.slot()) {
            self.rewrite_handle(moved, handle);
        }
        Ok(())
    }

    /// Attaches `handle` to its owner. Returns the shortcut or parent field value it replaced.
    fn link(&mut self, handle: Handle, owner: Owner) -> Handle {
        match owner {
            Owner::Object(id) => {
                let shortcut = self.types[handle.type_index()]
                    .flags
                    .contains(ComponentFlags::SHORTCUT);
                match self.objects.get_mut(id) {
                    Some(object) => {
                        object.link(handle);
                        if !shortcut {
                            return Handle::INVALID;
                        }
                        let replaced = object.shortcut(handle.tag()).unwrap_or_default();
                        object.set_shortcut(handle.tag(), handle);
                        replaced
                    }
                    None => Handle::INVALID,
                }
            }
            Owner::Parent {
                handle: parent,
                offset,
            } => match self.resolve(parent) {
                Ok((pti, pphys)) => {
                    let storage = &mut self.types[pti].storage;
                    storage.instance_mut(pphys).children.push(handle);
                    let field = unsafe { handle_field(storage.data_ptr(pphys), offset) };
                    unsafe { mem::replace(&mut *field, handle) }
                }
                Err(_) => Handle::INVALID,
            },
            Owner::Detached => Handle::INVALID,
        }
    }

    /// Detaches `handle` from its owner, putting `restore` back where `handle` was referenced.
    fn unlink(&mut self, handle: Handle, owner: Owner, restore: Handle) {
        match owner {
            Owner::Object(id) => {
                if let Some(object) = self.objects.get_mut(id) {
                    let was_shortcut = object.shortcut(handle.tag()) == Some(handle);
                    object.unlink(handle);
                    if was_shortcut && restore.is_valid() {
                        object.set_shortcut(handle.tag(), restore);
                    }
                }
            }
            Owner::Parent {
                handle: parent,
                offset,
            } => {
                if let Ok((pti, pphys)) = self.resolve(parent) {
                    let storage = &mut self.types[pti].storage;
                    storage
                        .instance_mut(pphys)
                        .children
                        .retain(|h| *h != handle);
                    let field = unsafe { handle_field(storage.data_ptr(pphys), offset) };
                    unsafe {
                        if *field == handle {
                            *field = restore;
                        }
                    }
                }
            }
            Owner::Detached => {}
        }
    }

    /// Rewrites every stored reference to the instance now addressed by `new`
    /// that still carries its previous handle `old`.
    fn rewrite_handle(&mut self, old: Handle, new: Handle) {
        let storage = &mut self.types[new.type_index()].storage;
        let Some(phys) = storage.physical(new.slot()) else {
            return;
        };
        let inst = storage.instance_mut(phys);
        inst.handle = new;
        let owner = inst.owner;
        let children = inst.children.clone();

        replace_handle(&mut self.debug_list, old, new);
        replace_handle(&mut self.deferred, old, new);
        replace_handle(&mut self.orphans, old, new);
        replace_handle(&mut self.pending, old, new);

        match owner {
            Owner::Object(id) => {
                if let Some(object) = self.objects.get_mut(id) {
                    object.replace(old, new);
                }
            }
            Owner::Parent {
                handle: parent,
                offset,
            } => {
                if let Ok((pti, pphys)) = self.resolve(parent) {
                    let storage = &mut self.types[pti].storage;
                    replace_handle(&mut storage.instance_mut(pphys).children, old, new);
                    let field = unsafe { handle_field(storage.data_ptr(pphys), offset) };
                    unsafe {
                        if *field == old {
                            *field = new;
                        }
                    }
                }
            }
            Owner::Detached => {}
        }

        for child in children {
            if let Ok((cti, cphys)) = self.resolve(child) {
                if let Owner::Parent { handle, .. } =
                    &mut self.types[cti].storage.instance_mut(cphys).owner
                {
                    *handle = new;
                }
            }
        }
    }

    pub fn is_alive(&self, handle: Handle) -> bool {
        self.resolve(handle).is_ok()
    }

    fn typed_ptr<T: Component>(&self, handle: Handle) -> Result<*mut T> {
        let (ti, phys) = self.resolve(handle)?;
        let ty = &self.types[ti];
        if ty.vtable.type_id != TypeId::of::<T>() {
            return Err(ComponentError::TypeMismatch {
                component: ty.name.clone(),
                requested: std::any::type_name::<T>(),
            });
        }
        Ok(ty.storage.data_ptr(phys) as *mut T)
    }

    pub fn instance<T: Component>(&self, handle: Handle) -> Result<&T> {
        self.typed_ptr::<T>(handle).map(|p| unsafe { &*p })
    }

    pub fn instance_mut<T: Component>(&mut self, handle: Handle) -> Result<&mut T> {
        self.typed_ptr::<T>(handle).map(|p| unsafe { &mut *p })
    }

    pub fn instance_owner(&self, handle: Handle) -> Result<InstanceOwner> {
        let (ti, phys) = self.resolve(handle)?;
        self.types[ti]
            .storage
            .instance(phys)
            .owner
            .public()
            .ok_or(ComponentError::InvalidHandle(handle))
    }

    pub fn instance_flags(&self, handle: Handle) -> Result<InstanceFlags> {
        let (ti, phys) = self.resolve(handle)?;
        Ok(self.types[ti].storage.instance(phys).flags())
    }

    /// Returns the parent of a child instance, `None` for instances attached to an object.
    pub fn instance_parent(&self, handle: Handle) -> Result<Option<Handle>> {
        let (ti, phys) = self.resolve(handle)?;
        Ok(self.types[ti].storage.instance(phys).owner.parent())
    }

    pub fn instance_children(&self, handle: Handle) -> Result<&[Handle]> {
        let (ti, phys) = self.resolve(handle)?;
        Ok(self.types[ti].storage.instance(phys).children.as_slice())
    }

    /// Returns the object the instance belongs to, following parents of child instances.
    pub fn instance_host(&self, handle: Handle) -> Result<ObjectId> {
        let mut current = handle;
        loop {
            let (ti, phys) = self.resolve(current)?;
            match self.types[ti].storage.instance(phys).owner {
                Owner::Object(id) => return Ok(id),
                Owner::Parent { handle, .. } => current = handle,
                Owner::Detached => return Err(ComponentError::InvalidHandle(handle)),
            }
        }
    }

    /// Returns the most recently attached instance of component `id` on `object`.
    pub fn find_instance(&self, object: ObjectId, id: ComponentId) -> Result<Handle> {
        let ty = self.component_type(id)?;
        let obj = self
            .objects
            .get(object)
            .ok_or(ComponentError::UnknownObject(object))?;

        if let Some(handle) = obj.shortcut(ty.tag) {
            return Ok(handle);
        }

        obj.components()
            .iter()
            .rev()
            .find(|h| h.type_index() == id.index())
            .copied()
            .ok_or_else(|| ComponentError::NotAttached {
                object: obj.name().to_string(),
                component: ty.name.clone(),
            })
    }

    pub fn find_instance_by_name(&self, object: ObjectId, name: &str) -> Result<Handle> {
        let id = self
            .find_by_name(name)
            .ok_or_else(|| ComponentError::UnknownComponent(name.to_string()))?;
        self.find_instance(object, id)
    }

    /// Handles of all live instances of a component type.
    pub fn instances(&self, id: ComponentId) -> Result<impl Iterator<Item = Handle> + '_> {
        let storage = &self.component_type(id)?.storage;
        Ok(storage
            .live()
            .iter()
            .map(move |&phys| storage.instance(phys).handle))
    }

    /// Handles of the instances of a component type scheduled for update.
    pub fn scheduled(&self, id: ComponentId) -> Result<impl Iterator<Item = Handle> + '_> {
        let storage = &self.component_type(id)?.storage;
        Ok(storage
            .update_refs()
            .iter()
            .map(move |&phys| storage.instance(phys).handle))
    }

    /// Iterates over all live instances of `T`.
    pub fn iter<T: Component>(&self) -> Result<impl Iterator<Item = (Handle, &T)> + '_> {
        let id = self
            .component_id::<T>()
            .ok_or_else(|| {
                ComponentError::UnknownComponent(std::any::type_name::<T>().to_string())
            })?;
        let storage = &self.types[id.index()].storage;
        Ok(storage.live().iter().map(move |&phys| {
            let data = unsafe { &*(storage.data_ptr(phys) as *const T) };
            (storage.instance(phys).handle, data)
        }))
    }
}
