use crate::component::{Component, ComponentFlags};
use crate::error::Result;
use crate::handle::Handle;
use crate::object::{Object, ObjectTable};
use crate::registry::ComponentRegistry;
use crate::storage::ComponentStorage;
use log::warn;
use std::any::Any;
use std::marker::PhantomData;
use std::mem;

/// A point in the frame at which update callbacks run.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum UpdateStage {
    Stage1,
    Stage2,
    Stage3,
    Stage4,
    Stage5,
}

impl UpdateStage {
    pub const ALL: [UpdateStage; 5] = [
        UpdateStage::Stage1,
        UpdateStage::Stage2,
        UpdateStage::Stage3,
        UpdateStage::Stage4,
        UpdateStage::Stage5,
    ];
}

/// Everything an erased update callback operates on.
pub(crate) struct UpdateEnv<'a> {
    pub storage: &'a mut ComponentStorage,
    pub objects: &'a ObjectTable,
    pub stage: UpdateStage,
    pub dt: f32,
    pub param: Option<&'a mut (dyn Any + 'static)>,
    pub pending: &'a mut Vec<Handle>,
}

/// Passed to [Component::update]. Gives access to the instances of `T` scheduled for this frame.
pub struct UpdateCtx<'a, T> {
    env: UpdateEnv<'a>,
    _ty: PhantomData<fn() -> T>,
}

/// A scheduled instance.
pub struct UpdateItem<'a, T> {
    pub handle: Handle,
    /// The object the instance is attached to, `None` for child instances.
    pub host: Option<&'a Object>,
    pub data: &'a mut T,
}

impl<'a, T: Component> UpdateCtx<'a, T> {
    pub(crate) fn new(env: UpdateEnv<'a>) -> Self {
        UpdateCtx {
            env,
            _ty: PhantomData,
        }
    }

    pub fn stage(&self) -> UpdateStage {
        self.env.stage
    }

    pub fn dt(&self) -> f32 {
        self.env.dt
    }

    /// Returns the stage parameter passed to [update](ComponentRegistry::update)
    /// if it is of type `P`.
    pub fn param<P: Any>(&mut self) -> Option<&mut P> {
        self.env.param.as_deref_mut()?.downcast_mut::<P>()
    }

    /// Number of scheduled instances.
    pub fn len(&self) -> usize {
        self.env.storage.update_refs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        let storage = &*self.env.storage;
        storage
            .update_refs()
            .iter()
            .map(move |&phys| storage.instance(phys).handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        let storage = &*self.env.storage;
        storage.update_refs().iter().map(move |&phys| {
            let data = unsafe { &*(storage.data_ptr(phys) as *const T) };
            (storage.instance(phys).handle, data)
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = UpdateItem<'_, T>> + '_ {
        let storage = &*self.env.storage;
        let objects = self.env.objects;

        // Every physical slot appears in the update list at most once.
        storage.update_refs().iter().map(move |&phys| {
            let inst = storage.instance(phys);
            UpdateItem {
                handle: inst.handle,
                host: inst.owner.object().and_then(|id| objects.get(id)),
                data: unsafe { &mut *(storage.data_ptr(phys) as *mut T) },
            }
        })
    }

    /// Requests `handle` (of any component type) to be scheduled for update.
    /// Requests are applied after the callback returns.
    pub fn schedule(&mut self, handle: Handle) {
        self.env.pending.push(handle);
    }
}

impl ComponentRegistry {
    /// Schedules an instance for update. Scheduling an already scheduled instance does nothing.
    pub fn subscribe(&mut self, handle: Handle) -> Result<()> {
        let (ti, phys) = self.resolve(handle)?;
        self.types[ti].storage.subscribe(phys);
        Ok(())
    }

    pub fn unsubscribe(&mut self, handle: Handle) -> Result<()> {
        let (ti, phys) = self.resolve(handle)?;
        self.types[ti].storage.unsubscribe(phys);
        Ok(())
    }

    /// Returns `true` if the instance is scheduled for update.
    pub fn is_scheduled(&self, handle: Handle) -> Result<bool> {
        let (ti, phys) = self.resolve(handle)?;
        Ok(self.types[ti].storage.instance(phys).update_idx.is_some())
    }

    /// Unschedules every instance except those of
    /// [ALWAYS_UPDATE](ComponentFlags::ALWAYS_UPDATE) types.
    pub fn clear_updates(&mut self) {
        for ty in &mut self.types {
            if !ty.flags.contains(ComponentFlags::ALWAYS_UPDATE) {
                ty.storage.clear_updates();
            }
        }
    }

    /// Runs the update callback of every component type that updates in `stage`.
    /// Each callback receives all scheduled instances of its type at once.
    pub fn update(
        &mut self,
        stage: UpdateStage,
        dt: f32,
        mut param: Option<&mut (dyn Any + 'static)>,
    ) {
        for ti in 0..self.types.len() {
            let ty = &mut self.types[ti];
            if !ty.vtable.updates_in(stage) {
                continue;
            }
            let update_fn = ty.vtable.update_fn;

            let env = UpdateEnv {
                storage: &mut ty.storage,
                objects: &self.objects,
                stage,
                dt,
                param: param.as_deref_mut(),
                pending: &mut self.pending,
            };
            update_fn(stage, env);

            for handle in mem::take(&mut self.pending) {
                if self.subscribe(handle).is_err() {
                    warn!("Dropped update request for {handle:?}: not a live instance");
                }
            }
        }
    }
}
