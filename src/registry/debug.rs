use super::ComponentRegistry;
use crate::component::DebugCtx;
use crate::error::{ComponentError, Result};
use crate::handle::Handle;
use std::any::Any;

impl ComponentRegistry {
    /// Adds an instance to the debug list. Adding a listed instance does nothing.
    pub fn debug_add(&mut self, handle: Handle) -> Result<()> {
        self.resolve(handle)?;
        if !self.debug_list.contains(&handle) {
            self.debug_list.push(handle);
        }
        Ok(())
    }

    /// Returns `true` if the instance was listed.
    pub fn debug_remove(&mut self, handle: Handle) -> bool {
        let len = self.debug_list.len();
        self.debug_list.retain(|h| *h != handle);
        self.debug_list.len() != len
    }

    pub fn debug_handles(&self) -> &[Handle] {
        &self.debug_list
    }

    /// Calls [Component::debug](crate::Component::debug) for every listed instance.
    pub fn debug(&self, dt: f32, view: &dyn Any) {
        for &handle in &self.debug_list {
            let Ok((ti, phys)) = self.resolve(handle) else {
                continue;
            };
            let ty = &self.types[ti];
            let owner = ty.storage.instance(phys).owner;
            let ctx = DebugCtx {
                handle,
                host: owner.object().and_then(|id| self.objects.get(id)),
                dt,
                view,
            };
            unsafe { (ty.vtable.debug_fn)(ty.storage.data_ptr(phys), &ctx) };
        }
    }

    /// Turns debug output of component `component` of the object named `object` on or off.
    pub fn set_object_debug(&mut self, object: &str, component: &str, enabled: bool) -> Result<()> {
        let id = self
            .find_object(object)
            .ok_or_else(|| ComponentError::UnknownObjectName(object.to_string()))?;
        let handle = self.find_instance_by_name(id, component)?;

        if enabled {
            self.debug_add(handle)
        } else {
            self.debug_remove(handle);
            Ok(())
        }
    }
}
