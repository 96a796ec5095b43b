use super::ComponentRegistry;
use crate::component::{ComponentFlags, ComponentId, ModifyCtx};
use crate::error::{ComponentError, Result};
use crate::handle::Handle;
use crate::value::{Value, ValueEntry, ValueKind};
use log::warn;
use std::mem;

impl ComponentRegistry {
    fn find_value(&self, handle: Handle, name: &str) -> Result<(usize, u32, usize, &ValueEntry)> {
        let (ti, phys) = self.resolve(handle)?;
        let ty = &self.types[ti];
        let (vi, entry) = ty
            .values
            .find(name)
            .ok_or_else(|| ComponentError::UnknownValue {
                component: ty.name.clone(),
                value: name.to_string(),
            })?;
        Ok((ti, phys, vi, entry))
    }

    /// Returns the kind of value `name` of component `id`.
    pub fn value_kind(&self, id: ComponentId, name: &str) -> Result<ValueKind> {
        let ty = self.component_type(id)?;
        ty.values
            .find(name)
            .map(|(_, entry)| entry.kind)
            .ok_or_else(|| ComponentError::UnknownValue {
                component: ty.name.clone(),
                value: name.to_string(),
            })
    }

    /// Names and kinds of the values of component `id` in declaration order.
    pub fn values(
        &self,
        id: ComponentId,
    ) -> Result<impl Iterator<Item = (&'static str, ValueKind)> + '_> {
        Ok(self
            .component_type(id)?
            .values
            .entries()
            .iter()
            .map(|entry| (entry.name, entry.kind)))
    }

    pub fn get_value(&self, handle: Handle, name: &str) -> Result<Value> {
        let (ti, phys, _, entry) = self.find_value(handle, name)?;
        let data = self.types[ti].storage.data_ptr(phys);
        Ok(unsafe { entry.read(data) })
    }

    /// Reads a single element of an array value.
    pub fn get_value_at(&self, handle: Handle, name: &str, index: usize) -> Result<Value> {
        let (ti, phys, _, entry) = self.find_value(handle, name)?;
        entry.check_index(index)?;
        let data = self.types[ti].storage.data_ptr(phys);
        Ok(unsafe { entry.read_at(data, index) })
    }

    /// Writes a value and runs its modify callback, or marks it dirty if the component type
    /// defers modify callbacks.
    ///
    /// Writing a [Value::StringArray] stores as many elements as both sides have.
    pub fn set_value(&mut self, handle: Handle, name: &str, value: Value) -> Result<()> {
        let (ti, phys, vi, entry) = self.find_value(handle, name)?;
        entry.check_kind(&value, false)?;
        unsafe { entry.write(self.types[ti].storage.data_ptr(phys), value) };
        self.modified(handle, ti, phys, vi)
    }

    /// Writes a single element of an array value.
    pub fn set_value_at(
        &mut self,
        handle: Handle,
        name: &str,
        index: usize,
        value: Value,
    ) -> Result<()> {
        let (ti, phys, vi, entry) = self.find_value(handle, name)?;
        entry.check_kind(&value, true)?;
        entry.check_index(index)?;
        unsafe { entry.write_at(self.types[ti].storage.data_ptr(phys), index, value) };
        self.modified(handle, ti, phys, vi)
    }

    fn modified(&mut self, handle: Handle, ti: usize, phys: u32, vi: usize) -> Result<()> {
        let ty = &mut self.types[ti];
        let entry = &ty.values.entries()[vi];
        let Some(modify) = &entry.modify else {
            return Ok(());
        };

        if ty.flags.contains(ComponentFlags::DEFERRED_MODIFY) {
            let inst = ty.storage.instance_mut(phys);
            if inst.dirty == 0 {
                self.deferred.push(handle);
            }
            inst.dirty |= 1u64 << vi;
            return Ok(());
        }

        let owner = ty.storage.instance(phys).owner;
        let mut ctx = ModifyCtx {
            handle,
            host: owner.object().and_then(|id| self.objects.get(id)),
            value: entry.name,
        };
        modify(ty.storage.data_ptr(phys), &mut ctx).map_err(|source| {
            ComponentError::ModifyFailed {
                value: entry.name.to_string(),
                source,
            }
        })
    }

    /// Runs the modify callbacks of every dirty value queued since the last flush, once per
    /// value. A failing callback is logged and skipped; the rest of the batch still runs.
    pub fn flush_deferred(&mut self) -> Result<()> {
        let queue = mem::take(&mut self.deferred);
        let mut failed = 0;

        for handle in queue {
            let Ok((ti, phys)) = self.resolve(handle) else {
                continue;
            };
            let ty = &mut self.types[ti];
            let dirty = mem::take(&mut ty.storage.instance_mut(phys).dirty);
            let owner = ty.storage.instance(phys).owner;
            let data = ty.storage.data_ptr(phys);

            for (vi, entry) in ty.values.entries().iter().enumerate() {
                if dirty & (1u64 << vi) == 0 {
                    continue;
                }
                let Some(modify) = &entry.modify else {
                    continue;
                };

                let mut ctx = ModifyCtx {
                    handle,
                    host: owner.object().and_then(|id| self.objects.get(id)),
                    value: entry.name,
                };
                if let Err(err) = modify(data, &mut ctx) {
                    warn!(
                        "Deferred modify of '{}.{}' failed for {handle:?}: {err:#}",
                        ty.name, entry.name
                    );
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(ComponentError::DeferredModifyFailed { failed });
        }
        Ok(())
    }

    /// Number of instances waiting for [flush_deferred](Self::flush_deferred).
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }
}
