//! A handle-based runtime for component instances.
//!
//! Every component type registered in a [ComponentRegistry] gets its own storage: instance data
//! of one type lives contiguously in a single buffer, without `Box`ing and without dynamic
//! dispatch per instance. Instances are addressed by [Handle]s which stay valid until the
//! instance is destroyed. Removal is O(1): the last instance of the type takes over the freed
//! slot and every stored reference to it (object chains, parent fields, the debug list, the
//! deferred-modify queue) is rewritten to the freed handle.
//!
//! Instances are attached either to an [Object] or to a parent instance. Destroying a parent
//! destroys its children.
//!
//! # Examples
//!
//! ```
//! use component_runtime::{
//!     Component, ComponentParams, ComponentRegistry, InstanceOwner, UpdateCtx, UpdateStage,
//!     Value, Values,
//! };
//!
//! #[derive(Default, Values)]
//! struct Mover {
//!     #[value]
//!     pos: [f32; 3],
//!     #[value]
//!     speed: f32,
//! }
//!
//! impl Component for Mover {
//!     const UPDATE_STAGES: &'static [UpdateStage] = &[UpdateStage::Stage2];
//!
//!     fn update(_stage: UpdateStage, ctx: &mut UpdateCtx<'_, Self>) {
//!         let dt = ctx.dt();
//!         for item in ctx.iter_mut() {
//!             item.data.pos[0] += item.data.speed * dt;
//!         }
//!     }
//! }
//!
//! let mut registry = ComponentRegistry::new();
//! let mover = registry.register::<Mover>(ComponentParams::new("mover", 0x10)).unwrap();
//!
//! let car = registry.create_object("car");
//! let h = registry.create_instance(mover, InstanceOwner::Object(car)).unwrap();
//! registry.set_value(h, "speed", Value::Float(2.0)).unwrap();
//!
//! registry.update(UpdateStage::Stage2, 0.5, None);
//! assert_eq!(registry.get_value(h, "pos").unwrap(), Value::Float3([1.0, 0.0, 0.0]));
//! ```

extern crate self as component_runtime;

#[cfg(test)]
mod tests;

mod component;
mod error;
mod handle;
mod object;
mod registry;
mod scheduler;
mod storage;
mod value;

#[doc(hidden)]
pub mod private;

pub use component::{
    Component, ComponentFlags, ComponentId, ComponentParams, CreateCtx, DebugCtx, DestroyCtx,
    InstanceOwner, ModifyCtx, Values,
};
pub use error::{ComponentError, Result};
pub use handle::{Handle, Slot, TypeTag};
pub use object::{Object, ObjectId};
pub use registry::ComponentRegistry;
pub use scheduler::{UpdateCtx, UpdateItem, UpdateStage};
pub use storage::instance::InstanceFlags;
pub use value::{Mat3, ModifyFn, Value, ValueDesc, ValueField, ValueKind, MAX_VALUES};

/// Derives [Values] for a struct. Fields marked `#[value]` become named values.
pub use macros::Values;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// Describes field `$field` of component `$ty` as a value named `$name`.
///
/// # Examples
/// ```
/// use component_runtime::{component_value, Component, ValueDesc, ValueKind, Values};
///
/// #[derive(Default)]
/// struct Light {
///     color: [f32; 4],
///     intensity: f32,
/// }
///
/// impl Values for Light {
///     fn values() -> Vec<ValueDesc<Self>> {
///         vec![
///             component_value!(Light, color, "color"),
///             component_value!(Light, intensity, "intensity"),
///         ]
///     }
/// }
///
/// impl Component for Light {}
///
/// assert_eq!(Light::values()[0].kind(), ValueKind::Float4);
/// ```
#[macro_export]
macro_rules! component_value {
    ($ty:path, $field:tt, $name:expr) => {
        // Safety: the offset and the accessor refer to the same field.
        unsafe {
            $crate::ValueDesc::<$ty>::from_field(
                $name,
                $crate::private::offset_of!($ty, $field),
                |c: &$ty| &c.$field,
            )
        }
    };
}
