use crate::error::{ComponentError, Result};
use crate::handle::{Handle, TypeTag};
use crate::object::{Object, ObjectId};
use crate::scheduler::{UpdateCtx, UpdateEnv, UpdateStage};
use crate::value::ValueDesc;
use bitflags::bitflags;
use std::any::{Any, TypeId};
use std::{fmt, mem, ptr};

/// Exposes named fields of a component for generic access by name.
///
/// Usually implemented with `#[derive(Values)]`. Components without introspectable fields
/// can rely on the default: `impl Values for MyComponent {}`.
pub trait Values: Sized {
    fn values() -> Vec<ValueDesc<Self>> {
        Vec::new()
    }
}

/// Behavior of one component type.
///
/// Instances live inside type-erased storage owned by a
/// [ComponentRegistry](crate::ComponentRegistry). A fresh slot holds `Self::default()`
/// before [create](Self::create) runs; [destroy](Self::destroy) runs right before the value
/// is dropped in place.
pub trait Component: Values + Default + 'static {
    /// Stages in which [update](Self::update) is called.
    const UPDATE_STAGES: &'static [UpdateStage] = &[];

    /// Initializes a new instance. An error aborts the creation and rolls it back.
    fn create(&mut self, _ctx: &CreateCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn destroy(&mut self, _ctx: &DestroyCtx<'_>) {}

    /// Processes all instances scheduled for this frame in a single batch.
    fn update(_stage: UpdateStage, _ctx: &mut UpdateCtx<'_, Self>) {}

    /// Renders diagnostics for an instance in the debug list.
    fn debug(&self, _ctx: &DebugCtx<'_>) {}
}

bitflags! {
    /// Flags of a component type.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct ComponentFlags: u32 {
        /// Scheduled instances stay scheduled across
        /// [clear_updates](crate::ComponentRegistry::clear_updates).
        const ALWAYS_UPDATE = 1 << 0;
        /// At most one live instance.
        const SINGLETON = 1 << 1;
        /// Modify callbacks are batched until
        /// [flush_deferred](crate::ComponentRegistry::flush_deferred).
        const DEFERRED_MODIFY = 1 << 2;
        /// The host object keeps a shortcut handle to its instance of this type.
        const SHORTCUT = 1 << 3;
    }
}

/// A registered component type. Ids are 1-based and assigned in registration order.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ComponentId(u16);

impl ComponentId {
    pub(crate) fn from_index(index: usize) -> Self {
        ComponentId(index as u16 + 1)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Registration parameters of a component type.
#[derive(Debug, Clone)]
pub struct ComponentParams {
    pub(crate) name: String,
    pub(crate) tag: TypeTag,
    pub(crate) flags: ComponentFlags,
    pub(crate) initial_count: u32,
    pub(crate) grow_count: u32,
}

impl ComponentParams {
    pub const DEFAULT_INITIAL_COUNT: u32 = 16;
    pub const DEFAULT_GROW_COUNT: u32 = 16;
    pub const MAX_NAME_LEN: usize = 31;

    pub fn new(name: impl Into<String>, tag: TypeTag) -> Self {
        ComponentParams {
            name: name.into(),
            tag,
            flags: ComponentFlags::empty(),
            initial_count: Self::DEFAULT_INITIAL_COUNT,
            grow_count: Self::DEFAULT_GROW_COUNT,
        }
    }

    pub fn flags(mut self, flags: ComponentFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Number of instances allocated at registration.
    pub fn initial_count(mut self, count: u32) -> Self {
        self.initial_count = count;
        self
    }

    /// Number of instances added each time the storage is full.
    pub fn grow_count(mut self, count: u32) -> Self {
        self.grow_count = count;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let reason = if self.name.is_empty() {
            "empty name".to_string()
        } else if self.name.len() > Self::MAX_NAME_LEN {
            format!("name is longer than {} bytes", Self::MAX_NAME_LEN)
        } else if self.grow_count == 0 {
            "grow count must be at least 1".to_string()
        } else {
            return Ok(());
        };

        Err(ComponentError::InvalidParams {
            component: self.name.clone(),
            reason,
        })
    }
}

/// The owner of a new instance.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InstanceOwner {
    /// Attached directly to an object.
    Object(ObjectId),
    /// Owned by another instance. The child's handle is written into the parent's `Handle`
    /// value located at `offset`.
    Parent { handle: Handle, offset: usize },
}

/// Passed to [Component::create].
pub struct CreateCtx<'a> {
    pub(crate) handle: Handle,
    pub(crate) owner: InstanceOwner,
    pub(crate) host: Option<&'a Object>,
}

impl<'a> CreateCtx<'a> {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn owner(&self) -> InstanceOwner {
        self.owner
    }

    /// The object the instance is attached to, `None` for child instances.
    pub fn host(&self) -> Option<&'a Object> {
        self.host
    }
}

/// Passed to [Component::destroy].
pub struct DestroyCtx<'a> {
    pub(crate) handle: Handle,
    pub(crate) host: Option<&'a Object>,
}

impl<'a> DestroyCtx<'a> {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn host(&self) -> Option<&'a Object> {
        self.host
    }
}

/// Passed to [Component::debug].
pub struct DebugCtx<'a> {
    pub(crate) handle: Handle,
    pub(crate) host: Option<&'a Object>,
    pub(crate) dt: f32,
    pub(crate) view: &'a dyn Any,
}

impl<'a> DebugCtx<'a> {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn host(&self) -> Option<&'a Object> {
        self.host
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Returns the view parameters passed to [debug](crate::ComponentRegistry::debug)
    /// if they are of type `V`.
    pub fn view<V: Any>(&self) -> Option<&'a V> {
        self.view.downcast_ref::<V>()
    }
}

/// Passed to value modify callbacks.
pub struct ModifyCtx<'a> {
    pub(crate) handle: Handle,
    pub(crate) host: Option<&'a Object>,
    pub(crate) value: &'static str,
}

impl<'a> ModifyCtx<'a> {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn host(&self) -> Option<&'a Object> {
        self.host
    }

    /// Name of the modified value.
    pub fn value(&self) -> &'static str {
        self.value
    }
}

/// Type-erased entry points of a component type.
#[derive(Copy, Clone)]
pub(crate) struct ComponentVTable {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub size: usize,
    pub align: usize,
    pub needs_drop: bool,
    pub stages: &'static [UpdateStage],
    pub init_fn: unsafe fn(*mut u8),
    pub drop_fn: unsafe fn(*mut u8),
    pub create_fn: unsafe fn(*mut u8, &CreateCtx<'_>) -> anyhow::Result<()>,
    pub destroy_fn: unsafe fn(*mut u8, &DestroyCtx<'_>),
    pub debug_fn: unsafe fn(*const u8, &DebugCtx<'_>),
    pub update_fn: fn(UpdateStage, UpdateEnv<'_>),
}

unsafe fn init_fn<T: Component>(p: *mut u8) {
    ptr::write(p as *mut T, T::default());
}

unsafe fn drop_fn<T>(p: *mut u8) {
    ptr::drop_in_place(p as *mut T);
}

unsafe fn create_fn<T: Component>(p: *mut u8, ctx: &CreateCtx<'_>) -> anyhow::Result<()> {
    (*(p as *mut T)).create(ctx)
}

unsafe fn destroy_fn<T: Component>(p: *mut u8, ctx: &DestroyCtx<'_>) {
    (*(p as *mut T)).destroy(ctx);
}

unsafe fn debug_fn<T: Component>(p: *const u8, ctx: &DebugCtx<'_>) {
    (*(p as *const T)).debug(ctx);
}

fn update_fn<T: Component>(stage: UpdateStage, env: UpdateEnv<'_>) {
    T::update(stage, &mut UpdateCtx::new(env));
}

impl ComponentVTable {
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
            needs_drop: mem::needs_drop::<T>(),
            stages: T::UPDATE_STAGES,
            init_fn: init_fn::<T>,
            drop_fn: drop_fn::<T>,
            create_fn: create_fn::<T>,
            destroy_fn: destroy_fn::<T>,
            debug_fn: debug_fn::<T>,
            update_fn: update_fn::<T>,
        }
    }

    pub fn updates_in(&self, stage: UpdateStage) -> bool {
        self.stages.contains(&stage)
    }
}

#[test]
fn test_params_validation() {
    assert!(ComponentParams::new("transform", 1).validate().is_ok());
    assert!(ComponentParams::new("", 1).validate().is_err());
    assert!(ComponentParams::new("x".repeat(32), 1).validate().is_err());
    assert!(ComponentParams::new("x".repeat(31), 1).validate().is_ok());
    assert!(ComponentParams::new("model", 2)
        .grow_count(0)
        .validate()
        .is_err());
}
