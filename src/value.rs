//! Named, typed access to component fields.
//!
//! Every component type exposes a table of [ValueDesc]s. A descriptor names a field, records
//! its [ValueKind] and its byte offset inside the component, and optionally carries a modify
//! callback that runs after the field is written through
//! [set_value](crate::ComponentRegistry::set_value).

use crate::component::ModifyCtx;
use crate::error::{ComponentError, Result};
use crate::handle::Handle;
use crate::HashMap;
use std::mem;

/// The greatest number of values one component type can expose.
pub const MAX_VALUES: usize = 64;

/// A 4x3 affine matrix: three rotation/scale rows followed by the translation row.
pub type Mat3 = [[f32; 3]; 4];

/// The type tag of a component value.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ValueKind {
    Int,
    UInt,
    Int2,
    Bool,
    Float,
    Float2,
    Float3,
    Float4,
    Matrix,
    String,
    StringArray,
    Handle,
}

impl ValueKind {
    /// Size in bytes of a single element of this kind.
    pub const fn size(self) -> usize {
        match self {
            ValueKind::Int | ValueKind::UInt | ValueKind::Float => 4,
            ValueKind::Int2 | ValueKind::Float2 => 8,
            ValueKind::Bool => 1,
            ValueKind::Float3 => 12,
            ValueKind::Float4 => 16,
            ValueKind::Matrix => mem::size_of::<Mat3>(),
            ValueKind::String | ValueKind::StringArray => mem::size_of::<String>(),
            ValueKind::Handle => mem::size_of::<Handle>(),
        }
    }

    pub const fn align(self) -> usize {
        match self {
            ValueKind::Bool => 1,
            ValueKind::String | ValueKind::StringArray => mem::align_of::<String>(),
            ValueKind::Handle => mem::align_of::<Handle>(),
            _ => 4,
        }
    }

    /// The kind of a single element. Differs from `self` only for arrays.
    pub const fn element(self) -> ValueKind {
        match self {
            ValueKind::StringArray => ValueKind::String,
            other => other,
        }
    }
}

/// An owned component value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    UInt(u32),
    Int2([i32; 2]),
    Bool(bool),
    Float(f32),
    Float2([f32; 2]),
    Float3([f32; 3]),
    Float4([f32; 4]),
    Matrix(Mat3),
    String(String),
    StringArray(Vec<String>),
    Handle(Handle),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::UInt(_) => ValueKind::UInt,
            Value::Int2(_) => ValueKind::Int2,
            Value::Bool(_) => ValueKind::Bool,
            Value::Float(_) => ValueKind::Float,
            Value::Float2(_) => ValueKind::Float2,
            Value::Float3(_) => ValueKind::Float3,
            Value::Float4(_) => ValueKind::Float4,
            Value::Matrix(_) => ValueKind::Matrix,
            Value::String(_) => ValueKind::String,
            Value::StringArray(_) => ValueKind::StringArray,
            Value::Handle(_) => ValueKind::Handle,
        }
    }
}

/// A Rust type that can back a component value.
///
/// # Safety
/// `KIND.element().size()` and `KIND.align()` must equal the size and alignment of one
/// element of `Self`, and `Self` must consist of exactly `COUNT` such elements.
pub unsafe trait ValueField: 'static {
    const KIND: ValueKind;
    const COUNT: usize = 1;
}

unsafe impl ValueField for i32 {
    const KIND: ValueKind = ValueKind::Int;
}

unsafe impl ValueField for u32 {
    const KIND: ValueKind = ValueKind::UInt;
}

unsafe impl ValueField for [i32; 2] {
    const KIND: ValueKind = ValueKind::Int2;
}

unsafe impl ValueField for bool {
    const KIND: ValueKind = ValueKind::Bool;
}

unsafe impl ValueField for f32 {
    const KIND: ValueKind = ValueKind::Float;
}

unsafe impl ValueField for [f32; 2] {
    const KIND: ValueKind = ValueKind::Float2;
}

unsafe impl ValueField for [f32; 3] {
    const KIND: ValueKind = ValueKind::Float3;
}

unsafe impl ValueField for [f32; 4] {
    const KIND: ValueKind = ValueKind::Float4;
}

unsafe impl ValueField for Mat3 {
    const KIND: ValueKind = ValueKind::Matrix;
}

unsafe impl ValueField for String {
    const KIND: ValueKind = ValueKind::String;
}

unsafe impl<const N: usize> ValueField for [String; N] {
    const KIND: ValueKind = ValueKind::StringArray;
    const COUNT: usize = N;
}

unsafe impl ValueField for Handle {
    const KIND: ValueKind = ValueKind::Handle;
}

/// A callback run after a value of `T` has been written.
pub type ModifyFn<T> = fn(&mut T, &mut ModifyCtx<'_>) -> anyhow::Result<()>;

/// Describes one named value of component type `T`.
pub struct ValueDesc<T> {
    name: &'static str,
    kind: ValueKind,
    offset: usize,
    stride: usize,
    count: usize,
    modify: Option<ModifyFn<T>>,
}

impl<T: 'static> ValueDesc<T> {
    /// Describes the field of type `F` located at `offset` bytes inside `T`.
    /// `accessor` only pins down `F`; use [component_value](crate::component_value)
    /// or `#[derive(Values)]` instead of calling this directly.
    ///
    /// # Safety
    /// `offset` must be the offset of the field returned by `accessor`.
    pub unsafe fn from_field<F: ValueField>(
        name: &'static str,
        offset: usize,
        _accessor: fn(&T) -> &F,
    ) -> Self {
        ValueDesc {
            name,
            kind: F::KIND,
            offset,
            stride: F::KIND.element().size(),
            count: F::COUNT,
            modify: None,
        }
    }

    pub fn with_modify(mut self, modify: ModifyFn<T>) -> Self {
        self.modify = Some(modify);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the number of elements. `1` for non-array values.
    pub fn count(&self) -> usize {
        self.count
    }
}

pub(crate) type ErasedModify = Box<dyn Fn(*mut u8, &mut ModifyCtx<'_>) -> anyhow::Result<()>>;

/// A type-erased value descriptor.
pub(crate) struct ValueEntry {
    pub name: &'static str,
    pub kind: ValueKind,
    pub offset: usize,
    pub stride: usize,
    pub count: usize,
    /// Called with a pointer to a live instance of the component the entry was built for.
    pub modify: Option<ErasedModify>,
}

impl ValueEntry {
    /// Returns an error if `value` can not be stored in this entry.
    /// `element` selects single-element access of arrays.
    pub fn check_kind(&self, value: &Value, element: bool) -> Result<()> {
        let expected = if element { self.kind.element() } else { self.kind };
        if value.kind() != expected {
            return Err(ComponentError::ValueKindMismatch {
                value: self.name.to_string(),
                expected,
                found: value.kind(),
            });
        }
        Ok(())
    }

    pub fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.count {
            return Err(ComponentError::IndexOutOfRange {
                value: self.name.to_string(),
                index,
                count: self.count,
            });
        }
        Ok(())
    }

    /// Safety: `data` must point to a live instance of the component the entry was built for.
    pub unsafe fn read(&self, data: *const u8) -> Value {
        if self.kind == ValueKind::StringArray {
            let items = (0..self.count)
                .map(|i| (*(self.element_ptr(data, i) as *const String)).clone())
                .collect();
            Value::StringArray(items)
        } else {
            self.read_at(data, 0)
        }
    }

    /// Safety: see [read](Self::read); `index` must be less than `count`.
    pub unsafe fn read_at(&self, data: *const u8, index: usize) -> Value {
        let p = self.element_ptr(data, index);
        match self.kind.element() {
            ValueKind::Int => Value::Int(*(p as *const i32)),
            ValueKind::UInt => Value::UInt(*(p as *const u32)),
            ValueKind::Int2 => Value::Int2(*(p as *const [i32; 2])),
            ValueKind::Bool => Value::Bool(*(p as *const bool)),
            ValueKind::Float => Value::Float(*(p as *const f32)),
            ValueKind::Float2 => Value::Float2(*(p as *const [f32; 2])),
            ValueKind::Float3 => Value::Float3(*(p as *const [f32; 3])),
            ValueKind::Float4 => Value::Float4(*(p as *const [f32; 4])),
            ValueKind::Matrix => Value::Matrix(*(p as *const Mat3)),
            ValueKind::String | ValueKind::StringArray => {
                Value::String((*(p as *const String)).clone())
            }
            ValueKind::Handle => Value::Handle(*(p as *const Handle)),
        }
    }

    /// Safety: see [read](Self::read); `value` must have passed [check_kind](Self::check_kind).
    pub unsafe fn write(&self, data: *mut u8, value: Value) {
        match value {
            Value::StringArray(items) => {
                for (i, item) in items.into_iter().take(self.count).enumerate() {
                    *(self.element_ptr(data, i) as *mut String) = item;
                }
            }
            value => self.write_at(data, 0, value),
        }
    }

    /// Safety: see [write](Self::write); `index` must be less than `count`.
    pub unsafe fn write_at(&self, data: *mut u8, index: usize, value: Value) {
        let p = self.element_ptr(data, index) as *mut u8;
        match value {
            Value::Int(v) => *(p as *mut i32) = v,
            Value::UInt(v) => *(p as *mut u32) = v,
            Value::Int2(v) => *(p as *mut [i32; 2]) = v,
            Value::Bool(v) => *(p as *mut bool) = v,
            Value::Float(v) => *(p as *mut f32) = v,
            Value::Float2(v) => *(p as *mut [f32; 2]) = v,
            Value::Float3(v) => *(p as *mut [f32; 3]) = v,
            Value::Float4(v) => *(p as *mut [f32; 4]) = v,
            Value::Matrix(v) => *(p as *mut Mat3) = v,
            Value::String(v) => *(p as *mut String) = v,
            Value::Handle(v) => *(p as *mut Handle) = v,
            Value::StringArray(_) => debug_assert!(false, "array written as a single element"),
        }
    }

    unsafe fn element_ptr(&self, data: *const u8, index: usize) -> *const u8 {
        data.add(self.offset + index * self.stride)
    }
}

/// The values of one component type, indexed by name.
pub(crate) struct ValueTable {
    entries: Vec<ValueEntry>,
    by_name: HashMap<&'static str, usize>,
}

impl ValueTable {
    /// Validates the descriptors of component `T` and builds the table.
    pub fn new<T: 'static>(component: &str, descs: Vec<ValueDesc<T>>) -> Result<Self> {
        let invalid = |reason: String| ComponentError::InvalidParams {
            component: component.to_string(),
            reason,
        };

        if descs.len() > MAX_VALUES {
            return Err(invalid(format!(
                "{} values exceed the maximum of {MAX_VALUES}",
                descs.len()
            )));
        }

        let mut entries = Vec::with_capacity(descs.len());
        let mut by_name = HashMap::with_capacity_and_hasher(descs.len(), Default::default());

        for desc in descs {
            if desc.name.is_empty() {
                return Err(invalid("empty value name".to_string()));
            }
            let end = desc.offset + desc.stride * desc.count.saturating_sub(1) + desc.kind.size();
            if desc.count == 0 || end > mem::size_of::<T>() {
                return Err(invalid(format!("value '{}' is out of bounds", desc.name)));
            }
            if desc.offset % desc.kind.align() != 0 {
                return Err(invalid(format!("value '{}' is misaligned", desc.name)));
            }
            if by_name.insert(desc.name, entries.len()).is_some() {
                return Err(invalid(format!("duplicate value name '{}'", desc.name)));
            }

            let modify = desc.modify.map(|f| -> ErasedModify {
                Box::new(move |data: *mut u8, ctx: &mut ModifyCtx<'_>| {
                    f(unsafe { &mut *(data as *mut T) }, ctx)
                })
            });

            entries.push(ValueEntry {
                name: desc.name,
                kind: desc.kind,
                offset: desc.offset,
                stride: desc.stride,
                count: desc.count,
                modify,
            });
        }

        Ok(ValueTable { entries, by_name })
    }

    pub fn find(&self, name: &str) -> Option<(usize, &ValueEntry)> {
        let idx = *self.by_name.get(name)?;
        Some((idx, &self.entries[idx]))
    }

    pub fn entries(&self) -> &[ValueEntry] {
        &self.entries
    }

    /// Returns a bit mask of the values that have a modify callback.
    pub fn modify_mask(&self) -> u64 {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.modify.is_some())
            .fold(0, |mask, (i, _)| mask | (1u64 << i))
    }

    /// Returns `true` if a `Handle` value lives at `offset`.
    pub fn is_handle_offset(&self, offset: usize) -> bool {
        self.entries
            .iter()
            .any(|e| e.kind == ValueKind::Handle && e.offset == offset)
    }
}
