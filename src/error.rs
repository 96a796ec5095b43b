use crate::handle::{Handle, TypeTag};
use crate::object::ObjectId;
use crate::value::ValueKind;
use thiserror::Error;

pub type Result<T, E = ComponentError> = std::result::Result<T, E>;

/// Errors returned by [ComponentRegistry](crate::ComponentRegistry) operations.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("out of memory while allocating {what}")]
    OutOfMemory { what: &'static str },

    #[error("component '{0}' can not grow past the maximum number of instances")]
    CapacityExceeded(String),

    #[error("invalid component parameters for '{component}': {reason}")]
    InvalidParams { component: String, reason: String },

    #[error("component name '{0}' is already registered")]
    DuplicateName(String),

    #[error("component tag {0} is already registered")]
    DuplicateTag(TypeTag),

    #[error("the registry can not hold more component types")]
    TooManyTypes,

    #[error("component '{0}' is not registered")]
    UnknownComponent(String),

    #[error("component type mismatch: '{component}' does not store `{requested}`")]
    TypeMismatch {
        component: String,
        requested: &'static str,
    },

    #[error("{0:?} does not refer to a live component instance")]
    InvalidHandle(Handle),

    #[error("object {0:?} does not exist")]
    UnknownObject(ObjectId),

    #[error("object '{0}' does not exist")]
    UnknownObjectName(String),

    #[error("object '{object}' has no '{component}' component")]
    NotAttached { object: String, component: String },

    #[error("component '{0}' is a singleton and already has an instance")]
    SingletonViolation(String),

    #[error("offset {offset} is not a handle value of parent component '{component}'")]
    InvalidParentOffset { component: String, offset: usize },

    #[error("component '{component}' has no value named '{value}'")]
    UnknownValue { component: String, value: String },

    #[error("value '{value}' is of kind {expected:?}, got {found:?}")]
    ValueKindMismatch {
        value: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("index {index} is out of range for value '{value}' with {count} elements")]
    IndexOutOfRange {
        value: String,
        index: usize,
        count: usize,
    },

    #[error("failed to create an instance of '{component}'")]
    CreateFailed {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("modify callback of value '{value}' failed")]
    ModifyFailed {
        value: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{failed} deferred modify callback(s) failed")]
    DeferredModifyFailed { failed: usize },
}
