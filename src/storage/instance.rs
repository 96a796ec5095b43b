use crate::component::InstanceOwner;
use crate::handle::Handle;
use crate::object::ObjectId;
use bitflags::bitflags;
use smallvec::SmallVec;

bitflags! {
    /// Flags of a component instance.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct InstanceFlags: u32 {
        /// The instance is owned by another instance rather than by an object.
        const INDIRECT_HOST = 1 << 0;
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub(crate) enum Owner {
    Object(ObjectId),
    Parent {
        handle: Handle,
        offset: usize,
    },
    /// The parent was destroyed; the instance is waiting for destruction.
    #[default]
    Detached,
}

impl Owner {
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            Owner::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<Handle> {
        match self {
            Owner::Parent { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    pub fn public(&self) -> Option<InstanceOwner> {
        match *self {
            Owner::Object(id) => Some(InstanceOwner::Object(id)),
            Owner::Parent { handle, offset } => Some(InstanceOwner::Parent { handle, offset }),
            Owner::Detached => None,
        }
    }
}

impl From<InstanceOwner> for Owner {
    fn from(owner: InstanceOwner) -> Self {
        match owner {
            InstanceOwner::Object(id) => Owner::Object(id),
            InstanceOwner::Parent { handle, offset } => Owner::Parent { handle, offset },
        }
    }
}

/// Bookkeeping of one physical slot.
#[derive(Debug, Default)]
pub(crate) struct InstanceDesc {
    pub owner: Owner,
    /// Current handle of the instance; [Handle::INVALID] for a free slot.
    pub handle: Handle,
    /// Position in the update list.
    pub update_idx: Option<u32>,
    pub children: SmallVec<[Handle; 4]>,
    /// One bit per value awaiting its deferred modify callback.
    pub dirty: u64,
}

impl InstanceDesc {
    pub fn new(handle: Handle, owner: Owner) -> Self {
        InstanceDesc {
            owner,
            handle,
            ..Default::default()
        }
    }

    pub fn flags(&self) -> InstanceFlags {
        match self.owner {
            Owner::Object(_) => InstanceFlags::empty(),
            _ => InstanceFlags::INDIRECT_HOST,
        }
    }
}
