use std::fmt;

/// A component type tag chosen by the component author. Unique within a registry.
pub type TypeTag = u16;

/// A logical slot inside the storage of one component type.
pub type Slot = u32;

/// An opaque identifier of a component instance.
///
/// A handle packs the type tag, the registry index of the component type and the logical
/// slot of the instance into a single 64-bit value:
///
/// ```text
/// 63        48 47        32 31                       0
/// |   tag    | type index |       logical slot       |
/// ```
///
/// Handles are compared by value. A handle becomes invalid when its instance is destroyed;
/// afterwards the same value may address another instance created into the freed slot.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Handle(u64);

impl Handle {
    pub const INVALID: Self = Handle(u64::MAX);

    /// The greatest logical slot a handle can address. `u32::MAX` is reserved.
    pub const MAX_SLOT: Slot = u32::MAX - 1;

    /// The number of component types a registry can hold. Type index `0xffff` is reserved.
    pub const MAX_TYPES: usize = u16::MAX as usize;

    const TAG_SHIFT: u32 = 48;
    const INDEX_SHIFT: u32 = 32;
    const INDEX_MASK: u64 = 0xffff;
    const SLOT_MASK: u64 = 0xffff_ffff;

    /// Constructs a new handle.
    #[inline]
    pub const fn new(tag: TypeTag, type_index: u16, slot: Slot) -> Handle {
        Handle(
            ((tag as u64) << Self::TAG_SHIFT)
                | ((type_index as u64) << Self::INDEX_SHIFT)
                | slot as u64,
        )
    }

    #[inline]
    pub const fn tag(self) -> TypeTag {
        (self.0 >> Self::TAG_SHIFT) as TypeTag
    }

    /// Returns the index of the component type in its registry (`ComponentId` minus one).
    #[inline]
    pub const fn type_index(self) -> usize {
        ((self.0 >> Self::INDEX_SHIFT) & Self::INDEX_MASK) as usize
    }

    #[inline]
    pub const fn slot(self) -> Slot {
        (self.0 & Self::SLOT_MASK) as Slot
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Returns the raw encoded value.
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    pub const fn from_bits(bits: u64) -> Handle {
        Handle(bits)
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::INVALID
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({}:{}:{})", self.tag(), self.type_index(), self.slot())
        } else {
            f.write_str("Handle(INVALID)")
        }
    }
}

#[test]
fn test_handle_fields() {
    let h = Handle::new(0xbeef, 3, 12345);
    assert_eq!(h.tag(), 0xbeef);
    assert_eq!(h.type_index(), 3);
    assert_eq!(h.slot(), 12345);
    assert!(h.is_valid());

    let edge = Handle::new(u16::MAX, (Handle::MAX_TYPES - 1) as u16, Handle::MAX_SLOT);
    assert_eq!(edge.slot(), Handle::MAX_SLOT);
    assert_ne!(edge, Handle::INVALID);
    assert!(edge.is_valid());

    assert_eq!(Handle::default(), Handle::INVALID);
    assert_eq!(Handle::from_bits(h.to_bits()), h);
    assert_eq!(format!("{:?}", Handle::INVALID), "Handle(INVALID)");
}
