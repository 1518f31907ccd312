//! On-disk layout of the MSVC RTTI structures, 64-bit variant.
//!
//! All cross-references inside these structures are image-base-relative
//! offsets, not pointers; only the type descriptor's vftable slot is a full
//! virtual address.

use zerocopy::{FromBytes, Immutable, KnownLayout};

/// `_RTTICompleteObjectLocator`. Lives in `.rdata`, pointed to by the slot
/// immediately before a vtable.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
pub struct CompleteObjectLocator {
    /// 0 on 32-bit images, 1 on 64-bit images.
    pub signature: u32,

    /// Offset of this vtable within the complete object.
    pub offset: u32,

    /// Constructor-displacement offset.
    pub cd_offset: u32,

    /// Image-relative offset of the type descriptor (in `.data`).
    pub type_descriptor: u32,

    /// Image-relative offset of the class hierarchy descriptor (in `.rdata`).
    pub class_descriptor: u32,

    /// Image-relative offset of this locator itself (signature 1 only).
    pub self_offset: u32,
}

/// `_RTTIClassHierarchyDescriptor`. Lives in `.rdata`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
pub struct ClassHierarchyDescriptor {
    /// Always 0.
    pub signature: u32,

    /// Inheritance attributes.
    pub attributes: u32,

    /// Number of entries in the base class array.
    pub num_base_classes: u32,

    /// Image-relative offset of the base class array (in `.rdata`).
    pub base_class_array: u32,
}

/// `_RTTIBaseClassDescriptor`. Lives in `.rdata`, referenced from the base
/// class array.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
pub struct BaseClassDescriptor {
    /// Image-relative offset of the base's type descriptor (in `.data`).
    pub type_descriptor: u32,

    /// Number of contained bases.
    pub num_contained_bases: u32,

    /// Member displacement.
    pub mdisp: i32,

    /// Vbtable displacement.
    pub pdisp: i32,

    /// Displacement inside the vbtable.
    pub vdisp: i32,

    /// Base class attributes.
    pub attributes: u32,
}

/// Fixed-size head of `_TypeDescriptor`. Lives in `.data`; the mangled name
/// bytes follow immediately after.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
pub struct TypeDescriptorHead {
    /// Virtual address of `type_info`'s vftable (points into `.rdata`).
    pub vftable: u64,

    /// Runtime spare pointer, null in the image.
    pub spare: u64,
}

/// Maximum accepted base-class count. Real hierarchies in the host stay far
/// below this; a larger value is a corrupt candidate.
pub const MAX_BASE_CLASSES: u32 = 64;
