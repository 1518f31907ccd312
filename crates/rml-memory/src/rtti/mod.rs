//! MSVC RTTI recovery.
//!
//! The host exports no symbols, so class identity is recovered from the
//! compiler's own runtime-type-information chains: every polymorphic class
//! leaves a complete-object-locator in `.rdata`, referenced by the pointer
//! slot just before its vtable. Walking `.rdata` for those slots and
//! validating the full locator → type-descriptor → hierarchy → base-class
//! chain yields a class-name-to-vtable map that survives host binary updates.
//!
//! An unconstrained walk produces a large number of false positives. Every
//! cross-reference in a candidate chain is therefore required to resolve into
//! the section kind the real structure lives in (`.rdata` for descriptors,
//! `.data` for type descriptors, `.text` for vtable entries) before the entry
//! is accepted. Because validation reads go through the bounds-checked image
//! snapshot, a corrupt candidate is rejected by a range check instead of
//! faulting the scanner.

mod demangle;
mod layout;


use indexmap::IndexMap;
use rml_core::{ModuleImage, Rva, RmlError, Va};
use zerocopy::FromBytes;

pub use self::demangle::{acceptable, demangle};
use self::layout::{
    BaseClassDescriptor, ClassHierarchyDescriptor, CompleteObjectLocator, TypeDescriptorHead,
    MAX_BASE_CLASSES,
};
use crate::SectionTable;

/// One validated RTTI chain for a single class.
#[derive(Debug, Clone)]
pub struct RttiInfo {
    /// Demangled class name (mangled form if demangling was refused).
    pub name: String,

    /// The raw type-descriptor name.
    pub mangled: String,

    /// Virtual address of the class vtable.
    pub vtable: Va,

    /// Virtual address of the complete-object-locator.
    pub locator: Va,

    /// Virtual address of the type descriptor.
    pub type_descriptor: Va,

    /// Virtual address of the class hierarchy descriptor.
    pub class_descriptor: Va,

    /// Vtable offset within the complete object; 0 for the primary vtable.
    pub offset: u32,
}

/// Name-keyed map of validated RTTI entries. Never mutated after the scan.
#[derive(Debug, Default)]
pub struct RttiMap {
    entries: IndexMap<String, RttiInfo>,
}

impl RttiMap {
    /// Looks up a class by demangled name.
    pub fn get(&self, name: &str) -> Option<&RttiInfo> {
        self.entries.get(name)
    }

    /// The vtable address for a class, if known.
    pub fn vtable(&self, name: &str) -> Option<Va> {
        self.entries.get(name).map(|info| info.vtable)
    }

    /// Number of classes discovered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the scan found nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &RttiInfo> {
        self.entries.values()
    }
}

/// The `.rdata` walker that builds an [`RttiMap`].
pub struct RttiScanner<'a> {
    image: &'a dyn ModuleImage,
    sections: &'a SectionTable,
}

impl<'a> RttiScanner<'a> {
    /// Creates a scanner over a parsed image.
    pub fn new(image: &'a dyn ModuleImage, sections: &'a SectionTable) -> Self {
        Self { image, sections }
    }

    /// Runs the scan pass over every `.rdata` section.
    pub fn scan(&self) -> Result<RttiMap, RmlError> {
        if self.sections.section(".rdata").is_none() {
            return Err(RmlError::SectionNotFound(".rdata"));
        }

        let mut map = RttiMap::default();
        let mut candidates = 0usize;

        for section in self.sections.named(".rdata") {
            let mut slot = Rva(section.start.0 & !7);

            while slot.0 + 16 <= section.end.0 {
                if let Some(info) = self.try_candidate(slot) {
                    candidates += 1;
                    self.insert(&mut map, info);
                }

                slot += 8;
            }
        }

        tracing::debug!(
            classes = map.len(),
            candidates,
            "rtti scan complete"
        );

        Ok(map)
    }

    /// Inserts an entry, preferring the primary (offset 0) vtable when a
    /// class shows up under several complete-object-locators.
    fn insert(&self, map: &mut RttiMap, info: RttiInfo) {
        match map.entries.get(&info.name) {
            Some(existing) if existing.offset == 0 => {}
            _ => {
                map.entries.insert(info.name.clone(), info);
            }
        }
    }

    /// Interprets the slot at `slot` as the meta pointer before a vtable and
    /// validates the chain it would imply. Returns `None` on the first failed
    /// check.
    fn try_candidate(&self, slot: Rva) -> Option<RttiInfo> {
        // The slot must hold a pointer back into .rdata (the locator).
        let locator_va = Va(self.image.read_u64(slot).ok()?);
        let locator_rva = self.image.va_to_rva(locator_va)?;

        if !self.sections.contains_rva(".rdata", locator_rva) {
            return None;
        }

        let col = self.read_struct::<CompleteObjectLocator>(locator_rva)?;

        if col.signature > 1 {
            return None;
        }

        // On 64-bit images the locator records its own position.
        if col.signature == 1 && col.self_offset != locator_rva.0 {
            return None;
        }

        // Type descriptor lives in .data and carries the mangled name.
        let td_rva = Rva(col.type_descriptor);
        if !self.sections.contains_rva(".data", td_rva) {
            return None;
        }

        let td = self.read_struct::<TypeDescriptorHead>(td_rva)?;
        let td_vftable_rva = self.image.va_to_rva(Va(td.vftable))?;
        if !self.sections.contains_rva(".rdata", td_vftable_rva) {
            return None;
        }

        let mangled = self.read_name(td_rva + 16)?;
        if !mangled.starts_with(".?A") {
            return None;
        }

        // Hierarchy descriptor and its base class array live in .rdata.
        let chd_rva = Rva(col.class_descriptor);
        if !self.sections.contains_rva(".rdata", chd_rva) {
            return None;
        }

        let chd = self.read_struct::<ClassHierarchyDescriptor>(chd_rva)?;

        if chd.signature > 1 {
            return None;
        }
        if chd.num_base_classes == 0 || chd.num_base_classes > MAX_BASE_CLASSES {
            return None;
        }

        let bca_rva = Rva(chd.base_class_array);
        if !self.sections.contains_rva(".rdata", bca_rva) {
            return None;
        }

        for index in 0..chd.num_base_classes {
            let bcd_rva = Rva(self.image.read_u32(bca_rva + index * 4).ok()?);

            if !self.sections.contains_rva(".rdata", bcd_rva) {
                return None;
            }

            // The descriptor's own type descriptor must land in .data.
            let bcd = self.read_struct::<BaseClassDescriptor>(bcd_rva)?;
            if !self.sections.contains_rva(".data", Rva(bcd.type_descriptor)) {
                return None;
            }
        }

        // The vtable follows the meta slot; its first entry must be code.
        let vtable_rva = slot + 8;
        let first_method = Va(self.image.read_u64(vtable_rva).ok()?);
        let first_method_rva = self.image.va_to_rva(first_method)?;

        if !self.sections.contains_rva(".text", first_method_rva) {
            return None;
        }

        let name = demangle(&mangled).unwrap_or_else(|| mangled.clone());

        Some(RttiInfo {
            name,
            mangled,
            vtable: self.image.rva_to_va(vtable_rva),
            locator: locator_va,
            type_descriptor: self.image.rva_to_va(td_rva),
            class_descriptor: self.image.rva_to_va(chd_rva),
            offset: col.offset,
        })
    }

    fn read_struct<T: FromBytes>(&self, rva: Rva) -> Option<T> {
        let bytes = self
            .image
            .read_bytes(rva, std::mem::size_of::<T>())
            .ok()?;

        T::read_from_bytes(bytes).ok()
    }

    /// Reads a NUL-terminated name, refusing to run past the demangler's
    /// length cap.
    fn read_name(&self, rva: Rva) -> Option<String> {
        let data = self.image.data();
        let start = rva.as_usize();
        let tail = data.get(start..)?;
        let cap = tail.len().min(1024);

        let len = tail[..cap].iter().position(|&b| b == 0)?;
        if len == 0 {
            return None;
        }

        std::str::from_utf8(&tail[..len]).ok().map(str::to_owned)
    }
}
