use rml_core::{RmlError, Va};

/// An in-place patch of a single vtable slot.
///
/// Used for virtual methods where swapping the whole table is unnecessary:
/// the slot is overwritten under a protection-scoped write and restored on
/// disable or drop.
pub struct SlotHook {
    slot: *mut usize,
    original: usize,
    replacement: usize,
    enabled: bool,
}

impl SlotHook {
    /// Creates a hook for entry `index` of the vtable at `vtable`.
    ///
    /// # Safety
    ///
    /// `vtable` must point to a live vtable with at least `index + 1`
    /// entries, and it must outlive the hook.
    pub unsafe fn new(vtable: Va, index: usize, replacement: Va) -> Result<Self, RmlError> {
        if vtable.is_null() {
            return Err(RmlError::InvalidHookTarget(vtable));
        }

        let slot = (vtable.as_usize() as *mut usize).add(index);
        let original = std::ptr::read(slot);

        Ok(Self {
            slot,
            original,
            replacement: replacement.as_usize(),
            enabled: false,
        })
    }

    /// The original entry value.
    pub fn original(&self) -> Va {
        Va(self.original as u64)
    }

    /// Writes the replacement into the slot. Idempotent.
    pub fn enable(&mut self) -> Result<(), RmlError> {
        if self.enabled {
            return Ok(());
        }

        self.write(self.replacement)?;
        self.enabled = true;
        Ok(())
    }

    /// Restores the original entry. Idempotent.
    pub fn disable(&mut self) -> Result<(), RmlError> {
        if !self.enabled {
            return Ok(());
        }

        self.write(self.original)?;
        self.enabled = false;
        Ok(())
    }

    /// Returns `true` while the replacement is live.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn write(&self, value: usize) -> Result<(), RmlError> {
        let _guard = unsafe {
            region::protect_with_handle(
                self.slot as *const u8,
                std::mem::size_of::<usize>(),
                region::Protection::READ_WRITE,
            )
        }
        .map_err(|e| RmlError::Hook {
            name: "slot".to_owned(),
            reason: e.to_string(),
        })?;

        unsafe {
            std::ptr::write(self.slot, value);
        }

        Ok(())
    }
}

impl Drop for SlotHook {
    fn drop(&mut self) {
        if let Err(err) = self.disable() {
            tracing::error!(%err, "slot restore on drop failed");
        }
    }
}
