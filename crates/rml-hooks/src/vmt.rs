use rml_core::{RmlError, Va};

/// A full virtual-method-table swap on a live object.
///
/// The object's vtable pointer is replaced with a shadow copy of the whole
/// table; both the original and the shadow stay resident, so individual
/// entries can be hot-swapped with [`hook`](VmtHook::hook) /
/// [`unhook`](VmtHook::unhook) without re-copying, and
/// [`enable`](VmtHook::enable) / [`disable`](VmtHook::disable) toggle the
/// object between the two tables with a single protected pointer write.
///
/// Dropping the hook restores the original table.
pub struct VmtHook {
    object: *mut *const usize,
    original: *const usize,
    shadow: Vec<usize>,
    count: usize,
    enabled: bool,
}

impl VmtHook {
    /// Creates a hook for the object, detecting the method count by walking
    /// the table until a null entry.
    ///
    /// # Safety
    ///
    /// `object` must point to a live C++ object whose first field is a
    /// vtable pointer, and the vtable must be null-terminated.
    pub unsafe fn new(object: *mut std::ffi::c_void) -> Result<Self, RmlError> {
        let vtable = *(object as *mut *const usize);
        let count = Self::detect_count(vtable);

        Self::with_count_inner(object, count)
    }

    /// Creates a hook with a known method count.
    ///
    /// # Safety
    ///
    /// `object` must point to a live C++ object whose first field is a
    /// vtable pointer with at least `count` entries.
    pub unsafe fn with_count(object: *mut std::ffi::c_void, count: usize) -> Result<Self, RmlError> {
        Self::with_count_inner(object, count)
    }

    unsafe fn with_count_inner(
        object: *mut std::ffi::c_void,
        count: usize,
    ) -> Result<Self, RmlError> {
        if object.is_null() || count == 0 {
            return Err(RmlError::InvalidHookTarget(Va(object as u64)));
        }

        let object = object as *mut *const usize;
        let original = *object;

        let mut shadow = Vec::with_capacity(count);
        std::ptr::copy_nonoverlapping(original, shadow.as_mut_ptr(), count);
        shadow.set_len(count);

        tracing::debug!(
            object = %Va(object as u64),
            vtable = %Va(original as u64),
            count,
            "vmt shadow created"
        );

        Ok(Self {
            object,
            original,
            shadow,
            count,
            enabled: false,
        })
    }

    unsafe fn detect_count(vtable: *const usize) -> usize {
        let mut entry = vtable;

        while std::ptr::read(entry) != 0 {
            entry = entry.add(1);
        }

        (entry as usize - vtable as usize) / std::mem::size_of::<usize>()
    }

    /// Number of methods in the table.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Replaces the shadow entry at `index`.
    pub fn hook(&mut self, index: usize, func: Va) -> Result<(), RmlError> {
        if index >= self.count {
            return Err(RmlError::Other("vtable index out of bounds"));
        }

        self.shadow[index] = func.as_usize();
        Ok(())
    }

    /// Restores the shadow entry at `index` to the original method.
    pub fn unhook(&mut self, index: usize) -> Result<(), RmlError> {
        let original = self.original_method(index)?;
        self.shadow[index] = original.as_usize();
        Ok(())
    }

    /// The original method at `index`.
    pub fn original_method(&self, index: usize) -> Result<Va, RmlError> {
        if index >= self.count {
            return Err(RmlError::Other("vtable index out of bounds"));
        }

        Ok(Va(unsafe { std::ptr::read(self.original.add(index)) } as u64))
    }

    /// Points the object at the shadow table. Idempotent.
    pub fn enable(&mut self) -> Result<(), RmlError> {
        if self.enabled {
            return Ok(());
        }

        self.write_table_pointer(self.shadow.as_ptr())?;
        self.enabled = true;
        Ok(())
    }

    /// Points the object back at the original table. Idempotent.
    pub fn disable(&mut self) -> Result<(), RmlError> {
        if !self.enabled {
            return Ok(());
        }

        self.write_table_pointer(self.original)?;
        self.enabled = false;
        Ok(())
    }

    /// Returns `true` while the shadow table is live.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn write_table_pointer(&self, table: *const usize) -> Result<(), RmlError> {
        let _guard = unsafe {
            region::protect_with_handle(
                self.object as *const u8,
                std::mem::size_of::<usize>(),
                region::Protection::READ_WRITE,
            )
        }
        .map_err(|e| RmlError::Hook {
            name: "vmt".to_owned(),
            reason: e.to_string(),
        })?;

        unsafe {
            *self.object = table;
        }

        Ok(())
    }
}

impl Drop for VmtHook {
    fn drop(&mut self) {
        if let Err(err) = self.disable() {
            tracing::error!(%err, "vmt restore on drop failed");
        }
    }
}
