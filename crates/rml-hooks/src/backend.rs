use rml_core::{RmlError, Va};

/// One installed inline hook.
///
/// The handle owns the trampoline: dropping it removes the hook. A hook is
/// either fully installed (trampoline callable, original recoverable) or not
/// installed at all; no partial state is ever observable through a handle.
pub trait HookHandle: Send + Sync {
    /// Address of the trampoline to the original function.
    fn trampoline(&self) -> Va;

    /// Activates the detour.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no thread is executing through the target's
    /// patched prologue while the flip happens.
    unsafe fn enable(&self) -> Result<(), RmlError>;

    /// Deactivates the detour. Idempotent.
    ///
    /// # Safety
    ///
    /// Same contract as [`enable`](Self::enable).
    unsafe fn disable(&self) -> Result<(), RmlError>;

    /// Returns `true` if the detour is currently active.
    fn is_enabled(&self) -> bool;
}

/// The inline-hook primitive the engine is built over.
///
/// Production uses [`RetourBackend`](retour_backend::RetourBackend); tests
/// substitute a recording mock, which is what keeps all engine logic
/// exercisable off the host.
pub trait HookBackend: Send + Sync {
    /// Installs (but does not enable) a detour from `target` to `detour`.
    ///
    /// # Safety
    ///
    /// `target` must be the entry point of a function with enough patchable
    /// prologue bytes, and `detour` must be a function with an identical ABI.
    unsafe fn install(&self, target: Va, detour: Va) -> Result<Box<dyn HookHandle>, RmlError>;
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub(crate) mod retour_backend {
    use std::sync::atomic::{AtomicBool, Ordering};

    use retour::RawDetour;
    use rml_core::{RmlError, Va};

    use super::{HookBackend, HookHandle};

    /// Production backend over the `retour` inline-hook primitive.
    pub struct RetourBackend;

    struct RetourHandle {
        detour: RawDetour,
        enabled: AtomicBool,
    }

    // RawDetour's raw pointers refer to immutable code locations owned by
    // the process image.
    unsafe impl Send for RetourHandle {}
    unsafe impl Sync for RetourHandle {}

    impl HookHandle for RetourHandle {
        fn trampoline(&self) -> Va {
            Va(self.detour.trampoline() as *const () as u64)
        }

        unsafe fn enable(&self) -> Result<(), RmlError> {
            if self.enabled.swap(true, Ordering::SeqCst) {
                return Ok(());
            }

            self.detour.enable().map_err(|e| RmlError::Hook {
                name: String::new(),
                reason: e.to_string(),
            })
        }

        unsafe fn disable(&self) -> Result<(), RmlError> {
            if !self.enabled.swap(false, Ordering::SeqCst) {
                return Ok(());
            }

            self.detour.disable().map_err(|e| RmlError::Hook {
                name: String::new(),
                reason: e.to_string(),
            })
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
    }

    impl HookBackend for RetourBackend {
        unsafe fn install(&self, target: Va, detour: Va) -> Result<Box<dyn HookHandle>, RmlError> {
            let raw = RawDetour::new(target.as_usize() as *const (), detour.as_usize() as *const ())
                .map_err(|e| RmlError::Hook {
                    name: String::new(),
                    reason: e.to_string(),
                })?;

            Ok(Box::new(RetourHandle {
                detour: raw,
                enabled: AtomicBool::new(false),
            }))
        }
    }
}
