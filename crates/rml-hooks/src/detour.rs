use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use rml_core::{RmlError, Va};

use crate::{fix_hook_address, CodeReader, HookBackend, HookHandle};

/// A statically identified detour site.
///
/// Implementing this trait on a marker type binds a hook's original-function
/// pointer to a statically known signature: [`HookEngine::original`] resolves
/// through the marker's [`TypeId`] and hands back `Self::Fn`, so the call to
/// the original can never be made through a mismatched cast.
///
/// ```ignore
/// struct StepJobSite;
///
/// impl DetourSite for StepJobSite {
///     type Fn = unsafe extern "C" fn(*mut Job, f64) -> bool;
///     const NAME: &'static str = "RBX::TaskScheduler::stepJob";
///
///     fn detour() -> Self::Fn {
///         step_job_detour
///     }
/// }
/// ```
pub trait DetourSite: 'static {
    /// The exact function signature of the hooked target.
    type Fn: Copy + 'static;

    /// Name the hook is registered under.
    const NAME: &'static str;

    /// The replacement function.
    fn detour() -> Self::Fn;
}

struct DetourEntry {
    target: Va,
    handle: Box<dyn HookHandle>,
}

enum Pending {
    Enable(String),
    Disable(String),
}

/// Registry of installed detours.
///
/// Install/remove operate immediately; enable/disable are queued and applied
/// in one [`flush`](HookEngine::flush) pass so a burst of (de)activations
/// costs one protection flip each rather than one per call site. A lazily
/// registered hook waits until some other subsystem supplies its target
/// address through [`bind`](HookEngine::bind).
pub struct HookEngine {
    backend: Arc<dyn HookBackend>,
    hooks: Mutex<HashMap<String, DetourEntry>>,
    lazy: Mutex<HashMap<String, Va>>,
    sites: Mutex<HashMap<TypeId, Va>>,
    queue: Mutex<Vec<Pending>>,
}

impl HookEngine {
    /// Creates an engine over the given backend.
    pub fn new(backend: Arc<dyn HookBackend>) -> Self {
        Self {
            backend,
            hooks: Mutex::new(HashMap::new()),
            lazy: Mutex::new(HashMap::new()),
            sites: Mutex::new(HashMap::new()),
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Installs a detour at `target`, resolving any leading jmp chain first.
    ///
    /// # Safety
    ///
    /// See [`HookBackend::install`]; additionally `reader` must be able to
    /// read the bytes at `target`.
    pub unsafe fn install(
        &self,
        reader: &dyn CodeReader,
        name: &str,
        target: Va,
        detour: Va,
    ) -> Result<(), RmlError> {
        let resolved = fix_hook_address(reader, target);
        self.install_resolved(name, resolved, detour)
    }

    /// Installs a detour at an already resolved target address.
    ///
    /// # Safety
    ///
    /// See [`HookBackend::install`].
    pub unsafe fn install_resolved(
        &self,
        name: &str,
        target: Va,
        detour: Va,
    ) -> Result<(), RmlError> {
        if target.is_null() {
            return Err(RmlError::InvalidHookTarget(target));
        }

        let handle = match self.backend.install(target, detour) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(name, %target, %err, "detour install failed");
                return Err(err);
            }
        };

        tracing::debug!(name, %target, trampoline = %handle.trampoline(), "detour installed");

        self.hooks
            .lock()
            .unwrap()
            .insert(name.to_owned(), DetourEntry { target, handle });

        Ok(())
    }

    /// Registers a hook whose target is not yet known.
    ///
    /// The detour address is stored; installation happens when
    /// [`bind`](Self::bind) supplies the target.
    pub fn install_lazy(&self, name: &str, detour: Va) {
        self.lazy.lock().unwrap().insert(name.to_owned(), detour);
    }

    /// Binds a lazily registered hook to its now-known target.
    ///
    /// # Safety
    ///
    /// See [`HookBackend::install`].
    pub unsafe fn bind(&self, name: &str, target: Va) -> Result<(), RmlError> {
        let detour = self
            .lazy
            .lock()
            .unwrap()
            .remove(name)
            .ok_or(RmlError::Other("no lazy hook under this name"))?;

        self.install_resolved(name, target, detour)
    }

    /// Installs a statically identified detour site and records its
    /// trampoline under the site's type identity.
    ///
    /// # Safety
    ///
    /// `S::Fn` must match the ABI of the function at `target`.
    pub unsafe fn install_site<S: DetourSite>(
        &self,
        reader: &dyn CodeReader,
        target: Va,
    ) -> Result<(), RmlError> {
        debug_assert_eq!(std::mem::size_of::<S::Fn>(), std::mem::size_of::<usize>());

        let detour = fn_to_va::<S::Fn>(S::detour());
        self.install(reader, S::NAME, target, detour)?;

        let trampoline = {
            let hooks = self.hooks.lock().unwrap();
            hooks[S::NAME].handle.trampoline()
        };

        self.sites
            .lock()
            .unwrap()
            .insert(TypeId::of::<S>(), trampoline);

        Ok(())
    }

    /// Returns the original function for a detour site, with its exact
    /// signature. `None` until the site has been installed.
    pub fn original<S: DetourSite>(&self) -> Option<S::Fn> {
        let trampoline = *self.sites.lock().unwrap().get(&TypeId::of::<S>())?;

        // Size equality is checked at install time; the trampoline was
        // produced for exactly this site.
        Some(unsafe { va_to_fn::<S::Fn>(trampoline) })
    }

    /// Queues an enable for the next [`flush`](Self::flush).
    pub fn queue_enable(&self, name: &str) {
        self.queue
            .lock()
            .unwrap()
            .push(Pending::Enable(name.to_owned()));
    }

    /// Queues a disable for the next [`flush`](Self::flush).
    pub fn queue_disable(&self, name: &str) {
        self.queue
            .lock()
            .unwrap()
            .push(Pending::Disable(name.to_owned()));
    }

    /// Applies all queued enable/disable requests in one pass.
    ///
    /// Individual failures are logged and skipped; the rest of the queue
    /// still applies. Returns the number of requests that failed.
    pub fn flush(&self) -> usize {
        let pending = std::mem::take(&mut *self.queue.lock().unwrap());
        let hooks = self.hooks.lock().unwrap();
        let mut failures = 0;

        for request in pending {
            let (name, enable) = match &request {
                Pending::Enable(name) => (name, true),
                Pending::Disable(name) => (name, false),
            };

            let Some(entry) = hooks.get(name) else {
                tracing::warn!(name, "queued toggle for unknown hook");
                failures += 1;
                continue;
            };

            let result = unsafe {
                if enable {
                    entry.handle.enable()
                } else {
                    entry.handle.disable()
                }
            };

            if let Err(err) = result {
                tracing::error!(name, enable, %err, "hook toggle failed");
                failures += 1;
            }
        }

        failures
    }

    /// Enables or disables a hook immediately. Idempotent.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RmlError> {
        let hooks = self.hooks.lock().unwrap();
        let entry = hooks.get(name).ok_or(RmlError::Other("unknown hook"))?;

        if entry.handle.is_enabled() == enabled {
            return Ok(());
        }

        unsafe {
            if enabled {
                entry.handle.enable()
            } else {
                entry.handle.disable()
            }
        }
    }

    /// Returns the enabled state of a hook, if it exists.
    pub fn enabled(&self, name: &str) -> Option<bool> {
        self.hooks
            .lock()
            .unwrap()
            .get(name)
            .map(|entry| entry.handle.is_enabled())
    }

    /// The target address a hook was installed at.
    pub fn target(&self, name: &str) -> Option<Va> {
        self.hooks.lock().unwrap().get(name).map(|e| e.target)
    }

    /// Removes a hook, dropping its trampoline.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.hooks.lock().unwrap().remove(name);

        if let Some(entry) = &removed {
            if entry.handle.is_enabled() {
                if let Err(err) = unsafe { entry.handle.disable() } {
                    tracing::error!(name, %err, "disable on removal failed");
                }
            }
        }

        removed.is_some()
    }

    /// Names of all installed hooks.
    pub fn names(&self) -> Vec<String> {
        self.hooks.lock().unwrap().keys().cloned().collect()
    }

    /// Number of installed hooks.
    pub fn len(&self) -> usize {
        self.hooks.lock().unwrap().len()
    }

    /// Returns `true` if no hooks are installed.
    pub fn is_empty(&self) -> bool {
        self.hooks.lock().unwrap().is_empty()
    }
}

fn fn_to_va<F: Copy + 'static>(f: F) -> Va {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
    Va(unsafe { std::mem::transmute_copy::<F, usize>(&f) } as u64)
}

unsafe fn va_to_fn<F: Copy + 'static>(va: Va) -> F {
    let raw = va.as_usize();
    std::mem::transmute_copy::<usize, F>(&raw)
}
