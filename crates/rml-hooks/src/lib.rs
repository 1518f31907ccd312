//! The RML hooking engine.
//!
//! Three hook kinds are provided, each with its own contract:
//!
//! - [`HookEngine`] installs inline detours through a [`HookBackend`]
//!   (the production backend wraps the `retour` inline-hook primitive), with
//!   queued enable/disable batching, deferred "lazy" target binding, and a
//!   compile-time-identity registry so `original::<Site>()` returns the
//!   trampoline with the exact original function signature.
//! - [`VmtHook`] swaps an object's whole virtual-method-table pointer for a
//!   shadow copy, so individual entries can be hot-swapped without re-copying.
//! - [`SlotHook`] patches a single vtable slot in place.
//!
//! Hook failures are logged and returned, never escalated: hooks are largely
//! independent, and one failed install should not take the framework down.

mod backend;
mod detour;
mod fixup;
mod slot;
mod vmt;


pub use self::{
    backend::{HookBackend, HookHandle},
    detour::{DetourSite, HookEngine},
    fixup::{fix_hook_address, CodeReader, ImageCodeReader, LiveCodeReader},
    slot::SlotHook,
    vmt::VmtHook,
};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use self::backend::retour_backend::RetourBackend;
