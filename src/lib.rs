//! RML is a runtime modding framework: it attaches to a running host
//! process, recovers internal functions and types from the host binary by
//! byte pattern and type-information scanning, installs detour and vtable
//! hooks over them, and exposes a capability-gated Luau scripting surface so
//! mods can observe and alter the host without source access.
//!
//! The workspace splits along subsystem lines:
//!
//! - [`rml_core`] — addresses, errors, module images, shared kinds.
//! - [`rml_memory`] — pattern batches, PE sections, RTTI recovery.
//! - [`rml_hooks`] — detour, VMT and slot hooks.
//! - [`rml_sched`] — the per-frame job scheduler.
//! - [`rml_script`] — the Luau engine and script scheduler.
//! - [`rml_bridge`] — shared state, events, and module resolution for
//!   scripts.
//!
//! This crate ties them together: [`Runtime`] is the process-wide context
//! built once at attach, and [`CoreConfig`] / [`ModManifest`] carry the
//! persisted configuration.

mod config;
mod mods;
mod runtime;

pub use config::{
    CoreConfig, CoreSections, DataModelContext, DeveloperConfig, LoggingConfig, ModManifest,
    PathsConfig, PerformanceConfig, ResourcesSection, RuntimeSection, SecurityConfig,
};
pub use mods::{ModHandle, StartModFn, UninstallModFn, START_MOD_SYMBOL, UNINSTALL_MOD_SYMBOL};
pub use runtime::Runtime;

pub use rml_bridge as bridge;
pub use rml_core as core;
pub use rml_hooks as hooks;
pub use rml_memory as memory;
pub use rml_sched as sched;
pub use rml_script as script;

#[cfg(test)]
mod runtime_tests;
