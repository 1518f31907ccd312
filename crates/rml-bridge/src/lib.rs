//! The script-facing bridge.
//!
//! [`BridgeProvider`] is the shared state mods and scripts exchange: a
//! key/value data store, a `"mod.function"` native-function table, and
//! string-named events. [`install_globals`] mounts it into a VM as the
//! `rml.*` table — gating writes on the caller's permission level through a
//! [`PermissionSource`] — and [`RequireProvider`] replaces the VM's `require`
//! with one that understands `@rml/` and `@self/` module paths.

mod globals;
mod provider;
mod require;
mod value;

pub use globals::{install_globals, remove_globals, ModInfo, PermissionSource};
pub use provider::{BridgeProvider, ListenerFn, ListenerId, NativeFn};
pub use require::RequireProvider;
pub use value::BridgeValue;
