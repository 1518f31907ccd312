use std::{collections::HashMap, sync::Arc};

use mlua::{Lua, Thread};
use rml_core::PermissionLevel;

/// Per-thread permission registry, stored in the VM's app data.
#[derive(Default)]
struct IdentityRegistry {
    levels: HashMap<usize, PermissionLevel>,
}

/// One VM and the identity bookkeeping around it.
///
/// The context tracks the permission level each VM thread runs with.
/// Framework and mod chunks are stamped [`PermissionLevel::Full`]; everything
/// else stays at whatever the caller requested. [`permission_source`]
/// (Self::permission_source) exposes the registry as a lookup on the running
/// thread; the bridge layer consults it before doing anything privileged.
pub struct ScriptContext {
    lua: Lua,
}

impl ScriptContext {
    /// Creates a fresh VM with an empty identity registry.
    pub fn new() -> Self {
        let lua = Lua::new();
        lua.set_app_data(IdentityRegistry::default());

        Self { lua }
    }

    /// The VM.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Records the permission level `thread` runs with.
    pub fn set_thread_identity(&self, thread: &Thread, level: PermissionLevel) {
        if let Some(mut registry) = self.lua.app_data_mut::<IdentityRegistry>() {
            registry.levels.insert(thread.to_pointer() as usize, level);
        }
    }

    /// The permission level `thread` runs with. Unstamped threads are
    /// untrusted.
    pub fn thread_identity(&self, thread: &Thread) -> PermissionLevel {
        self.lua
            .app_data_ref::<IdentityRegistry>()
            .and_then(|registry| registry.levels.get(&(thread.to_pointer() as usize)).copied())
            .unwrap_or_default()
    }

    /// Forgets a thread's identity once the VM is done with it.
    pub fn clear_thread_identity(&self, thread: &Thread) {
        if let Some(mut registry) = self.lua.app_data_mut::<IdentityRegistry>() {
            registry.levels.remove(&(thread.to_pointer() as usize));
        }
    }

    /// A lookup resolving the permission level of whatever thread is
    /// currently running in the VM.
    ///
    /// The registry lives in the VM's app data, so the returned closure needs
    /// no handle back to the context; privileged native surfaces hold onto it
    /// and consult it per call. Unstamped threads resolve as untrusted.
    pub fn permission_source(&self) -> Arc<dyn Fn(&Lua) -> PermissionLevel + Send + Sync> {
        Arc::new(|lua: &Lua| {
            lua.app_data_ref::<IdentityRegistry>()
                .and_then(|registry| {
                    registry
                        .levels
                        .get(&(lua.current_thread().to_pointer() as usize))
                        .copied()
                })
                .unwrap_or_default()
        })
    }
}

impl Default for ScriptContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_defaults_to_untrusted() {
        let context = ScriptContext::new();
        let func = context.lua().load("return 1").into_function().unwrap();
        let thread = context.lua().create_thread(func).unwrap();

        assert_eq!(context.thread_identity(&thread), PermissionLevel::None);
    }

    #[test]
    fn permission_source_sees_the_running_thread() {
        let context = ScriptContext::new();
        let source = context.permission_source();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = {
            let seen = seen.clone();
            context
                .lua()
                .create_function(move |lua, ()| {
                    seen.lock().unwrap().push(source(lua));
                    Ok(())
                })
                .unwrap()
        };
        context.lua().globals().set("observe", recorder).unwrap();

        let func = context.lua().load("observe()").into_function().unwrap();
        let thread = context.lua().create_thread(func).unwrap();
        context.set_thread_identity(&thread, PermissionLevel::Full);
        thread.resume::<()>(()).unwrap();

        // The main state carries no identity.
        context.lua().load("observe()").exec().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            [PermissionLevel::Full, PermissionLevel::None]
        );
    }

    #[test]
    fn identity_is_per_thread() {
        let context = ScriptContext::new();
        let func = context.lua().load("return 1").into_function().unwrap();

        let trusted = context.lua().create_thread(func.clone()).unwrap();
        let untrusted = context.lua().create_thread(func).unwrap();

        context.set_thread_identity(&trusted, PermissionLevel::Full);

        assert_eq!(context.thread_identity(&trusted), PermissionLevel::Full);
        assert_eq!(context.thread_identity(&untrusted), PermissionLevel::None);

        context.clear_thread_identity(&trusted);
        assert_eq!(context.thread_identity(&trusted), PermissionLevel::None);
    }
}
