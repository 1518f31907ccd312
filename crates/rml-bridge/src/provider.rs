use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{atomic::AtomicU64, atomic::Ordering, Arc, Mutex},
};

use crate::BridgeValue;

/// A native function exposed to scripts under `"mod.function"`.
pub type NativeFn =
    Box<dyn Fn(&[BridgeValue]) -> Result<Vec<BridgeValue>, String> + Send + Sync>;

/// An event listener. Failures stay inside the listener.
pub type ListenerFn = Arc<dyn Fn(&[BridgeValue]) + Send + Sync>;

/// Handle for removing an event listener.
///
/// The id is the only removal handle; callbacks are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// The raw id, for handing across the script boundary.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Rebuilds an id handed back from the script boundary.
    pub fn from_raw(raw: u64) -> Self {
        ListenerId(raw)
    }
}

/// Process-wide state shared between mods and scripts.
///
/// Three independent maps, each behind its own lock: a key/value data store,
/// a `"mod.function"` native-function table, and per-event listener lists.
pub struct BridgeProvider {
    data: Mutex<HashMap<String, BridgeValue>>,
    functions: Mutex<HashMap<String, NativeFn>>,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, ListenerFn)>>>,
    next_listener: AtomicU64,
}

impl BridgeProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    ///////////////////////////////////////////////////////////////////////////
    // Shared data
    ///////////////////////////////////////////////////////////////////////////

    /// Stores a value under `key`, replacing any previous value.
    pub fn set_data(&self, key: impl Into<String>, value: BridgeValue) {
        self.data.lock().unwrap().insert(key.into(), value);
    }

    /// The value under `key`. Missing keys read as nil.
    pub fn get_data(&self, key: &str) -> BridgeValue {
        self.data
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or(BridgeValue::Nil)
    }

    /// Removes the value under `key`.
    pub fn remove_data(&self, key: &str) -> bool {
        self.data.lock().unwrap().remove(key).is_some()
    }

    ///////////////////////////////////////////////////////////////////////////
    // Native functions
    ///////////////////////////////////////////////////////////////////////////

    /// Registers a native function under `"<mod>.<name>"`.
    ///
    /// Returns `false` (and leaves the existing registration) on collision.
    pub fn register_function(
        &self,
        mod_name: &str,
        fn_name: &str,
        callback: NativeFn,
    ) -> bool {
        let qualified = format!("{mod_name}.{fn_name}");
        let mut functions = self.functions.lock().unwrap();

        if functions.contains_key(&qualified) {
            tracing::warn!(qualified, "bridge function already registered");
            return false;
        }

        tracing::debug!(qualified, "bridge function registered");
        functions.insert(qualified, callback);
        true
    }

    /// Calls a registered function by its qualified name.
    pub fn call_function(
        &self,
        qualified: &str,
        args: &[BridgeValue],
    ) -> Result<Vec<BridgeValue>, String> {
        let functions = self.functions.lock().unwrap();
        let callback = functions
            .get(qualified)
            .ok_or_else(|| format!("no bridge function `{qualified}`"))?;

        callback(args)
    }

    /// Removes every function a mod registered. Returns how many.
    pub fn unregister_mod_functions(&self, mod_name: &str) -> usize {
        let prefix = format!("{mod_name}.");
        let mut functions = self.functions.lock().unwrap();

        let before = functions.len();
        functions.retain(|name, _| !name.starts_with(&prefix));
        before - functions.len()
    }

    /// Distinct mod names with at least one registered function.
    pub fn mod_list(&self) -> Vec<String> {
        let functions = self.functions.lock().unwrap();
        let mut mods: Vec<String> = functions
            .keys()
            .filter_map(|name| name.split_once('.').map(|(m, _)| m.to_owned()))
            .collect();

        mods.sort();
        mods.dedup();
        mods
    }

    /// All qualified function names, sorted.
    pub fn function_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    ///////////////////////////////////////////////////////////////////////////
    // Events
    ///////////////////////////////////////////////////////////////////////////

    /// Subscribes to an event; the returned id is the only removal handle.
    pub fn listen_event(&self, event: impl Into<String>, listener: ListenerFn) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));

        self.listeners
            .lock()
            .unwrap()
            .entry(event.into())
            .or_default()
            .push((id, listener));

        id
    }

    /// Removes one listener.
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();

        let Some(list) = listeners.get_mut(event) else {
            return false;
        };

        let before = list.len();
        list.retain(|(listener_id, _)| *listener_id != id);
        let removed = list.len() < before;

        if list.is_empty() {
            listeners.remove(event);
        }

        removed
    }

    /// Fires an event at every listener, best-effort.
    ///
    /// One listener panicking is logged and does not stop the rest. Returns
    /// the number of listeners reached.
    pub fn trigger_event(&self, event: &str, args: &[BridgeValue]) -> usize {
        // Snapshot outside the lock so a listener may (un)subscribe.
        let snapshot: Vec<(ListenerId, ListenerFn)> = self
            .listeners
            .lock()
            .unwrap()
            .get(event)
            .map(|list| list.to_vec())
            .unwrap_or_default();

        for (id, listener) in &snapshot {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| listener(args)));

            if outcome.is_err() {
                tracing::error!(event, listener = id.0, "event listener panicked");
            }
        }

        snapshot.len()
    }
}

impl Default for BridgeProvider {
    fn default() -> Self {
        Self::new()
    }
}
