use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use rml_core::DataModelKind;

use crate::{HostExecutor, ScriptEngine};

/// Per-engine initialization, run once on every engine the manager creates
/// before the engine is handed to any caller. This is where the embedder
/// mounts VM globals and module resolution.
pub type EngineSetup = Arc<dyn Fn(&ScriptEngine) + Send + Sync>;

/// At most one live [`ScriptEngine`] per execution universe.
///
/// Engines are created on demand when a universe first needs one and torn
/// down when the host destroys that universe. [`sweep_orphans`]
/// (Self::sweep_orphans) catches universes that died without an explicit
/// removal.
pub struct ScriptEngineManager {
    engines: RwLock<HashMap<DataModelKind, Arc<ScriptEngine>>>,
    executor: Arc<dyn HostExecutor>,
    max_queue_size: usize,
    setup: Option<EngineSetup>,
}

impl ScriptEngineManager {
    /// Creates a manager whose engines share one executor and queue cap.
    pub fn new(max_queue_size: usize, executor: Arc<dyn HostExecutor>) -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
            executor,
            max_queue_size,
            setup: None,
        }
    }

    /// Creates a manager that additionally runs `setup` on every engine it
    /// creates.
    pub fn with_setup(
        max_queue_size: usize,
        executor: Arc<dyn HostExecutor>,
        setup: EngineSetup,
    ) -> Self {
        Self {
            setup: Some(setup),
            ..Self::new(max_queue_size, executor)
        }
    }

    /// The engine for `kind`, created if this is its first use.
    pub fn engine_for(&self, kind: DataModelKind) -> Arc<ScriptEngine> {
        if let Some(engine) = self.engines.read().unwrap().get(&kind) {
            return engine.clone();
        }

        let mut engines = self.engines.write().unwrap();
        engines
            .entry(kind)
            .or_insert_with(|| {
                let engine = ScriptEngine::new(self.max_queue_size, self.executor.clone());
                if let Some(setup) = &self.setup {
                    setup(&engine);
                }
                tracing::debug!(%kind, "script engine created");
                Arc::new(engine)
            })
            .clone()
    }

    /// The engine for `kind`, if one is live.
    pub fn existing_engine(&self, kind: DataModelKind) -> Option<Arc<ScriptEngine>> {
        self.engines.read().unwrap().get(&kind).cloned()
    }

    /// Tears down the engine for a universe the host destroyed.
    pub fn remove(&self, kind: DataModelKind) -> bool {
        let removed = self.engines.write().unwrap().remove(&kind);

        if let Some(engine) = removed {
            engine.shutdown();
            tracing::debug!(%kind, "script engine removed");
            true
        } else {
            false
        }
    }

    /// Tears down every engine whose universe `alive` no longer reports.
    ///
    /// Returns how many engines were swept.
    pub fn sweep_orphans(&self, alive: impl Fn(DataModelKind) -> bool) -> usize {
        let orphaned: Vec<DataModelKind> = {
            let engines = self.engines.read().unwrap();
            engines.keys().copied().filter(|&kind| !alive(kind)).collect()
        };

        for &kind in &orphaned {
            self.remove(kind);
        }

        orphaned.len()
    }

    /// Number of live engines.
    pub fn len(&self) -> usize {
        self.engines.read().unwrap().len()
    }

    /// Returns `true` if no engine is live.
    pub fn is_empty(&self) -> bool {
        self.engines.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmExecutor;

    fn manager() -> ScriptEngineManager {
        ScriptEngineManager::new(64, Arc::new(VmExecutor))
    }

    #[test]
    fn one_engine_per_kind() {
        let manager = manager();

        let first = manager.engine_for(DataModelKind::Client);
        let again = manager.engine_for(DataModelKind::Client);

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(manager.len(), 1);

        manager.engine_for(DataModelKind::Server);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn setup_runs_once_per_new_engine() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let ran = Arc::new(AtomicUsize::new(0));
        let setup: EngineSetup = {
            let ran = ran.clone();
            Arc::new(move |engine: &ScriptEngine| {
                ran.fetch_add(1, Ordering::SeqCst);
                engine.context().lua().globals().set("prepared", true).unwrap();
            })
        };

        let manager = ScriptEngineManager::with_setup(64, Arc::new(VmExecutor), setup);

        let engine = manager.engine_for(DataModelKind::Client);
        manager.engine_for(DataModelKind::Client);
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        manager.engine_for(DataModelKind::Server);
        assert_eq!(ran.load(Ordering::SeqCst), 2);

        let prepared: bool = engine.context().lua().globals().get("prepared").unwrap();
        assert!(prepared);
    }

    #[test]
    fn removal_shuts_the_engine_down() {
        let manager = manager();

        let engine = manager.engine_for(DataModelKind::Edit);
        assert!(manager.remove(DataModelKind::Edit));
        assert!(!manager.remove(DataModelKind::Edit));

        assert!(!engine.scheduler().is_running());
        assert!(manager.existing_engine(DataModelKind::Edit).is_none());
    }

    #[test]
    fn orphan_sweep_tears_down_dead_universes() {
        let manager = manager();

        manager.engine_for(DataModelKind::Client);
        manager.engine_for(DataModelKind::Server);

        let swept = manager.sweep_orphans(|kind| kind == DataModelKind::Client);

        assert_eq!(swept, 1);
        assert_eq!(manager.len(), 1);
        assert!(manager.existing_engine(DataModelKind::Client).is_some());
    }
}
