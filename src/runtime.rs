use std::{path::PathBuf, sync::Arc};

use rml_bridge::{BridgeProvider, ModInfo, PermissionSource, RequireProvider};
use rml_core::{DataModelKind, ModuleImage, PermissionLevel, RmlError};
use rml_hooks::{HookBackend, HookEngine};
use rml_memory::{RttiMap, RttiScanner, SectionTable};
use rml_sched::{JobKindResolver, TaskScheduler};
use rml_script::{EngineSetup, HostExecutor, ScriptEngine, ScriptEngineManager};

use crate::{CoreConfig, ModHandle};

/// The identity the `rml.*` globals carry before any mod is mounted.
fn framework_info() -> ModInfo {
    ModInfo {
        name: "rml".to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        ..ModInfo::default()
    }
}

/// Installs the `rml.*` globals into an engine's VM, gated on the engine's
/// own per-thread identity registry raised to at least `floor`.
fn mount_bridge_surface(
    bridge: &Arc<BridgeProvider>,
    floor: PermissionLevel,
    info: ModInfo,
    engine: &ScriptEngine,
) -> Result<(), RmlError> {
    let context = engine.context();

    let identities = context.permission_source();
    let permissions: PermissionSource = Arc::new(move |lua| identities(lua).max(floor));

    rml_bridge::install_globals(context.lua(), bridge.clone(), info, permissions)
        .map_err(|err| RmlError::Vm(err.to_string()))
}

/// The process-wide framework context.
///
/// One `Runtime` owns everything the framework keeps alive: the discovery
/// tables built at attach, the hook engine, the task scheduler, the bridge,
/// and the per-universe script engines. Constructed once; everything that
/// needs shared access goes through it rather than through globals.
pub struct Runtime {
    sections: SectionTable,
    rtti: RttiMap,
    job_kinds: JobKindResolver,
    hooks: HookEngine,
    scheduler: TaskScheduler,
    bridge: Arc<BridgeProvider>,
    engines: ScriptEngineManager,
    config: CoreConfig,
}

impl Runtime {
    /// Builds the runtime against the host module.
    ///
    /// Parses the section table, scans for type information, and resolves
    /// the host job classes. Discovery failure is fatal: downstream code
    /// unconditionally trusts the tables built here, so refusing to start is
    /// better than starting with holes in them.
    pub fn bootstrap(
        image: &dyn ModuleImage,
        config: CoreConfig,
        hook_backend: Arc<dyn HookBackend>,
        executor: Arc<dyn HostExecutor>,
    ) -> Result<Self, RmlError> {
        let sections = SectionTable::parse(image)?;
        tracing::info!(sections = sections.iter().count(), "host image parsed");

        let rtti = RttiScanner::new(image, &sections).scan()?;
        tracing::info!(classes = rtti.len(), "type information recovered");

        let job_kinds = JobKindResolver::resolve(&rtti);
        if job_kinds.is_empty() {
            tracing::warn!("no host job classes resolved; frame dispatch will be inert");
        }

        let max_queue_size = config.core.performance.max_queue_size;

        let bridge = Arc::new(BridgeProvider::new());
        let floor = if config.core.security.allow_bridge_by_default {
            PermissionLevel::Bridge
        } else {
            PermissionLevel::None
        };

        // Every engine comes up with the bridge surface already mounted.
        let setup: EngineSetup = {
            let bridge = bridge.clone();
            Arc::new(move |engine: &ScriptEngine| {
                if let Err(err) = mount_bridge_surface(&bridge, floor, framework_info(), engine) {
                    tracing::error!(%err, "bridge surface install failed");
                }
            })
        };

        Ok(Self {
            sections,
            rtti,
            job_kinds,
            hooks: HookEngine::new(hook_backend),
            scheduler: TaskScheduler::new(),
            bridge,
            engines: ScriptEngineManager::with_setup(max_queue_size, executor, setup),
            config,
        })
    }

    /// The host module's section table.
    pub fn sections(&self) -> &SectionTable {
        &self.sections
    }

    /// Recovered class information, keyed by demangled name.
    pub fn rtti(&self) -> &RttiMap {
        &self.rtti
    }

    /// Host job classification.
    pub fn job_kinds(&self) -> &JobKindResolver {
        &self.job_kinds
    }

    /// The detour registry.
    pub fn hooks(&self) -> &HookEngine {
        &self.hooks
    }

    /// The per-frame job scheduler.
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Shared mod/script state.
    pub fn bridge(&self) -> &Arc<BridgeProvider> {
        &self.bridge
    }

    /// The per-universe script engines.
    pub fn engines(&self) -> &ScriptEngineManager {
        &self.engines
    }

    /// The loaded configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Mounts a mod's script surface into a universe's VM.
    ///
    /// The `rml.*` globals are reinstalled carrying the mod's metadata, and
    /// `require` is replaced so `@rml/` resolves against the framework script
    /// library and `@self/` against the mod's own scripts. Returns the
    /// engine, creating it if the universe had none.
    pub fn attach_mod_scripts(
        &self,
        kind: DataModelKind,
        info: &ModInfo,
    ) -> Result<Arc<ScriptEngine>, RmlError> {
        let engine = self.engines.engine_for(kind);

        mount_bridge_surface(&self.bridge, self.permission_floor(), info.clone(), &engine)?;
        self.require_provider(info)
            .install(engine.context().lua())
            .map_err(|err| RmlError::Vm(err.to_string()))?;

        tracing::info!(mod_name = %info.name, %kind, "mod script surface mounted");
        Ok(engine)
    }

    /// Unmounts a previously attached mod's script surface: the custom
    /// `require` (and its module cache) is released and the globals revert
    /// to the framework identity.
    pub fn detach_mod_scripts(&self, kind: DataModelKind, info: &ModInfo) -> Result<(), RmlError> {
        let Some(engine) = self.engines.existing_engine(kind) else {
            return Ok(());
        };

        self.require_provider(info)
            .uninstall(engine.context().lua())
            .map_err(|err| RmlError::Vm(err.to_string()))?;
        mount_bridge_surface(&self.bridge, self.permission_floor(), framework_info(), &engine)?;

        tracing::info!(mod_name = %info.name, %kind, "mod script surface unmounted");
        Ok(())
    }

    fn permission_floor(&self) -> PermissionLevel {
        if self.config.core.security.allow_bridge_by_default {
            PermissionLevel::Bridge
        } else {
            PermissionLevel::None
        }
    }

    fn require_provider(&self, info: &ModInfo) -> RequireProvider {
        RequireProvider::new(
            PathBuf::from(&self.config.core.paths.framework_scripts),
            info.path.join("scripts"),
        )
    }

    /// Releases everything a mod registered while it was loaded.
    pub fn uninstall_mod(&self, handle: ModHandle) {
        let name = handle.info.name.clone();

        for id in &handle.jobs {
            if let Err(err) = self.scheduler.unregister_job(*id) {
                tracing::warn!(mod_name = %name, %err, "mod job already gone");
            }
        }

        for hook in &handle.hooks {
            if !self.hooks.remove(hook) {
                tracing::warn!(mod_name = %name, hook, "mod hook already gone");
            }
        }

        let dropped = self.bridge.unregister_mod_functions(&name);
        tracing::info!(
            mod_name = %name,
            jobs = handle.jobs.len(),
            hooks = handle.hooks.len(),
            functions = dropped,
            "mod uninstalled"
        );
    }

    /// Tears the framework down: jobs destroyed, script engines stopped.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.engines.sweep_orphans(|_| false);
        tracing::info!("runtime shut down");
    }
}
