use rml_bridge::ModInfo;
use rml_sched::JobId;

/// Everything a loaded mod registered with the framework.
///
/// Returned by the mod's `start_mod` export and handed back to
/// [`Runtime::uninstall_mod`](crate::Runtime::uninstall_mod) on unload so
/// the framework can release the mod's jobs, hooks, and bridge functions.
#[derive(Debug, Default)]
pub struct ModHandle {
    /// The mod's identity.
    pub info: ModInfo,
    /// Jobs the mod registered.
    pub jobs: Vec<JobId>,
    /// Hook names the mod installed.
    pub hooks: Vec<String>,
}

impl ModHandle {
    /// A handle for a mod that registered nothing yet.
    pub fn new(info: ModInfo) -> Self {
        Self {
            info,
            jobs: Vec::new(),
            hooks: Vec::new(),
        }
    }
}

/// The entry point a mod binary exports.
pub type StartModFn = unsafe extern "C" fn() -> *mut ModHandle;

/// The teardown a mod binary exports.
pub type UninstallModFn = unsafe extern "C" fn(*mut ModHandle);

/// Export name for [`StartModFn`].
pub const START_MOD_SYMBOL: &str = "start_mod";

/// Export name for [`UninstallModFn`].
pub const UNINSTALL_MOD_SYMBOL: &str = "uninstall_mod";
