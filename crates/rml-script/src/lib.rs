//! Luau script execution.
//!
//! One [`ScriptEngine`] owns one VM: compilation, thread creation, identity
//! stamping, and a [`ScriptScheduler`] that steps queued scripts
//! cooperatively from a host frame callback. The scheduler queues and
//! bookkeeps; actually running a thread goes through the [`HostExecutor`]
//! seam, either the host's own stepping entry point or the in-process
//! [`VmExecutor`].
//!
//! [`ScriptEngineManager`] keys engines by execution universe, and
//! [`ModScriptContext`] holds the per-universe script sets a mod declares in
//! its manifest.

mod context;
mod engine;
mod executor;
mod manager;
mod mods;
mod result;
mod scheduler;

pub use context::ScriptContext;
pub use engine::ScriptEngine;
pub use executor::VmExecutor;
pub use manager::{EngineSetup, ScriptEngineManager};
pub use mods::ModScriptContext;
pub use result::{ExecutionHandle, ExecutionResult, ScriptError};
pub use scheduler::{
    HostExecutor, ScriptJob, ScriptPriority, ScriptScheduler, StepOutcome, YieldCondition,
    YieldedScript,
};

pub(crate) use result::ExecutionSink;
