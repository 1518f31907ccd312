use std::sync::Arc;

use mlua::ChunkMode;
use rml_core::PermissionLevel;

use crate::{
    ExecutionHandle, ExecutionResult, HostExecutor, ScriptContext, ScriptError, ScriptPriority,
    ScriptScheduler,
};

/// One VM plus the scheduler that steps it.
///
/// `execute_*` never panics and never returns an error directly: compile,
/// load, and queue failures all come back through the returned
/// [`ExecutionHandle`] as data.
pub struct ScriptEngine {
    context: ScriptContext,
    scheduler: Arc<ScriptScheduler>,
}

impl ScriptEngine {
    /// Creates an engine with a fresh VM.
    pub fn new(max_queue_size: usize, executor: Arc<dyn HostExecutor>) -> Self {
        Self {
            context: ScriptContext::new(),
            scheduler: Arc::new(ScriptScheduler::new(max_queue_size, executor)),
        }
    }

    /// The VM context.
    pub fn context(&self) -> &ScriptContext {
        &self.context
    }

    /// The scheduler stepping this engine's threads.
    pub fn scheduler(&self) -> &Arc<ScriptScheduler> {
        &self.scheduler
    }

    /// Compiles Luau source to bytecode.
    pub fn compile_script(&self, source: &str) -> Result<Vec<u8>, ScriptError> {
        mlua::Compiler::new()
            .compile(source)
            .map_err(|err| ScriptError::Compile(err.to_string()))
    }

    /// Compiles and schedules a script.
    pub fn execute_script(
        &self,
        source: &str,
        chunk_name: &str,
        permission: PermissionLevel,
        priority: ScriptPriority,
    ) -> ExecutionHandle {
        let bytecode = match self.compile_script(source) {
            Ok(bytecode) => bytecode,
            Err(err) => {
                tracing::warn!(chunk_name, %err, "script rejected");
                return ExecutionHandle::ready(ExecutionResult::failed(
                    err,
                    std::time::Duration::ZERO,
                ));
            }
        };

        self.execute_bytecode(&bytecode, chunk_name, permission, priority)
    }

    /// Loads compiled bytecode into a fresh VM thread and schedules it.
    ///
    /// The thread is stamped with `permission` before it is queued, so the
    /// identity is visible to bridge calls from its very first instruction.
    pub fn execute_bytecode(
        &self,
        bytecode: &[u8],
        chunk_name: &str,
        permission: PermissionLevel,
        priority: ScriptPriority,
    ) -> ExecutionHandle {
        let lua = self.context.lua();

        let thread = lua
            .load(bytecode)
            .set_name(chunk_name)
            .set_mode(ChunkMode::Binary)
            .into_function()
            .and_then(|func| lua.create_thread(func));

        let thread = match thread {
            Ok(thread) => thread,
            Err(err) => {
                tracing::warn!(chunk_name, %err, "bytecode rejected");
                return ExecutionHandle::ready(ExecutionResult::failed(
                    ScriptError::Load(err.to_string()),
                    std::time::Duration::ZERO,
                ));
            }
        };

        self.context.set_thread_identity(&thread, permission);
        self.scheduler
            .schedule_script(thread, chunk_name, permission, priority)
    }

    /// Shuts the scheduler down, cancelling everything pending.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmExecutor;

    fn engine() -> ScriptEngine {
        ScriptEngine::new(64, Arc::new(VmExecutor))
    }

    #[test]
    fn compile_failure_comes_back_as_data() {
        let engine = engine();

        let handle = engine.execute_script(
            "this is not luau(",
            "broken",
            PermissionLevel::None,
            ScriptPriority::Normal,
        );

        let result = handle.wait();
        assert!(!result.success);
        assert!(matches!(result.error, Some(ScriptError::Compile(_))));

        // Nothing reached the queue.
        assert_eq!(engine.scheduler().queued_count(), 0);
    }

    #[test]
    fn garbage_bytecode_is_a_load_error() {
        let engine = engine();

        let handle = engine.execute_bytecode(
            &[0xFF, 0x00, 0x13, 0x37],
            "garbage",
            PermissionLevel::None,
            ScriptPriority::Normal,
        );

        let result = handle.wait();
        assert!(matches!(result.error, Some(ScriptError::Load(_))));
    }

    #[test]
    fn script_runs_on_step_and_resolves() {
        let engine = engine();

        let handle = engine.execute_script(
            "flag = 41 + 1",
            "setter",
            PermissionLevel::Full,
            ScriptPriority::Normal,
        );

        assert!(handle.try_wait().is_none());
        engine.scheduler().step();

        let result = handle.wait();
        assert!(result.success, "{:?}", result.error);

        let flag: i64 = engine.context().lua().globals().get("flag").unwrap();
        assert_eq!(flag, 42);
    }

    #[test]
    fn runtime_error_fails_the_handle() {
        let engine = engine();

        let handle = engine.execute_script(
            "error('deliberate')",
            "failing",
            PermissionLevel::None,
            ScriptPriority::Normal,
        );

        engine.scheduler().step();

        let result = handle.wait();
        assert!(!result.success);

        let message = result.error_message().unwrap();
        assert!(message.contains("deliberate"), "{message}");
    }
}
