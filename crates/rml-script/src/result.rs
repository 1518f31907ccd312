use std::{
    sync::mpsc::{self, Receiver, Sender},
    time::Duration,
};

/// Why a scheduled script did not complete successfully.
///
/// Every failure mode crosses the API boundary as data; nothing in this
/// crate panics on a bad script.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The source did not compile.
    #[error("compile error: {0}")]
    Compile(String),

    /// The bytecode did not load into the VM.
    #[error("load error: {0}")]
    Load(String),

    /// The scheduler's queue cap was reached.
    #[error("queue is full")]
    QueueFull,

    /// The scheduler has been shut down.
    #[error("scheduler is not running")]
    NotRunning,

    /// The script was cancelled before it finished.
    #[error("script cancelled")]
    Cancelled,

    /// The script ran and raised an error.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// The outcome of one scheduled script execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Whether the script ran to completion without error.
    pub success: bool,
    /// The failure, when `success` is false.
    pub error: Option<ScriptError>,
    /// Wall time from first dispatch to final completion.
    pub execution_time: Duration,
}

impl ExecutionResult {
    pub(crate) fn ok(execution_time: Duration) -> Self {
        Self {
            success: true,
            error: None,
            execution_time,
        }
    }

    pub(crate) fn failed(error: ScriptError, execution_time: Duration) -> Self {
        Self {
            success: false,
            error: Some(error),
            execution_time,
        }
    }

    /// The failure rendered as a message, when there is one.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|err| err.to_string())
    }
}

/// Completion side of an [`ExecutionHandle`].
///
/// Best-effort: completing after the handle was dropped is a no-op.
pub(crate) struct ExecutionSink {
    tx: Sender<ExecutionResult>,
}

impl ExecutionSink {
    pub(crate) fn complete(self, result: ExecutionResult) {
        let _ = self.tx.send(result);
    }
}

/// The caller's view of a scheduled script.
///
/// Resolves exactly once, when the script completes, fails, or is cancelled.
pub struct ExecutionHandle {
    rx: Receiver<ExecutionResult>,
}

impl ExecutionHandle {
    /// Creates a connected sink/handle pair.
    pub(crate) fn pair() -> (ExecutionSink, ExecutionHandle) {
        let (tx, rx) = mpsc::channel();
        (ExecutionSink { tx }, ExecutionHandle { rx })
    }

    /// Creates a handle that is already resolved.
    pub(crate) fn ready(result: ExecutionResult) -> Self {
        let (sink, handle) = Self::pair();
        sink.complete(result);
        handle
    }

    /// Blocks until the script resolves.
    ///
    /// A scheduler torn down with the script still queued resolves the
    /// handle as cancelled.
    pub fn wait(self) -> ExecutionResult {
        self.rx
            .recv()
            .unwrap_or_else(|_| ExecutionResult::failed(ScriptError::Cancelled, Duration::ZERO))
    }

    /// Returns the result if the script has already resolved.
    pub fn try_wait(&self) -> Option<ExecutionResult> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_resolves_once_completed() {
        let (sink, handle) = ExecutionHandle::pair();

        assert!(handle.try_wait().is_none());
        sink.complete(ExecutionResult::ok(Duration::from_millis(5)));

        let result = handle.wait();
        assert!(result.success);
        assert!(result.error_message().is_none());
    }

    #[test]
    fn dropped_sink_reads_as_cancellation() {
        let (sink, handle) = ExecutionHandle::pair();
        drop(sink);

        let result = handle.wait();
        assert!(!result.success);
        assert_eq!(result.error, Some(ScriptError::Cancelled));
    }
}
