use mlua::{MultiValue, ThreadStatus};

use crate::{HostExecutor, ScriptJob, StepOutcome, YieldedScript};

/// Executor that resumes VM threads in-process.
///
/// Used when the framework drives script stepping itself rather than handing
/// threads to a host-side stepping entry point.
pub struct VmExecutor;

impl VmExecutor {
    fn classify(status: ThreadStatus) -> StepOutcome {
        match status {
            ThreadStatus::Resumable => StepOutcome::Yielded,
            _ => StepOutcome::Completed,
        }
    }
}

impl HostExecutor for VmExecutor {
    fn execute(&self, job: &ScriptJob) -> StepOutcome {
        match job.thread.resume::<MultiValue>(()) {
            Ok(_) => Self::classify(job.thread.status()),
            Err(err) => StepOutcome::Failed(err.to_string()),
        }
    }

    fn resume(&self, yielded: &YieldedScript) -> StepOutcome {
        match yielded.thread.resume::<MultiValue>(yielded.resume_args.clone()) {
            Ok(_) => Self::classify(yielded.thread.status()),
            Err(err) => StepOutcome::Failed(err.to_string()),
        }
    }
}
