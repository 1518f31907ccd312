//! Per-frame job scheduling.
//!
//! The host steps each of its execution universes through a fixed set of
//! frame phases; this crate lets framework and mod code attach work to those
//! phases. A [`Job`] declares the phases it targets and a priority; the
//! [`TaskScheduler`] snapshots the willing jobs at each dispatch and runs
//! them in priority order, isolating panics and keeping per-job statistics.
//!
//! [`JobKindResolver`] classifies a live host job object by its vtable
//! address, so the hook observing the host's own scheduler can tell which
//! phase it is inside.

mod adapters;
mod job;
mod kinds;
mod scheduler;

pub use adapters::{LambdaJob, PeriodicJob};
pub use job::{Job, JobContext, JobKind, JobPriority, JobState, JobStateCell, JobStats};
pub use kinds::{JobKindResolver, HOST_JOB_CLASSES};
pub use scheduler::{JobId, TaskScheduler};

#[cfg(test)]
mod scheduler_tests;
