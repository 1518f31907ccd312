use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use rml_core::{RmlError, Va};

bitflags::bitflags! {
    /// The host frame phases a job can attach to.
    ///
    /// The scheduler dispatches once per phase per frame; a job declares the
    /// phases it wants through [`Job::target_kinds`] and is offered every
    /// dispatch whose kind intersects that set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct JobKind: u32 {
        /// The per-frame heartbeat step.
        const HEARTBEAT = 1 << 0;
        /// The physics simulation step.
        const PHYSICS = 1 << 1;
        /// The render preparation step.
        const RENDER = 1 << 2;
        /// The resumption pass for scripts waiting on yields.
        const WAITING_HYBRID_SCRIPTS = 1 << 3;
        /// A dispatch driven by the framework itself rather than a host phase.
        const CUSTOM = 1 << 4;
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Dispatch order within one phase. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum JobPriority {
    /// Must run before anything else in the phase.
    Critical = 0,
    /// Runs before the default bulk.
    High = 1,
    /// The default.
    Normal = 2,
    /// Runs after the default bulk.
    Low = 3,
    /// Runs last; work that tolerates starvation.
    Background = 4,
}

/// Lifecycle state of a registered job.
///
/// Transitions only move forward within a frame (`Idle` → `Running` →
/// `Finished`); the next dispatch re-enters `Running`. `Destroyed` is
/// terminal and makes the job invisible to dispatch until the sweep drops
/// its table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    /// Registered, never dispatched.
    Idle = 0,
    /// Currently inside [`Job::execute`].
    Running = 1,
    /// Finished at least one dispatch.
    Finished = 2,
    /// Unregistered; awaiting sweep.
    Destroyed = 3,
}

/// Atomic cell holding a [`JobState`].
#[derive(Debug)]
pub struct JobStateCell(AtomicU8);

impl JobStateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(JobState::Idle as u8))
    }

    /// The current state.
    pub fn get(&self) -> JobState {
        match self.0.load(Ordering::Acquire) {
            0 => JobState::Idle,
            1 => JobState::Running,
            2 => JobState::Finished,
            _ => JobState::Destroyed,
        }
    }

    /// Enters `Running`, unless the job has been destroyed.
    pub(crate) fn begin(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state != JobState::Destroyed as u8).then_some(JobState::Running as u8)
            })
            .is_ok()
    }

    /// Leaves `Running` for `Finished`. A concurrent destroy wins.
    pub(crate) fn finish(&self) {
        let _ = self.0.compare_exchange(
            JobState::Running as u8,
            JobState::Finished as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Enters the terminal `Destroyed` state.
    pub(crate) fn destroy(&self) {
        self.0.store(JobState::Destroyed as u8, Ordering::Release);
    }
}

/// Cumulative execution statistics for one job.
///
/// Updated by the dispatcher after every execution; readable at any time
/// without locking the job table.
#[derive(Debug, Default)]
pub struct JobStats {
    runs: AtomicU64,
    failures: AtomicU64,
    total_micros: AtomicU64,
    last_micros: AtomicU64,
}

impl JobStats {
    /// Number of completed executions, including failed ones.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Number of executions that returned an error or panicked.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Total time spent inside [`Job::execute`], in microseconds.
    pub fn total_micros(&self) -> u64 {
        self.total_micros.load(Ordering::Relaxed)
    }

    /// Duration of the most recent execution, in microseconds.
    pub fn last_micros(&self) -> u64 {
        self.last_micros.load(Ordering::Relaxed)
    }

    pub(crate) fn record(&self, micros: u64, failed: bool) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.last_micros.store(micros, Ordering::Relaxed);

        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Everything a job sees about the dispatch it is running in.
#[derive(Debug, Clone, Copy)]
pub struct JobContext {
    /// The phase being dispatched.
    pub kind: JobKind,
    /// Address of the host-side job object driving this phase, or null for
    /// [`JobKind::CUSTOM`] dispatches.
    pub host_job: Va,
    /// Address of the host's time-statistics block for this phase, or null.
    pub host_stats: Va,
    /// Seconds since this phase last ran.
    pub delta_time: f64,
}

impl JobContext {
    /// A context for a framework-driven dispatch with no host counterpart.
    pub fn custom(kind: JobKind, delta_time: f64) -> Self {
        Self {
            kind,
            host_job: Va(0),
            host_stats: Va(0),
            delta_time,
        }
    }
}

/// A unit of per-frame work.
///
/// Implementations must be `Send + Sync`: dispatch may happen from whichever
/// host thread drives the phase.
pub trait Job: Send + Sync {
    /// Unique name the job registers under.
    fn name(&self) -> &str;

    /// Order within the phase.
    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }

    /// Phases this job attaches to.
    fn target_kinds(&self) -> JobKind;

    /// Whether the job wants to run in this particular dispatch.
    ///
    /// The default accepts every dispatch whose kind the job targets;
    /// override for rate limiting or conditional work.
    fn should_execute(&self, ctx: &JobContext) -> bool {
        self.target_kinds().intersects(ctx.kind)
    }

    /// Performs the work. A returned error is recorded against the job's
    /// statistics and does not unregister it.
    fn execute(&self, ctx: &JobContext) -> Result<(), RmlError>;
}
