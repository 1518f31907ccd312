use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Instant,
};

use rml_core::RmlError;

use crate::{
    Job, JobContext, JobKind, JobPriority, JobState, JobStateCell, JobStats, LambdaJob,
    PeriodicJob,
};

/// How many dispatches go by between sweeps of destroyed table entries.
const SWEEP_INTERVAL: u64 = 100;

/// Stable identity of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

struct JobEntry {
    id: JobId,
    job: Box<dyn Job>,
    state: JobStateCell,
    stats: JobStats,
}

#[derive(Default)]
struct JobTable {
    by_id: HashMap<u64, Arc<JobEntry>>,
    by_name: HashMap<String, u64>,
}

/// Registry and dispatcher of per-frame jobs.
///
/// Registration and unregistration may happen from any thread at any time;
/// dispatch takes a snapshot of the willing jobs under a shared lock and runs
/// them outside it, so a job's body may itself register or unregister jobs.
/// Unregistered entries linger invisibly until a periodic sweep compacts the
/// table.
pub struct TaskScheduler {
    table: RwLock<JobTable>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    dispatch_count: AtomicU64,
}

impl TaskScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self {
            table: RwLock::new(JobTable::default()),
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            dispatch_count: AtomicU64::new(0),
        }
    }

    /// Registers a job under its own name.
    ///
    /// Fails if a live job with the same name exists, or if the scheduler is
    /// shutting down.
    pub fn register_job(&self, job: Box<dyn Job>) -> Result<JobId, RmlError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(RmlError::ShuttingDown);
        }

        let name = job.name().to_owned();
        let mut table = self.table.write().unwrap();

        if table.by_name.contains_key(&name) {
            return Err(RmlError::JobAlreadyExists(name));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(name, id, priority = ?job.priority(), "job registered");

        table.by_name.insert(name, id);
        table.by_id.insert(
            id,
            Arc::new(JobEntry {
                id: JobId(id),
                job,
                state: JobStateCell::new(),
                stats: JobStats::default(),
            }),
        );

        Ok(JobId(id))
    }

    /// Unregisters a job by identity.
    ///
    /// The job is destroyed immediately and its name freed for reuse; the
    /// table entry itself is dropped by a later sweep.
    pub fn unregister_job(&self, id: JobId) -> Result<(), RmlError> {
        let mut table = self.table.write().unwrap();

        let entry = table.by_id.get(&id.0).ok_or(RmlError::JobNotFound)?;
        if entry.state.get() == JobState::Destroyed {
            return Err(RmlError::JobNotFound);
        }

        entry.state.destroy();
        let name = entry.job.name().to_owned();
        table.by_name.remove(&name);

        tracing::debug!(name, id = id.0, "job unregistered");
        Ok(())
    }

    /// Registers a closure as a job, with an optional dispatch gate.
    pub fn register_lambda_job<S, E>(
        &self,
        name: &str,
        priority: JobPriority,
        kinds: JobKind,
        should_execute: S,
        execute: E,
    ) -> Result<JobId, RmlError>
    where
        S: Fn(&JobContext) -> bool + Send + Sync + 'static,
        E: Fn(&JobContext) -> Result<(), RmlError> + Send + Sync + 'static,
    {
        self.register_job(Box::new(
            LambdaJob::new(name, priority, kinds, execute).with_gate(should_execute),
        ))
    }

    /// Registers a closure that runs at most once per `interval`.
    pub fn register_periodic_job<E>(
        &self,
        name: &str,
        interval: std::time::Duration,
        priority: JobPriority,
        kinds: JobKind,
        execute: E,
    ) -> Result<JobId, RmlError>
    where
        E: Fn(&JobContext) -> Result<(), RmlError> + Send + Sync + 'static,
    {
        self.register_job(Box::new(PeriodicJob::new(
            name, priority, kinds, interval, execute,
        )))
    }

    /// Unregisters a job by name.
    pub fn unregister_job_by_name(&self, name: &str) -> Result<(), RmlError> {
        let id = {
            let table = self.table.read().unwrap();
            JobId(*table.by_name.get(name).ok_or(RmlError::JobNotFound)?)
        };

        self.unregister_job(id)
    }

    /// Number of live (not destroyed) jobs.
    pub fn get_job_count(&self) -> usize {
        self.table.read().unwrap().by_name.len()
    }

    /// The name a job was registered under, if it is still live.
    pub fn job_name(&self, id: JobId) -> Option<String> {
        let table = self.table.read().unwrap();
        let entry = table.by_id.get(&id.0)?;

        (entry.state.get() != JobState::Destroyed).then(|| entry.job.name().to_owned())
    }

    /// The current state of a job.
    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        let table = self.table.read().unwrap();
        table.by_id.get(&id.0).map(|entry| entry.state.get())
    }

    /// Reads a job's execution statistics through `f`.
    pub fn with_job_stats<R>(&self, id: JobId, f: impl FnOnce(&JobStats) -> R) -> Option<R> {
        let entry = self.table.read().unwrap().by_id.get(&id.0).cloned()?;
        Some(f(&entry.stats))
    }

    /// Runs every willing job attached to the dispatched phase.
    ///
    /// Jobs run in ascending priority order. A job that returns an error or
    /// panics is recorded as a failure and dispatch continues with the next
    /// job. Returns the identities of the jobs that ran, in execution order.
    pub fn execute_jobs_for_kind(&self, ctx: &JobContext) -> Vec<JobId> {
        let mut snapshot: Vec<Arc<JobEntry>> = {
            let table = self.table.read().unwrap();
            table
                .by_id
                .values()
                .filter(|entry| entry.state.get() != JobState::Destroyed)
                .filter(|entry| entry.job.should_execute(ctx))
                .cloned()
                .collect()
        };

        snapshot.sort_by_key(|entry| (entry.job.priority(), entry.id.0));

        let mut executed = Vec::with_capacity(snapshot.len());

        for entry in snapshot {
            // A concurrent unregistration between snapshot and dispatch.
            if !entry.state.begin() {
                continue;
            }

            let started = Instant::now();
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| entry.job.execute(ctx)));
            let micros = started.elapsed().as_micros() as u64;

            let failed = match outcome {
                Ok(Ok(())) => false,
                Ok(Err(err)) => {
                    tracing::error!(name = entry.job.name(), %err, "job failed");
                    true
                }
                Err(_) => {
                    tracing::error!(name = entry.job.name(), "job panicked");
                    true
                }
            };

            entry.stats.record(micros, failed);
            entry.state.finish();
            executed.push(entry.id);
        }

        let dispatches = self.dispatch_count.fetch_add(1, Ordering::AcqRel) + 1;
        if dispatches % SWEEP_INTERVAL == 0 {
            self.sweep();
        }

        executed
    }

    /// Destroys every job and rejects further registration.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);

        let mut table = self.table.write().unwrap();
        for entry in table.by_id.values() {
            entry.state.destroy();
        }

        let dropped = table.by_id.len();
        table.by_id.clear();
        table.by_name.clear();

        tracing::info!(dropped, "scheduler shut down");
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn sweep(&self) {
        let mut table = self.table.write().unwrap();

        let before = table.by_id.len();
        table
            .by_id
            .retain(|_, entry| entry.state.get() != JobState::Destroyed);

        let swept = before - table.by_id.len();
        if swept > 0 {
            tracing::trace!(swept, "destroyed jobs swept");
        }
    }

    #[cfg(test)]
    pub(crate) fn raw_entry_count(&self) -> usize {
        self.table.read().unwrap().by_id.len()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}
