use std::{
    collections::{HashMap, VecDeque},
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use mlua::{MultiValue, Thread};
use rml_core::PermissionLevel;

use crate::{ExecutionHandle, ExecutionResult, ExecutionSink, ScriptError};

/// Dispatch order of queued scripts. Lower runs first; FIFO within a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum ScriptPriority {
    /// Must run before anything else.
    Critical = 0,
    /// Runs before the default bulk.
    High = 1,
    /// The default.
    Normal = 2,
    /// Runs after the default bulk.
    Low = 3,
    /// Runs last; tolerates starvation.
    Background = 4,
}

const PRIORITY_LEVELS: usize = 5;

/// A queued script-execution request.
///
/// The underlying VM thread belongs to the VM; the scheduler only holds a
/// handle to it while the request is queued or yielded.
pub struct ScriptJob {
    /// The VM thread to run.
    pub thread: Thread,
    /// Chunk name, for diagnostics.
    pub chunk_name: String,
    /// Permission level the thread was stamped with.
    pub permission: PermissionLevel,
    /// Queue this job waits in.
    pub priority: ScriptPriority,
    /// Earliest time the job may run. `None` runs as soon as dequeued.
    pub not_before: Option<Instant>,
    /// Advisory timeout. Recorded for diagnostics; the scheduler does not
    /// interrupt a thread that overruns it.
    pub timeout: Option<Duration>,

    pub(crate) sink: ExecutionSink,
    pub(crate) enqueued_at: Instant,
}

/// Predicate consulted before resuming a yielded script.
pub type YieldCondition = Box<dyn Fn() -> bool + Send + Sync>;

/// A script suspended mid-execution, waiting to be resumed.
pub struct YieldedScript {
    /// The suspended VM thread.
    pub thread: Thread,
    /// Arguments to resume the thread with.
    pub resume_args: MultiValue,

    yielded_at: Instant,
    duration: Duration,
    condition: Option<YieldCondition>,
    sink: Option<ExecutionSink>,
    enqueued_at: Instant,
}

impl YieldedScript {
    fn due(&self) -> bool {
        if self.duration > Duration::ZERO {
            return self.yielded_at.elapsed() >= self.duration;
        }

        match &self.condition {
            // A predicate that panics is treated as satisfied, so a broken
            // condition cannot strand its script forever.
            Some(condition) => {
                std::panic::catch_unwind(AssertUnwindSafe(condition)).unwrap_or(true)
            }
            // No wait at all: due on the next step.
            None => true,
        }
    }
}

/// What the host-side stepper reports back for one dispatch.
pub enum StepOutcome {
    /// The thread ran to completion.
    Completed,
    /// The thread yielded and expects to be resumed later.
    Yielded,
    /// The thread raised an error.
    Failed(String),
}

/// The entry point that actually runs a VM thread.
///
/// The scheduler owns queueing, prioritization, and bookkeeping; stepping
/// the thread is the host's business, reached through this seam. The
/// in-process [`VmExecutor`](crate::VmExecutor) resumes threads directly.
pub trait HostExecutor: Send + Sync {
    /// Runs a freshly dequeued script to completion or its first yield.
    fn execute(&self, job: &ScriptJob) -> StepOutcome;

    /// Resumes a yielded script with its recorded resume arguments.
    fn resume(&self, yielded: &YieldedScript) -> StepOutcome;
}

#[derive(Default)]
struct QueueSet {
    queues: [VecDeque<ScriptJob>; PRIORITY_LEVELS],
    total: usize,
}

/// Cooperative multi-priority script dispatcher.
///
/// Stepped once per host frame: [`step`](Self::step) never blocks, resumes
/// due yielded scripts first, then executes exactly one ready script. The
/// queue total is capped; scheduling past the cap fails the returned handle
/// instead of growing the queue.
pub struct ScriptScheduler {
    executor: Arc<dyn HostExecutor>,
    queues: Mutex<QueueSet>,
    // Separate from the queue mutex so yield bookkeeping from inside a
    // running script never contends with new scheduling.
    yielded: Mutex<HashMap<usize, YieldedScript>>,
    max_queue_size: usize,
    running: AtomicBool,
    executed: AtomicU64,
}

fn thread_key(thread: &Thread) -> usize {
    thread.to_pointer() as usize
}

impl ScriptScheduler {
    /// Creates a running scheduler with the given queue cap.
    pub fn new(max_queue_size: usize, executor: Arc<dyn HostExecutor>) -> Self {
        Self {
            executor,
            queues: Mutex::new(QueueSet::default()),
            yielded: Mutex::new(HashMap::new()),
            max_queue_size,
            running: AtomicBool::new(true),
            executed: AtomicU64::new(0),
        }
    }

    /// Queues a script for execution.
    pub fn schedule_script(
        &self,
        thread: Thread,
        chunk_name: impl Into<String>,
        permission: PermissionLevel,
        priority: ScriptPriority,
    ) -> ExecutionHandle {
        self.schedule_inner(thread, chunk_name.into(), permission, priority, None, None)
    }

    /// Queues a script that must not run before `delay` has passed.
    ///
    /// A not-yet-due job is re-queued at the tail of its queue when
    /// dequeued, so it cannot block later arrivals at the same priority.
    pub fn schedule_script_delayed(
        &self,
        thread: Thread,
        chunk_name: impl Into<String>,
        permission: PermissionLevel,
        priority: ScriptPriority,
        delay: Duration,
    ) -> ExecutionHandle {
        self.schedule_inner(
            thread,
            chunk_name.into(),
            permission,
            priority,
            Some(Instant::now() + delay),
            None,
        )
    }

    fn schedule_inner(
        &self,
        thread: Thread,
        chunk_name: String,
        permission: PermissionLevel,
        priority: ScriptPriority,
        not_before: Option<Instant>,
        timeout: Option<Duration>,
    ) -> ExecutionHandle {
        if !self.running.load(Ordering::Acquire) {
            return ExecutionHandle::ready(ExecutionResult::failed(
                ScriptError::NotRunning,
                Duration::ZERO,
            ));
        }

        let (sink, handle) = ExecutionHandle::pair();
        let mut queues = self.queues.lock().unwrap();

        if queues.total >= self.max_queue_size {
            tracing::warn!(chunk_name, cap = self.max_queue_size, "script queue full");
            drop(queues);

            sink.complete(ExecutionResult::failed(
                ScriptError::QueueFull,
                Duration::ZERO,
            ));
            return handle;
        }

        queues.queues[priority as usize].push_back(ScriptJob {
            thread,
            chunk_name,
            permission,
            priority,
            not_before,
            timeout,
            sink,
            enqueued_at: Instant::now(),
        });
        queues.total += 1;

        handle
    }

    /// Records a yield for `thread`.
    ///
    /// A zero `duration` means "wait for the condition"; zero with no
    /// condition resumes on the next step. A thread appears in the yield set
    /// at most once: repeated yields update the wait parameters in place.
    pub fn yield_script(
        &self,
        thread: &Thread,
        duration: Duration,
        condition: Option<YieldCondition>,
        resume_args: MultiValue,
    ) {
        let mut yielded = self.yielded.lock().unwrap();

        match yielded.entry(thread_key(thread)) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.yielded_at = Instant::now();
                entry.duration = duration;
                entry.condition = condition;
                entry.resume_args = resume_args;
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(YieldedScript {
                    thread: thread.clone(),
                    resume_args,
                    yielded_at: Instant::now(),
                    duration,
                    condition,
                    sink: None,
                    enqueued_at: Instant::now(),
                });
            }
        }
    }

    /// Performs one bounded unit of work: resume due yields, then run one
    /// ready script. Never blocks; call once per host frame.
    pub fn step(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        self.process_yielded();
        self.execute_one_ready();
    }

    fn process_yielded(&self) {
        let due: Vec<usize> = {
            let yielded = self.yielded.lock().unwrap();
            yielded
                .iter()
                .filter(|(_, entry)| entry.due())
                .map(|(&key, _)| key)
                .collect()
        };

        for key in due {
            let Some(entry) = self.yielded.lock().unwrap().remove(&key) else {
                continue;
            };

            match self.executor.resume(&entry) {
                StepOutcome::Completed => {
                    if let Some(sink) = entry.sink {
                        sink.complete(ExecutionResult::ok(entry.enqueued_at.elapsed()));
                    }
                }
                StepOutcome::Yielded => {
                    // Yielded again: put it back unless the script re-entered
                    // the set itself during the resume.
                    let mut yielded = self.yielded.lock().unwrap();
                    match yielded.entry(key) {
                        std::collections::hash_map::Entry::Occupied(mut slot) => {
                            slot.get_mut().sink = entry.sink;
                        }
                        std::collections::hash_map::Entry::Vacant(slot) => {
                            slot.insert(YieldedScript {
                                yielded_at: Instant::now(),
                                ..entry
                            });
                        }
                    }
                }
                StepOutcome::Failed(message) => {
                    tracing::error!(message, "yielded script failed on resume");
                    if let Some(sink) = entry.sink {
                        sink.complete(ExecutionResult::failed(
                            ScriptError::Runtime(message),
                            entry.enqueued_at.elapsed(),
                        ));
                    }
                }
            }
        }
    }

    fn execute_one_ready(&self) {
        let job = {
            let mut queues = self.queues.lock().unwrap();
            let mut found = None;

            'levels: for level in 0..PRIORITY_LEVELS {
                // Not-yet-due jobs cycle to the tail; bounded by the queue
                // length at entry so a queue of sleepers cannot spin us.
                for _ in 0..queues.queues[level].len() {
                    let Some(job) = queues.queues[level].pop_front() else {
                        break;
                    };

                    let due = job.not_before.map_or(true, |at| Instant::now() >= at);
                    if due {
                        queues.total -= 1;
                        found = Some(job);
                        break 'levels;
                    }

                    queues.queues[level].push_back(job);
                }
            }

            found
        };

        let Some(job) = job else {
            return;
        };

        self.executed.fetch_add(1, Ordering::Relaxed);
        let started = job.enqueued_at;

        match self.executor.execute(&job) {
            StepOutcome::Completed => {
                job.sink.complete(ExecutionResult::ok(started.elapsed()));
            }
            StepOutcome::Yielded => {
                // Attach the completion sink to the thread's yield entry so
                // the handle resolves when the resume chain finishes. A
                // script that yielded without registering wait parameters
                // gets a resume-next-step entry.
                let key = thread_key(&job.thread);
                let mut yielded = self.yielded.lock().unwrap();

                match yielded.entry(key) {
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        entry.get_mut().sink = Some(job.sink);
                        entry.get_mut().enqueued_at = started;
                    }
                    std::collections::hash_map::Entry::Vacant(slot) => {
                        slot.insert(YieldedScript {
                            thread: job.thread,
                            resume_args: MultiValue::new(),
                            yielded_at: Instant::now(),
                            duration: Duration::ZERO,
                            condition: None,
                            sink: Some(job.sink),
                            enqueued_at: started,
                        });
                    }
                }
            }
            StepOutcome::Failed(message) => {
                tracing::error!(chunk_name = job.chunk_name, message, "script failed");
                job.sink.complete(ExecutionResult::failed(
                    ScriptError::Runtime(message),
                    started.elapsed(),
                ));
            }
        }
    }

    /// Cancels a specific script, wherever it currently sits.
    ///
    /// Removed synchronously from the queues and the yield set; its handle
    /// resolves with a cancellation error. Cannot interrupt the thread if it
    /// is executing at this very moment.
    pub fn cancel_script(&self, thread: &Thread) -> bool {
        let key = thread_key(thread);
        let mut cancelled = false;

        {
            let mut queues = self.queues.lock().unwrap();
            for level in 0..PRIORITY_LEVELS {
                let before = queues.queues[level].len();

                let (keep, drop): (VecDeque<_>, VecDeque<_>) = queues.queues[level]
                    .drain(..)
                    .partition(|job| thread_key(&job.thread) != key);

                queues.queues[level] = keep;
                queues.total -= before - queues.queues[level].len();

                for job in drop {
                    job.sink.complete(ExecutionResult::failed(
                        ScriptError::Cancelled,
                        job.enqueued_at.elapsed(),
                    ));
                    cancelled = true;
                }
            }
        }

        if let Some(entry) = self.yielded.lock().unwrap().remove(&key) {
            if let Some(sink) = entry.sink {
                sink.complete(ExecutionResult::failed(
                    ScriptError::Cancelled,
                    entry.enqueued_at.elapsed(),
                ));
            }
            cancelled = true;
        }

        cancelled
    }

    /// Cancels everything queued or yielded.
    pub fn cancel_all_scripts(&self) {
        let jobs: Vec<ScriptJob> = {
            let mut queues = self.queues.lock().unwrap();
            queues.total = 0;
            queues
                .queues
                .iter_mut()
                .flat_map(|queue| queue.drain(..))
                .collect()
        };

        for job in jobs {
            job.sink.complete(ExecutionResult::failed(
                ScriptError::Cancelled,
                job.enqueued_at.elapsed(),
            ));
        }

        let yielded: Vec<YieldedScript> =
            self.yielded.lock().unwrap().drain().map(|(_, e)| e).collect();

        for entry in yielded {
            if let Some(sink) = entry.sink {
                sink.complete(ExecutionResult::failed(
                    ScriptError::Cancelled,
                    entry.enqueued_at.elapsed(),
                ));
            }
        }
    }

    /// Stops accepting work and cancels everything pending.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.cancel_all_scripts();
        tracing::debug!("script scheduler shut down");
    }

    /// Scripts currently queued across all priorities.
    pub fn queued_count(&self) -> usize {
        self.queues.lock().unwrap().total
    }

    /// Scripts currently suspended in the yield set.
    pub fn yielded_count(&self) -> usize {
        self.yielded.lock().unwrap().len()
    }

    /// Total scripts dispatched since construction.
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Returns `true` until [`shutdown`](Self::shutdown).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
