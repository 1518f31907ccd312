use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use rml_core::RmlError;

use super::*;

///////////////////////////////////////////////////////////////////////////////
// Helpers
///////////////////////////////////////////////////////////////////////////////

/// Records the order jobs ran in.
#[derive(Default)]
struct RunLog(Mutex<Vec<String>>);

impl RunLog {
    fn push(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_owned());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.0.lock().unwrap())
    }
}

fn logging_job(
    name: &str,
    priority: JobPriority,
    kinds: JobKind,
    log: Arc<RunLog>,
) -> Box<dyn Job> {
    let owned = name.to_owned();
    Box::new(LambdaJob::new(name, priority, kinds, move |_| {
        log.push(&owned);
        Ok(())
    }))
}

fn heartbeat() -> JobContext {
    JobContext::custom(JobKind::HEARTBEAT, 1.0 / 60.0)
}

///////////////////////////////////////////////////////////////////////////////
// Registration
///////////////////////////////////////////////////////////////////////////////

#[test]
fn duplicate_name_is_rejected() {
    let sched = TaskScheduler::new();
    let log = Arc::new(RunLog::default());

    sched
        .register_job(logging_job(
            "Watcher",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            log.clone(),
        ))
        .unwrap();

    let err = sched
        .register_job(logging_job(
            "Watcher",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            log,
        ))
        .unwrap_err();

    assert!(err.to_string().contains("already exists"));
    assert_eq!(sched.get_job_count(), 1);
}

#[test]
fn unregister_frees_the_name() {
    let sched = TaskScheduler::new();
    let log = Arc::new(RunLog::default());

    let id = sched
        .register_job(logging_job(
            "transient",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            log.clone(),
        ))
        .unwrap();

    sched.unregister_job(id).unwrap();
    assert_eq!(sched.get_job_count(), 0);
    assert!(sched.job_name(id).is_none());

    // The name is reusable immediately, before any sweep.
    sched
        .register_job(logging_job(
            "transient",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            log,
        ))
        .unwrap();
}

#[test]
fn unregister_twice_is_an_error() {
    let sched = TaskScheduler::new();
    let log = Arc::new(RunLog::default());

    let id = sched
        .register_job(logging_job(
            "once",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            log,
        ))
        .unwrap();

    sched.unregister_job(id).unwrap();
    assert!(matches!(
        sched.unregister_job(id),
        Err(RmlError::JobNotFound)
    ));
    assert!(matches!(
        sched.unregister_job_by_name("once"),
        Err(RmlError::JobNotFound)
    ));
}

#[test]
fn shutdown_rejects_registration() {
    let sched = TaskScheduler::new();
    let log = Arc::new(RunLog::default());

    sched
        .register_job(logging_job(
            "doomed",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            log.clone(),
        ))
        .unwrap();

    sched.shutdown();

    assert!(sched.is_shutting_down());
    assert_eq!(sched.get_job_count(), 0);
    assert!(matches!(
        sched.register_job(logging_job(
            "late",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            log,
        )),
        Err(RmlError::ShuttingDown)
    ));
}

///////////////////////////////////////////////////////////////////////////////
// Dispatch
///////////////////////////////////////////////////////////////////////////////

#[test]
fn dispatch_runs_in_priority_order() {
    let sched = TaskScheduler::new();
    let log = Arc::new(RunLog::default());

    // Registered backwards on purpose.
    sched
        .register_job(logging_job(
            "B",
            JobPriority::Background,
            JobKind::HEARTBEAT,
            log.clone(),
        ))
        .unwrap();
    sched
        .register_job(logging_job(
            "A",
            JobPriority::Critical,
            JobKind::HEARTBEAT,
            log.clone(),
        ))
        .unwrap();

    let executed = sched.execute_jobs_for_kind(&heartbeat());

    assert_eq!(executed.len(), 2);
    assert_eq!(log.take(), ["A", "B"]);
}

#[test]
fn dispatch_skips_other_kinds() {
    let sched = TaskScheduler::new();
    let log = Arc::new(RunLog::default());

    sched
        .register_job(logging_job(
            "render-only",
            JobPriority::Normal,
            JobKind::RENDER,
            log.clone(),
        ))
        .unwrap();

    assert!(sched.execute_jobs_for_kind(&heartbeat()).is_empty());
    assert!(log.take().is_empty());

    let render = JobContext::custom(JobKind::RENDER, 0.016);
    assert_eq!(sched.execute_jobs_for_kind(&render).len(), 1);
    assert_eq!(log.take(), ["render-only"]);
}

#[test]
fn declined_jobs_are_not_invoked() {
    let sched = TaskScheduler::new();
    let runs = Arc::new(AtomicU64::new(0));

    let counted = runs.clone();
    let job = LambdaJob::new(
        "reluctant",
        JobPriority::Normal,
        JobKind::HEARTBEAT,
        move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    )
    .with_gate(|_| false);

    sched.register_job(Box::new(job)).unwrap();
    sched.execute_jobs_for_kind(&heartbeat());

    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn failures_are_recorded_and_do_not_stop_the_frame() {
    let sched = TaskScheduler::new();
    let log = Arc::new(RunLog::default());

    let failing = sched
        .register_job(Box::new(LambdaJob::new(
            "faulty",
            JobPriority::Critical,
            JobKind::HEARTBEAT,
            |_| Err(RmlError::Other("boom")),
        )))
        .unwrap();

    sched
        .register_job(logging_job(
            "survivor",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            log.clone(),
        ))
        .unwrap();

    let executed = sched.execute_jobs_for_kind(&heartbeat());

    assert_eq!(executed.len(), 2);
    assert_eq!(log.take(), ["survivor"]);

    let (runs, failures) = sched
        .with_job_stats(failing, |stats| (stats.runs(), stats.failures()))
        .unwrap();
    assert_eq!(runs, 1);
    assert_eq!(failures, 1);
}

#[test]
fn panics_are_contained() {
    let sched = TaskScheduler::new();
    let log = Arc::new(RunLog::default());

    let panicking = sched
        .register_job(Box::new(LambdaJob::new(
            "panicky",
            JobPriority::Critical,
            JobKind::HEARTBEAT,
            |_| panic!("job blew up"),
        )))
        .unwrap();

    sched
        .register_job(logging_job(
            "survivor",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            log.clone(),
        ))
        .unwrap();

    sched.execute_jobs_for_kind(&heartbeat());

    assert_eq!(log.take(), ["survivor"]);
    assert_eq!(
        sched.with_job_stats(panicking, |stats| stats.failures()),
        Some(1)
    );
    assert_eq!(sched.job_state(panicking), Some(JobState::Finished));
}

#[test]
fn stats_track_every_run() {
    let sched = TaskScheduler::new();

    let id = sched
        .register_job(Box::new(LambdaJob::new(
            "steady",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            |_| Ok(()),
        )))
        .unwrap();

    for _ in 0..3 {
        sched.execute_jobs_for_kind(&heartbeat());
    }

    let runs = sched.with_job_stats(id, |stats| stats.runs()).unwrap();
    assert_eq!(runs, 3);
}

#[test]
fn closure_registration_round_trips() {
    let sched = TaskScheduler::new();
    let runs = Arc::new(AtomicU64::new(0));

    let counted = runs.clone();
    sched
        .register_lambda_job(
            "lambda",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            |ctx| ctx.delta_time > 0.0,
            move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

    sched
        .register_periodic_job(
            "slow",
            std::time::Duration::from_secs(3600),
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            |_| Ok(()),
        )
        .unwrap();

    assert_eq!(sched.get_job_count(), 2);

    // The periodic job runs its first dispatch, then waits out the hour.
    assert_eq!(sched.execute_jobs_for_kind(&heartbeat()).len(), 2);
    assert_eq!(sched.execute_jobs_for_kind(&heartbeat()).len(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

///////////////////////////////////////////////////////////////////////////////
// Sweeping
///////////////////////////////////////////////////////////////////////////////

#[test]
fn destroyed_entries_are_swept_after_enough_dispatches() {
    let sched = TaskScheduler::new();
    let log = Arc::new(RunLog::default());

    let id = sched
        .register_job(logging_job(
            "short-lived",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            log,
        ))
        .unwrap();

    sched.unregister_job(id).unwrap();

    // Destroyed but not yet compacted.
    assert_eq!(sched.get_job_count(), 0);
    assert_eq!(sched.raw_entry_count(), 1);

    for _ in 0..100 {
        sched.execute_jobs_for_kind(&heartbeat());
    }

    assert_eq!(sched.raw_entry_count(), 0);
}

///////////////////////////////////////////////////////////////////////////////
// Re-entrancy
///////////////////////////////////////////////////////////////////////////////

#[test]
fn a_job_may_register_another_job() {
    let sched = Arc::new(TaskScheduler::new());
    let log = Arc::new(RunLog::default());

    let inner_sched = sched.clone();
    let inner_log = log.clone();
    sched
        .register_job(Box::new(LambdaJob::new(
            "spawner",
            JobPriority::Normal,
            JobKind::HEARTBEAT,
            move |_| {
                // Ignore the duplicate error on later frames.
                let _ = inner_sched.register_job(logging_job(
                    "spawned",
                    JobPriority::Normal,
                    JobKind::HEARTBEAT,
                    inner_log.clone(),
                ));
                Ok(())
            },
        )))
        .unwrap();

    sched.execute_jobs_for_kind(&heartbeat());
    assert_eq!(sched.get_job_count(), 2);

    sched.execute_jobs_for_kind(&heartbeat());
    assert_eq!(log.take(), ["spawned"]);
}
