use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use rml_core::RmlError;

use crate::{Job, JobContext, JobKind, JobPriority};

/// A job built from closures, for callers that do not want a named type.
pub struct LambdaJob<E> {
    name: String,
    priority: JobPriority,
    kinds: JobKind,
    gate: Option<Box<dyn Fn(&JobContext) -> bool + Send + Sync>>,
    body: E,
}

impl<E> LambdaJob<E>
where
    E: Fn(&JobContext) -> Result<(), RmlError> + Send + Sync,
{
    /// Creates a job that runs `body` on every dispatch of `kinds`.
    pub fn new(name: impl Into<String>, priority: JobPriority, kinds: JobKind, body: E) -> Self {
        Self {
            name: name.into(),
            priority,
            kinds,
            gate: None,
            body,
        }
    }

    /// Adds a gate consulted before each dispatch.
    pub fn with_gate(
        mut self,
        gate: impl Fn(&JobContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.gate = Some(Box::new(gate));
        self
    }
}

impl<E> Job for LambdaJob<E>
where
    E: Fn(&JobContext) -> Result<(), RmlError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> JobPriority {
        self.priority
    }

    fn target_kinds(&self) -> JobKind {
        self.kinds
    }

    fn should_execute(&self, ctx: &JobContext) -> bool {
        if !self.kinds.intersects(ctx.kind) {
            return false;
        }

        match &self.gate {
            Some(gate) => gate(ctx),
            None => true,
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), RmlError> {
        (self.body)(ctx)
    }
}

/// A job that runs at most once per interval.
///
/// The interval gates [`should_execute`](Job::should_execute); the clock
/// restarts when the body actually runs, so a starved job does not burst to
/// catch up.
pub struct PeriodicJob<E> {
    name: String,
    priority: JobPriority,
    kinds: JobKind,
    interval: Duration,
    last_run: Mutex<Option<Instant>>,
    body: E,
}

impl<E> PeriodicJob<E>
where
    E: Fn(&JobContext) -> Result<(), RmlError> + Send + Sync,
{
    /// Creates a job that runs `body` at most once per `interval`.
    pub fn new(
        name: impl Into<String>,
        priority: JobPriority,
        kinds: JobKind,
        interval: Duration,
        body: E,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            kinds,
            interval,
            last_run: Mutex::new(None),
            body,
        }
    }
}

impl<E> Job for PeriodicJob<E>
where
    E: Fn(&JobContext) -> Result<(), RmlError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> JobPriority {
        self.priority
    }

    fn target_kinds(&self) -> JobKind {
        self.kinds
    }

    fn should_execute(&self, ctx: &JobContext) -> bool {
        if !self.kinds.intersects(ctx.kind) {
            return false;
        }

        match *self.last_run.lock().unwrap() {
            Some(last) => last.elapsed() >= self.interval,
            None => true,
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), RmlError> {
        *self.last_run.lock().unwrap() = Some(Instant::now());
        (self.body)(ctx)
    }
}
