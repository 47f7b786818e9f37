//! Task registry and execution engine.
//!
//! A [`Registry`] holds named tasks and their declared dependencies. The
//! [`Engine`] turns a request into a run with two disciplines:
//!
//! * **sequence**: tasks run one at a time on the calling thread, in order,
//!   and the first failure stops the rest;
//! * **parallel group**: every task is started at once on its own scoped
//!   thread, the call returns once all of them have finished and reports
//!   every failure.
//!
//! A task's dependencies are resolved with the discipline they were declared
//! with, right before the task's own action runs. The engine keeps no state
//! between runs: each call records its own [`Diagnostics`].

mod diagnostics;
mod registry;
mod services;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Config;
use crate::error::{ConfigError, RunError, TaskFailure};
use crate::notice::{self, Notice};

pub use diagnostics::{Diagnostics, Outcome, TaskExecution};
pub use registry::{Dependencies, Registry, Task, TaskResult};
pub use services::Services;

/// Explicit completion signal of a task action.
#[derive(Debug)]
pub enum Completion {
    Done,
    /// The task declined to do any work because a required setting is
    /// missing. Reported at error level, does not fail the run.
    Refused(ConfigError),
}

/// Per-invocation flags.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Use the remote image optimizer instead of the local one.
    pub advanced: bool,
    /// Allow the upload stage to send files.
    pub upload: bool,
    /// Base name of the generated sprite sheet.
    pub sprite_name: Option<String>,
}

/// Everything a task action gets to see.
pub struct TaskContext<'a> {
    pub config: &'a Config,
    pub options: &'a Options,
    pub engine: &'a Engine,
    pub span: tracing::Span,
}

impl TaskContext<'_> {
    pub fn services(&self) -> &Services {
        self.engine.services()
    }
}

struct Inner {
    registry: Registry,
    config: Arc<Config>,
    options: Options,
    services: Services,
}

/// Runs tasks out of a frozen [`Registry`]. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

/// State of a single top-level run.
struct Run {
    span: tracing::Span,
    executions: Mutex<Vec<TaskExecution>>,
}

impl Run {
    fn new(span: tracing::Span) -> Self {
        Self {
            span,
            executions: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, execution: TaskExecution) {
        self.span.pb_inc(1);
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(execution);
    }

    fn finish(self) -> Diagnostics {
        Diagnostics {
            executions: self
                .executions
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl Engine {
    pub fn new(registry: Registry, config: Arc<Config>, options: Options) -> Self {
        for name in registry.unresolved() {
            tracing::warn!(task = name, "dependency is never registered");
        }

        Self {
            inner: Arc::new(Inner {
                registry,
                config,
                options,
                services: Services::default(),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Run a single task, dependencies first.
    pub fn run(&self, name: &str) -> Result<Diagnostics, RunError> {
        self.run_sequence(&[name])
    }

    /// Run the named tasks strictly in order. The first failure stops the
    /// sequence and is returned; later tasks are never invoked.
    pub fn run_sequence<S>(&self, names: &[S]) -> Result<Diagnostics, RunError>
    where
        S: AsRef<str> + Sync,
    {
        let run = self.begin(names)?;
        let result = run.span.in_scope(|| self.sequence(&run, names));
        result.map(|_| run.finish())
    }

    /// Start all named tasks together and wait for every one of them. All
    /// failures are returned; finished siblings are not rolled back.
    pub fn run_parallel<S>(&self, names: &[S]) -> Result<Diagnostics, RunError>
    where
        S: AsRef<str> + Sync,
    {
        let run = self.begin(names)?;
        let result = run.span.in_scope(|| self.parallel(&run, names));
        result.map(|_| run.finish())
    }

    fn begin<S: AsRef<str>>(&self, names: &[S]) -> Result<Run, RunError> {
        let plan = self.inner.registry.plan(names)?;

        let span = tracing::span!(Level::INFO, "run");
        span.pb_set_length(plan.len() as u64);
        if let Ok(style) = crate::utils::get_style_run() {
            span.pb_set_style(&style);
        }
        span.pb_set_message(&plan.join(" → "));

        Ok(Run::new(span))
    }

    fn sequence<S: AsRef<str>>(&self, run: &Run, names: &[S]) -> Result<(), RunError> {
        for name in names {
            self.task(run, name.as_ref())?;
        }
        Ok(())
    }

    fn parallel<S>(&self, run: &Run, names: &[S]) -> Result<(), RunError>
    where
        S: AsRef<str> + Sync,
    {
        // One thread per sibling, all started at once whatever the CPU count.
        let failures: Vec<RunError> = thread::scope(|scope| {
            let handles: Vec<_> = names
                .iter()
                .map(|name| {
                    let name = name.as_ref();
                    (name, scope.spawn(move || self.task(run, name)))
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|(name, handle)| match handle.join() {
                    Ok(result) => result.err(),
                    Err(_) => Some(RunError::Task(TaskFailure {
                        task: name.to_string(),
                        reason: anyhow::anyhow!("task thread panicked"),
                    })),
                })
                .collect()
        });

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RunError::Parallel(failures))
        }
    }

    fn task(&self, run: &Run, name: &str) -> Result<(), RunError> {
        let task = self
            .inner
            .registry
            .get(name)
            .ok_or_else(|| RunError::UnknownTask(name.to_string()))?;

        match task.dependencies() {
            Dependencies::None => {}
            Dependencies::Sequence(deps) => self.sequence(run, deps)?,
            Dependencies::Parallel(deps) => self.parallel(run, deps)?,
        }

        let span = tracing::span!(parent: &run.span, Level::INFO, "task", name = name);
        if let Ok(style) = crate::utils::get_style_task() {
            span.pb_set_style(&style);
        }
        span.pb_set_message(&notice::banner(name));
        let _enter = span.enter();

        tracing::info!("{}", notice::banner(name));

        let context = TaskContext {
            config: &self.inner.config,
            options: &self.inner.options,
            engine: self,
            span: span.clone(),
        };

        let start = Instant::now();

        // A panic inside a stage is a failure of that task only.
        let result = match catch_unwind(AssertUnwindSafe(|| (task.action)(&context))) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("Task panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("Task panicked: {s}")
                } else {
                    String::from("Task panicked with unknown payload")
                };

                Err(anyhow::anyhow!(msg))
            }
        };

        let (outcome, result) = match result {
            Ok(Completion::Done) => (Outcome::Done, Ok(())),
            Ok(Completion::Refused(reason)) => {
                Notice::error(format!("Task can not be completed.\n{reason}"))
                    .title(name)
                    .emit();
                (Outcome::Refused, Ok(()))
            }
            Err(reason) => {
                tracing::error!("{reason:#}");
                let failure = TaskFailure {
                    task: name.to_string(),
                    reason,
                };
                (Outcome::Failed, Err(RunError::Task(failure)))
            }
        };

        run.record(TaskExecution {
            task: name.to_string(),
            start,
            duration: start.elapsed(),
            outcome,
        });

        tracing::debug!(elapsed = ?start.elapsed(), ?outcome, "task finished");

        result
    }
}
