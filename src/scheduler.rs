//! Executes build sequences.
//!
//! Steps run strictly one after another. The members of a parallel group are
//! handed to the `rayon` pool and the group completes once every member has
//! finished, successfully or not. The first failure in member order is then
//! reported and the remaining steps are skipped.
//!
//! Each task runs inside its own `tracing` span, which `tracing-indicatif`
//! renders as a spinner while the adapter is busy.

use std::sync::LazyLock;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use indicatif::ProgressStyle;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::clean::clean;
use crate::core::{Environment, as_overhead};
use crate::error::TaskError;
use crate::graph::Step;
use crate::server::ReloadEvent;
use crate::task::{Registry, Task, TaskId};

static STYLE_BUILD: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("#>-")
});

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .expect("Error setting progress bar template")
});

/// Timing and output of a single task run.
#[derive(Debug, Clone)]
pub struct Execution {
    pub task: String,
    pub start: Instant,
    pub duration: Duration,
    pub written: Vec<Utf8PathBuf>,
}

/// Everything that ran during one sequence, in step order.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub executions: Vec<Execution>,
}

impl Report {
    pub fn get(&self, task: &str) -> Option<&Execution> {
        self.executions.iter().find(|e| e.task == task)
    }

    /// Every file written by any task.
    pub fn written(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.executions.iter().flat_map(|e| &e.written)
    }
}

pub struct Scheduler<'a> {
    registry: &'a Registry,
    env: &'a Environment,
    reload: Option<Sender<ReloadEvent>>,
}

impl<'a> Scheduler<'a> {
    pub fn new(registry: &'a Registry, env: &'a Environment) -> Self {
        Self {
            registry,
            env,
            reload: None,
        }
    }

    /// Emits a [`ReloadEvent`] into `sink` after every completed task, but
    /// only in development mode.
    pub fn with_reload(mut self, sink: Sender<ReloadEvent>) -> Self {
        self.reload = Some(sink);
        self
    }

    /// Runs the steps in order, stopping at the first failing step.
    pub fn run_sequence(&self, steps: &[Step]) -> Result<Report, TaskError> {
        let s = Instant::now();

        let total: usize = steps
            .iter()
            .map(|step| match step {
                Step::Clean => 0,
                Step::Task(_) => 1,
                Step::Parallel(ids) => ids.len(),
            })
            .sum();

        let root = tracing::span!(Level::INFO, "build");
        root.pb_set_length(total as u64);
        root.pb_set_style(&STYLE_BUILD);
        root.pb_set_message("Building tasks...");
        let _enter = root.enter();

        let mut report = Report::default();

        for step in steps {
            match step {
                Step::Clean => {
                    let path = self.registry.output();
                    clean(path).map_err(|source| TaskError::Clean {
                        root: path.to_path_buf(),
                        source,
                    })?;
                }
                Step::Task(id) => {
                    let done = self.run_group(std::slice::from_ref(id), &root)?;
                    report.executions.extend(done);
                }
                Step::Parallel(ids) => {
                    let done = self.run_group(ids, &root)?;
                    report.executions.extend(done);
                }
            }
        }

        tracing::info!("build complete {}", as_overhead(s));
        Ok(report)
    }

    /// Runs a single parallel group outside of any sequence.
    pub fn run_parallel(&self, ids: &[TaskId]) -> Result<Report, TaskError> {
        let root = tracing::span!(Level::INFO, "rebuild");
        root.pb_set_length(ids.len() as u64);
        root.pb_set_style(&STYLE_BUILD);
        let _enter = root.enter();

        let executions = self.run_group(ids, &root)?;
        Ok(Report { executions })
    }

    fn run_group(&self, ids: &[TaskId], root: &Span) -> Result<Vec<Execution>, TaskError> {
        let tasks: Vec<&Task> = ids.iter().filter_map(|&id| self.registry.get(id)).collect();

        let results: Vec<_> = tasks
            .par_iter()
            .map(|task| {
                let result = self.run_task(task, root);
                root.pb_inc(1);
                result
            })
            .collect();

        results.into_iter().collect()
    }

    fn run_task(&self, task: &Task, root: &Span) -> Result<Execution, TaskError> {
        let span = tracing::span!(parent: root, Level::INFO, "task", name = task.name());
        span.pb_set_style(&STYLE_TASK);
        span.pb_set_message(&format!("Running {}", task.name()));
        let _enter = span.enter();

        let start = Instant::now();

        // Adapters only ever see shared, immutable data, a panic can't leave
        // anything half-updated behind.
        let completion = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            task.run(self.env)
        })) {
            Ok(result) => result?,
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    String::from("unknown payload")
                };

                return Err(TaskError::Panic {
                    task: task.name().to_string(),
                    message,
                });
            }
        };

        let duration = start.elapsed();

        tracing::info!(
            "{} finished with {} ({} files) {}",
            task.name(),
            task.adapter().name(),
            completion.written.len(),
            as_overhead(start),
        );

        if self.env.mode.is_development()
            && let Some(sink) = &self.reload
        {
            let event = ReloadEvent {
                task: task.name().to_string(),
            };

            if sink.send(event).is_err() {
                tracing::debug!("no reload listener for {}", task.name());
            }
        }

        Ok(Execution {
            task: task.name().to_string(),
            start,
            duration,
            written: completion.written,
        })
    }
}
