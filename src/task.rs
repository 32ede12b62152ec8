//! Named units of work and the registry that owns them.
//!
//! A [`Task`] binds one [`Adapter`] to its sources, its destination directory
//! and its [`Options`]. Tasks are registered once during setup and never
//! change afterwards. Registration is where the wiring is validated: names
//! are unique, patterns compile, destinations stay inside the output root and
//! no two tasks write the same kind of files into the same directory.

use std::fmt::Display;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::adapter::{Adapter, Completion, Extensions, Job};
use crate::core::{Environment, Mode};
use crate::error::{ConfigurationError, TaskError};
use crate::source::Sources;

/// Per-task knobs passed to the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Affects minification and source maps.
    pub mode: Mode,
    /// Keep indentation in generated markup.
    pub pretty: bool,
    /// Effort spent on compressing images, `0..=7`.
    pub compression_level: u8,
}

impl Options {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            pretty: mode.is_development(),
            compression_level: 7,
        }
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn compression_level(mut self, level: u8) -> Self {
        self.compression_level = level.min(7);
        self
    }

    /// Whether adapters should emit source maps.
    pub fn source_maps(&self) -> bool {
        self.mode.is_development()
    }
}

/// Opaque reference to a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) usize);

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct Task {
    name: String,
    adapter: Arc<dyn Adapter>,
    sources: Sources,
    dest: Utf8PathBuf,
    options: Options,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("adapter", &self.adapter.name())
            .field("sources", &self.sources)
            .field("dest", &self.dest)
            .field("options", &self.options)
            .finish()
    }
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn dest(&self) -> &Utf8Path {
        &self.dest
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Runs the adapter once, tagging any failure with this task's name.
    pub fn run(&self, env: &Environment) -> Result<Completion, TaskError> {
        let job = Job {
            task: &self.name,
            sources: &self.sources,
            dest: &self.dest,
            options: &self.options,
            env,
        };

        self.adapter
            .apply(&job)
            .map_err(|source| TaskError::Adapter {
                task: self.name.clone(),
                source,
            })
    }
}

/// The directory and the kinds of files a task writes. A nested claim also
/// covers every directory below `dest`.
#[derive(Debug, Clone)]
struct Claim {
    dest: Utf8PathBuf,
    extensions: Extensions,
    nested: bool,
}

impl Claim {
    fn covers(&self, dir: &Utf8Path) -> bool {
        match self.nested {
            true => dir.starts_with(&self.dest),
            false => dir == self.dest,
        }
    }

    fn conflicts(&self, other: &Claim) -> bool {
        (self.covers(&other.dest) || other.covers(&self.dest))
            && self.extensions.intersects(&other.extensions)
    }
}

/// Every task of the pipeline, indexed by [`TaskId`].
#[derive(Debug)]
pub struct Registry {
    output: Utf8PathBuf,
    tasks: Vec<Task>,
    claims: Vec<Claim>,
}

impl Registry {
    /// Creates an empty registry for tasks writing below `output`.
    pub fn new(output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            output: output.into(),
            tasks: Vec::new(),
            claims: Vec::new(),
        }
    }

    /// The output root every task writes into.
    pub fn output(&self) -> &Utf8Path {
        &self.output
    }

    pub fn register<I, S>(
        &mut self,
        name: impl Into<String>,
        adapter: Arc<dyn Adapter>,
        patterns: I,
        dest: impl Into<Utf8PathBuf>,
        options: Options,
    ) -> Result<TaskId, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        let dest = dest.into();

        if self.id(&name).is_some() {
            return Err(ConfigurationError::DuplicateTask(name));
        }

        let mut compiled = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let pattern = glob::Pattern::new(pattern).map_err(|source| {
                ConfigurationError::Pattern {
                    task: name.clone(),
                    pattern: pattern.to_string(),
                    source,
                }
            })?;
            compiled.push(pattern);
        }

        if compiled.is_empty() {
            return Err(ConfigurationError::NoSources(name));
        }

        let sources = Sources::from_compiled(compiled);

        if !is_within(&dest, &self.output) {
            return Err(ConfigurationError::OutsideOutput {
                task: name,
                dest,
                root: self.output.clone(),
            });
        }

        let claim = Claim {
            dest: dest.clone(),
            extensions: adapter.produces(&sources),
            nested: adapter.writes_nested(&sources),
        };

        if let Some(other) = self.claims.iter().position(|c| c.conflicts(&claim)) {
            return Err(ConfigurationError::OverlappingDestination(
                self.tasks[other].name.clone(),
                name,
                dest,
            ));
        }

        let id = TaskId(self.tasks.len());

        self.tasks.push(Task {
            name,
            adapter,
            sources,
            dest,
            options,
        });
        self.claims.push(claim);

        Ok(id)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0)
    }

    /// Looks a task up by name.
    pub fn id(&self, name: &str) -> Option<TaskId> {
        self.tasks.iter().position(|t| t.name == name).map(TaskId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &Task)> {
        self.tasks.iter().enumerate().map(|(i, t)| (TaskId(i), t))
    }

    /// Every id in registration order.
    pub fn ids(&self) -> Vec<TaskId> {
        (0..self.tasks.len()).map(TaskId).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Lexical containment, `..` components are never considered inside.
fn is_within(path: &Utf8Path, root: &Utf8Path) -> bool {
    path.starts_with(root)
        && !path
            .components()
            .any(|c| matches!(c, camino::Utf8Component::ParentDir))
}
