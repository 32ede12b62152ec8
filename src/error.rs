use std::fmt::Display;
use std::sync::mpsc::RecvError;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Bad task wiring, detected while the pipeline is being set up.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task '{0}' has no source patterns")]
    NoSources(String),

    #[error("Task '{task}': couldn't compile pattern '{pattern}'.\n{source}")]
    Pattern {
        task: String,
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Task '{task}' writes to '{dest}', outside of the output root '{root}'")]
    OutsideOutput {
        task: String,
        dest: Utf8PathBuf,
        root: Utf8PathBuf,
    },

    #[error("Tasks '{0}' and '{1}' both write the same kind of files into '{2}'")]
    OverlappingDestination(String, String, Utf8PathBuf),

    #[error("The {key} directory '{dir}' overlaps '{conflict}'")]
    UnsafeDirectory {
        key: &'static str,
        dir: Utf8PathBuf,
        conflict: Utf8PathBuf,
    },

    #[error("Task '{0}' is listed more than once in a parallel group")]
    DuplicateMember(String),

    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Watch rule '{0}' doesn't trigger any task")]
    EmptyRule(String),

    #[error("Task graph contains a cycle through '{0}'")]
    Cycle(String),

    #[error("Task '{0}' isn't preceded by the clean step")]
    CleanOrder(String),

    #[error("Build task '{1}' depends on build task '{0}'")]
    DependentTasks(String, String),

    #[error("Couldn't read config file '{0}'.\n{1}")]
    ReadConfig(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    ParseConfig(Utf8PathBuf, toml::de::Error),
}

/// A single transform rejected its input or couldn't write its output.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// A source file is malformed.
    #[error("{file}: {message}")]
    Input { file: Utf8PathBuf, message: String },

    /// An external tool exited with an error.
    #[error("{tool} failed: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't serialize source map.\n{0}")]
    Json(#[from] serde_json::Error),
}

impl AdapterError {
    pub fn input(file: impl AsRef<Utf8Path>, message: impl Display) -> Self {
        Self::Input {
            file: file.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// The offending source file, when known.
    pub fn file(&self) -> Option<&Utf8Path> {
        match self {
            Self::Input { file, .. } => Some(file),
            _ => None,
        }
    }
}

/// A task failed. Always carries the task name.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task '{task}':\n{source}")]
    Adapter { task: String, source: AdapterError },

    #[error("Task '{task}' panicked: {message}")]
    Panic { task: String, message: String },

    #[error("Error while cleaning the output directory '{root}':\n{source}")]
    Clean {
        root: Utf8PathBuf,
        source: std::io::Error,
    },
}

impl TaskError {
    /// Name of the failing task, `None` for the clean step.
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::Adapter { task, .. } | Self::Panic { task, .. } => Some(task),
            Self::Clean { .. } => None,
        }
    }

    /// The offending source file, when known.
    pub fn file(&self) -> Option<&Utf8Path> {
        match self {
            Self::Adapter { source, .. } => source.file(),
            _ => None,
        }
    }
}

/// The dev server couldn't start.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Couldn't bind port {port}.\n{source}")]
    Bind { port: u16, source: std::io::Error },

    #[error("Couldn't set up the server socket.\n{0}")]
    Socket(std::io::Error),

    #[error("Failed to build runtime.\n{0}")]
    Runtime(std::io::Error),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Watcher stopped unexpectedly.\n{0}")]
    Recv(#[from] RecvError),
}

#[derive(Debug, Error)]
pub enum TsumikiError {
    #[error("Invalid pipeline configuration.\n{0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Error while building.\n{0}")]
    Task(#[from] TaskError),

    #[error("Error while starting the dev server.\n{0}")]
    Server(#[from] ServerError),

    #[error("Error while watching for file changes.\n{0}")]
    Watch(#[from] WatchError),
}
