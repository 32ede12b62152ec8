//! Transform adapters.
//!
//! Every kind of asset is produced by one [`Adapter`]. Adapters are stateless
//! wrappers around the actual tools, be it a crate like `grass` or an external
//! executable like `esbuild`. The scheduler only ever sees the uniform
//! [`Adapter::apply`] contract.

pub mod images;
pub mod passthrough;
pub mod scripts;
mod sourcemap;
pub mod sprite;
pub mod styles;
pub mod templates;

pub use images::Images;
pub use passthrough::Passthrough;
pub use scripts::{Bundle, Concat};
pub use sprite::Sprite;
pub use styles::Styles;
pub use templates::Templates;

use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::Environment;
use crate::error::AdapterError;
use crate::source::Sources;
use crate::task::Options;

/// Everything an adapter needs to know about one invocation.
#[derive(Debug, Clone, Copy)]
pub struct Job<'a> {
    /// Name of the task the adapter runs for.
    pub task: &'a str,
    pub sources: &'a Sources,
    pub dest: &'a Utf8Path,
    pub options: &'a Options,
    pub env: &'a Environment,
}

/// Signals that an adapter finished, listing the files it wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub written: Vec<Utf8PathBuf>,
}

impl Completion {
    pub(crate) fn push(&mut self, path: Utf8PathBuf) {
        self.written.push(path);
    }
}

impl FromIterator<Utf8PathBuf> for Completion {
    fn from_iter<T: IntoIterator<Item = Utf8PathBuf>>(iter: T) -> Self {
        Self {
            written: iter.into_iter().collect(),
        }
    }
}

/// File extensions an adapter writes into its destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extensions {
    /// Anything, e.g. a verbatim copy of `fonts/*`.
    Any,
    Only(BTreeSet<String>),
}

impl Extensions {
    pub fn only<I, S>(exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(exts.into_iter().map(Into::into).collect())
    }

    pub fn intersects(&self, other: &Extensions) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Only(a), Self::Only(b)) => !a.is_disjoint(b),
        }
    }

    /// Derives extensions from the file name part of each pattern, e.g.
    /// `src/*.php` produces `php`, while `src/fonts/*` produces anything.
    pub fn from_sources(sources: &Sources) -> Self {
        let mut exts = BTreeSet::new();

        for pattern in sources.patterns() {
            let ext = Utf8Path::new(pattern)
                .extension()
                .filter(|ext| !ext.contains(['*', '?', '[', '{']));

            match ext {
                Some(ext) => exts.insert(ext.to_ascii_lowercase()),
                None => return Self::Any,
            };
        }

        Self::Only(exts)
    }
}

pub trait Adapter: Send + Sync {
    /// Short name of the underlying tool, used in logs.
    fn name(&self) -> &'static str;

    /// The extensions this adapter writes for the given sources.
    fn produces(&self, sources: &Sources) -> Extensions;

    /// Whether outputs may land in subdirectories of the destination.
    fn writes_nested(&self, _sources: &Sources) -> bool {
        false
    }

    /// Runs the transform. Blocks until every output is written.
    fn apply(&self, job: &Job<'_>) -> Result<Completion, AdapterError>;
}

/// Writes a file, creating its parent directories first.
pub(crate) fn write_output(path: &Utf8Path, data: impl AsRef<[u8]>) -> Result<(), AdapterError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)?;
    Ok(())
}
