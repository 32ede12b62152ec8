use std::fs;

use camino::Utf8PathBuf;

use super::{Adapter, Completion, Extensions, Job};
use crate::error::AdapterError;
use crate::source::Sources;

/// Copies files verbatim, used for fonts and passthrough files.
#[derive(Debug, Clone, Default)]
pub struct Passthrough;

impl Adapter for Passthrough {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn produces(&self, sources: &Sources) -> Extensions {
        Extensions::from_sources(sources)
    }

    fn writes_nested(&self, sources: &Sources) -> bool {
        sources.is_recursive()
    }

    fn apply(&self, job: &Job<'_>) -> Result<Completion, AdapterError> {
        job.sources
            .expand()?
            .into_iter()
            .map(|file| -> Result<Utf8PathBuf, AdapterError> {
                let path = job.dest.join(&file.rel);

                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }

                fs::copy(&file.path, &path)?;
                Ok(path)
            })
            .collect()
    }
}
