//! Source patterns and their expansion into files.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern, glob_with};

use crate::error::AdapterError;

/// `*` and `?` never cross a path separator, only `**` does.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A file matched by a source pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceFile {
    /// The full path of the file.
    pub path: Utf8PathBuf,
    /// The path relative to the static part of the pattern that matched it.
    pub rel: Utf8PathBuf,
}

/// A list of compiled glob patterns describing the inputs of a task.
#[derive(Debug, Clone)]
pub struct Sources {
    patterns: Vec<Pattern>,
}

impl Sources {
    pub fn new<I, S>(patterns: I) -> Result<Self, glob::PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            patterns: patterns
                .into_iter()
                .map(|p| Pattern::new(p.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }

    pub(crate) fn from_compiled(patterns: Vec<Pattern>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }

    /// Whether a match can lie below a subdirectory of its pattern's static
    /// prefix, e.g. `src/img/**/*.png`.
    pub fn is_recursive(&self) -> bool {
        self.patterns.iter().any(|pattern| {
            let pattern = pattern.as_str();
            let base = static_base(pattern);
            let rest = pattern.strip_prefix(base.as_str()).unwrap_or(pattern);
            let rest = rest.trim_start_matches('/');

            rest.contains('/') || rest.contains("**")
        })
    }

    pub fn matches(&self, path: &Utf8Path) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(path.as_str(), MATCH_OPTIONS))
    }

    /// Expands every pattern into the files it matches. The result is sorted
    /// by path and free of duplicates.
    pub fn expand(&self) -> Result<Vec<SourceFile>, AdapterError> {
        let mut files = BTreeMap::new();

        for pattern in &self.patterns {
            let base = static_base(pattern.as_str());

            for path in glob_with(pattern.as_str(), MATCH_OPTIONS)? {
                let path = Utf8PathBuf::try_from(path?)?;
                if !path.is_file() {
                    continue;
                }

                let rel = match path.strip_prefix(&base) {
                    Ok(rel) if !rel.as_str().is_empty() => rel.to_path_buf(),
                    _ => Utf8PathBuf::from(path.file_name().unwrap_or_default()),
                };

                files
                    .entry(path.clone())
                    .or_insert(SourceFile { path, rel });
            }
        }

        Ok(files.into_values().collect())
    }
}

/// Splits off the leading components of a pattern that contain no wildcards.
///
/// For a concrete file the base is its parent directory, so that relative
/// paths always keep at least the file name.
pub(crate) fn static_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let base: Utf8PathBuf = components.iter().take(split_idx).collect();

    if split_idx == components.len() {
        base.parent().map(Utf8Path::to_path_buf).unwrap_or_default()
    } else {
        base
    }
}
