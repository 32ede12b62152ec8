//! The two script strategies. Both produce a single `bundle.js`.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::Deserialize;

use super::{Adapter, Completion, Extensions, Job, sourcemap, write_output};
use crate::error::AdapterError;
use crate::source::Sources;

const BUNDLE: &str = "bundle.js";

/// Selects which adapter builds the scripts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStrategy {
    /// Resolve imports and bundle with `esbuild`.
    #[default]
    Bundle,
    /// Plain concatenation, minified with `esbuild` in production.
    Concat,
}

impl ScriptStrategy {
    pub fn adapter(self) -> Arc<dyn Adapter> {
        match self {
            ScriptStrategy::Bundle => Arc::new(Bundle::default()),
            ScriptStrategy::Concat => Arc::new(Concat::default()),
        }
    }

    /// Files picked up from the scripts directory. The bundler follows
    /// imports from a single entry, concatenation needs every file.
    pub fn entries(self) -> &'static str {
        match self {
            ScriptStrategy::Bundle => "index.js",
            ScriptStrategy::Concat => "**/*.js",
        }
    }
}

/// Bundles every entry point with `esbuild`.
///
/// **Note:** This adapter requires the `esbuild` binary to be available in the
/// system PATH. Development builds carry an inline source map, production
/// builds are minified.
#[derive(Debug, Clone)]
pub struct Bundle {
    program: String,
}

impl Bundle {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Bundle {
    fn default() -> Self {
        Self::new("esbuild")
    }
}

impl Adapter for Bundle {
    fn name(&self) -> &'static str {
        "esbuild"
    }

    fn produces(&self, _: &Sources) -> Extensions {
        Extensions::only(["js", "map"])
    }

    fn apply(&self, job: &Job<'_>) -> Result<Completion, AdapterError> {
        let mode = match job.options.mode.is_development() {
            true => "--sourcemap=inline",
            false => "--minify",
        };

        let files = job.sources.expand()?;
        if files.is_empty() {
            return Ok(Completion::default());
        }

        let mut bundle = Vec::new();

        for file in files {
            let data = compile_esbuild(
                &self.program,
                &[file.path.as_str(), "--bundle", "--format=iife", mode],
                None,
            )
            .map_err(|e| match e {
                AdapterError::Tool { message, .. } => AdapterError::input(&file.path, message),
                e => e,
            })?;

            bundle.extend_from_slice(&data);
        }

        let path = job.dest.join(BUNDLE);
        write_output(&path, bundle)?;

        Ok(Completion {
            written: vec![path],
        })
    }
}

/// Concatenates every source file in path order.
///
/// Development builds get a source map listing the original files.
/// Production builds are piped through `esbuild --minify`.
#[derive(Debug, Clone)]
pub struct Concat {
    program: String,
}

impl Concat {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Concat {
    fn default() -> Self {
        Self::new("esbuild")
    }
}

impl Adapter for Concat {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn produces(&self, _: &Sources) -> Extensions {
        Extensions::only(["js", "map"])
    }

    fn apply(&self, job: &Job<'_>) -> Result<Completion, AdapterError> {
        let files = job.sources.expand()?;
        if files.is_empty() {
            return Ok(Completion::default());
        }

        let contents = files
            .iter()
            .map(|file| std::fs::read_to_string(&file.path))
            .collect::<Result<Vec<_>, _>>()?;

        let mut bundle = contents.join("\n");
        let path = job.dest.join(BUNDLE);
        let mut done = Completion::default();

        if job.options.source_maps() {
            let sources: Vec<_> = files
                .iter()
                .zip(&contents)
                .map(|(file, content)| (file.rel.as_str(), content.as_str()))
                .collect();

            let link = sourcemap::write_coarse(&path, &sources)?;
            bundle.push_str(&format!("\n//# sourceMappingURL={link}\n"));
            done.push(path.with_file_name(link));
        }

        let bundle = match job.options.mode.is_development() {
            true => bundle.into_bytes(),
            false => compile_esbuild(
                &self.program,
                &["--minify", "--loader=js"],
                Some(bundle.as_bytes()),
            )?,
        };

        write_output(&path, bundle)?;
        done.push(path);

        Ok(done)
    }
}

fn compile_esbuild(
    program: &str,
    args: &[&str],
    stdin: Option<&[u8]>,
) -> Result<Vec<u8>, AdapterError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(match stdin {
            Some(_) => Stdio::piped(),
            None => Stdio::null(),
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AdapterError::Tool {
            tool: "esbuild",
            message: format!("couldn't start '{program}': {e}"),
        })?;

    // Feed stdin from another thread, the tool may fill stdout first.
    let output = std::thread::scope(|s| {
        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            s.spawn(move || pipe.write_all(data));
        }
        child.wait_with_output()
    })?;

    if !output.status.success() {
        return Err(AdapterError::Tool {
            tool: "esbuild",
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}
