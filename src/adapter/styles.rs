use grass::{Options, OutputStyle};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use super::{Adapter, Completion, Extensions, Job, sourcemap, write_output};
use crate::error::AdapterError;
use crate::source::Sources;

/// Browsers supported unless configured otherwise.
pub const DEFAULT_BROWSERS: &str = "> 0.1%";

/// Compiles Sass/SCSS entry points to CSS with `grass`, then adds vendor
/// prefixes for the target browsers with `lightningcss`.
///
/// Partials (files starting with `_`) are skipped as entries, they are only
/// reachable through `@use` or `@import`. Production output is minified;
/// development output is expanded and linked to a source map.
#[derive(Debug, Clone)]
pub struct Styles {
    browsers: String,
}

impl Styles {
    /// `browsers` is a browserslist query, e.g. `"> 0.1%"`.
    pub fn new(browsers: impl Into<String>) -> Self {
        Self {
            browsers: browsers.into(),
        }
    }

    fn targets(&self) -> Result<Targets, AdapterError> {
        let browsers = Browsers::from_browserslist([self.browsers.as_str()]).map_err(|e| {
            AdapterError::Tool {
                tool: "lightningcss",
                message: format!("invalid browser query '{}': {e}", self.browsers),
            }
        })?;

        Ok(Targets {
            browsers,
            ..Targets::default()
        })
    }
}

impl Default for Styles {
    fn default() -> Self {
        Self::new(DEFAULT_BROWSERS)
    }
}

impl Adapter for Styles {
    fn name(&self) -> &'static str {
        "grass"
    }

    fn produces(&self, _: &Sources) -> Extensions {
        Extensions::only(["css", "map"])
    }

    fn apply(&self, job: &Job<'_>) -> Result<Completion, AdapterError> {
        let minify = !job.options.mode.is_development();
        let targets = self.targets()?;
        let mut done = Completion::default();

        for file in job.sources.expand()? {
            if file.path.file_name().is_some_and(|name| name.starts_with('_')) {
                continue;
            }

            let mut opts = Options::default().style(OutputStyle::Expanded);
            if let Some(dir) = file.path.parent() {
                opts = opts.load_path(dir);
            }

            let css = grass::from_path(&file.path, &opts)
                .map_err(|e| AdapterError::input(&file.path, e))?;

            let mut css =
                prefix(&css, targets, minify).map_err(|e| AdapterError::input(&file.path, e))?;

            let path = job.dest.join(&file.rel).with_extension("css");

            if job.options.source_maps() {
                let source = std::fs::read_to_string(&file.path)?;
                let link = sourcemap::write_coarse(&path, &[(file.rel.as_str(), &source)])?;
                css.push_str(&format!("\n/*# sourceMappingURL={link} */\n"));
                done.push(path.with_file_name(link));
            }

            write_output(&path, css)?;
            done.push(path);
        }

        Ok(done)
    }
}

/// Adds vendor prefixes, merges rules and optionally minifies.
fn prefix(css: &str, targets: Targets, minify: bool) -> Result<String, String> {
    let mut sheet = StyleSheet::parse(css, ParserOptions::default()).map_err(|e| e.to_string())?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| e.to_string())?;

    let out = sheet
        .to_css(PrinterOptions {
            minify,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;

    Ok(out.code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::{Project, dev, prod};

    const STYLE: &str = r#"
@use "colors";

body {
  main {
    color: colors.$accent;
  }
}
"#;

    fn project() -> Project {
        let project = Project::new();
        project.write("src/scss/_colors.scss", "$accent: #ff0000;");
        project.write("src/scss/style.scss", STYLE);
        project
    }

    #[test]
    fn production_is_compressed_without_map() {
        let project = project();

        let done = project
            .apply(&Styles::default(), &["src/scss/*.scss"], "build/css", &prod())
            .unwrap();

        assert_eq!(done.written.len(), 1);
        let css = project.read("build/css/style.css");
        assert!(css.contains("body main{color:red}") || css.contains("body main{color:#ff0000}"));
        assert!(!css.contains("sourceMappingURL"));
        assert!(!project.exists("build/css/style.css.map"));
        assert!(!project.exists("build/css/_colors.css"));
    }

    #[test]
    fn development_links_a_source_map() {
        let project = project();

        project
            .apply(&Styles::default(), &["src/scss/style.scss"], "build/css", &dev())
            .unwrap();

        let css = project.read("build/css/style.css");
        assert!(css.contains("sourceMappingURL=style.css.map"));

        let map: serde_json::Value =
            serde_json::from_str(&project.read("build/css/style.css.map")).unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["sources"][0], "style.scss");
    }

    #[test]
    fn adds_vendor_prefixes_for_targets() {
        let project = Project::new();
        project.write("src/scss/style.scss", ".card { user-select: none; }");

        let styles = Styles::new("safari 13");

        project
            .apply(&styles, &["src/scss/style.scss"], "build/css", &prod())
            .unwrap();

        let css = project.read("build/css/style.css");
        assert!(css.contains("-webkit-user-select:none"));
        assert!(css.contains("user-select:none"));
    }

    #[test]
    fn invalid_browser_query_is_a_tool_error() {
        let project = project();

        let styles = Styles::new("no such browser 99");

        let err = project
            .apply(&styles, &["src/scss/style.scss"], "build/css", &prod())
            .unwrap_err();

        assert!(matches!(err, AdapterError::Tool { tool: "lightningcss", .. }));
    }

    #[test]
    fn malformed_source_names_the_file() {
        let project = Project::new();
        let broken = project.write("src/scss/style.scss", "body { color: ");

        let err = project
            .apply(&Styles::default(), &["src/scss/style.scss"], "build/css", &dev())
            .unwrap_err();

        assert_eq!(err.file(), Some(broken.as_path()));
    }
}
