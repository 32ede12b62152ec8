use std::sync::LazyLock;

use camino::Utf8PathBuf;
use minijinja::{Environment, context, path_loader};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use regex::Regex;

use super::{Adapter, Completion, Extensions, Job, write_output};
use crate::error::AdapterError;
use crate::source::Sources;

static RE_VERBATIM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<pre\b.*?</pre\s*>|<textarea\b.*?</textarea\s*>|<script\b.*?</script\s*>|<style\b.*?</style\s*>",
    )
    .expect("valid regex")
});

/// Renders page templates to HTML with `minijinja`.
///
/// Pages may `{% extends %}` or `{% include %}` any template below `root`,
/// which is also where shared layouts live. Every page keeps its path
/// relative to the pattern, with the extension replaced by `.html`.
#[derive(Debug, Clone)]
pub struct Templates {
    root: Utf8PathBuf,
}

impl Templates {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Adapter for Templates {
    fn name(&self) -> &'static str {
        "minijinja"
    }

    fn produces(&self, _: &Sources) -> Extensions {
        Extensions::only(["html"])
    }

    fn writes_nested(&self, sources: &Sources) -> bool {
        sources.is_recursive()
    }

    fn apply(&self, job: &Job<'_>) -> Result<Completion, AdapterError> {
        let mut env = Environment::new();
        env.set_loader(path_loader(&self.root));

        let refresh = job.env.get_refresh_script();
        let files = job.sources.expand()?;

        files
            .par_iter()
            .map(|file| {
                let source = std::fs::read_to_string(&file.path)?;
                let ctx = context! {
                    mode => job.options.mode,
                    production => !job.options.mode.is_development(),
                };

                let html = env
                    .render_named_str(file.path.as_str(), &source, ctx)
                    .map_err(|e| AdapterError::input(&file.path, format!("{e:#}")))?;

                let html = match job.options.pretty {
                    true => html,
                    false => compact(&html),
                };

                let html = match &refresh {
                    Some(script) => inject_script(&html, script),
                    None => html,
                };

                let path = job.dest.join(&file.rel).with_extension("html");
                write_output(&path, html)?;

                Ok(path)
            })
            .collect::<Result<Vec<_>, AdapterError>>()
            .map(|written| Completion { written })
    }
}

/// Strips indentation and blank lines. Elements whose whitespace is
/// significant are copied as they are.
fn compact(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;

    for block in RE_VERBATIM.find_iter(html) {
        compact_into(&mut out, &html[last..block.start()]);
        out.push_str(block.as_str());
        last = block.end();
    }

    compact_into(&mut out, &html[last..]);
    out
}

fn compact_into(out: &mut String, text: &str) {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        if !out.is_empty() && text.contains('\n') {
            out.push('\n');
        }
        return;
    }

    if !out.is_empty() && text.starts_with(char::is_whitespace) {
        out.push('\n');
    }

    out.push_str(&lines.join("\n"));

    if text.ends_with(char::is_whitespace) {
        out.push('\n');
    }
}

/// Places the script right before the closing `</body>`, or at the end of the
/// document when there is none.
fn inject_script(html: &str, script: &str) -> String {
    let tag = format!("<script>{script}</script>");

    match html.rfind("</body>") {
        Some(idx) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..idx]);
            out.push_str(&tag);
            out.push_str(&html[idx..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::{Project, dev, prod};

    const LAYOUT: &str = r#"<html>
  <body>
    <main>
      {% block content %}{% endblock %}
    </main>
  </body>
</html>
"#;

    const PAGE: &str = r#"{% extends "layout.html" %}
{% block content %}<h1>Hello {{ mode }}</h1>{% endblock %}
"#;

    fn project() -> Project {
        let project = Project::new();
        project.write("src/templates/layout.html", LAYOUT);
        project.write("src/templates/pages/index.html", PAGE);
        project.write("src/templates/pages/about/team.html", PAGE);
        project
    }

    #[test]
    fn renders_pages_with_layouts() {
        let project = project();
        let adapter = Templates::new(project.root.join("src/templates"));

        let done = project
            .apply(&adapter, &["src/templates/pages/**/*.html"], "build", &prod())
            .unwrap();

        assert_eq!(done.written.len(), 2);
        let index = project.read("build/index.html");
        assert!(index.contains("<h1>Hello production</h1>"));
        assert!(project.exists("build/about/team.html"));
    }

    #[test]
    fn production_output_is_compact_without_reload() {
        let project = project();
        let adapter = Templates::new(project.root.join("src/templates"));

        project
            .apply(&adapter, &["src/templates/pages/*.html"], "build", &prod())
            .unwrap();

        let index = project.read("build/index.html");
        assert!(!index.contains("  <body>"));
        assert!(!index.contains("WebSocket"));
    }

    #[test]
    fn development_output_is_pretty_with_reload() {
        let project = project();
        let adapter = Templates::new(project.root.join("src/templates"));

        project
            .apply(&adapter, &["src/templates/pages/*.html"], "build", &dev())
            .unwrap();

        let index = project.read("build/index.html");
        assert!(index.contains("  <body>"));

        let script = index.find("ws://localhost:1337").unwrap();
        let body = index.find("</body>").unwrap();
        assert!(script < body);
    }

    #[test]
    fn reports_the_malformed_page() {
        let project = project();
        let broken = project.write("src/templates/pages/broken.html", "{% if %}");
        let adapter = Templates::new(project.root.join("src/templates"));

        let err = project
            .apply(&adapter, &["src/templates/pages/*.html"], "build", &prod())
            .unwrap_err();

        assert_eq!(err.file(), Some(broken.as_path()));
    }

    #[test]
    fn production_keeps_whitespace_sensitive_elements() {
        let project = Project::new();
        project.write(
            "src/templates/pages/code.html",
            "<body>\n  <pre>\n    indented\n\n    code\n</pre>\n  <textarea>\n  a\n</textarea>\n  <p>\n    text\n  </p>\n</body>\n",
        );
        let adapter = Templates::new(project.root.join("src/templates"));

        project
            .apply(&adapter, &["src/templates/pages/*.html"], "build", &prod())
            .unwrap();

        assert_eq!(
            project.read("build/code.html"),
            "<body>\n<pre>\n    indented\n\n    code\n</pre>\n<textarea>\n  a\n</textarea>\n<p>\ntext\n</p>\n</body>"
        );
    }

    #[test]
    fn compact_keeps_scripts_verbatim() {
        let html = "<div>\n  <script>\n  const s = `a\n    b`;\n  </script>\n</div>";

        assert_eq!(
            compact(html),
            "<div>\n<script>\n  const s = `a\n    b`;\n  </script>\n</div>"
        );
    }

    #[test]
    fn inject_without_body() {
        assert_eq!(inject_script("<p>x</p>", "s"), "<p>x</p><script>s</script>");
    }
}
