use std::collections::BTreeSet;
use std::fs;
use std::sync::mpsc::channel;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tsumiki::adapter::scripts::ScriptStrategy;
use tsumiki::{Config, Environment, Mode, TsumikiError};

const LAYOUT: &str = r#"<!doctype html>
<html>
  <head>
    <link rel="stylesheet" href="/css/style.css">
  </head>
  <body>
    {% block content %}{% endblock %}
    <script src="/js/bundle.js"></script>
  </body>
</html>
"#;

const INDEX: &str = r#"{% extends "layout.html" %}
{% block content %}
    <svg><use href="/img/sprite.svg#home"/></svg>
    <h1>Welcome</h1>
{% endblock %}
"#;

const ICON: &str = r##"<?xml version="1.0"?>
<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 24 24">
  <defs><clipPath id="clip"><rect width="24" height="24"/></clipPath></defs>
  <path clip-path="url(#clip)" d="M0 0h24v24H0z"/>
</svg>
"##;

struct Project {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Project {
    /// Every input category: templates, styles, scripts, one raster image,
    /// three icons, one font and one passthrough file.
    fn new(with_scripts: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();

        let project = Self { _dir: dir, root };
        project.write("src/templates/layout.html", LAYOUT);
        project.write("src/templates/pages/index.html", INDEX);
        project.write("src/scss/_vars.scss", "$accent: #c33;");
        project.write(
            "src/scss/style.scss",
            "@use \"vars\";\n\nh1 {\n  color: vars.$accent;\n}\n",
        );
        if with_scripts {
            project.write("src/js/index.js", "document.title = 'tsumiki';");
        }
        for icon in ["home", "mail", "user"] {
            project.write(&format!("src/img/svg/{icon}.svg"), ICON);
        }
        project.write("src/fonts/inter.woff2", b"wOF2-font-bytes");
        project.write("src/contact.php", "<?php mail(); ?>");

        let photo = project.root.join("src/img/photo.png");
        RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 128]))
            .save(&photo)
            .unwrap();

        project
    }

    fn write(&self, rel: &str, data: impl AsRef<[u8]>) {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root.join(rel)).unwrap()
    }

    fn out(&self) -> Utf8PathBuf {
        self.root.join("build")
    }

    /// Every file below the output root, relative to it.
    fn outputs(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        collect(&self.out(), &self.out(), &mut found);
        found
    }
}

fn collect(base: &Utf8Path, dir: &Utf8Path, found: &mut BTreeSet<String>) {
    for entry in dir.read_dir_utf8().unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        if path.is_dir() {
            collect(base, path, found);
        } else {
            found.insert(path.strip_prefix(base).unwrap().to_string());
        }
    }
}

fn config() -> Config {
    Config {
        scripts: ScriptStrategy::Concat,
        ..Config::default()
    }
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn development_build_writes_every_output() {
    let project = Project::new(true);
    project.write("build/stale.html", "left over");

    let env = Environment::new(Mode::Development).with_reload_port(1337);
    let pipeline = tsumiki::setup(&project.root, &config(), &env).unwrap();
    tsumiki::build(&pipeline, &env).unwrap();

    assert_eq!(
        project.outputs(),
        set(&[
            "contact.php",
            "css/style.css",
            "css/style.css.map",
            "fonts/inter.woff2",
            "img/photo.png",
            "img/sprite.svg",
            "index.html",
            "js/bundle.js",
            "js/bundle.js.map",
        ])
    );

    let html = project.read("build/index.html");
    assert!(html.contains("<h1>Welcome</h1>"));
    assert!(html.contains("ws://localhost:1337"));

    let css = project.read("build/css/style.css");
    assert!(css.contains("sourceMappingURL=style.css.map"));

    let sprite = project.read("build/img/sprite.svg");
    assert_eq!(sprite.matches("<symbol").count(), 3);
    for icon in ["home", "mail", "user"] {
        assert!(sprite.contains(&format!(r#"<symbol id="{icon}""#)));
        assert!(sprite.contains(&format!(r#"id="{icon}.clip""#)));
    }

    assert_eq!(project.read("build/contact.php"), "<?php mail(); ?>");
}

#[test]
fn production_build_has_no_maps_or_reload() {
    // Production scripts need esbuild, which may not be installed.
    let project = Project::new(false);

    let env = Environment::new(Mode::Production);
    let pipeline = tsumiki::setup(&project.root, &config(), &env).unwrap();
    let report = tsumiki::build(&pipeline, &env).unwrap();

    let outputs = project.outputs();
    assert!(outputs.iter().all(|path| !path.ends_with(".map")));
    assert!(outputs.contains("css/style.css"));
    assert!(outputs.contains("img/sprite.svg"));
    assert_eq!(report.written().count(), outputs.len());

    let html = project.read("build/index.html");
    assert!(!html.contains("WebSocket"));
    assert!(!html.contains("\n    <h1>"));

    let css = project.read("build/css/style.css");
    assert!(!css.contains("sourceMappingURL"));
    assert!(css.starts_with("h1{color:"));
}

#[test]
fn malformed_style_fails_production_build() {
    let project = Project::new(false);
    project.write("src/scss/style.scss", "h1 { color: ");

    let env = Environment::new(Mode::Production);
    let pipeline = tsumiki::setup(&project.root, &config(), &env).unwrap();
    let err = tsumiki::build(&pipeline, &env).unwrap_err();

    let TsumikiError::Task(err) = err else {
        panic!("expected a task error, got {err}");
    };
    assert_eq!(err.task(), Some("styles"));
    assert_eq!(
        err.file(),
        Some(project.root.join("src/scss/style.scss").as_path())
    );
}

#[test]
fn watch_loop_survives_a_malformed_style() {
    let project = Project::new(true);
    let root = project.root.clone();

    let env = Environment::new(Mode::Development);
    let pipeline = tsumiki::setup(&root, &config(), &env).unwrap();
    tsumiki::build(&pipeline, &env).unwrap();
    fs::remove_file(project.out().join("css/style.css")).unwrap();

    let (tx, rx) = channel();
    thread::spawn(move || {
        let _ = tsumiki::watch(pipeline.registry(), pipeline.rules(), &env, Some(tx));
    });

    // Let the watcher register its roots.
    thread::sleep(Duration::from_millis(500));

    project.write("src/scss/style.scss", "h1 { color: ");
    thread::sleep(Duration::from_millis(1000));
    assert!(rx.try_recv().is_err(), "a failing task must not reload");

    project.write("src/scss/style.scss", "h1 { color: red; }\n");
    let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();

    assert_eq!(event.task, "styles");
    assert!(project.read("build/css/style.css").contains("color: red"));
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
}

#[test]
fn output_over_the_sources_is_never_cleaned() {
    let project = Project::new(false);
    let env = Environment::new(Mode::Production);

    for output in [".", "", "src"] {
        let config = Config {
            output: output.into(),
            ..config()
        };

        let err = tsumiki::setup(&project.root, &config, &env).unwrap_err();
        assert!(
            matches!(err, tsumiki::ConfigurationError::UnsafeDirectory { .. }),
            "{output:?}: {err}"
        );
    }

    assert!(project.root.join("src/scss/style.scss").exists());
}
