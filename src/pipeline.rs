//! Wires the asset tasks together.
//!
//! [`setup`] is a pure function of the project root, the configuration and
//! the environment. It registers one task per asset kind, validates the build
//! graph and resolves the watch rules, and hands all of it back as a value.
//! The output root is emptied by every build, so it must stay clear of the
//! project root and of every source directory.

use std::sync::Arc;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::adapter::{Images, Passthrough, Sprite, Styles, Templates};
use crate::config::{Config, SourceLayout};
use crate::core::Environment;
use crate::error::ConfigurationError;
use crate::graph::TaskGraph;
use crate::task::{Options, Registry};
use crate::watch::{WatchRule, WatchRules};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];
const FONT_EXTENSIONS: [&str; 5] = ["woff2", "woff", "ttf", "otf", "eot"];

/// A validated build graph and the watch rules for it.
#[derive(Debug)]
pub struct Pipeline {
    graph: TaskGraph,
    rules: WatchRules,
}

impl Pipeline {
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn registry(&self) -> &Registry {
        self.graph.registry()
    }

    pub fn rules(&self) -> &WatchRules {
        &self.rules
    }
}

pub fn setup(
    root: &Utf8Path,
    config: &Config,
    env: &Environment,
) -> Result<Pipeline, ConfigurationError> {
    let out = output_root(root, config);
    let layout = &config.sources;

    let sources = source_roots(root, layout);
    check_directory("output", &out, root, &sources)?;
    check_directory("cache", &normalize(&root.join(&config.cache)), root, &sources)?;
    let options = Options::new(env.mode).compression_level(config.compression_level);

    let dir = |dir: &Utf8Path| root.join(dir);
    let pattern = |dir: &Utf8Path, rest: &str| format!("{}/{rest}", root.join(dir));

    let mut registry = Registry::new(&out);

    registry.register(
        "templates",
        Arc::new(Templates::new(dir(&layout.templates))),
        [pattern(&layout.templates, "pages/**/*.html")],
        &out,
        options.clone(),
    )?;

    registry.register(
        "styles",
        Arc::new(Styles::new(&config.browsers)),
        [pattern(&layout.styles, "style.scss")],
        out.join("css"),
        options.clone(),
    )?;

    registry.register(
        "scripts",
        config.scripts.adapter(),
        [pattern(&layout.scripts, config.scripts.entries())],
        out.join("js"),
        options.clone(),
    )?;

    let images: Vec<String> = IMAGE_EXTENSIONS
        .iter()
        .map(|ext| pattern(&layout.images, &format!("**/*.{ext}")))
        .collect();

    registry.register(
        "images",
        Arc::new(Images::cached(dir(&config.cache))),
        &images,
        out.join("img"),
        options.clone(),
    )?;

    registry.register(
        "sprite",
        Arc::new(Sprite::default()),
        [pattern(&layout.icons, "*.svg")],
        out.join("img"),
        options.clone(),
    )?;

    let fonts: Vec<String> = FONT_EXTENSIONS
        .iter()
        .map(|ext| pattern(&layout.fonts, &format!("*.{ext}")))
        .collect();

    registry.register(
        "fonts",
        Arc::new(Passthrough),
        &fonts,
        out.join("fonts"),
        options.clone(),
    )?;

    registry.register(
        "files",
        Arc::new(Passthrough),
        [pattern(&layout.files, "*.php")],
        &out,
        options,
    )?;

    let mut rules = vec![
        WatchRule::new(pattern(&layout.templates, "**/*.html"), ["templates"]),
        WatchRule::new(pattern(&layout.styles, "**/*.scss"), ["styles"]),
        WatchRule::new(pattern(&layout.scripts, "**/*.js"), ["scripts"]),
        WatchRule::new(pattern(&layout.icons, "*.svg"), ["sprite"]),
        WatchRule::new(pattern(&layout.files, "*.php"), ["files"]),
    ];
    rules.extend(images.iter().map(|pattern| WatchRule::new(pattern, ["images"])));
    rules.extend(fonts.iter().map(|pattern| WatchRule::new(pattern, ["fonts"])));

    let rules = WatchRules::new(&registry, rules)?;
    let graph = TaskGraph::build(registry)?;

    Ok(Pipeline { graph, rules })
}

/// The output root for a configuration.
pub fn output_root(root: &Utf8Path, config: &Config) -> Utf8PathBuf {
    normalize(&root.join(&config.output))
}

fn source_roots(root: &Utf8Path, layout: &SourceLayout) -> Vec<Utf8PathBuf> {
    [
        &layout.templates,
        &layout.styles,
        &layout.scripts,
        &layout.images,
        &layout.icons,
        &layout.fonts,
        &layout.files,
    ]
    .into_iter()
    .map(|dir| normalize(&root.join(dir)))
    .collect()
}

/// Rejects a generated directory that equals or contains the project root or
/// a source directory, or that lies inside a source directory.
fn check_directory(
    key: &'static str,
    dir: &Utf8Path,
    root: &Utf8Path,
    sources: &[Utf8PathBuf],
) -> Result<(), ConfigurationError> {
    let root = normalize(root);

    let conflict = std::iter::once(&root)
        .filter(|root| root.starts_with(dir))
        .chain(sources.iter().filter(|src| src.starts_with(dir) || dir.starts_with(src)))
        .next();

    match conflict {
        Some(conflict) => Err(ConfigurationError::UnsafeDirectory {
            key,
            dir: dir.to_owned(),
            conflict: conflict.clone(),
        }),
        None => Ok(()),
    }
}

/// Resolves `.` and `..` without touching the filesystem.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();

    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            component => out.push(component),
        }
    }

    out
}
