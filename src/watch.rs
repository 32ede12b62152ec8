//! Watch mode.
//!
//! The source tree is observed with a debounced `notify` watcher. Every batch
//! of events that arrives after the 250 ms quiescence window is resolved
//! against the [`WatchRules`], and exactly the tasks whose rules match one of
//! the changed paths are re-run as a single parallel group. Several changes
//! hitting the same task within one window therefore cause a single run.
//!
//! A failing task is only logged, the loop keeps waiting for the next change
//! so that a typo in a source file never takes the session down.

use std::collections::{BTreeSet, HashSet};
use std::convert::Infallible;
use std::sync::mpsc::{Sender, channel};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;

use crate::core::{Environment, as_overhead};
use crate::error::{ConfigurationError, TaskError, WatchError};
use crate::scheduler::{Report, Scheduler};
use crate::server::ReloadEvent;
use crate::source::{Sources, static_base};
use crate::task::{Registry, TaskId};

/// Re-run `tasks` whenever a file matching `pattern` changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRule {
    pub pattern: String,
    pub tasks: Vec<String>,
}

impl WatchRule {
    pub fn new<I, S>(pattern: impl Into<String>, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pattern: pattern.into(),
            tasks: tasks.into_iter().map(Into::into).collect(),
        }
    }
}

/// Validated watch rules, resolved against a registry.
#[derive(Debug, Clone)]
pub struct WatchRules {
    rules: Vec<(Sources, BTreeSet<TaskId>)>,
}

impl WatchRules {
    pub fn new(
        registry: &Registry,
        rules: impl IntoIterator<Item = WatchRule>,
    ) -> Result<Self, ConfigurationError> {
        let mut resolved = Vec::new();

        for rule in rules {
            if rule.tasks.is_empty() {
                return Err(ConfigurationError::EmptyRule(rule.pattern));
            }

            let mut ids = BTreeSet::new();
            for name in &rule.tasks {
                let id = registry
                    .id(name)
                    .ok_or_else(|| ConfigurationError::UnknownTask(name.clone()))?;
                ids.insert(id);
            }

            let sources =
                Sources::new([&rule.pattern]).map_err(|source| ConfigurationError::Pattern {
                    task: rule.tasks.join(", "),
                    pattern: rule.pattern.clone(),
                    source,
                })?;

            resolved.push((sources, ids));
        }

        Ok(Self { rules: resolved })
    }

    /// The tasks a change to `path` should re-run.
    pub fn triggered(&self, path: &Utf8Path) -> BTreeSet<TaskId> {
        self.rules
            .iter()
            .filter(|(sources, _)| sources.matches(path))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// The union of the tasks triggered by each path.
    pub fn triggered_all<'p>(
        &self,
        paths: impl IntoIterator<Item = &'p Utf8Path>,
    ) -> BTreeSet<TaskId> {
        paths
            .into_iter()
            .flat_map(|path| self.triggered(path))
            .collect()
    }

    /// The minimal set of existing directories to watch recursively.
    ///
    /// The static part of a pattern may not exist yet, e.g. when there are no
    /// fonts. Its closest existing ancestor is watched instead.
    pub fn roots(&self) -> Vec<Utf8PathBuf> {
        let mut roots = HashSet::new();

        for pattern in self.rules.iter().flat_map(|(sources, _)| sources.patterns()) {
            let base = static_base(pattern);
            let existing = base.ancestors().find(|dir| dir.is_dir());

            match existing {
                Some(dir) => {
                    roots.insert(dir.to_path_buf());
                }
                None => tracing::warn!("nothing to watch for {pattern}"),
            }
        }

        collapse_watch_paths(roots)
    }
}

/// Watches the sources and re-runs tasks until the process exits.
pub fn watch(
    registry: &Registry,
    rules: &WatchRules,
    env: &Environment,
    reload: Option<Sender<ReloadEvent>>,
) -> Result<Infallible, WatchError> {
    let (tx, rx) = channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

    for path in rules.roots() {
        tracing::info!("watching {}", path);
        debouncer.watch(&path, RecursiveMode::Recursive)?;
    }

    let mut scheduler = Scheduler::new(registry, env);
    if let Some(reload) = reload {
        scheduler = scheduler.with_reload(reload);
    }

    tracing::info!("waiting for changes...");

    loop {
        match rx.recv()? {
            Ok(events) => {
                let paths = events
                    .iter()
                    .filter(|de| is_change(&de.event.kind))
                    .flat_map(|de| &de.event.paths)
                    .filter_map(|path| Utf8Path::from_path(path));

                if let Some(Err(e)) = rebuild(&scheduler, rules, paths) {
                    tracing::error!("{e}");
                }
            }
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e:?}");
                }
            }
        }
    }
}

/// Re-runs the tasks triggered by `paths`, `None` when nothing matched.
pub(crate) fn rebuild<'p>(
    scheduler: &Scheduler<'_>,
    rules: &WatchRules,
    paths: impl IntoIterator<Item = &'p Utf8Path>,
) -> Option<Result<Report, TaskError>> {
    let dirty: Vec<_> = rules.triggered_all(paths).into_iter().collect();
    if dirty.is_empty() {
        return None;
    }

    let s = Instant::now();
    tracing::info!("change detected, re-running {} task(s)...", dirty.len());

    let result = scheduler.run_parallel(&dirty);
    if result.is_ok() {
        tracing::info!("rebuild complete {}", as_overhead(s));
    }

    Some(result)
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use super::*;
    use crate::core::Mode;
    use crate::task::Options;
    use crate::task::testing::Fake;

    struct Setup {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
        registry: Registry,
        fakes: Vec<Arc<Fake>>,
    }

    /// Tasks `templates`, `styles` and `scripts` over the usual layout.
    fn setup(styles: Fake) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("src/scss")).unwrap();
        fs::create_dir_all(root.join("src/js")).unwrap();
        fs::create_dir_all(root.join("src/templates/pages")).unwrap();

        let mut registry = Registry::new(root.join("build"));
        let tasks = [
            ("templates", "src/templates/pages/**/*.html", "build", Fake::default()),
            ("styles", "src/scss/*.scss", "build/css", styles),
            ("scripts", "src/js/*.js", "build/js", Fake::default()),
        ];

        let mut fakes = Vec::new();
        for (name, pattern, dest, fake) in tasks {
            let fake = Arc::new(fake);
            registry
                .register(
                    name,
                    fake.clone(),
                    [format!("{root}/{pattern}")],
                    root.join(dest),
                    Options::new(Mode::Development),
                )
                .unwrap();
            fakes.push(fake);
        }

        Setup {
            _dir: dir,
            root,
            registry,
            fakes,
        }
    }

    fn rules(setup: &Setup) -> WatchRules {
        let root = &setup.root;
        WatchRules::new(
            &setup.registry,
            [
                WatchRule::new(format!("{root}/src/templates/**/*.html"), ["templates"]),
                WatchRule::new(format!("{root}/src/scss/**/*.scss"), ["styles"]),
                WatchRule::new(format!("{root}/src/scss/_*.scss"), ["styles"]),
                WatchRule::new(format!("{root}/src/js/**/*.js"), ["scripts"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn style_change_triggers_only_styles() {
        let setup = setup(Fake::default());
        let rules = rules(&setup);
        let styles = setup.registry.id("styles").unwrap();

        let path = setup.root.join("src/scss/style.scss");
        assert_eq!(rules.triggered(&path), BTreeSet::from([styles]));

        let unrelated = setup.root.join("README.md");
        assert!(rules.triggered(&unrelated).is_empty());
    }

    #[test]
    fn overlapping_rules_are_coalesced() {
        let setup = setup(Fake::default());
        let rules = rules(&setup);

        let a = setup.root.join("src/scss/_colors.scss");
        let b = setup.root.join("src/scss/style.scss");
        let triggered = rules.triggered_all([a.as_path(), b.as_path()]);

        assert_eq!(triggered.len(), 1);
    }

    #[test]
    fn rebuild_runs_exactly_the_matched_tasks() {
        let setup = setup(Fake::default());
        let rules = rules(&setup);
        let env = Environment::new(Mode::Development);
        let scheduler = Scheduler::new(&setup.registry, &env);

        let a = setup.root.join("src/scss/_colors.scss");
        let b = setup.root.join("src/scss/style.scss");
        let report = rebuild(&scheduler, &rules, [a.as_path(), b.as_path()])
            .unwrap()
            .unwrap();

        assert_eq!(report.executions.len(), 1);
        let runs: Vec<_> = setup.fakes.iter().map(|f| f.runs()).collect();
        assert_eq!(runs, vec![0, 1, 0]);

        let other = setup.root.join("notes.txt");
        assert!(rebuild(&scheduler, &rules, [other.as_path()]).is_none());
    }

    #[test]
    fn failing_task_leaves_later_changes_working() {
        let setup = setup(Fake::failing());
        let rules = rules(&setup);
        let env = Environment::new(Mode::Development);
        let scheduler = Scheduler::new(&setup.registry, &env);

        let style = setup.root.join("src/scss/style.scss");
        let err = rebuild(&scheduler, &rules, [style.as_path()])
            .unwrap()
            .unwrap_err();
        assert_eq!(err.task(), Some("styles"));

        let script = setup.root.join("src/js/index.js");
        let report = rebuild(&scheduler, &rules, [script.as_path()])
            .unwrap()
            .unwrap();
        assert!(report.get("scripts").is_some());
    }

    #[test]
    fn rules_must_name_known_tasks() {
        let setup = setup(Fake::default());

        let err = WatchRules::new(&setup.registry, [WatchRule::new("src/*.php", ["files"])])
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownTask(name) if name == "files"));

        let err = WatchRules::new(
            &setup.registry,
            [WatchRule::new("src/*.php", Vec::<String>::new())],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyRule(_)));
    }

    #[test]
    fn roots_fall_back_to_existing_ancestors() {
        let setup = setup(Fake::default());
        let root = &setup.root;
        let rules = WatchRules::new(
            &setup.registry,
            [
                WatchRule::new(format!("{root}/src/scss/*.scss"), ["styles"]),
                WatchRule::new(format!("{root}/src/fonts/*"), ["styles"]),
                WatchRule::new(format!("{root}/src/js/**/*.js"), ["scripts"]),
            ],
        )
        .unwrap();

        // `src/fonts` doesn't exist, so `src` is watched and covers the rest.
        assert_eq!(rules.roots(), vec![root.join("src")]);
    }

    #[test]
    fn test_collapse_watch_paths() {
        let paths = HashSet::from([
            Utf8PathBuf::from("/a"),
            Utf8PathBuf::from("/a/b"),
            Utf8PathBuf::from("/a/b/c"),
            Utf8PathBuf::from("/b"),
            Utf8PathBuf::from("/c/d"),
        ]);

        assert_eq!(
            collapse_watch_paths(paths),
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let paths = HashSet::from([Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]);

        // /foo-bar is not a subdirectory of /foo
        assert_eq!(
            collapse_watch_paths(paths),
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }
}
