#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod adapter;
mod clean;
pub mod config;
mod core;
mod error;
pub mod graph;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod server;
mod source;
pub mod task;
pub mod watch;

use std::convert::Infallible;

use camino::Utf8Path;
use console::style;

pub use crate::adapter::{Adapter, Completion, Job};
pub use crate::clean::clean;
pub use crate::config::Config;
pub use crate::core::{Environment, Mode};
pub use crate::error::*;
pub use crate::graph::{Step, TaskGraph};
pub use crate::pipeline::{Pipeline, setup};
pub use crate::scheduler::{Report, Scheduler};
pub use crate::server::{DevServer, ReloadEvent, ServerHandle, serve};
pub use crate::source::{SourceFile, Sources};
pub use crate::task::{Options, Registry, Task, TaskId};
pub use crate::watch::{WatchRule, WatchRules, watch};

/// Runs the build sequence of a pipeline once.
pub fn build(pipeline: &Pipeline, env: &Environment) -> Result<Report, TsumikiError> {
    let graph = pipeline.graph();
    let report = Scheduler::new(graph.registry(), env).run_sequence(graph.steps())?;
    Ok(report)
}

/// One-shot production build of the project at `root`.
pub fn production(root: &Utf8Path, config: &Config) -> Result<Report, TsumikiError> {
    eprintln!(
        "Running {} in {} mode.",
        style("tsumiki").red(),
        style(Mode::Production).blue()
    );

    let env = Environment::new(Mode::Production);
    let pipeline = setup(root, config, &env)?;

    build(&pipeline, &env)
}

/// Builds the project at `root`, then serves it and rebuilds on changes.
///
/// A failing initial build is only logged, the server and the watcher start
/// regardless so that the mistake can be fixed while the session runs.
pub fn develop(root: &Utf8Path, config: &Config) -> Result<Infallible, TsumikiError> {
    eprintln!(
        "Running {} in {} mode.",
        style("tsumiki").red(),
        style(Mode::Development).blue()
    );

    let server = DevServer::bind(pipeline::output_root(root, config), config.port)?;
    let env = Environment::new(Mode::Development).with_reload_port(server.reload_port());
    let pipeline = setup(root, config, &env)?;

    tracing::info!("running initial build...");
    if let Err(e) = build(&pipeline, &env) {
        tracing::error!("{e}");
    }

    let server = server.start()?;
    tracing::info!("serving at {}", server.url());

    let never = watch(
        pipeline.registry(),
        pipeline.rules(),
        &env,
        Some(server.reload_sender()),
    )?;

    Ok(never)
}
