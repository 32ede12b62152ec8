use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;

use tsumiki::Config;

/// Builds the front-end assets of the project in the current directory.
///
/// Without flags the project is built in development mode, then served with
/// live reload while the sources are watched for changes.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Build once for production: minified, no source maps, no server.
    #[arg(long)]
    prod: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tsumiki::logging::init()?;

    let cwd = std::env::current_dir().context("Couldn't read the current directory")?;
    let root = Utf8PathBuf::try_from(cwd)?
        .canonicalize_utf8()
        .context("Couldn't resolve the project root")?;

    let config = Config::load(&root)?;

    if args.prod {
        let report = tsumiki::production(&root, &config)?;
        tracing::info!("wrote {} files", report.written().count());
        return Ok(());
    }

    match tsumiki::develop(&root, &config)? {}
}
