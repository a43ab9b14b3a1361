//! Command-line entry point.

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;

use crate::config::Config;
use crate::{catalog, observability, render, run};

/// Load generator detecting N+1 fan-out latency in microservice backends.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Catalog(CatalogCommand),
    Version(VersionCommand),
}

/// run the load test against the configured remote
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// print the weighted task catalog and exit
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "catalog")]
struct CatalogCommand {}

/// print the version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    if let Command::Catalog(_) = args.command {
        let catalog = catalog::build(&config.weights)?;
        render::catalog(&mut io::stdout().lock(), &catalog)?;
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("fanout-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let report = runtime.block_on(run::run(&config))?;
    render::report(&mut io::stdout().lock(), &report)?;

    Ok(())
}
