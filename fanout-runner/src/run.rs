//! Executes a configured load test end to end.

use std::fs::File;
use std::future::Future;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use fanout_engine::{EngineHooks, LoadEngine, Report, StatsSnapshot};

use crate::catalog;
use crate::config::Config;
use crate::http::HttpRemote;

/// Logs the start and end of a run.
#[derive(Debug)]
struct RunLog {
    remote: String,
}

impl EngineHooks for RunLog {
    fn on_start(&self, engine: &LoadEngine) {
        tracing::info!(
            remote = self.remote,
            tasks = engine.catalog().entries().len(),
            population = engine.settings().population,
            "load test started"
        );
    }

    fn on_stop(&self, snapshot: &StatsSnapshot) {
        let total = snapshot.total();
        tracing::info!(
            requests = total.count(),
            failures = total.failures(),
            elapsed = ?snapshot.elapsed,
            "load test finished"
        );
    }
}

/// Runs the load test until its duration elapsed or Ctrl-C is pressed.
pub async fn run(config: &Config) -> Result<Report> {
    run_until(config, ctrl_c()).await
}

/// Runs the load test until its duration elapsed or `shutdown` resolves.
pub async fn run_until(config: &Config, shutdown: impl Future<Output = ()>) -> Result<Report> {
    let catalog = catalog::build(&config.weights)?;
    let remote = HttpRemote::new(&config.remote, config.request_timeout)?;
    let hooks = RunLog {
        remote: config.remote.clone(),
    };

    let engine = LoadEngine::builder(catalog, Arc::new(remote))
        .settings(config.engine_settings()?)
        .hooks(Arc::new(hooks))
        .build()?;

    let snapshot = engine.run(config.duration, shutdown).await?;
    let report = config.report_builder().build(&snapshot);

    if let Some(path) = &config.report_path {
        write_report(path, &report)?;
        tracing::info!(path = %path.display(), "report written");
    }

    Ok(report)
}

/// Writes the report as pretty-printed JSON.
pub fn write_report(path: &Path, report: &Report) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create report file `{}`", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .context("failed to write report")?;
    Ok(())
}

async fn ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            error = &error as &dyn std::error::Error,
            "failed to listen for Ctrl-C"
        );
        std::future::pending::<()>().await;
    }
    tracing::info!("received Ctrl-C");
}
