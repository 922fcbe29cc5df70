//! Phase orchestration: `testpilot` / `testpilot run`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use super::super::Cli;

pub async fn run_orchestrator(cli: &Cli, project_dir: PathBuf) -> Result<()> {
    use testpilot::config::Config;
    use testpilot::orchestrator::{
        FileStateStore, GlobResultCollector, Orchestrator, TokioProcessRunner, TracingSink,
    };

    let config = Config::new(
        project_dir,
        cli.config.clone(),
        cli.state_file.clone(),
        cli.verbose,
    )?;
    for warning in config.validate() {
        warn!("Config: {}", warning);
    }

    let store = FileStateStore::new(config.state_file.clone());
    let runner = TokioProcessRunner::new();
    let collector = GlobResultCollector::new();
    let sink = TracingSink;
    let orchestrator = Orchestrator::new(&store, &runner, &collector, &sink, config.phases());

    let rule = "=".repeat(60);
    info!("{}", rule);
    info!("Test orchestration starting in {}", config.project_dir.display());
    info!("{}", rule);

    let summary = orchestrator
        .run()
        .await
        .context("Orchestration aborted")?;

    let failed = summary.outcomes.iter().filter(|o| o.is_failure()).count();
    if failed > 0 {
        warn!("{} phase(s) did not complete this run", failed);
    }
    Ok(())
}
