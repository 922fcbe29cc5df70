//! Saved state inspection: `testpilot status` and `testpilot reset`.

use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;

use super::super::Cli;

pub fn cmd_status(cli: &Cli, project_dir: PathBuf) -> Result<()> {
    use testpilot::config::Config;
    use testpilot::orchestrator::{FileStateStore, StateStore};
    use testpilot::report;

    let config = Config::new(
        project_dir,
        cli.config.clone(),
        cli.state_file.clone(),
        cli.verbose,
    )?;
    let store = FileStateStore::new(config.state_file.clone());

    println!();
    println!("{}", style("Testpilot Status").bold().cyan());
    println!();

    if !store.exists() {
        println!("No state recorded at {}", store.path().display());
        println!();
        println!("Run 'testpilot run' to start.");
        println!();
        return Ok(());
    }

    let state = store.load().context("Failed to load state")?;
    for line in report::render(&state, &store.location()) {
        println!("{}", line);
    }
    println!();
    Ok(())
}

pub fn cmd_reset(cli: &Cli, project_dir: PathBuf, force: bool) -> Result<()> {
    use dialoguer::Confirm;
    use testpilot::config::Config;
    use testpilot::orchestrator::FileStateStore;

    let config = Config::new(
        project_dir,
        cli.config.clone(),
        cli.state_file.clone(),
        cli.verbose,
    )?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will discard all recorded progress and issues. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let store = FileStateStore::new(config.state_file.clone());
    if store.reset()? {
        println!("Reset complete");
    } else {
        println!("Nothing to reset: no state at {}", store.path().display());
    }
    Ok(())
}
