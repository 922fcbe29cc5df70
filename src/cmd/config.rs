//! Configuration view and validation commands: `testpilot config`.

use anyhow::Result;
use std::path::{Path, PathBuf};
use testpilot::config::{CONFIG_DIR, CONFIG_FILE, Config, TestpilotToml};

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, project_dir: PathBuf, command: Option<ConfigCommands>) -> Result<()> {
    if let Some(ConfigCommands::Init) = command {
        return init_config(cli, &project_dir);
    }

    let config = Config::new(
        project_dir,
        cli.config.clone(),
        cli.state_file.clone(),
        cli.verbose,
    )?;

    match command {
        Some(ConfigCommands::Validate) => validate_config(&config),
        _ => show_config(&config),
    }
    Ok(())
}

fn show_config(config: &Config) {
    println!();
    println!("Testpilot Configuration");
    println!("=======================");
    println!();
    if config.config_file.exists() {
        println!("Config file: {}", config.config_file.display());
    } else {
        println!(
            "No testpilot.toml at {} (using defaults)",
            config.config_file.display()
        );
    }
    println!("State file:  {}", config.state_file.display());
    println!();

    println!("Effective phases (with env/CLI overrides):");
    for phase in config.phases() {
        println!("  [{}]", phase.kind);
        println!("    command          = \"{}\"", phase.display_command());
        println!("    working_dir      = \"{}\"", phase.working_dir.display());
        match phase.timeout {
            Some(timeout) => println!("    timeout          = {}s", timeout.as_secs()),
            None => println!("    timeout          = none"),
        }
        println!("    skip_if_complete = {}", phase.skip_if_complete);
        if let Some(result) = &phase.result {
            println!(
                "    results          = \"{}\"",
                result.dir.join(&result.pattern).display()
            );
            println!("    categories       = {:?}", result.categories);
        }
    }
    println!();
}

fn validate_config(config: &Config) {
    println!();
    println!("Validating configuration...");
    println!();

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("Configuration is valid.");
    } else {
        println!("Configuration warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!();
}

fn init_config(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => project_dir.join(path),
        None => project_dir.join(CONFIG_DIR).join(CONFIG_FILE),
    };
    if config_path.exists() {
        println!("testpilot.toml already exists at {}", config_path.display());
        println!("Delete it first if you want to recreate it.");
        return Ok(());
    }

    TestpilotToml::default().save(&config_path)?;

    println!("Created testpilot.toml at {}", config_path.display());
    println!();
    println!("You can now customize:");
    println!("  - [paths] state_file");
    println!("  - [phases.quality] command, args, timeout_secs");
    println!("  - [phases.e2e] command, args, results_dir, results_pattern, issue_categories");
    println!();
    Ok(())
}
