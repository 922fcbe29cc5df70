//! Configuration for testpilot.
//!
//! Settings are read from `.testpilot/testpilot.toml` and layered
//! (file → environment → CLI). Every field is optional; a missing file means
//! all defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [paths]
//! state_file = ".testpilot/state.json"
//!
//! [phases.quality]
//! command = "python3"
//! args = ["autonomous/auto_improve.py"]
//! timeout_secs = 3600
//!
//! [phases.e2e]
//! command = "python3"
//! args = ["autonomous/e2e_tester.py"]
//! results_dir = "autonomous/logs"
//! results_pattern = "e2e_result_*.json"
//! issue_categories = ["console_errors", "css_issues"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::phase::{PhaseSpec, ResultSpec};

pub const CONFIG_DIR: &str = ".testpilot";
pub const CONFIG_FILE: &str = "testpilot.toml";
pub const DEFAULT_STATE_FILE: &str = ".testpilot/state.json";

pub const ENV_STATE_FILE: &str = "TESTPILOT_STATE_FILE";
pub const ENV_QUALITY_CMD: &str = "TESTPILOT_QUALITY_CMD";
pub const ENV_E2E_CMD: &str = "TESTPILOT_E2E_CMD";

/// File locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// State record location, relative to the project directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

/// Quality pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySection {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_quality_args")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Kill the tool after this many seconds (default: wait indefinitely)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_command() -> String {
    "python3".to_string()
}

fn default_quality_args() -> Vec<String> {
    vec!["autonomous/auto_improve.py".to_string()]
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_quality_args(),
            working_dir: None,
            timeout_secs: None,
        }
    }
}

/// E2E pass settings, including where its result artifacts land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct E2eSection {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_e2e_args")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_results_pattern")]
    pub results_pattern: String,
    #[serde(default = "default_issue_categories")]
    pub issue_categories: Vec<String>,
}

fn default_e2e_args() -> Vec<String> {
    vec!["autonomous/e2e_tester.py".to_string()]
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("autonomous/logs")
}

fn default_results_pattern() -> String {
    "e2e_result_*.json".to_string()
}

fn default_issue_categories() -> Vec<String> {
    vec!["console_errors".to_string(), "css_issues".to_string()]
}

impl Default for E2eSection {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_e2e_args(),
            working_dir: None,
            timeout_secs: None,
            results_dir: default_results_dir(),
            results_pattern: default_results_pattern(),
            issue_categories: default_issue_categories(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasesConfig {
    #[serde(default)]
    pub quality: QualitySection,
    #[serde(default)]
    pub e2e: E2eSection,
}

/// The complete testpilot.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestpilotToml {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub phases: PhasesConfig,
}

impl TestpilotToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `.testpilot/testpilot.toml` under `project_dir`, or defaults when absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize testpilot.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(state_file) = lookup(ENV_STATE_FILE).filter(|v| !v.is_empty()) {
            self.paths.state_file = Some(PathBuf::from(state_file));
        }
        if let Some(cmd) = lookup(ENV_QUALITY_CMD).filter(|v| !v.is_empty()) {
            self.phases.quality.command = cmd;
        }
        if let Some(cmd) = lookup(ENV_E2E_CMD).filter(|v| !v.is_empty()) {
            self.phases.e2e.command = cmd;
        }
    }

    /// Configuration problems that do not prevent a run.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let quality = &self.phases.quality;
        let e2e = &self.phases.e2e;

        if quality.command.trim().is_empty() {
            warnings.push("phases.quality.command is empty".to_string());
        }
        if e2e.command.trim().is_empty() {
            warnings.push("phases.e2e.command is empty".to_string());
        }
        if quality.timeout_secs == Some(0) {
            warnings.push(
                "phases.quality.timeout_secs = 0 kills the tool immediately".to_string(),
            );
        }
        if e2e.timeout_secs == Some(0) {
            warnings.push("phases.e2e.timeout_secs = 0 kills the tool immediately".to_string());
        }
        if e2e.results_pattern.trim().is_empty() {
            warnings.push(
                "phases.e2e.results_pattern is empty; no results will be found".to_string(),
            );
        } else if let Err(e) = glob::Pattern::new(&e2e.results_pattern) {
            warnings.push(format!(
                "phases.e2e.results_pattern '{}' is not a valid glob: {}",
                e2e.results_pattern, e
            ));
        }
        if e2e.issue_categories.is_empty() {
            warnings.push(
                "phases.e2e.issue_categories is empty; no issues will be recorded".to_string(),
            );
        }
        warnings
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn timeout_from_secs(secs: Option<u64>) -> Option<Duration> {
    secs.map(Duration::from_secs)
}

/// Runtime configuration: the parsed file with environment and CLI layers applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub config_file: PathBuf,
    pub state_file: PathBuf,
    pub verbose: bool,
    toml: TestpilotToml,
}

impl Config {
    /// Build from CLI arguments, reading the process environment.
    pub fn new(
        project_dir: PathBuf,
        config_file: Option<PathBuf>,
        state_file: Option<PathBuf>,
        verbose: bool,
    ) -> Result<Self> {
        Self::with_env(project_dir, config_file, state_file, verbose, |key| {
            std::env::var(key).ok()
        })
    }

    pub fn with_env<F>(
        project_dir: PathBuf,
        config_file: Option<PathBuf>,
        state_file: Option<PathBuf>,
        verbose: bool,
        lookup: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let (config_file, mut toml) = match config_file {
            Some(path) => {
                let path = resolve(&project_dir, &path);
                let toml = TestpilotToml::load(&path)?;
                (path, toml)
            }
            None => (
                project_dir.join(CONFIG_DIR).join(CONFIG_FILE),
                TestpilotToml::load_or_default(&project_dir)?,
            ),
        };
        toml.apply_env(lookup);

        let state_file = state_file
            .or_else(|| toml.paths.state_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        let state_file = resolve(&project_dir, &state_file);

        Ok(Self {
            project_dir,
            config_file,
            state_file,
            verbose,
            toml,
        })
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    /// The phase sequence: quality first, then E2E.
    pub fn phases(&self) -> Vec<PhaseSpec> {
        let quality = &self.toml.phases.quality;
        let e2e = &self.toml.phases.e2e;

        let quality_dir = quality
            .working_dir
            .as_deref()
            .map(|p| resolve(&self.project_dir, p))
            .unwrap_or_else(|| self.project_dir.clone());
        let e2e_dir = e2e
            .working_dir
            .as_deref()
            .map(|p| resolve(&self.project_dir, p))
            .unwrap_or_else(|| self.project_dir.clone());

        let results = ResultSpec {
            dir: resolve(&self.project_dir, &e2e.results_dir),
            pattern: e2e.results_pattern.clone(),
            categories: e2e.issue_categories.clone(),
        };

        vec![
            PhaseSpec::quality(&quality.command, quality.args.clone(), &quality_dir)
                .with_timeout(timeout_from_secs(quality.timeout_secs)),
            PhaseSpec::e2e(&e2e.command, e2e.args.clone(), &e2e_dir, results)
                .with_timeout(timeout_from_secs(e2e.timeout_secs)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseKind;
    use std::fs;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = TestpilotToml::parse("").unwrap();
        assert_eq!(toml.phases.quality.command, "python3");
        assert_eq!(toml.phases.quality.args, vec!["autonomous/auto_improve.py"]);
        assert_eq!(toml.phases.e2e.results_pattern, "e2e_result_*.json");
        assert_eq!(
            toml.phases.e2e.issue_categories,
            vec!["console_errors", "css_issues"]
        );
        assert!(toml.paths.state_file.is_none());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_section_keeps_other_defaults() {
        let toml = TestpilotToml::parse(
            r#"
            [phases.e2e]
            command = "node"
            args = ["e2e.js"]
            timeout_secs = 900
            "#,
        )
        .unwrap();
        assert_eq!(toml.phases.e2e.command, "node");
        assert_eq!(toml.phases.e2e.timeout_secs, Some(900));
        assert_eq!(toml.phases.e2e.results_dir, PathBuf::from("autonomous/logs"));
        assert_eq!(toml.phases.quality.command, "python3");
    }

    #[test]
    fn test_parse_invalid_toml_is_error() {
        assert!(TestpilotToml::parse("[phases.e2e\ncommand = ").is_err());
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut toml = TestpilotToml::default();
        toml.apply_env(|key| match key {
            ENV_STATE_FILE => Some("/tmp/override.json".to_string()),
            ENV_E2E_CMD => Some("npx".to_string()),
            ENV_QUALITY_CMD => Some(String::new()),
            _ => None,
        });
        assert_eq!(
            toml.paths.state_file,
            Some(PathBuf::from("/tmp/override.json"))
        );
        assert_eq!(toml.phases.e2e.command, "npx");
        // empty values are ignored
        assert_eq!(toml.phases.quality.command, "python3");
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut toml = TestpilotToml::default();
        toml.phases.quality.timeout_secs = Some(0);
        toml.phases.e2e.results_pattern = "e2e_[.json".to_string();
        toml.phases.e2e.issue_categories.clear();

        let warnings = toml.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("timeout_secs")));
        assert!(warnings.iter().any(|w| w.contains("not a valid glob")));
        assert!(warnings.iter().any(|w| w.contains("issue_categories")));
    }

    #[test]
    fn test_config_defaults_resolve_against_project_dir() {
        let dir = tempdir().unwrap();
        let config = Config::with_env(dir.path().to_path_buf(), None, None, false, no_env).unwrap();
        let project = dir.path().canonicalize().unwrap();

        assert_eq!(config.state_file, project.join(".testpilot/state.json"));
        assert_eq!(config.config_file, project.join(".testpilot/testpilot.toml"));

        let phases = config.phases();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].kind, PhaseKind::Quality);
        assert_eq!(phases[0].working_dir, project);
        assert_eq!(phases[1].kind, PhaseKind::E2e);
        let results = phases[1].result.as_ref().unwrap();
        assert_eq!(results.dir, project.join("autonomous/logs"));
    }

    #[test]
    fn test_config_reads_project_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        fs::write(
            dir.path().join(CONFIG_DIR).join(CONFIG_FILE),
            r#"
            [paths]
            state_file = "run/state.json"

            [phases.quality]
            command = "./check.sh"
            timeout_secs = 60
            working_dir = "qa"
            "#,
        )
        .unwrap();

        let config = Config::with_env(dir.path().to_path_buf(), None, None, false, no_env).unwrap();
        let project = dir.path().canonicalize().unwrap();

        assert_eq!(config.state_file, project.join("run/state.json"));
        let quality = &config.phases()[0];
        assert_eq!(quality.command, "./check.sh");
        assert_eq!(quality.timeout, Some(Duration::from_secs(60)));
        assert_eq!(quality.working_dir, project.join("qa"));
    }

    #[test]
    fn test_cli_state_file_beats_env_and_file() {
        let dir = tempdir().unwrap();
        let config = Config::with_env(
            dir.path().to_path_buf(),
            None,
            Some(PathBuf::from("cli.json")),
            false,
            |key| (key == ENV_STATE_FILE).then(|| "env.json".to_string()),
        )
        .unwrap();
        let project = dir.path().canonicalize().unwrap();
        assert_eq!(config.state_file, project.join("cli.json"));
    }

    #[test]
    fn test_env_state_file_beats_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        fs::write(
            dir.path().join(CONFIG_DIR).join(CONFIG_FILE),
            "[paths]\nstate_file = \"file.json\"\n",
        )
        .unwrap();
        let config = Config::with_env(dir.path().to_path_buf(), None, None, false, |key| {
            (key == ENV_STATE_FILE).then(|| "env.json".to_string())
        })
        .unwrap();
        let project = dir.path().canonicalize().unwrap();
        assert_eq!(config.state_file, project.join("env.json"));
    }

    #[test]
    fn test_explicit_missing_config_file_is_error() {
        let dir = tempdir().unwrap();
        let result = Config::with_env(
            dir.path().to_path_buf(),
            Some(PathBuf::from("nope.toml")),
            None,
            false,
            no_env,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_DIR).join(CONFIG_FILE);
        let mut toml = TestpilotToml::default();
        toml.phases.e2e.timeout_secs = Some(120);
        toml.save(&path).unwrap();

        let loaded = TestpilotToml::load(&path).unwrap();
        assert_eq!(loaded.phases.e2e.timeout_secs, Some(120));
        assert_eq!(loaded.phases.quality.args, toml.phases.quality.args);
    }
}
