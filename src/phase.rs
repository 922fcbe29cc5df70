//! Phase descriptors for the testpilot orchestrator.
//!
//! The quality and end-to-end passes share one execution mechanism and differ
//! only in policy, so both are expressed as `PhaseSpec` values:
//! - which command to launch and where
//! - whether a completed phase is skipped on the next run
//! - what counts as "complete"
//! - whether a result artifact is expected afterwards

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The two phases the orchestrator knows about, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Quality,
    E2e,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Quality => "quality",
            PhaseKind::E2e => "e2e",
        }
    }

    /// Human-readable label used in logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            PhaseKind::Quality => "Quality test",
            PhaseKind::E2e => "E2E test",
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a finished child process counts as a completed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Complete only on exit status 0.
    OnSuccess,
    /// Complete once the tool ran to termination, whatever its exit status.
    OnTermination,
}

/// Where a phase leaves its structured result artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSpec {
    pub dir: PathBuf,
    /// Glob pattern matched against file names inside `dir`
    pub pattern: String,
    /// Issue categories flattened into the state, in this order
    pub categories: Vec<String>,
}

/// A single phase invocation descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSpec {
    pub kind: PhaseKind,
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Upper bound on the child's runtime; `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub skip_if_complete: bool,
    pub completion: CompletionPolicy,
    pub result: Option<ResultSpec>,
}

impl PhaseSpec {
    /// Quality pass: expensive and idempotent, so skipped once it has succeeded.
    pub fn quality(command: &str, args: Vec<String>, working_dir: &Path) -> Self {
        Self {
            kind: PhaseKind::Quality,
            command: command.to_string(),
            args,
            working_dir: working_dir.to_path_buf(),
            timeout: None,
            skip_if_complete: true,
            completion: CompletionPolicy::OnSuccess,
            result: None,
        }
    }

    /// E2E pass: re-run on every invocation to catch regressions.
    pub fn e2e(command: &str, args: Vec<String>, working_dir: &Path, result: ResultSpec) -> Self {
        Self {
            kind: PhaseKind::E2e,
            command: command.to_string(),
            args,
            working_dir: working_dir.to_path_buf(),
            timeout: None,
            skip_if_complete: false,
            completion: CompletionPolicy::OnTermination,
            result: Some(result),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line as shown in logs.
    pub fn display_command(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }

    /// Resolved executable path when the command is given as an explicit
    /// path rather than a bare name looked up on `PATH`.
    pub fn explicit_executable(&self) -> Option<PathBuf> {
        let has_separator = self.command.contains('/') || self.command.contains('\\');
        if !has_separator {
            return None;
        }
        let path = Path::new(&self.command);
        Some(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        })
    }
}
