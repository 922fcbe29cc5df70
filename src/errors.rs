//! Typed error hierarchy for the testpilot orchestrator.
//!
//! One enum per subsystem:
//! - `StateError`: state store read/parse/write failures (fatal)
//! - `RunnerError`: child process spawn and stream failures (phase-local)
//! - `CollectError`: result artifact discovery and parsing (phase-local)
//! - `ConfigError`: testpilot.toml loading
//! - `OrchestratorError`: failures that abort a whole run

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the durable state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file at {path} is not valid state JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize orchestration state: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write state file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State store rejected write: {0}")]
    Unavailable(String),
}

/// Errors from launching or streaming an external process.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from locating or parsing a phase result artifact.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Invalid result pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Failed to read result artifact at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed result artifact at {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

/// Errors from loading testpilot.toml.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors that terminate an orchestration run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("Executable for phase {phase} does not exist: {path}")]
    MissingExecutable { phase: String, path: PathBuf },
}
