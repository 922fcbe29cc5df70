use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::debug;

use crate::errors::CollectError;

/// Issues reported by one result artifact, grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseResult {
    pub source: Option<PathBuf>,
    pub categories: BTreeMap<String, Vec<String>>,
}

impl PhaseResult {
    /// Build from a parsed artifact. Every top-level array becomes a category;
    /// string items are kept verbatim, anything else is rendered as compact JSON.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let categories = object
            .iter()
            .filter_map(|(key, value)| {
                let items = value.as_array()?;
                let issues = items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                Some((key.clone(), issues))
            })
            .collect();
        Some(Self {
            source: None,
            categories,
        })
    }

    pub fn with_category(mut self, name: &str, issues: Vec<String>) -> Self {
        self.categories.insert(name.to_string(), issues);
        self
    }

    /// Flatten the named categories, in the given order. Missing ones are skipped.
    pub fn flatten(&self, categories: &[String]) -> Vec<String> {
        categories
            .iter()
            .filter_map(|name| self.categories.get(name))
            .flat_map(|issues| issues.iter().cloned())
            .collect()
    }
}

/// Finds and parses the newest result artifact a phase left behind.
pub trait ResultCollector: Send + Sync {
    /// `Ok(None)` when nothing matches; a phase may legitimately report nothing.
    fn latest_result(&self, dir: &Path, pattern: &str)
    -> Result<Option<PhaseResult>, CollectError>;
}

/// Filesystem collector: glob match, newest modification time wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobResultCollector;

impl GlobResultCollector {
    pub fn new() -> Self {
        Self
    }

    /// Newest match by mtime; equal mtimes fall back to the larger path.
    pub fn latest_artifact(
        &self,
        dir: &Path,
        pattern: &str,
    ) -> Result<Option<PathBuf>, CollectError> {
        let escaped_dir = glob::Pattern::escape(&dir.to_string_lossy());
        let full_pattern = Path::new(&escaped_dir)
            .join(pattern)
            .to_string_lossy()
            .to_string();
        let entries = glob::glob(&full_pattern).map_err(|e| CollectError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let latest = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|path| {
                let meta = path.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                Some((modified, path))
            })
            .max();

        Ok(latest.map(|(_, path)| path))
    }
}

impl ResultCollector for GlobResultCollector {
    fn latest_result(
        &self,
        dir: &Path,
        pattern: &str,
    ) -> Result<Option<PhaseResult>, CollectError> {
        let Some(path) = self.latest_artifact(dir, pattern)? else {
            debug!("No result artifact matching {} in {}", pattern, dir.display());
            return Ok(None);
        };
        debug!("Reading result artifact {}", path.display());

        let content = std::fs::read_to_string(&path).map_err(|source| CollectError::Read {
            path: path.clone(),
            source,
        })?;
        let value: Value =
            serde_json::from_str(&content).map_err(|e| CollectError::Malformed {
                path: path.clone(),
                message: e.to_string(),
            })?;
        let mut result = PhaseResult::from_value(&value).ok_or_else(|| CollectError::Malformed {
            path: path.clone(),
            message: "expected a JSON object at the top level".to_string(),
        })?;
        result.source = Some(path);
        Ok(Some(result))
    }
}

/// Hands out preset results in order, one per call; `None` once exhausted.
#[derive(Default)]
pub struct StaticResultCollector {
    queue: Mutex<VecDeque<Result<Option<PhaseResult>, CollectError>>>,
    calls: Mutex<usize>,
}

impl StaticResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, result: Option<PhaseResult>) -> Self {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(result));
        self
    }

    pub fn push_error(self, error: CollectError) -> Self {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ResultCollector for StaticResultCollector {
    fn latest_result(
        &self,
        _dir: &Path,
        _pattern: &str,
    ) -> Result<Option<PhaseResult>, CollectError> {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Ok(None))
    }
}
