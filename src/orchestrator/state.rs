use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::StateError;
use crate::phase::PhaseKind;
use crate::util::write_file_atomic;

/// The single persisted record of orchestration progress.
///
/// Completion flags only ever go from `false` to `true`, and the issue and fix
/// lists are append-only: a resumed run never drops what an earlier run found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub started_at: DateTime<Utc>,
    #[serde(default, alias = "quality_test_complete")]
    pub quality_phase_complete: bool,
    #[serde(default, alias = "e2e_test_complete")]
    pub e2e_phase_complete: bool,
    #[serde(default, alias = "e2e_issues_found")]
    pub issues_found: Vec<String>,
    /// Written by external remediation tooling; carried through untouched.
    #[serde(default)]
    pub fixes_applied: Vec<String>,
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl OrchestrationState {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            quality_phase_complete: false,
            e2e_phase_complete: false,
            issues_found: Vec::new(),
            fixes_applied: Vec::new(),
        }
    }

    pub fn is_complete(&self, kind: PhaseKind) -> bool {
        match kind {
            PhaseKind::Quality => self.quality_phase_complete,
            PhaseKind::E2e => self.e2e_phase_complete,
        }
    }

    pub fn mark_complete(&mut self, kind: PhaseKind) {
        match kind {
            PhaseKind::Quality => self.quality_phase_complete = true,
            PhaseKind::E2e => self.e2e_phase_complete = true,
        }
    }

    pub fn append_issues<I>(&mut self, issues: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let before = self.issues_found.len();
        self.issues_found.extend(issues);
        self.issues_found.len() - before
    }

    pub fn completed_phase_count(&self) -> usize {
        [self.quality_phase_complete, self.e2e_phase_complete]
            .iter()
            .filter(|done| **done)
            .count()
    }
}

/// Durable storage for the orchestration record.
pub trait StateStore: Send + Sync {
    /// Load the record, or a fresh one when nothing has been persisted yet.
    fn load(&self) -> Result<OrchestrationState, StateError>;

    /// Replace the persisted record in full.
    fn save(&self, state: &OrchestrationState) -> Result<(), StateError>;

    /// Where the record lives, for log and report lines.
    fn location(&self) -> String;
}

/// JSON file-backed store with atomic replacement on save.
pub struct FileStateStore {
    state_file: PathBuf,
}

impl FileStateStore {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    pub fn exists(&self) -> bool {
        self.state_file.exists()
    }

    /// Delete the record so the next run starts from scratch.
    pub fn reset(&self) -> Result<bool, StateError> {
        if !self.state_file.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.state_file).map_err(|source| StateError::Write {
            path: self.state_file.clone(),
            source,
        })?;
        Ok(true)
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<OrchestrationState, StateError> {
        let content = match fs::read_to_string(&self.state_file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(OrchestrationState::default());
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: self.state_file.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&content).map_err(|source| StateError::Parse {
            path: self.state_file.clone(),
            source,
        })
    }

    fn save(&self, state: &OrchestrationState) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;
        write_file_atomic(&self.state_file, json.as_bytes()).map_err(|source| {
            StateError::Write {
                path: self.state_file.clone(),
                source,
            }
        })
    }

    fn location(&self) -> String {
        self.state_file.display().to_string()
    }
}

/// In-memory store, used where the filesystem is not wanted.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    state: Option<OrchestrationState>,
    /// `Some(n)`: accept n more saves, then fail
    remaining_saves: Option<usize>,
    save_count: usize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: OrchestrationState) -> Self {
        let store = Self::default();
        store.lock().state = Some(state);
        store
    }

    /// Make every subsequent `save` fail.
    pub fn fail_saves(&self, fail: bool) {
        self.lock().remaining_saves = fail.then_some(0);
    }

    /// Accept `count` more saves, then fail every one after that.
    pub fn fail_after(&self, count: usize) {
        self.lock().remaining_saves = Some(count);
    }

    pub fn snapshot(&self) -> Option<OrchestrationState> {
        self.lock().state.clone()
    }

    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // The guarded data is plain values; a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<OrchestrationState, StateError> {
        Ok(self.lock().state.clone().unwrap_or_default())
    }

    fn save(&self, state: &OrchestrationState) -> Result<(), StateError> {
        let mut inner = self.lock();
        match &mut inner.remaining_saves {
            Some(0) => {
                return Err(StateError::Unavailable("memory store is read-only".into()));
            }
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        inner.state = Some(state.clone());
        inner.save_count += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}
