//! Phase sequencing state machine.
//!
//! Runs each `PhaseSpec` in order against one `OrchestrationState`:
//! skip it when its policy allows, otherwise launch it, judge the outcome,
//! merge any collected issues, and persist. Phase-level failures are logged
//! and recorded; only state store failures abort the run.

use tracing::{error, info, warn};

use super::collector::ResultCollector;
use super::runner::{LineSink, ProcessRunner, RunOutcome};
use super::state::{OrchestrationState, StateStore};
use crate::errors::OrchestratorError;
use crate::phase::{CompletionPolicy, PhaseKind, PhaseSpec};
use crate::report;

/// Where the orchestrator is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Pending(PhaseKind),
    Done(PhaseKind),
    Reported,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Init => write!(f, "Init"),
            Stage::Pending(PhaseKind::Quality) => write!(f, "QualityPending"),
            Stage::Done(PhaseKind::Quality) => write!(f, "QualityDone"),
            Stage::Pending(PhaseKind::E2e) => write!(f, "E2EPending"),
            Stage::Done(PhaseKind::E2e) => write!(f, "E2EDone"),
            Stage::Reported => write!(f, "Reported"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseStatus {
    /// Already complete on load; the tool was not launched.
    Skipped,
    Completed { exit_code: Option<i32> },
    Failed { reason: String },
}

/// What happened to one phase during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutcome {
    pub kind: PhaseKind,
    pub status: PhaseStatus,
    pub issues_added: usize,
}

impl PhaseOutcome {
    fn skipped(kind: PhaseKind) -> Self {
        Self {
            kind,
            status: PhaseStatus::Skipped,
            issues_added: 0,
        }
    }

    fn failed(kind: PhaseKind, reason: String) -> Self {
        Self {
            kind,
            status: PhaseStatus::Failed { reason },
            issues_added: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, PhaseStatus::Failed { .. })
    }
}

/// Result of a full orchestration run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: OrchestrationState,
    /// Every stage entered, in order
    pub stages: Vec<Stage>,
    pub outcomes: Vec<PhaseOutcome>,
    pub report: Vec<String>,
}

impl RunSummary {
    pub fn outcome(&self, kind: PhaseKind) -> Option<&PhaseOutcome> {
        self.outcomes.iter().find(|o| o.kind == kind)
    }
}

pub struct Orchestrator<'a> {
    store: &'a dyn StateStore,
    runner: &'a dyn ProcessRunner,
    collector: &'a dyn ResultCollector,
    sink: &'a dyn LineSink,
    phases: Vec<PhaseSpec>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn StateStore,
        runner: &'a dyn ProcessRunner,
        collector: &'a dyn ResultCollector,
        sink: &'a dyn LineSink,
        phases: Vec<PhaseSpec>,
    ) -> Self {
        Self {
            store,
            runner,
            collector,
            sink,
            phases,
        }
    }

    /// Run every phase once, then report.
    pub async fn run(&self) -> Result<RunSummary, OrchestratorError> {
        let mut state = self.store.load()?;
        self.preflight(&state)?;
        // First save pins `started_at` and proves the store is writable.
        self.store.save(&state)?;

        let mut stages = vec![Stage::Init];
        let mut outcomes = Vec::with_capacity(self.phases.len());
        let total = self.phases.len();

        for (index, phase) in self.phases.iter().enumerate() {
            info!("[{}/{}] {}", index + 1, total, phase.kind.label());
            let outcome = self.run_phase(phase, &mut state, &mut stages).await;
            if outcome.status != PhaseStatus::Skipped {
                self.store.save(&state)?;
            }
            outcomes.push(outcome);
        }

        let report = report::render(&state, &self.store.location());
        for line in &report {
            info!("{}", line);
        }
        stages.push(Stage::Reported);

        Ok(RunSummary {
            state,
            stages,
            outcomes,
            report,
        })
    }

    /// An explicit executable path that does not exist can never succeed, so
    /// it stops the run before anything is launched.
    fn preflight(&self, state: &OrchestrationState) -> Result<(), OrchestratorError> {
        for phase in &self.phases {
            if phase.skip_if_complete && state.is_complete(phase.kind) {
                continue;
            }
            if let Some(path) = phase.explicit_executable()
                && !path.exists()
            {
                return Err(OrchestratorError::MissingExecutable {
                    phase: phase.kind.to_string(),
                    path,
                });
            }
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        phase: &PhaseSpec,
        state: &mut OrchestrationState,
        stages: &mut Vec<Stage>,
    ) -> PhaseOutcome {
        let kind = phase.kind;

        if phase.skip_if_complete && state.is_complete(kind) {
            info!(phase = %kind, "{} already complete, skipping", kind.label());
            stages.push(Stage::Done(kind));
            return PhaseOutcome::skipped(kind);
        }

        stages.push(Stage::Pending(kind));
        info!(phase = %kind, "{} starting: {}", kind.label(), phase.display_command());

        let run = match self.runner.run(phase, self.sink).await {
            Ok(RunOutcome::TimedOut { after }) => {
                let reason = format!("timed out after {:.1}s", after.as_secs_f64());
                warn!(phase = %kind, "{} {}", kind.label(), reason);
                return PhaseOutcome::failed(kind, reason);
            }
            Ok(run) => run,
            Err(e) => {
                error!(phase = %kind, "{} could not run: {}", kind.label(), e);
                return PhaseOutcome::failed(kind, e.to_string());
            }
        };

        if phase.completion == CompletionPolicy::OnSuccess && !run.success() {
            let reason = match run.exit_code() {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            };
            warn!(phase = %kind, "{} failed: {}", kind.label(), reason);
            return PhaseOutcome::failed(kind, reason);
        }

        let issues_added = match &phase.result {
            Some(spec) => match self.collector.latest_result(&spec.dir, &spec.pattern) {
                Ok(Some(result)) => {
                    let added = state.append_issues(result.flatten(&spec.categories));
                    info!(
                        phase = %kind,
                        "Merged {} issue(s) from {}",
                        added,
                        result
                            .source
                            .as_deref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| "result".to_string())
                    );
                    added
                }
                Ok(None) => {
                    info!(
                        phase = %kind,
                        "No result artifact matching {} in {}",
                        spec.pattern,
                        spec.dir.display()
                    );
                    0
                }
                Err(e) => {
                    warn!(phase = %kind, "Ignoring result artifact: {}", e);
                    0
                }
            },
            None => 0,
        };

        state.mark_complete(kind);
        stages.push(Stage::Done(kind));
        match run.exit_code() {
            Some(0) => info!(phase = %kind, "{} complete", kind.label()),
            code => info!(
                phase = %kind,
                "{} complete (tool exit: {})",
                kind.label(),
                code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
            ),
        }

        PhaseOutcome {
            kind,
            status: PhaseStatus::Completed {
                exit_code: run.exit_code(),
            },
            issues_added,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CollectError, RunnerError};
    use crate::orchestrator::collector::{PhaseResult, StaticResultCollector};
    use crate::orchestrator::runner::CollectingSink;
    use crate::orchestrator::state::MemoryStateStore;
    use crate::phase::ResultSpec;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    enum Scripted {
        Exit(i32),
        SpawnFails,
        TimesOut,
    }

    /// Runner double: records invocations and replays scripted outcomes.
    struct ScriptedRunner {
        script: HashMap<PhaseKind, Scripted>,
        calls: Mutex<Vec<PhaseKind>>,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self {
                script: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn on(mut self, kind: PhaseKind, outcome: Scripted) -> Self {
            self.script.insert(kind, outcome);
            self
        }

        fn calls(&self) -> Vec<PhaseKind> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(
            &self,
            phase: &PhaseSpec,
            sink: &dyn LineSink,
        ) -> Result<RunOutcome, RunnerError> {
            self.calls.lock().unwrap().push(phase.kind);
            sink.line(phase.kind, &format!("running {}", phase.kind));
            match self.script.get(&phase.kind).unwrap_or(&Scripted::Exit(0)) {
                Scripted::Exit(code) => Ok(RunOutcome::Exited {
                    code: Some(*code),
                    duration: Duration::from_millis(5),
                }),
                Scripted::SpawnFails => Err(RunnerError::Spawn {
                    command: phase.command.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
                }),
                Scripted::TimesOut => Ok(RunOutcome::TimedOut {
                    after: Duration::from_secs(1),
                }),
            }
        }
    }

    fn phases() -> Vec<PhaseSpec> {
        let dir = Path::new("/proj");
        vec![
            PhaseSpec::quality("python3", vec!["auto_improve.py".into()], dir),
            PhaseSpec::e2e(
                "python3",
                vec!["e2e_tester.py".into()],
                dir,
                ResultSpec {
                    dir: PathBuf::from("/proj/logs"),
                    pattern: "e2e_result_*.json".into(),
                    categories: vec!["console_errors".into(), "css_issues".into()],
                },
            ),
        ]
    }

    fn issues(items: &[&str]) -> Option<PhaseResult> {
        Some(
            PhaseResult::default()
                .with_category("console_errors", items.iter().map(|s| s.to_string()).collect()),
        )
    }

    #[tokio::test]
    async fn test_fresh_run_completes_both_phases() {
        let store = MemoryStateStore::new();
        let runner = ScriptedRunner::new();
        let collector = StaticResultCollector::new().push(Some(
            PhaseResult::default()
                .with_category("css_issues", vec!["overlap".into()])
                .with_category("console_errors", vec!["boom".into()]),
        ));
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        assert_eq!(runner.calls(), vec![PhaseKind::Quality, PhaseKind::E2e]);
        assert!(summary.state.quality_phase_complete);
        assert!(summary.state.e2e_phase_complete);
        assert_eq!(summary.state.issues_found, vec!["boom", "overlap"]);
        assert_eq!(
            summary.stages,
            vec![
                Stage::Init,
                Stage::Pending(PhaseKind::Quality),
                Stage::Done(PhaseKind::Quality),
                Stage::Pending(PhaseKind::E2e),
                Stage::Done(PhaseKind::E2e),
                Stage::Reported,
            ]
        );
        assert_eq!(store.snapshot().unwrap(), summary.state);
        assert_eq!(sink.lines(), vec!["running quality", "running e2e"]);
    }

    #[tokio::test]
    async fn test_completed_quality_phase_is_not_rerun() {
        let mut prior = OrchestrationState::default();
        prior.quality_phase_complete = true;
        let store = MemoryStateStore::with_state(prior);
        let runner = ScriptedRunner::new();
        let collector = StaticResultCollector::new();
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        assert_eq!(runner.calls(), vec![PhaseKind::E2e]);
        assert_eq!(
            summary.outcome(PhaseKind::Quality).unwrap().status,
            PhaseStatus::Skipped
        );
        assert_eq!(summary.stages[1], Stage::Done(PhaseKind::Quality));
    }

    #[tokio::test]
    async fn test_issues_accumulate_across_runs() {
        let store = MemoryStateStore::new();
        let runner = ScriptedRunner::new();
        let sink = CollectingSink::new();

        let first = StaticResultCollector::new().push(issues(&["A"]));
        Orchestrator::new(&store, &runner, &first, &sink, phases())
            .run()
            .await
            .unwrap();

        let second = StaticResultCollector::new().push(issues(&["B"]));
        let summary = Orchestrator::new(&store, &runner, &second, &sink, phases())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.state.issues_found, vec!["A", "B"]);
        // quality ran once, e2e twice
        assert_eq!(
            runner.calls(),
            vec![PhaseKind::Quality, PhaseKind::E2e, PhaseKind::E2e]
        );
    }

    #[tokio::test]
    async fn test_duplicate_issues_are_kept() {
        let store = MemoryStateStore::new();
        let runner = ScriptedRunner::new();
        let sink = CollectingSink::new();

        for _ in 0..2 {
            let collector = StaticResultCollector::new().push(issues(&["same"]));
            Orchestrator::new(&store, &runner, &collector, &sink, phases())
                .run()
                .await
                .unwrap();
        }

        assert_eq!(store.snapshot().unwrap().issues_found, vec!["same", "same"]);
    }

    #[tokio::test]
    async fn test_absent_result_still_completes_e2e() {
        let store = MemoryStateStore::new();
        let runner = ScriptedRunner::new();
        let collector = StaticResultCollector::new().push(None);
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        assert!(summary.state.e2e_phase_complete);
        assert!(summary.state.issues_found.is_empty());
        assert_eq!(collector.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_result_completes_without_issues() {
        let store = MemoryStateStore::new();
        let runner = ScriptedRunner::new();
        let collector = StaticResultCollector::new().push_error(CollectError::Malformed {
            path: PathBuf::from("/proj/logs/e2e_result_1.json"),
            message: "EOF while parsing".into(),
        });
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        assert!(summary.state.e2e_phase_complete);
        assert!(summary.state.issues_found.is_empty());
        assert!(!summary.outcome(PhaseKind::E2e).unwrap().is_failure());
    }

    #[tokio::test]
    async fn test_e2e_nonzero_exit_still_collects() {
        let store = MemoryStateStore::new();
        let runner = ScriptedRunner::new().on(PhaseKind::E2e, Scripted::Exit(1));
        let collector = StaticResultCollector::new().push(issues(&["Page Error: x"]));
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        assert!(summary.state.e2e_phase_complete);
        assert_eq!(summary.state.issues_found, vec!["Page Error: x"]);
        assert_eq!(
            summary.outcome(PhaseKind::E2e).unwrap().status,
            PhaseStatus::Completed { exit_code: Some(1) }
        );
    }

    #[tokio::test]
    async fn test_quality_failure_does_not_block_e2e() {
        let store = MemoryStateStore::new();
        let runner = ScriptedRunner::new().on(PhaseKind::Quality, Scripted::Exit(2));
        let collector = StaticResultCollector::new();
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        assert!(!summary.state.quality_phase_complete);
        assert!(summary.state.e2e_phase_complete);
        assert!(summary.outcome(PhaseKind::Quality).unwrap().is_failure());
        assert_eq!(
            summary.stages,
            vec![
                Stage::Init,
                Stage::Pending(PhaseKind::Quality),
                Stage::Pending(PhaseKind::E2e),
                Stage::Done(PhaseKind::E2e),
                Stage::Reported,
            ]
        );
        assert!(summary.report.contains(&"Quality test: not complete".to_string()));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_phase_local() {
        let store = MemoryStateStore::new();
        let runner = ScriptedRunner::new()
            .on(PhaseKind::Quality, Scripted::SpawnFails)
            .on(PhaseKind::E2e, Scripted::SpawnFails);
        let collector = StaticResultCollector::new().push(issues(&["never read"]));
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        assert!(!summary.state.quality_phase_complete);
        assert!(!summary.state.e2e_phase_complete);
        assert_eq!(collector.calls(), 0);
        assert!(summary.outcomes.iter().all(PhaseOutcome::is_failure));
    }

    #[tokio::test]
    async fn test_timeout_is_phase_failure() {
        let store = MemoryStateStore::new();
        let runner = ScriptedRunner::new().on(PhaseKind::E2e, Scripted::TimesOut);
        let collector = StaticResultCollector::new().push(issues(&["stale"]));
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        assert!(summary.state.quality_phase_complete);
        assert!(!summary.state.e2e_phase_complete);
        assert_eq!(collector.calls(), 0);
    }

    #[tokio::test]
    async fn test_e2e_flag_stays_true_after_later_failure() {
        let mut prior = OrchestrationState::default();
        prior.quality_phase_complete = true;
        prior.e2e_phase_complete = true;
        prior.issues_found = vec!["old".into()];
        let store = MemoryStateStore::with_state(prior);
        let runner = ScriptedRunner::new().on(PhaseKind::E2e, Scripted::SpawnFails);
        let collector = StaticResultCollector::new();
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        assert!(summary.state.e2e_phase_complete);
        assert_eq!(summary.state.issues_found, vec!["old"]);
    }

    #[tokio::test]
    async fn test_fixes_applied_carried_through_run() {
        let mut prior = OrchestrationState::default();
        prior.fixes_applied = vec!["patched selector".into(), "bumped timeout".into()];
        let store = MemoryStateStore::with_state(prior);
        let runner = ScriptedRunner::new();
        let collector = StaticResultCollector::new().push(issues(&["new issue"]));
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        let expected = vec!["patched selector", "bumped timeout"];
        assert_eq!(summary.state.fixes_applied, expected);
        assert_eq!(store.snapshot().unwrap().fixes_applied, expected);
        assert!(summary.report.contains(&"Fixes applied: 2".to_string()));
    }

    #[tokio::test]
    async fn test_crash_after_quality_resumes_at_e2e() {
        let store = MemoryStateStore::new();
        // initial save + quality save succeed, then the "crash"
        store.fail_after(2);
        let runner = ScriptedRunner::new();
        let collector = StaticResultCollector::new();
        let sink = CollectingSink::new();

        let err = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::State(_)));
        assert!(store.snapshot().unwrap().quality_phase_complete);

        store.fail_saves(false);
        let restarted = ScriptedRunner::new();
        let collector = StaticResultCollector::new().push(issues(&["found on resume"]));
        let summary = Orchestrator::new(&store, &restarted, &collector, &sink, phases())
            .run()
            .await
            .unwrap();

        assert_eq!(restarted.calls(), vec![PhaseKind::E2e]);
        assert!(summary.state.quality_phase_complete);
        assert!(summary.state.e2e_phase_complete);
        assert_eq!(summary.state.issues_found, vec!["found on resume"]);
    }

    #[tokio::test]
    async fn test_unwritable_store_aborts_before_any_phase() {
        let store = MemoryStateStore::new();
        store.fail_saves(true);
        let runner = ScriptedRunner::new();
        let collector = StaticResultCollector::new();
        let sink = CollectingSink::new();

        let err = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::State(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_mid_run_stops_later_phases() {
        let store = MemoryStateStore::new();
        store.fail_after(1);
        let runner = ScriptedRunner::new();
        let collector = StaticResultCollector::new();
        let sink = CollectingSink::new();

        let result = Orchestrator::new(&store, &runner, &collector, &sink, phases())
            .run()
            .await;

        assert!(result.is_err());
        assert_eq!(runner.calls(), vec![PhaseKind::Quality]);
    }

    #[tokio::test]
    async fn test_missing_explicit_executable_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut phases = phases();
        phases[0] = PhaseSpec::quality("./bin/not-there", vec![], dir.path());
        let store = MemoryStateStore::new();
        let runner = ScriptedRunner::new();
        let collector = StaticResultCollector::new();
        let sink = CollectingSink::new();

        let err = Orchestrator::new(&store, &runner, &collector, &sink, phases)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::MissingExecutable { .. }));
        assert!(runner.calls().is_empty());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_executable_ignored_for_skipped_phase() {
        let dir = tempfile::tempdir().unwrap();
        let mut phases = phases();
        phases[0] = PhaseSpec::quality("./bin/not-there", vec![], dir.path());
        let mut prior = OrchestrationState::default();
        prior.quality_phase_complete = true;
        let store = MemoryStateStore::with_state(prior);
        let runner = ScriptedRunner::new();
        let collector = StaticResultCollector::new();
        let sink = CollectingSink::new();

        let summary = Orchestrator::new(&store, &runner, &collector, &sink, phases)
            .run()
            .await
            .unwrap();

        assert_eq!(runner.calls(), vec![PhaseKind::E2e]);
        assert!(summary.state.e2e_phase_complete);
    }

    #[test]
    fn test_stage_display_names() {
        assert_eq!(Stage::Init.to_string(), "Init");
        assert_eq!(Stage::Pending(PhaseKind::Quality).to_string(), "QualityPending");
        assert_eq!(Stage::Done(PhaseKind::E2e).to_string(), "E2EDone");
        assert_eq!(Stage::Reported.to_string(), "Reported");
    }
}
