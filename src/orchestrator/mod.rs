pub mod collector;
pub mod engine;
pub mod runner;
pub mod state;

pub use collector::{GlobResultCollector, PhaseResult, ResultCollector, StaticResultCollector};
pub use engine::{Orchestrator, PhaseOutcome, PhaseStatus, RunSummary, Stage};
pub use runner::{
    CollectingSink, LineSink, ProcessRunner, RunOutcome, TokioProcessRunner, TracingSink,
};
pub use state::{FileStateStore, MemoryStateStore, OrchestrationState, StateStore};
