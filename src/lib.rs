pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod phase;
pub mod report;
pub mod telemetry;
pub mod util;
