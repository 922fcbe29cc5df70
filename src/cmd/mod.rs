//! CLI command implementations.
//!
//! | Module   | Commands handled     |
//! |----------|----------------------|
//! | `run`    | `Run` (default)      |
//! | `state`  | `Status`, `Reset`    |
//! | `config` | `Config`             |

pub mod config;
pub mod run;
pub mod state;

pub use config::cmd_config;
pub use run::run_orchestrator;
pub use state::{cmd_reset, cmd_status};
