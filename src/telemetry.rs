//! Console logging setup.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the stdout tracing subscriber (if one is not already active).
///
/// Every line carries a timestamp, the level and the emitting target.
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `verbose`.
pub fn init_tracing(verbose: bool) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stdout)
        .try_init();

    let _ = TRACING_INIT.set(());
}
