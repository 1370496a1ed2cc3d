// packages/engine/src/observability.rs
//! Diagnostics setup
//!
//! Output goes to stderr so it never mixes with a host program's stdout.
//! Nothing is installed unless debugging was requested.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "debug";

/// Install the stderr subscriber when `debug` is set
///
/// Returns whether a subscriber was installed. A host that already installed
/// one keeps it.
pub fn init_tracing(debug: bool, filter: Option<&str>) -> bool {
    if !debug {
        return false;
    }

    let filter = filter
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
