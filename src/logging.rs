//! Logging setup for the CLI
//!
//! Configures a `tracing` fmt subscriber filtered by `TIDES_LOG`/`RUST_LOG`
//! or the `--log` flag.

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, writing to stderr so stdout stays JSON
///
/// `filter` uses `EnvFilter` syntax (`info`, `tidestomes=debug,reqwest=warn`).
/// An unparseable filter falls back to `info`. Calling this twice is a no-op.
pub fn init(filter: &str) {
    let (env_filter, rejected) = match EnvFilter::try_new(filter) {
        Ok(f) => (f, false),
        Err(_) => (EnvFilter::new("info"), true),
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if rejected {
        warn!(filter, "invalid log filter, using info");
    }
    if installed {
        info!("Logging initialized with filter: {}", filter);
    }
}
