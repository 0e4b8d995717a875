//! `tracing` setup.
//!
//! Library code only emits events; binaries and tests decide whether to install a subscriber.

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, in `EnvFilter` directive syntax.
pub const FILTER_ENV: &str = "DISTARRAY_LOG";

static INIT: Once = Once::new();

/// Installs a global fmt subscriber filtered by `DISTARRAY_LOG` (default `warn`).
///
/// Safe to call more than once; only the first call has an effect. If another subscriber is
/// already installed, it is left in place.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(Level::WARN.into())
            .with_env_var(FILTER_ENV)
            .from_env_lossy();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
