//! Tracing initialization for the command-line binary.
//!
//! The library itself only emits events; installing a subscriber is the
//! host's decision.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global tracing subscriber once. `RUST_LOG` wins over the
/// verbosity flag when set.
pub fn init_tracing(verbose: bool) {
    INIT.call_once(|| {
        let default = if verbose { "sigforge=debug" } else { "sigforge=info" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    });
}
