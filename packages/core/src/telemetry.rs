// ABOUTME: Tracing subscriber bootstrap
// ABOUTME: Installs an fmt subscriber filtered by RUST_LOG, safe to call more than once

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `default_directive`
/// (for example `"info"` or `"corral_router=debug"`). Returns `false` if a
/// subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}
