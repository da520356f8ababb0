//! Tracing subscriber setup for applications that do not install their own

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a compact fmt subscriber filtered by `RUST_LOG`.
///
/// Without `RUST_LOG` only warnings are shown; `verbose` adds debug events
/// from this crate. Does nothing if a global subscriber is already set.
pub fn init(verbose: bool) {
    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    if verbose {
        if let Ok(directive) = "azlogin=debug".parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// [`init`] with verbosity taken from `AZURE_ADAL_LOGGING_ENABLED`
pub fn init_from_env() {
    init(LoggingConfig::from_env().verbose);
}
