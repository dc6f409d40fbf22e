use tracing_subscriber::EnvFilter;

/// Environment variable holding the tracing filter for the binary.
pub const LOG_ENV_VAR: &str = "MCPMUX_LOG";
const DEFAULT_FILTER: &str = "warn";

/// Builds the filter from `MCPMUX_LOG`, then `RUST_LOG`, then `warn`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global stderr subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
