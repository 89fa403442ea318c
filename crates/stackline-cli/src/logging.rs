use tracing_subscriber::EnvFilter;

/// Filter directives are read from this variable.
pub const LOG_ENV: &str = "STACKLINE_LOG";

/// Install the stderr subscriber. `verbose` overrides `STACKLINE_LOG` with
/// `debug`; without either, `info` is used.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // A subscriber may already be installed when running in-process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
