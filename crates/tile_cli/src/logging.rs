use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `RUST_LOG` is only honoured together with `--verbose`, so a
/// stray environment variable cannot flood the JSON output of a quiet run.
pub fn init(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
