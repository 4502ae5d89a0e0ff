use tracing_subscriber::EnvFilter;

/// Stderr subscriber filtered by `RUST_LOG` (defaults to `info`); stdout stays free for summaries.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
