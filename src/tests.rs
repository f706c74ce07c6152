
#[cfg(feature = "loom")]
mod models;

/// Installs a test subscriber printing the events enabled by `RUST_LOG`.
#[cfg(not(feature = "loom"))]
pub(crate) fn trace_init() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
