//! Log output for tests, filtered through `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install a test writer subscriber once per process.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_line_number(false)
        .with_file(false)
        .try_init();
}
