use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static LOGGING_INIT: OnceCell<()> = OnceCell::new();

/// Installs a `tracing` subscriber reading its filter from `RUST_LOG`,
/// falling back to `info`. Idempotent: the scheduler binary, and every
/// integration test, can call this unconditionally.
pub fn setup_logging() {
    LOGGING_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .try_init();
    });
}

/// Same as `setup_logging`, kept as a distinctly named entry point so test
/// modules read as intentionally opting into log output rather than
/// accidentally depending on a side effect of the production init path.
pub fn setup_logging_for_tests() {
    setup_logging();
}
