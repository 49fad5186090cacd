// Logging setup for binaries and examples built on parley
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`.
///
/// Output goes to stderr so stdout stays free for a [`StreamTransport`]
/// bound to stdio. Returns `false` if a global subscriber was already set.
///
/// [`StreamTransport`]: crate::StreamTransport
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
