mod cli;

pub use cli::Cli;
use tracing_subscriber::EnvFilter;

/// Logs to stderr, filtered by `RUST_LOG` and defaulting to `info`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
