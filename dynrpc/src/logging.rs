//! Diagnostics go to stderr so stdout only ever carries response data.
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

const FILTER_ENV: &str = "DYNRPC_LOG";

/// Installs the global subscriber.
///
/// `-v` flags win over `DYNRPC_LOG`; without either only warnings are shown.
pub fn init(verbosity: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(filters(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn filters(verbosity: u8) -> EnvFilter {
    let level = match verbosity {
        0 => None,
        1 => Some(LevelFilter::DEBUG),
        _ => Some(LevelFilter::TRACE),
    };

    match level {
        Some(level) => EnvFilter::builder()
            .with_default_directive(level.into())
            .parse_lossy(""),
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .with_env_var(FILTER_ENV)
            .from_env_lossy(),
    }
}
