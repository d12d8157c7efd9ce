//! Logging configuration module

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging with optional verbose mode
///
/// `RUST_LOG` wins when set; otherwise `--verbose` or the `VERBOSE`
/// environment variable selects `debug`, and everything else runs at `info`.
/// Logs go to stderr so console output stays clean on stdout.
pub fn init(verbose: bool) {
    let filter = default_filter(verbose || std::env::var("VERBOSE").is_ok());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // A second init (e.g. from tests) must not abort the process.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(env_filter)
        .try_init();
}

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "agent_mesh=debug,info"
    } else {
        "info"
    }
}
