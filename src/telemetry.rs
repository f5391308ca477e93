//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Default filter for a verbosity level (`-v` count); `quiet` wins
pub fn default_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "chansync=warn";
    }
    match verbosity {
        0 => "chansync=info",
        1 => "chansync=debug",
        _ => "chansync=trace",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity flags.
/// Safe to call more than once; later calls are ignored.
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, quiet)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity > 1)
        .with_writer(std::io::stderr)
        .try_init();
}
