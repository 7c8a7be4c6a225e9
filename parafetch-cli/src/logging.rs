//! Log output setup.

use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor `-v` say otherwise.
const DEFAULT_LOG_TARGETS: &str = "parafetch=info,parafetch_cli=info";

/// Filter directives for a `-v` count.
pub fn directives(verbose: u8) -> &'static str {
    match verbose {
        0 => DEFAULT_LOG_TARGETS,
        1 => "parafetch=debug,parafetch_cli=debug",
        _ => "parafetch=trace,parafetch_cli=trace",
    }
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .try_init();
}
