//! Structured logging setup.
//!
//! Initializes a `tracing` subscriber on stderr with:
//! - `RUST_LOG` environment filter support (overrides the verbosity flags)
//! - JSON output when `RUST_LOG_FORMAT=json`
//! - Human-readable output otherwise
//!
//! Output of the program under test is logged under the `put` target.

use tracing_subscriber::EnvFilter;

/// Default filter directive for a verbosity level.
///
/// `-1` is quiet, `0` the default, and each step above adds detail.
pub fn default_directive(verbosity: i8) -> &'static str {
    match verbosity {
        i8::MIN..=-1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize the global tracing subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(verbosity: i8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let is_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if is_json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
