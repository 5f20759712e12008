//! Tracing subscriber setup.
//!
//! Filter comes from `RUST_LOG` when set, else `info`. Output goes to stderr
//! so CLI commands keep stdout for their own output.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `format` is `pretty` or `json`. Calling
/// this twice is harmless; the second call is ignored.
pub fn init(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if format == "json" {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.with_target(false).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
