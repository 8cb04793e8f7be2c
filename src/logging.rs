use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Diagnostics are appended to `log_path`;
/// if it cannot be opened they go to stdout instead. `RUST_LOG` overrides
/// the default `info` filter.
pub fn init(log_path: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        Err(err) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            warn!(
                path = %log_path.display(),
                error = %err,
                "cannot open log file, logging to stdout"
            );
        }
    }
}
