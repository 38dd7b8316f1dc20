//! Configuration helpers for integration tests

use gmail_dl::config::{Config, RetryConfig};
use std::path::Path;
use std::time::Duration;

/// Config writing into `dir`, with millisecond retry delays
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.output.folder = dir.join("output");
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Lines of the output log, without trailing newlines
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
        .lines()
        .map(str::to_string)
        .collect()
}

/// Progress reporter that discards its output
pub fn silent_progress() -> gmail_dl::progress::ProgressReporter {
    gmail_dl::progress::ProgressReporter::with_writer(Box::new(std::io::sink()))
}
