//! Running counters for a retrieval run
//!
//! Purely observational: write failures on the output stream are ignored so a
//! closed console can never abort a run.

use std::io::Write;
use std::time::{Duration, Instant};

/// Point-in-time view of the counters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Pages completed
    pub pages: u64,
    /// Identifiers listed so far
    pub listed: u64,
    /// Records written so far
    pub records: u64,
    /// Per-item failures so far
    pub failures: u64,
    /// Time since the reporter was created
    pub elapsed: Duration,
}

/// Emits one line per completed page
pub struct ProgressReporter {
    started: Instant,
    pages: u64,
    listed: u64,
    records: u64,
    failures: u64,
    out: Box<dyn Write + Send>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("pages", &self.pages)
            .field("records", &self.records)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::stdout()
    }
}

impl ProgressReporter {
    /// Report to standard output
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    /// Report to an arbitrary writer
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            started: Instant::now(),
            pages: 0,
            listed: 0,
            records: 0,
            failures: 0,
            out,
        }
    }

    /// Current counter values
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            pages: self.pages,
            listed: self.listed,
            records: self.records,
            failures: self.failures,
            elapsed: self.started.elapsed(),
        }
    }

    /// Record a finished page and print its progress line
    ///
    /// The console line counts records written, not identifiers listed: `Got N`
    /// is this page's records and `total` the running record count. Listed and
    /// failed counts go to the tracing event only, so a page with per-item
    /// failures prints a smaller `N` than its listing size.
    pub fn page_completed(&mut self, listed: usize, records: usize, failures: usize) {
        self.pages += 1;
        self.listed += listed as u64;
        self.records += records as u64;
        self.failures += failures as u64;

        let elapsed = self.started.elapsed();
        tracing::info!(
            page = self.pages,
            listed,
            records,
            failures,
            total_records = self.records,
            elapsed_ms = elapsed.as_millis() as u64,
            "page completed"
        );

        let line = format!(
            "{}: Got {} messages (total={}, elapsed_time={:.2}s)",
            chrono::Local::now().format("%H:%M:%S"),
            records,
            self.records,
            elapsed.as_secs_f64()
        );
        self.emit(&line);
    }

    /// Print the end-of-run summary line
    pub fn finish(&mut self) -> ProgressSnapshot {
        let snapshot = self.snapshot();
        let line = format!(
            "Saved {} messages from {} pages ({} failed) in {:.2}s",
            snapshot.records,
            snapshot.pages,
            snapshot.failures,
            snapshot.elapsed.as_secs_f64()
        );
        self.emit(&line);
        snapshot
    }

    fn emit(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            tracing::debug!(error = %e, "progress output unavailable");
        }
    }
}
