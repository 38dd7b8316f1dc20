//! Retrieval coordinator: the run's control loop
//!
//! A run walks the page sequence strictly in order. Each page is listed, its
//! identifiers are fetched in one batch, and the resulting records are appended
//! to the output log before the next page is requested, so at most one page of
//! identifiers and outcomes is held in memory.
//!
//! ```text
//! Listing ──page──▶ Fetching ──outcomes──▶ Delivering ──▶ Listing
//!    │                  │
//!    └─end──▶ Done      └─fatal──▶ Aborted
//! ```
//!
//! Both terminal states close the sink; records written before an abort stay
//! in the log.

use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::fetcher::BatchFetcher;
use crate::pager::PageIterator;
use crate::progress::ProgressReporter;
use crate::retry::with_retry;
use crate::sink::JsonlSink;
use crate::transport::MessageApi;
use crate::types::{FetchOutcome, Page, RunSummary};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

enum State {
    Listing,
    Fetching(Page),
    Delivering {
        listed: usize,
        outcomes: Vec<FetchOutcome>,
    },
    Done,
}

/// Drives one retrieval run from the first listing call to a closed output log
pub struct Retriever {
    api: Arc<dyn MessageApi>,
    page_size: usize,
    retry: RetryConfig,
    output_path: PathBuf,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl Retriever {
    /// Create a retriever from the run configuration
    pub fn new(api: Arc<dyn MessageApi>, config: &Config) -> Self {
        Self {
            api,
            page_size: config.api.page_size,
            retry: config.retry.clone(),
            output_path: config.output_path(),
            progress: ProgressReporter::stdout(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the progress reporter
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Observe an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the run
    ///
    /// # Errors
    ///
    /// Credential failures (reported before the output log is touched), failure
    /// to create the output log, listing or batch failures that outlive the retry
    /// policy, sink write failures and cancellation. Once created, the output log
    /// is closed in every case.
    pub async fn run(mut self) -> Result<RunSummary> {
        tracing::info!(
            output = %self.output_path.display(),
            page_size = self.page_size,
            "starting retrieval"
        );

        // The previous log is only truncated once the credential is known to work
        until_cancelled(&self.cancel, self.api.check_credentials()).await?;

        let mut sink = JsonlSink::create(&self.output_path).await?;
        let outcome = self.drive(&mut sink).await;
        let closed = sink.close().await;
        let snapshot = self.progress.finish();

        match outcome {
            Ok(()) => {
                closed?;
                tracing::info!(
                    pages = snapshot.pages,
                    records = snapshot.records,
                    failures = snapshot.failures,
                    "retrieval complete"
                );
                Ok(RunSummary {
                    pages: snapshot.pages,
                    listed: snapshot.listed,
                    records: snapshot.records,
                    failures: snapshot.failures,
                    elapsed: snapshot.elapsed,
                    output_path: self.output_path,
                })
            }
            Err(e) => {
                if let Err(close_err) = closed {
                    tracing::warn!(error = %close_err, "failed to close output log after abort");
                }
                tracing::error!(
                    error = %e,
                    records_kept = sink.records_written(),
                    "retrieval aborted"
                );
                Err(e)
            }
        }
    }

    async fn drive(&mut self, sink: &mut JsonlSink) -> Result<()> {
        let api = self.api.as_ref();
        let pages = PageIterator::new(api, self.page_size);
        let fetcher = BatchFetcher::new(api, self.page_size);
        let retry = &self.retry;
        let cancel = &self.cancel;

        let mut state = State::Listing;
        loop {
            state = match state {
                State::Listing => {
                    let pages = &pages;
                    let next = until_cancelled(
                        cancel,
                        with_retry(retry, "list messages", move || pages.next_page()),
                    )
                    .await?;
                    match next {
                        Some(page) => State::Fetching(page),
                        None => State::Done,
                    }
                }
                State::Fetching(page) => {
                    let listed = page.ids.len();
                    let ids = &page.ids;
                    let fetcher = &fetcher;
                    let outcomes = until_cancelled(
                        cancel,
                        with_retry(retry, "batch get", move || fetcher.fetch(ids)),
                    )
                    .await?;
                    State::Delivering { listed, outcomes }
                }
                State::Delivering { listed, outcomes } => {
                    let mut records = 0usize;
                    let mut failures = 0usize;
                    for outcome in outcomes {
                        match outcome {
                            FetchOutcome::Record(record) => {
                                sink.append(&record).await?;
                                records += 1;
                            }
                            FetchOutcome::Failure(failure) => {
                                tracing::warn!(
                                    id = %failure.id,
                                    status = ?failure.status,
                                    error = %failure.message,
                                    "failed to fetch message, skipping"
                                );
                                failures += 1;
                            }
                        }
                    }
                    self.progress.page_completed(listed, records, failures);
                    State::Listing
                }
                State::Done => return Ok(()),
            };
        }
    }
}

/// Resolve `operation`, or fail with [`Error::Cancelled`] as soon as `cancel` fires
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = operation => result,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FetchFailure, MessageId, Record};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Listing serves `pages` in order; batch calls return records for every id
    /// except those in `fail`, and error out on the batch numbers in `broken_batches`
    struct MockMailbox {
        pages: Vec<Page>,
        fail: Vec<&'static str>,
        broken_batches: Vec<usize>,
        list_calls: Mutex<usize>,
        batch_calls: Mutex<usize>,
    }

    impl MockMailbox {
        fn new(pages: Vec<Page>) -> Self {
            Self {
                pages,
                fail: vec![],
                broken_batches: vec![],
                list_calls: Mutex::new(0),
                batch_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageApi for MockMailbox {
        async fn list_messages(&self, cursor: Option<&str>, _max: usize) -> Result<Page> {
            *self.list_calls.lock().unwrap() += 1;
            let index = match cursor {
                None => 0,
                Some(c) => c.trim_start_matches('p').parse::<usize>().unwrap(),
            };
            Ok(self.pages[index].clone())
        }

        async fn batch_get(&self, ids: &[MessageId]) -> Result<Vec<FetchOutcome>> {
            let call = {
                let mut calls = self.batch_calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if self.broken_batches.contains(&call) {
                return Err(Error::Api {
                    status: 400,
                    message: "batch rejected".into(),
                });
            }
            Ok(ids
                .iter()
                .map(|id| {
                    if self.fail.iter().any(|f| *f == id.as_str()) {
                        FetchOutcome::Failure(FetchFailure {
                            id: id.clone(),
                            status: Some(404),
                            message: "not found".into(),
                        })
                    } else {
                        FetchOutcome::Record(Record(json!({"id": id.as_str(), "sizeEstimate": 10})))
                    }
                })
                .collect())
        }
    }

    /// Pages whose cursors are "p1", "p2", ...; the last page has none
    fn chain(pages: &[&[&str]]) -> Vec<Page> {
        pages
            .iter()
            .enumerate()
            .map(|(i, ids)| Page {
                ids: ids.iter().map(|id| MessageId::from(*id)).collect(),
                next_cursor: (i + 1 < pages.len()).then(|| format!("p{}", i + 1)),
            })
            .collect()
    }

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.output.folder = dir.join("out");
        config.retry = RetryConfig {
            max_attempts: 0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            jitter: false,
        };
        config
    }

    fn quiet(retriever: Retriever) -> Retriever {
        retriever.with_progress(ProgressReporter::with_writer(Box::new(std::io::sink())))
    }

    fn lines(config: &Config) -> Vec<String> {
        std::fs::read_to_string(config.output_path())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn writes_every_record_in_page_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let api = Arc::new(MockMailbox::new(chain(&[&["a", "b"], &["c"]])));

        let summary = quiet(Retriever::new(api.clone(), &config)).run().await.unwrap();

        assert_eq!(summary.pages, 2);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.failures, 0);
        assert_eq!(
            lines(&config),
            vec![
                r#"{"id":"a","sizeEstimate":10}"#,
                r#"{"id":"b","sizeEstimate":10}"#,
                r#"{"id":"c","sizeEstimate":10}"#,
            ]
        );
        assert_eq!(*api.list_calls.lock().unwrap(), 2, "no listing after the last page");
    }

    #[tokio::test]
    async fn per_item_failures_are_skipped_without_abort() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let api = Arc::new(MockMailbox {
            fail: vec!["b"],
            ..MockMailbox::new(chain(&[&["a", "b", "c"], &["d"]]))
        });

        let summary = quiet(Retriever::new(api, &config)).run().await.unwrap();

        assert_eq!(summary.records, 3);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.listed, 4);
        assert_eq!(lines(&config).len(), 3);
    }

    #[tokio::test]
    async fn batch_failure_keeps_earlier_pages_and_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let api = Arc::new(MockMailbox {
            broken_batches: vec![2],
            ..MockMailbox::new(chain(&[&["a", "b"], &["c", "d"]]))
        });

        let err = quiet(Retriever::new(api, &config)).run().await.unwrap_err();

        assert!(matches!(err, Error::Api { status: 400, .. }));
        assert_eq!(
            lines(&config),
            vec![
                r#"{"id":"a","sizeEstimate":10}"#,
                r#"{"id":"b","sizeEstimate":10}"#,
            ]
        );
    }

    #[tokio::test]
    async fn empty_mailbox_creates_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let api = Arc::new(MockMailbox::new(chain(&[&[]])));

        let summary = quiet(Retriever::new(api, &config)).run().await.unwrap();

        assert_eq!(summary.records, 0);
        assert!(config.output_path().exists());
        assert_eq!(std::fs::read_to_string(config.output_path()).unwrap(), "");
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_listing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let api = Arc::new(MockMailbox::new(chain(&[&["a"]])));

        let retriever = quiet(Retriever::new(api.clone(), &config));
        retriever.cancellation_token().cancel();
        let err = retriever.run().await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(*api.list_calls.lock().unwrap(), 0);
        assert!(!config.output_path().exists(), "log is never opened");
    }

    #[tokio::test]
    async fn progress_line_per_page() {
        #[derive(Clone, Default)]
        struct Buf(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for Buf {
            fn write(&mut self, b: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(b);
                Ok(b.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let api = Arc::new(MockMailbox::new(chain(&[&["a"], &["b"], &["c"]])));
        let buf = Buf::default();

        let _summary = Retriever::new(api, &config)
            .with_progress(ProgressReporter::with_writer(Box::new(buf.clone())))
            .run()
            .await
            .unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("Got 1 messages").count(), 3);
        assert!(text.contains("(total=3, elapsed_time="));
    }
}
