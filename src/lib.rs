//! # gmail-dl
//!
//! Export a Gmail mailbox to a local JSON Lines log, then summarize it.
//!
//! ## Design Philosophy
//!
//! - **Streaming** - Records are appended and synced one by one, never buffered for the run
//! - **Strictly ordered** - Pages are listed, fetched and written one after another
//! - **Partial-failure tolerant** - A message that cannot be fetched is logged and skipped
//! - **Sensible defaults** - An empty configuration file is a working configuration
//!
//! ## Quick Start
//!
//! ```no_run
//! use gmail_dl::{Config, FileTokenProvider, GmailClient, Retriever};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(Path::new("gmail-dl.toml"))?;
//!     let tokens = FileTokenProvider::load(&config.auth, reqwest::Client::new()).await?;
//!     let api = GmailClient::new(&config.api, Arc::new(tokens))?;
//!
//!     let summary = Retriever::new(Arc::new(api), &config).run().await?;
//!     println!("{} records in {}", summary.records, summary.output_path.display());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Header and size reports over a finished log
pub mod analysis;
/// OAuth access tokens
pub mod auth;
/// Configuration types
pub mod config;
/// Retrieval control loop
pub mod coordinator;
/// Error types
pub mod error;
/// Batched record fetching
pub mod fetcher;
/// Listing pagination
pub mod pager;
/// Per-page progress output
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// JSON Lines output log
pub mod sink;
/// Remote API seam and the Gmail REST client
pub mod transport;
/// Core types
pub mod types;

pub use auth::{FileTokenProvider, StaticToken, TokenProvider};
pub use config::Config;
pub use coordinator::Retriever;
pub use error::{AuthError, Error, Result, ToExitCode};
pub use transport::{GmailClient, MessageApi};
pub use types::{FetchFailure, FetchOutcome, MessageId, Page, Record, RunSummary};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Returns early without cancelling if the token is cancelled by someone else.
///
/// # Example
///
/// ```no_run
/// use gmail_dl::{Config, Retriever, cancel_on_signal};
/// # use gmail_dl::MessageApi;
/// # use std::sync::Arc;
/// # async fn run(api: Arc<dyn MessageApi>) -> gmail_dl::Result<()> {
/// let retriever = Retriever::new(api, &Config::default());
/// tokio::spawn(cancel_on_signal(retriever.cancellation_token()));
/// let _summary = retriever.run().await?;
/// # Ok(())
/// # }
/// ```
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = wait_for_signal() => {
            tracing::info!("stopping retrieval, records written so far are kept");
            token.cancel();
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
