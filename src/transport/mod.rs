//! Remote API transport
//!
//! The retrieval engine talks to the remote mailbox only through [`MessageApi`].
//! [`GmailClient`] is the production implementation over the Gmail REST API;
//! tests substitute deterministic in-memory implementations.

pub mod batch;
mod gmail;

pub use gmail::GmailClient;

use crate::error::Result;
use crate::types::{FetchOutcome, MessageId, Page};
use async_trait::async_trait;

/// Operations the retrieval engine needs from the remote API
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Make sure a usable credential is at hand, renewing it if needed
    ///
    /// Called once before a run touches the output log, so a credential that
    /// cannot be renewed fails the run without side effects.
    ///
    /// # Errors
    ///
    /// Auth errors from the credential source.
    async fn check_credentials(&self) -> Result<()> {
        Ok(())
    }

    /// List one page of message identifiers
    ///
    /// `cursor` is the previous page's continuation token (`None` for the first
    /// page). At most `max_results` identifiers are returned.
    ///
    /// # Errors
    ///
    /// Any failure of the listing round trip. Retryability is carried by the error.
    async fn list_messages(&self, cursor: Option<&str>, max_results: usize) -> Result<Page>;

    /// Fetch the full records for `ids` in a single combined round trip
    ///
    /// Per-item errors are returned as [`FetchOutcome::Failure`] entries; only a
    /// failure of the combined call itself is returned as `Err`.
    async fn batch_get(&self, ids: &[MessageId]) -> Result<Vec<FetchOutcome>>;
}
