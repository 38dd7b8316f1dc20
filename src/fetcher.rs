//! Batch fetcher: one combined round trip per batch of identifiers

use crate::error::Result;
use crate::transport::MessageApi;
use crate::types::{FetchFailure, FetchOutcome, MessageId};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;

/// Resolves identifiers to records through the remote batch primitive
///
/// Batches never exceed `ceiling` sub-requests; a longer input is split into
/// ceiling-sized chunks sent one after another. The output always holds exactly
/// one outcome per input identifier.
pub struct BatchFetcher<'a> {
    api: &'a dyn MessageApi,
    ceiling: usize,
}

impl<'a> BatchFetcher<'a> {
    /// Create a fetcher sending at most `ceiling` sub-requests per round trip
    pub fn new(api: &'a dyn MessageApi, ceiling: usize) -> Self {
        Self {
            api,
            ceiling: ceiling.max(1),
        }
    }

    /// Fetch every identifier, isolating per-item failures
    ///
    /// # Errors
    ///
    /// A failure of a combined call itself. Chunks after the failing one are not sent.
    pub async fn fetch(&self, ids: &[MessageId]) -> Result<Vec<FetchOutcome>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let chunks: Vec<Vec<FetchOutcome>> = stream::iter(ids.chunks(self.ceiling))
            .then(|chunk| self.fetch_chunk(chunk))
            .try_collect()
            .await?;

        Ok(chunks.into_iter().flatten().collect())
    }

    async fn fetch_chunk(&self, chunk: &[MessageId]) -> Result<Vec<FetchOutcome>> {
        let outcomes = self.api.batch_get(chunk).await?;
        Ok(reconcile(chunk, outcomes))
    }
}

fn outcome_id(outcome: &FetchOutcome) -> Option<&str> {
    match outcome {
        FetchOutcome::Record(record) => record.id(),
        FetchOutcome::Failure(failure) => Some(failure.id.as_str()),
    }
}

/// Force exactly one outcome per requested identifier
///
/// Outcomes for identifiers that were not requested (or answered twice) are
/// dropped; requested identifiers left without an answer get a synthesized
/// failure. Records without an `id` field are kept and credited to the earliest
/// unanswered request.
fn reconcile(requested: &[MessageId], outcomes: Vec<FetchOutcome>) -> Vec<FetchOutcome> {
    let mut pending: HashMap<&str, usize> = HashMap::new();
    for id in requested {
        *pending.entry(id.as_str()).or_default() += 1;
    }

    let mut kept = Vec::with_capacity(requested.len());
    let mut anonymous = 0usize;
    for outcome in outcomes {
        match outcome_id(&outcome) {
            Some(id) => match pending.get_mut(id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    kept.push(outcome);
                }
                _ => {
                    tracing::warn!(id, "dropping batch outcome for an identifier that was not pending");
                }
            },
            None => {
                anonymous += 1;
                kept.push(outcome);
            }
        }
    }

    for id in requested {
        let Some(remaining) = pending.get_mut(id.as_str()) else {
            continue;
        };
        if *remaining == 0 {
            continue;
        }
        *remaining -= 1;
        if anonymous > 0 {
            anonymous -= 1;
            continue;
        }
        tracing::warn!(id = %id, "identifier missing from batch response");
        kept.push(FetchOutcome::Failure(FetchFailure {
            id: id.clone(),
            status: None,
            message: "missing from batch response".to_string(),
        }));
    }

    if anonymous > 0 {
        tracing::warn!(extra = anonymous, "batch returned more records than requested");
    }

    kept
}
