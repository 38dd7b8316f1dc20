//! Deterministic in-memory mailbox implementing `MessageApi`

use async_trait::async_trait;
use gmail_dl::types::{FetchFailure, FetchOutcome, MessageId, Page, Record};
use gmail_dl::{AuthError, Error, MessageApi, Result};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// Mailbox whose listing serves fixed pages with cursors "page-1", "page-2", ...
///
/// Knobs:
/// - `missing`: ids answered with a per-item 404
/// - `broken_page`: batch call for this page (0-based) fails outright
/// - `flaky_listings`: the first N listing calls fail with 503
/// - `stall_page`: batch call for this page sleeps for a minute
/// - `revoked`: the credential check fails as if renewal was refused
#[derive(Default)]
pub struct ScriptedMailbox {
    pages: Vec<Vec<String>>,
    missing: HashSet<String>,
    broken_page: Option<usize>,
    flaky_listings: usize,
    stall_page: Option<usize>,
    revoked: bool,
    list_calls: Mutex<Vec<Option<String>>>,
    batch_calls: Mutex<Vec<usize>>,
}

impl ScriptedMailbox {
    /// Mailbox serving `pages` in order
    pub fn new(pages: &[&[&str]]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|p| p.iter().map(|id| id.to_string()).collect())
                .collect(),
            ..Self::default()
        }
    }

    /// Answer `ids` with a per-item failure
    pub fn with_missing(mut self, ids: &[&str]) -> Self {
        self.missing = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    /// Fail the whole batch call for page `page`
    pub fn with_broken_page(mut self, page: usize) -> Self {
        self.broken_page = Some(page);
        self
    }

    /// Fail the first `count` listing calls with a transient status
    pub fn with_flaky_listings(mut self, count: usize) -> Self {
        self.flaky_listings = count;
        self
    }

    /// Stall the batch call for page `page`
    pub fn with_stall_on_page(mut self, page: usize) -> Self {
        self.stall_page = Some(page);
        self
    }

    /// Refuse the credential before any call is made
    pub fn with_revoked_credentials(mut self) -> Self {
        self.revoked = true;
        self
    }

    /// Cursor of every listing call so far
    pub fn list_calls(&self) -> Vec<Option<String>> {
        self.list_calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Size of every batch call so far
    pub fn batch_calls(&self) -> Vec<usize> {
        self.batch_calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Full record the mailbox returns for `id`
    pub fn record(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "threadId": format!("t-{id}"),
            "labelIds": ["INBOX"],
            "snippet": format!("snippet of {id}"),
            "sizeEstimate": 1024 * id.len(),
            "payload": {
                "headers": [
                    {"name": "From", "value": "sender@example.com"},
                    {"name": "Subject", "value": format!("Message {id}")},
                ]
            }
        })
    }

    fn page_of(&self, id: &MessageId) -> Option<usize> {
        self.pages
            .iter()
            .position(|p| p.iter().any(|candidate| candidate == id.as_str()))
    }
}

#[async_trait]
impl MessageApi for ScriptedMailbox {
    async fn check_credentials(&self) -> Result<()> {
        if self.revoked {
            return Err(AuthError::RefreshRejected {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.into(),
            }
            .into());
        }
        Ok(())
    }

    async fn list_messages(&self, cursor: Option<&str>, _max_results: usize) -> Result<Page> {
        let call = {
            let mut calls = self.list_calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(cursor.map(str::to_string));
            calls.len()
        };
        if call <= self.flaky_listings {
            return Err(Error::Api {
                status: 503,
                message: "backend unavailable".into(),
            });
        }

        let index = match cursor {
            None => 0,
            Some(c) => c
                .strip_prefix("page-")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| Error::Api {
                    status: 400,
                    message: format!("invalid pageToken {c}"),
                })?,
        };
        let ids = self.pages.get(index).cloned().unwrap_or_default();
        Ok(Page {
            ids: ids.into_iter().map(MessageId).collect(),
            next_cursor: (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1)),
        })
    }

    async fn batch_get(&self, ids: &[MessageId]) -> Result<Vec<FetchOutcome>> {
        self.batch_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ids.len());

        let page = ids.first().and_then(|id| self.page_of(id));
        if page.is_some() && page == self.stall_page {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if page.is_some() && page == self.broken_page {
            return Err(Error::Api {
                status: 400,
                message: "malformed batch".into(),
            });
        }

        Ok(ids
            .iter()
            .map(|id| {
                if self.missing.contains(id.as_str()) {
                    FetchOutcome::Failure(FetchFailure {
                        id: id.clone(),
                        status: Some(404),
                        message: "Requested entity was not found.".into(),
                    })
                } else {
                    FetchOutcome::Record(Record(Self::record(id.as_str())))
                }
            })
            .collect())
    }
}
