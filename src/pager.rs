//! Page iterator over the paginated listing call

use crate::error::{Error, Result};
use crate::transport::MessageApi;
use crate::types::Page;
use std::collections::HashSet;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    Start,
    Next(String),
    Exhausted,
}

/// Lazy, finite sequence of listing pages
///
/// Each [`next_page`](PageIterator::next_page) call issues exactly one listing
/// request; once a page arrives without a continuation cursor the iterator is
/// exhausted and further calls return `None` without touching the transport.
/// Errors are returned as-is: retrying is the caller's decision, and a failed
/// call leaves the cursor unchanged so the same page can be requested again.
///
/// Calls take `&self` and are serialized internally, so the iterator can be
/// driven from inside a retry closure.
pub struct PageIterator<'a> {
    api: &'a dyn MessageApi,
    page_size: usize,
    state: Mutex<ChainState>,
}

#[derive(Debug)]
struct ChainState {
    cursor: Cursor,
    seen: HashSet<String>,
}

impl<'a> PageIterator<'a> {
    /// Create an iterator requesting at most `page_size` identifiers per page
    pub fn new(api: &'a dyn MessageApi, page_size: usize) -> Self {
        Self {
            api,
            page_size,
            state: Mutex::new(ChainState {
                cursor: Cursor::Start,
                seen: HashSet::new(),
            }),
        }
    }

    /// True once the final page has been returned
    pub async fn is_exhausted(&self) -> bool {
        self.state.lock().await.cursor == Cursor::Exhausted
    }

    /// Fetch the next page, or `None` at the end of the sequence
    ///
    /// # Errors
    ///
    /// Transport errors from the listing call, and [`Error::Pagination`] if the
    /// server hands back a cursor that was already followed in this run.
    pub async fn next_page(&self) -> Result<Option<Page>> {
        let mut state = self.state.lock().await;
        let cursor = match &state.cursor {
            Cursor::Exhausted => return Ok(None),
            Cursor::Start => None,
            Cursor::Next(token) => Some(token.as_str()),
        };

        let page = self.api.list_messages(cursor, self.page_size).await?;

        state.cursor = match &page.next_cursor {
            None => Cursor::Exhausted,
            Some(next) => {
                if !state.seen.insert(next.clone()) {
                    return Err(Error::Pagination(format!(
                        "server repeated continuation cursor '{}'",
                        next
                    )));
                }
                Cursor::Next(next.clone())
            }
        };

        Ok(Some(page))
    }
}
