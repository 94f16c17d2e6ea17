// Boundaries the resolver crawls through.
//
// ListingSource yields pages of listing rows for a time window.
// ThreadExpander turns a thread ref into its ordered messages.
//
// Production wires in the archive client (see archive_bridge); tests use the
// in-memory MockListing and MockExpander from `testing`.

use std::sync::Arc;

use async_trait::async_trait;

use threadmark_common::{Cursor, ListingEntry, ThreadMessage, ThreadRef, TimeWindow};

use crate::error::{ExpandError, FetchError};

/// One page of listing rows plus the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub entries: Vec<ListingEntry>,
    /// `None` once the window is exhausted.
    pub next: Option<Cursor>,
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch the page at `cursor`, or the first page of `window` when `None`.
    async fn next_page(
        &self,
        window: &TimeWindow,
        cursor: Option<&Cursor>,
    ) -> Result<ListingPage, FetchError>;
}

#[async_trait]
pub trait ThreadExpander: Send + Sync {
    /// Every message of the thread, ordered by position. Position 0 is the
    /// candidate origin.
    async fn expand(&self, thread_ref: &ThreadRef) -> Result<Vec<ThreadMessage>, ExpandError>;
}

#[async_trait]
impl<T: ListingSource + ?Sized> ListingSource for Arc<T> {
    async fn next_page(
        &self,
        window: &TimeWindow,
        cursor: Option<&Cursor>,
    ) -> Result<ListingPage, FetchError> {
        (**self).next_page(window, cursor).await
    }
}

#[async_trait]
impl<T: ThreadExpander + ?Sized> ThreadExpander for Arc<T> {
    async fn expand(&self, thread_ref: &ThreadRef) -> Result<Vec<ThreadMessage>, ExpandError> {
        (**self).expand(thread_ref).await
    }
}
