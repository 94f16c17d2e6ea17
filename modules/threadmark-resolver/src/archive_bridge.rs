// Bridge between pgarchive-client and the resolver's crawl traits.
//
// Implements ListingSource and ThreadExpander on ArchiveClient. Listing
// pages are addressed by a `since` minute stamp, which doubles as the opaque
// cursor. Every message page carries its whole thread in the thread
// selector, so expanding a thread is one page fetch, plus one more when the
// page isn't the thread's first message and the origin's details are wanted.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::debug;

use pgarchive_client::{ArchiveClient, ArchiveError, ListingRow, MessagePage};
use threadmark_common::{
    clean_subject, is_reply_marked, Attachment, Cursor, ListingEntry, MessageId, ThreadMessage,
    ThreadRef, TimeWindow,
};

use crate::error::{ExpandError, FetchError};
use crate::traits::{ListingPage, ListingSource, ThreadExpander};

const CURSOR_FORMAT: &str = "%Y%m%d%H%M";

impl From<ArchiveError> for FetchError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Network(message) => FetchError::Network { message },
            ArchiveError::Api { status, message } => {
                FetchError::network(format!("HTTP {status}: {}", message.trim()))
            }
            ArchiveError::Parse { url, reason } => FetchError::malformed(format!("{url}: {reason}")),
            ArchiveError::InvalidUrl(url) => FetchError::malformed(format!("invalid URL {url}")),
        }
    }
}

fn cursor_time(cursor: &Cursor) -> Result<NaiveDateTime, FetchError> {
    NaiveDateTime::parse_from_str(&format!("{}00", cursor.as_str()), "%Y%m%d%H%M%S")
        .map_err(|e| FetchError::malformed(format!("bad listing cursor {cursor}: {e}")))
}

fn listing_entry(row: ListingRow) -> ListingEntry {
    let subject = clean_subject(&row.subject);
    let message_id = MessageId::new(row.message_id);
    ListingEntry {
        thread_ref: ThreadRef::of_message(&message_id),
        message_id: Some(message_id),
        reply_marked: is_reply_marked(&subject),
        subject,
        author: row.author,
        timestamp: row.datetime,
    }
}

/// Turn one fetched listing page into entries plus the next cursor.
///
/// Pages overlap on their boundary minute; the resolver drops rows it has
/// already visited. The crawl ends when a page brings nothing newer than its
/// own `since` stamp or runs past the end of the window.
fn listing_page(window: &TimeWindow, since: NaiveDateTime, rows: Vec<ListingRow>) -> ListingPage {
    let latest = rows.iter().map(|row| row.datetime).max();
    let entries: Vec<ListingEntry> = rows
        .into_iter()
        .filter(|row| window.contains(row.datetime))
        .map(listing_entry)
        .collect();

    let next = latest
        .filter(|latest| *latest > since && *latest <= window.end)
        .map(|latest| Cursor::new(latest.format(CURSOR_FORMAT).to_string()));
    ListingPage { entries, next }
}

#[async_trait]
impl ListingSource for ArchiveClient {
    async fn next_page(
        &self,
        window: &TimeWindow,
        cursor: Option<&Cursor>,
    ) -> Result<ListingPage, FetchError> {
        let since = match cursor {
            Some(cursor) => cursor_time(cursor)?,
            None => window.start,
        };
        let rows = self.listing_since(since).await?;
        debug!(list = self.list(), since = %since, rows = rows.len(), "Fetched listing page");
        Ok(listing_page(window, since, rows))
    }
}

fn detailed_message(page: &MessagePage, position: u32) -> ThreadMessage {
    ThreadMessage {
        message_id: MessageId::new(page.message_id.as_str()),
        position,
        author_name: page.author_name.clone(),
        author_contact: page.author_email.clone(),
        timestamp: page.datetime,
        subject: clean_subject(&page.subject),
        body: Some(page.content.clone()),
        attachments: page
            .attachments
            .iter()
            .map(|a| Attachment {
                name: a.name.clone(),
                url: a.url.clone(),
            })
            .collect(),
    }
}

/// Assemble the ordered thread from the selector of `page`, using full
/// details for whichever of `page` and `origin` each option refers to.
fn thread_messages(page: &MessagePage, origin: Option<&MessagePage>) -> Vec<ThreadMessage> {
    if page.thread.is_empty() {
        return vec![detailed_message(page, 0)];
    }
    let origin = origin.unwrap_or(page);
    let subject = clean_subject(&origin.subject);

    page.thread
        .iter()
        .enumerate()
        .map(|(i, option)| {
            let position = i as u32;
            if option.message_id == page.message_id {
                return detailed_message(page, position);
            }
            if option.message_id == origin.message_id {
                return detailed_message(origin, position);
            }
            ThreadMessage {
                message_id: MessageId::new(option.message_id.as_str()),
                position,
                author_name: option.author.clone().unwrap_or_default(),
                author_contact: None,
                timestamp: option.datetime.unwrap_or(origin.datetime),
                subject: subject.clone(),
                body: None,
                attachments: Vec::new(),
            }
        })
        .collect()
}

#[async_trait]
impl ThreadExpander for ArchiveClient {
    async fn expand(&self, thread_ref: &ThreadRef) -> Result<Vec<ThreadMessage>, ExpandError> {
        let page = self.message(thread_ref.as_str()).await.map_err(FetchError::from)?;

        let origin = match page.thread.first() {
            Some(first) if first.message_id != page.message_id => Some(
                self.message(&first.message_id)
                    .await
                    .map_err(FetchError::from)?,
            ),
            _ => None,
        };

        let messages = thread_messages(&page, origin.as_ref());
        debug!(
            thread_ref = %thread_ref,
            members = messages.len(),
            "Expanded archive thread"
        );
        Ok(messages)
    }
}
