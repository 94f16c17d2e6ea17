// Test mocks for the resolver.
//
// Two mocks matching the two crawl boundaries:
// - MockListing (ListingSource): fixed pages, cursor is the page index
// - MockExpander (ThreadExpander): HashMap-based thread ref → messages, with
//   scripted failures, hangs and delays
//
// Plus helpers for building listing entries and thread messages.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta};

use threadmark_common::{
    is_reply_marked, Cursor, ListingEntry, MessageId, ThreadMessage, ThreadRef, TimeWindow,
};

use crate::error::{ExpandError, FetchError};
use crate::traits::{ListingPage, ListingSource, ThreadExpander};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse `YYYY-MM-DD HH:MM:SS`.
pub fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_else(|e| panic!("bad test timestamp {s:?}: {e}"))
}

/// Listing row for the message `id`, whose thread page is its own.
pub fn entry(id: &str, subject: &str, at: &str) -> ListingEntry {
    ListingEntry {
        thread_ref: ThreadRef::new(id),
        message_id: Some(MessageId::new(id)),
        subject: subject.to_string(),
        author: "Tester".to_string(),
        timestamp: ts(at),
        reply_marked: is_reply_marked(subject),
    }
}

/// Fully detailed thread message. The author differs from the one `entry`
/// gives the listing row.
pub fn message(id: &str, position: u32, subject: &str, at: &str) -> ThreadMessage {
    ThreadMessage {
        message_id: MessageId::new(id),
        position,
        author_name: format!("Author of {id}"),
        author_contact: Some(format!("{id}@example.org")),
        timestamp: ts(at),
        subject: subject.to_string(),
        body: Some(format!("Body of {id}")),
        attachments: Vec::new(),
    }
}

/// Ordered thread, one message every 30 minutes from 2025-01-02 10:00:17.
/// Listing rows only carry minutes, so the seconds tell the two apart.
pub fn thread(members: &[(&str, &str)]) -> Vec<ThreadMessage> {
    let start = ts("2025-01-02 10:00:17");
    members
        .iter()
        .enumerate()
        .map(|(i, (id, subject))| {
            let at = start + TimeDelta::minutes(30 * i as i64);
            message(id, i as u32, subject, &at.format("%Y-%m-%d %H:%M:%S").to_string())
        })
        .collect()
}

/// Whole-day window covering all of January 2025.
pub fn january() -> TimeWindow {
    TimeWindow::new(ts("2025-01-01 00:00:00"), ts("2025-01-31 23:59:59"))
}

// ---------------------------------------------------------------------------
// MockListing
// ---------------------------------------------------------------------------

/// Fixed pages of listing rows. Rows outside the requested window are
/// filtered out, like the archive does.
pub struct MockListing {
    pages: Vec<Vec<ListingEntry>>,
    unavailable: bool,
    requests: Mutex<Vec<Option<Cursor>>>,
}

impl MockListing {
    pub fn new(pages: Vec<Vec<ListingEntry>>) -> Self {
        Self {
            pages,
            unavailable: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn single_page(entries: Vec<ListingEntry>) -> Self {
        Self::new(vec![entries])
    }

    /// Every request fails with a network error.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(Vec::new())
        }
    }

    /// Cursors requested so far, in order.
    pub fn requests(&self) -> Vec<Option<Cursor>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ListingSource for MockListing {
    async fn next_page(
        &self,
        window: &TimeWindow,
        cursor: Option<&Cursor>,
    ) -> Result<ListingPage, FetchError> {
        self.requests.lock().unwrap().push(cursor.cloned());
        if self.unavailable {
            return Err(FetchError::network("MockListing: unavailable"));
        }

        let index = match cursor {
            Some(c) => c
                .as_str()
                .parse::<usize>()
                .map_err(|_| FetchError::malformed(format!("MockListing: bad cursor {c}")))?,
            None => 0,
        };
        let Some(rows) = self.pages.get(index) else {
            return Ok(ListingPage::default());
        };

        let entries = rows
            .iter()
            .filter(|e| window.contains(e.timestamp))
            .cloned()
            .collect();
        let next = (index + 1 < self.pages.len()).then(|| Cursor::new((index + 1).to_string()));
        Ok(ListingPage { entries, next })
    }
}

// ---------------------------------------------------------------------------
// MockExpander
// ---------------------------------------------------------------------------

/// HashMap-based thread expander. Returns a network error for unregistered
/// thread refs. Builder pattern: `.on_thread()`, `.failing_first()`,
/// `.failing()`, `.hanging()`, `.with_delay()`.
#[derive(Default)]
pub struct MockExpander {
    threads: HashMap<String, Vec<ThreadMessage>>,
    failures_left: Mutex<HashMap<String, u32>>,
    always_failing: HashSet<String>,
    hanging: HashSet<String>,
    delays: HashMap<String, Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockExpander {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_thread(mut self, thread_ref: &str, messages: Vec<ThreadMessage>) -> Self {
        self.threads.insert(thread_ref.to_string(), messages);
        self
    }

    /// Register the same membership under every member's own ref, the way
    /// every message page of the archive shows its whole thread.
    pub fn on_every_page(mut self, messages: Vec<ThreadMessage>) -> Self {
        for m in &messages {
            self.threads.insert(m.message_id.to_string(), messages.clone());
        }
        self
    }

    /// Fail the first `n` calls for `thread_ref` with a network error.
    pub fn failing_first(self, thread_ref: &str, n: u32) -> Self {
        self.failures_left
            .lock()
            .unwrap()
            .insert(thread_ref.to_string(), n);
        self
    }

    pub fn failing(mut self, thread_ref: &str) -> Self {
        self.always_failing.insert(thread_ref.to_string());
        self
    }

    /// Never complete for `thread_ref`.
    pub fn hanging(mut self, thread_ref: &str) -> Self {
        self.hanging.insert(thread_ref.to_string());
        self
    }

    pub fn with_delay(mut self, thread_ref: &str, delay: Duration) -> Self {
        self.delays.insert(thread_ref.to_string(), delay);
        self
    }

    pub fn calls(&self, thread_ref: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(thread_ref)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ThreadExpander for MockExpander {
    async fn expand(&self, thread_ref: &ThreadRef) -> Result<Vec<ThreadMessage>, ExpandError> {
        let key = thread_ref.as_str();
        *self.calls.lock().unwrap().entry(key.to_string()).or_default() += 1;

        if self.hanging.contains(key) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delays.get(key) {
            tokio::time::sleep(*delay).await;
        }
        if self.always_failing.contains(key) {
            return Err(FetchError::network(format!("MockExpander: {key} always fails")).into());
        }
        {
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(key).filter(|left| **left > 0) {
                *left -= 1;
                let reason = format!("MockExpander: scripted failure for {key}");
                return Err(FetchError::network(reason).into());
            }
        }

        self.threads.get(key).cloned().ok_or_else(|| {
            FetchError::network(format!("MockExpander: no thread registered for {key}")).into()
        })
    }
}
