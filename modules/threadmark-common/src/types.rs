use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

// --- Identifiers ---

/// Globally unique identifier of a single email, stable across listing rows
/// and thread pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Reference to a thread page in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadRef(String);

impl ThreadRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Every message page in the archive doubles as a thread page, so a
    /// message id is always a valid thread reference. The ref built from an
    /// origin message is the canonical identity of its thread.
    pub fn of_message(id: &MessageId) -> Self {
        Self(id.as_str().to_string())
    }

    /// Inverse of [`ThreadRef::of_message`] for canonical refs.
    pub fn origin_id(&self) -> MessageId {
        MessageId::new(self.0.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadRef {
    fn from(reference: &str) -> Self {
        Self::new(reference)
    }
}

/// Opaque pagination cursor handed back by a listing source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Time window ---

/// Inclusive time range a crawl session covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Whole days: `start_day 00:00:00` through `end_day 23:59:59`.
    pub fn days(start_day: NaiveDate, end_day: NaiveDate) -> Self {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        Self {
            start: start_day.and_time(NaiveTime::MIN),
            end: end_day.and_time(end_of_day),
        }
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts <= self.end
    }
}

// --- Listing ---

/// One row of a paginated thread listing. Lightweight metadata only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub thread_ref: ThreadRef,
    /// The row's own message id, when the listing exposes it without a fetch.
    pub message_id: Option<MessageId>,
    pub subject: String,
    pub author: String,
    pub timestamp: NaiveDateTime,
    pub reply_marked: bool,
}

// --- Thread pages ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// One message of an expanded thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub message_id: MessageId,
    pub position: u32,
    pub author_name: String,
    pub author_contact: Option<String>,
    pub timestamp: NaiveDateTime,
    pub subject: String,
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

// --- Resolution output ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    /// Committed from listing metadata without a fetch.
    Listing,
    /// Committed from a whole-thread expansion.
    Expansion,
}

/// The authoritative origin of one thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginRecord {
    pub thread_ref: ThreadRef,
    pub message_id: MessageId,
    pub subject: String,
    pub author_name: String,
    pub author_contact: Option<String>,
    pub timestamp: NaiveDateTime,
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Messages after the origin, when known from an expansion.
    pub reply_count: Option<u32>,
    pub resolved_via: ResolutionPath,
}

impl OriginRecord {
    /// Build a record straight from a listing row that looks like an origin.
    /// The record is keyed by the canonical ref of `message_id`.
    pub fn from_listing(entry: &ListingEntry, message_id: MessageId) -> Self {
        Self {
            thread_ref: ThreadRef::of_message(&message_id),
            message_id,
            subject: entry.subject.clone(),
            author_name: entry.author.clone(),
            author_contact: None,
            timestamp: entry.timestamp,
            body: None,
            attachments: Vec::new(),
            reply_count: None,
            resolved_via: ResolutionPath::Listing,
        }
    }

    /// Build a record from the first message of an expanded thread.
    pub fn from_expansion(thread_ref: ThreadRef, origin: ThreadMessage, members: usize) -> Self {
        Self {
            thread_ref,
            message_id: origin.message_id,
            subject: origin.subject,
            author_name: origin.author_name,
            author_contact: origin.author_contact,
            timestamp: origin.timestamp,
            body: origin.body,
            attachments: origin.attachments,
            reply_count: Some(members.saturating_sub(1) as u32),
            resolved_via: ResolutionPath::Expansion,
        }
    }

    /// True when `other` is the thread page's view of a record this one
    /// only knows from a listing row.
    fn is_superseded_by(&self, other: &OriginRecord) -> bool {
        self.resolved_via == ResolutionPath::Listing
            && other.resolved_via == ResolutionPath::Expansion
    }

    /// True when absorbing `other` would change this record.
    pub fn is_enriched_by(&self, other: &OriginRecord) -> bool {
        self.is_superseded_by(other)
            || (self.author_contact.is_none() && other.author_contact.is_some())
            || (self.body.is_none() && other.body.is_some())
            || (self.attachments.is_empty() && !other.attachments.is_empty())
            || (self.reply_count.is_none() && other.reply_count.is_some())
    }

    /// Merge `other` into this record. Header fields from an expansion
    /// replace those taken from a listing row; optional detail only fills
    /// gaps. Identity fields (thread, message id) never change.
    pub fn absorb(&mut self, other: OriginRecord) {
        if self.is_superseded_by(&other) {
            self.subject = other.subject;
            self.author_name = other.author_name;
            self.timestamp = other.timestamp;
            self.resolved_via = ResolutionPath::Expansion;
        }
        if self.author_contact.is_none() {
            self.author_contact = other.author_contact;
        }
        if self.body.is_none() {
            self.body = other.body;
        }
        if self.attachments.is_empty() {
            self.attachments = other.attachments;
        }
        if self.reply_count.is_none() {
            self.reply_count = other.reply_count;
        }
    }
}

impl std::fmt::Display for OriginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Thread: {}", self.subject)?;
        match &self.author_contact {
            Some(contact) => writeln!(f, "Author: {} <{}>", self.author_name, contact)?,
            None => writeln!(f, "Author: {}", self.author_name)?,
        }
        write!(
            f,
            "Time: {}\nMessage-Id: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.message_id
        )?;
        if let Some(replies) = self.reply_count {
            write!(f, "\nReplies: {replies}")?;
        }
        Ok(())
    }
}

/// What the registry holds for one thread ref.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryEntry {
    Origin(OriginRecord),
    /// This thread's origin is already recorded under `origin`.
    CrossReference {
        origin: ThreadRef,
        message_id: MessageId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn day_window_covers_whole_days() {
        let window = TimeWindow::days(
            NaiveDate::from_ymd_opt(2025, 1, 4).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
        );
        assert!(window.contains(ts("2025-01-04 00:00:00")));
        assert!(window.contains(ts("2025-01-06 23:59:59")));
        assert!(!window.contains(ts("2025-01-07 00:00:00")));
        assert!(!window.contains(ts("2025-01-03 23:59:59")));
    }

    #[test]
    fn canonical_ref_is_the_message_id() {
        let id = MessageId::new("CAH2-abc@mail.gmail.com");
        assert_eq!(ThreadRef::of_message(&id).as_str(), "CAH2-abc@mail.gmail.com");
    }

    #[test]
    fn expansion_headers_replace_listing_ones() {
        let entry = ListingEntry {
            thread_ref: ThreadRef::new("m1"),
            message_id: Some(MessageId::new("m1")),
            subject: "Feature X".into(),
            author: "Alice".into(),
            timestamp: ts("2025-01-02 10:00:00"),
            reply_marked: false,
        };
        let mut fast = OriginRecord::from_listing(&entry, MessageId::new("m1"));
        let full = OriginRecord::from_expansion(
            ThreadRef::new("m1"),
            ThreadMessage {
                message_id: MessageId::new("m1"),
                position: 0,
                author_name: "Alice Example".into(),
                author_contact: Some("alice@example.org".into()),
                timestamp: ts("2025-01-02 10:00:31"),
                subject: "Feature X".into(),
                body: Some("Proposal".into()),
                attachments: vec![],
            },
            3,
        );

        assert!(fast.is_enriched_by(&full));
        fast.absorb(full.clone());
        assert_eq!(fast.author_name, "Alice Example");
        assert_eq!(fast.timestamp, ts("2025-01-02 10:00:31"));
        assert_eq!(fast.resolved_via, ResolutionPath::Expansion);
        assert_eq!(fast.body.as_deref(), Some("Proposal"));
        assert_eq!(fast.reply_count, Some(2));
        assert_eq!(fast, full);

        // a listing row never overrides what the thread page said
        let listed_again = OriginRecord::from_listing(&entry, MessageId::new("m1"));
        assert!(!fast.is_enriched_by(&listed_again));
        fast.absorb(listed_again);
        assert_eq!(fast, full);
    }

    #[test]
    fn registry_entry_serializes_with_kind_tag() {
        let entry = RegistryEntry::CrossReference {
            origin: ThreadRef::new("m1"),
            message_id: MessageId::new("m1"),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "cross_reference");
        assert_eq!(json["origin"], "m1");
    }
}
