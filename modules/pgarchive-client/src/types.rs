use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One row of a `/list/<list>/since/<stamp>` page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRow {
    pub message_id: String,
    pub subject: String,
    pub author: String,
    /// Day header of the row's table plus the row's `HH:MM` cell.
    pub datetime: NaiveDateTime,
}

/// One `<option>` of a message page's thread selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadOption {
    pub message_id: String,
    pub datetime: Option<NaiveDateTime>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentLink {
    pub name: String,
    pub url: String,
}

/// A `/message-id/<id>` page: the message itself plus its thread, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub message_id: String,
    pub subject: String,
    pub author_name: String,
    pub author_email: Option<String>,
    pub datetime: NaiveDateTime,
    pub content: String,
    pub attachments: Vec<AttachmentLink>,
    pub thread: Vec<ThreadOption>,
}
