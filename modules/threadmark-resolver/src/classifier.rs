//! Cheap origin/reply guess from listing metadata alone.
//!
//! An origin whose subject already carries a reply marker is guessed as a
//! reply. The resolver only uses this to skip fetches, never for correctness.

use threadmark_common::ListingEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    LikelyOrigin,
    LikelyReply,
}

pub fn classify(entry: &ListingEntry) -> Classification {
    if entry.reply_marked {
        Classification::LikelyReply
    } else {
        Classification::LikelyOrigin
    }
}
