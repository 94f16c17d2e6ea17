//! Subject-line cleanup and reply-marker detection for listing rows.

use std::sync::LazyLock;

use regex::Regex;

/// The archive appends a paperclip glyph to subjects of messages that carry
/// attachments.
const ATTACHMENT_GLYPH: char = '\u{1F4CE}';

/// `re:` (ASCII or full-width colon) at the start or after a non-alphanumeric
/// character, so `Fwd: Re: x` and `[HACKERS] RE: x` match but `Core: x` does not.
static RE_REPLY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^\p{L}\p{N}])re\s*[:\x{FF1A}]").unwrap());

/// `re:` opening the subject.
static RE_REPLY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*re\s*[:\x{FF1A}]").unwrap());

/// Trim, drop the attachment glyph and anything after it, and collapse
/// whitespace runs (newlines included) to single spaces.
pub fn clean_subject(raw: &str) -> String {
    let head = raw.split(ATTACHMENT_GLYPH).next().unwrap_or(raw);
    head.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a subject carries a reply-style marker anywhere in it.
pub fn is_reply_marked(subject: &str) -> bool {
    RE_REPLY_MARKER.is_match(subject)
}

/// Whether the subject opens with a reply prefix. `Fwd: Re: x` carries a
/// reply marker but no reply prefix.
pub fn has_reply_prefix(subject: &str) -> bool {
    RE_REPLY_PREFIX.is_match(subject)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_newlines() {
        assert_eq!(
            clean_subject("  Limit   length\n of queries  "),
            "Limit length of queries"
        );
    }

    #[test]
    fn cuts_at_attachment_glyph() {
        assert_eq!(
            clean_subject("Fix vacuum stats \u{1F4CE} 2 attachments"),
            "Fix vacuum stats"
        );
    }

    #[test]
    fn plain_subject_is_not_reply() {
        assert!(!is_reply_marked("Feature X"));
        assert!(!is_reply_marked("Core: tighten locking"));
        assert!(!is_reply_marked("Prefer remote: servers"));
    }

    #[test]
    fn reply_prefixes_in_any_case() {
        for subject in ["Re: Feature X", "re: Feature X", "RE: Feature X", "rE: Feature X"] {
            assert!(is_reply_marked(subject), "{subject}");
        }
    }

    #[test]
    fn full_width_colon_is_a_reply_marker() {
        assert!(is_reply_marked(
            "Re\u{FF1A}Limit length of queryies in pg_stat_statement extension"
        ));
    }

    #[test]
    fn embedded_marker_counts() {
        assert!(is_reply_marked("Fwd: Re: A new look at old NFS readdir() problems?"));
        assert!(is_reply_marked("[HACKERS] Re: bug"));
        assert!(is_reply_marked("RE : spaced"));
    }

    #[test]
    fn only_leading_markers_are_reply_prefixes() {
        assert!(has_reply_prefix("Re: Feature X"));
        assert!(has_reply_prefix("RE\u{FF1A}Feature X"));
        assert!(!has_reply_prefix("Fwd: Re: A new look at old NFS readdir() problems?"));
        assert!(!has_reply_prefix("[HACKERS] Re: bug"));
        assert!(!has_reply_prefix("Regression: planner"));
    }
}
