use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::error::{ArchiveError, Result};
use crate::types::{AttachmentLink, ListingRow, MessagePage, ThreadOption};

const MESSAGE_PATH_PREFIX: &str = "/message-id/";

/// Thread selector labels look like `2025-01-02 10:11:12 from Jane Doe`.
static RE_OPTION_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{4}-\d{2}-\d{2} \d{2}:\d{2}(?::\d{2})?)\s+from\s+(.+?)\s*$").unwrap()
});

/// Day headers abbreviate most month names (`Jan.`, `Sept.`) but spell out
/// short ones (`March`, `June`).
fn expand_month(word: &str) -> &str {
    match word {
        "Jan." => "January",
        "Feb." => "February",
        "Aug." => "August",
        "Sept." => "September",
        "Oct." => "October",
        "Nov." => "November",
        "Dec." => "December",
        other => other,
    }
}

/// Parse a listing day header such as `Jan. 2, 2025`.
pub fn parse_day_header(text: &str) -> Option<NaiveDate> {
    let expanded = text
        .split_whitespace()
        .map(expand_month)
        .collect::<Vec<_>>()
        .join(" ");
    NaiveDate::parse_from_str(&expanded, "%B %d, %Y").ok()
}

/// Split `Jane Doe <jane(at)example(dot)org>` into a name and a decoded address.
pub fn decode_author(text: &str) -> (String, Option<String>) {
    let mut parts = text.splitn(2, '<');
    let name = parts.next().unwrap_or("").trim().to_string();
    let email = parts
        .next()
        .map(|raw| {
            raw.trim()
                .trim_end_matches('>')
                .replace("(dot)", ".")
                .replace("(at)", "@")
        })
        .filter(|email| !email.is_empty());
    (name, email)
}

fn selector(url: &str, css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ArchiveError::Parse {
        url: url.to_string(),
        reason: format!("invalid selector {css:?}: {e}"),
    })
}

fn text_of(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn parse_error(url: &str, reason: impl Into<String>) -> ArchiveError {
    ArchiveError::Parse {
        url: url.to_string(),
        reason: reason.into(),
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M"))
        .ok()
}

/// Parse a listing page: each `<h2>` day header is followed by a table whose
/// rows carry the subject link (`th`), the author and the `HH:MM` time (`td`).
pub fn parse_listing(url: &str, html: &str) -> Result<Vec<ListingRow>> {
    let document = Html::parse_document(html);
    let h2_selector = selector(url, "h2")?;
    let tr_selector = selector(url, "tr")?;
    let th_selector = selector(url, "th")?;
    let td_selector = selector(url, "td")?;
    let a_selector = selector(url, "a")?;

    let mut rows = Vec::new();
    for h2 in document.select(&h2_selector) {
        let Some(day) = parse_day_header(&text_of(&h2)) else {
            continue;
        };
        let Some(table) = h2
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .next()
            .filter(|el| el.value().name() == "table")
        else {
            continue;
        };

        for tr in table.select(&tr_selector) {
            let tds: Vec<_> = tr.select(&td_selector).collect();
            // Header rows have no td cells
            if tds.len() < 2 {
                continue;
            }
            let Some(link) = tr
                .select(&th_selector)
                .next()
                .and_then(|th| th.select(&a_selector).next())
            else {
                continue;
            };

            let href = link.value().attr("href").unwrap_or("");
            let message_id = href.trim_start_matches(MESSAGE_PATH_PREFIX).to_string();
            if message_id.is_empty() {
                continue;
            }

            let time_text = text_of(&tds[1]);
            let Some(datetime) =
                parse_datetime(&format!("{} {}", day.format("%Y-%m-%d"), time_text))
            else {
                warn!(
                    url,
                    message_id = message_id.as_str(),
                    time = time_text.as_str(),
                    "Unparsable listing time, skipping row"
                );
                continue;
            };

            rows.push(ListingRow {
                message_id,
                subject: text_of(&link),
                author: text_of(&tds[0]),
                datetime,
            });
        }
    }
    Ok(rows)
}

fn parse_thread_option(option: &ElementRef<'_>) -> Option<ThreadOption> {
    let message_id = option.value().attr("value")?.trim().to_string();
    if message_id.is_empty() {
        return None;
    }
    let label = text_of(option);
    let (datetime, author) = match RE_OPTION_LABEL.captures(&label) {
        Some(caps) => (
            parse_datetime(&caps[1]),
            Some(decode_author(&caps[2]).0).filter(|name| !name.is_empty()),
        ),
        None => (None, None),
    };
    Some(ThreadOption {
        message_id,
        datetime,
        author,
    })
}

/// Parse a `/message-id/<id>` page.
pub fn parse_message(url: &str, message_id: &str, html: &str) -> Result<MessagePage> {
    let document = Html::parse_document(html);
    let table_selector = selector(url, "#pgContentWrap table")?;
    let tr_selector = selector(url, "tr")?;
    let th_selector = selector(url, "th")?;
    let td_selector = selector(url, "td")?;
    let thread_selector = selector(url, "select#thread_select option")?;
    let content_selector = selector(url, "#pgContentWrap div.message-content")?;
    let attachment_selector = selector(url, "#pgContentWrap table.message-attachments th a")?;

    let header = document
        .select(&table_selector)
        .next()
        .ok_or_else(|| parse_error(url, "no message header table"))?;
    let rows: Vec<_> = header.select(&tr_selector).collect();

    let mut from = None;
    let mut subject = None;
    let mut date = None;
    for row in &rows {
        let Some(label) = row.select(&th_selector).next().map(|th| text_of(&th)) else {
            continue;
        };
        let value = row.select(&td_selector).next().map(|td| text_of(&td));
        match label.trim_end_matches(':').to_ascii_lowercase().as_str() {
            "from" => from = value,
            "subject" => subject = value,
            "date" => date = value,
            _ => {}
        }
    }

    // Older layouts have unlabeled rows at fixed offsets
    if from.is_none() || subject.is_none() || date.is_none() {
        let positions = match rows.len() {
            8 => Some((0, 2, 3)),
            9 => Some((0, 3, 4)),
            _ => None,
        };
        let cell = |i: usize| {
            rows.get(i)
                .and_then(|row| row.select(&td_selector).next())
                .map(|td| text_of(&td))
        };
        if let Some((f, s, d)) = positions {
            from = from.or_else(|| cell(f));
            subject = subject.or_else(|| cell(s));
            date = date.or_else(|| cell(d));
        }
    }

    let from = from.ok_or_else(|| parse_error(url, "no From row"))?;
    let subject = subject.ok_or_else(|| parse_error(url, "no Subject row"))?;
    let date = date.ok_or_else(|| parse_error(url, "no Date row"))?;
    let datetime =
        parse_datetime(&date).ok_or_else(|| parse_error(url, format!("invalid date {date:?}")))?;
    let (author_name, author_email) = decode_author(&from);

    let content = document
        .select(&content_selector)
        .next()
        .map(|el| text_of(&el))
        .ok_or_else(|| parse_error(url, "no message content"))?;

    let attachments = document
        .select(&attachment_selector)
        .map(|link| AttachmentLink {
            name: text_of(&link),
            url: link.value().attr("href").unwrap_or("").to_string(),
        })
        .collect();

    let thread = document
        .select(&thread_selector)
        .filter_map(|option| parse_thread_option(&option))
        .collect();

    Ok(MessagePage {
        message_id: message_id.to_string(),
        subject,
        author_name,
        author_email,
        datetime,
        content,
        attachments,
        thread,
    })
}
