//! Turning raw page fields into stored records
//!
//! Missing fields degrade to placeholders, publish times are parsed per
//! source, and content is cleaned before it reaches the result sink.

use crate::config::SourceProfile;
use crate::crawler::ExtractedFields;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const UNTITLED: &str = "(untitled)";
pub const NO_CONTENT: &str = "(no content)";
pub const UNKNOWN_AUTHOR: &str = "(unknown author)";

/// Timestamp layout used for every stored time
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A fully populated detail-page record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub url: String,
    pub title: String,
    pub publish_time: NaiveDateTime,
    pub content: String,
    pub source: String,
    pub author: String,
    pub attachments: Vec<String>,
}

/// Builds a record from raw fields, substituting defaults for gaps
///
/// # Arguments
///
/// * `url` - The detail page URL
/// * `source` - Profile of the page's source type
/// * `fields` - Whatever the extractor found
/// * `now` - Crawl time, used for relative and unparsable publish times
pub fn build_record(
    url: &str,
    source: &SourceProfile,
    fields: ExtractedFields,
    now: NaiveDateTime,
) -> ExtractedRecord {
    let title = fields.title.unwrap_or_else(|| {
        tracing::warn!(url = %url, "Title not found, using placeholder");
        UNTITLED.to_string()
    });

    let publish_time = match fields.publish_time_text.as_deref() {
        Some(text) => parse_publish_time(text, source, now),
        None => {
            tracing::warn!(url = %url, "Publish time not found, using crawl time");
            now
        }
    };

    let content = fields
        .content_html
        .map(|html| clean_content(&html, source))
        .filter(|cleaned| !cleaned.is_empty())
        .unwrap_or_else(|| {
            tracing::warn!(url = %url, "Content not found, using placeholder");
            NO_CONTENT.to_string()
        });

    ExtractedRecord {
        url: url.to_string(),
        title,
        publish_time,
        content,
        source: source.name.clone(),
        author: fields.author.unwrap_or_else(|| {
            tracing::warn!(url = %url, "Author not found, using placeholder");
            UNKNOWN_AUTHOR.to_string()
        }),
        attachments: fields.attachment_hrefs,
    }
}

/// Parses a publish time using the source's formats
///
/// Relative forms ("3小时前", "2天前") are honoured when the source enables
/// them. Month/day text without a year gets the current year. Anything
/// unparsable falls back to `now` with a warning.
pub fn parse_publish_time(text: &str, source: &SourceProfile, now: NaiveDateTime) -> NaiveDateTime {
    let text = text.trim();

    if source.relative_time {
        if let Some(parsed) = parse_relative(text, now) {
            return parsed;
        }
    }

    let text = if text.contains('月') && !text.contains('年') {
        format!("{}年{}", now.year(), text)
    } else {
        text.to_string()
    };

    for format in &source.time_formats {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&text, format) {
            return parsed;
        }
        if let Ok(date) = NaiveDate::parse_from_str(&text, format) {
            if let Some(parsed) = date.and_hms_opt(0, 0, 0) {
                return parsed;
            }
        }
    }

    tracing::warn!(source = %source.name, "Unparsable publish time '{}', using crawl time", text);
    now
}

fn parse_relative(text: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    static RELATIVE: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = RELATIVE
        .get_or_init(|| Regex::new(r"(\d+)\s*(小时|天)前").ok())
        .as_ref()?;

    let captures = pattern.captures(text)?;
    let amount: i64 = captures.get(1)?.as_str().parse().ok()?;
    match captures.get(2)?.as_str() {
        "小时" => now.checked_sub_signed(Duration::try_hours(amount)?),
        _ => now.checked_sub_signed(Duration::try_days(amount)?),
    }
}

/// Cleans extracted content HTML
///
/// Removes configured literal strings, optionally drops every tag except
/// p, a and br, collapses newline runs and runs of horizontal whitespace.
pub fn clean_content(html: &str, source: &SourceProfile) -> String {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    static NEWLINES: OnceLock<Option<Regex>> = OnceLock::new();
    static SPACES: OnceLock<Option<Regex>> = OnceLock::new();

    let mut cleaned = html.to_string();
    for literal in source.content_cleanup.iter().filter(|l| !l.is_empty()) {
        cleaned = cleaned.replace(literal.as_str(), "");
    }

    if source.strip_markup {
        if let Some(tag) = TAG
            .get_or_init(|| Regex::new(r"</?\s*([A-Za-z][A-Za-z0-9]*)\b[^>]*>").ok())
            .as_ref()
        {
            cleaned = tag
                .replace_all(&cleaned, |caps: &regex::Captures| {
                    let name = caps[1].to_ascii_lowercase();
                    if matches!(name.as_str(), "p" | "a" | "br") {
                        caps[0].to_string()
                    } else {
                        String::new()
                    }
                })
                .into_owned();
        }
    }

    if let Some(newlines) = NEWLINES.get_or_init(|| Regex::new(r"\n+").ok()).as_ref() {
        cleaned = newlines.replace_all(&cleaned, "\n").into_owned();
    }
    if let Some(spaces) = SPACES.get_or_init(|| Regex::new(r"[^\S\n]{2,}").ok()).as_ref() {
        cleaned = spaces.replace_all(&cleaned, " ").into_owned();
    }

    cleaned.trim().to_string()
}
