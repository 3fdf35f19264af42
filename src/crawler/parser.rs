//! HTML field extraction
//!
//! This module handles parsing loaded pages to extract:
//! - Detail-page fields (title, publish time, author, content, attachments)
//! - Item links from list pages

use crate::config::DetailSelectors;
use crate::crawler::RenderedPage;
use crate::FetchError;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Raw fields read from a detail page; any of them may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub publish_time_text: Option<String>,
    pub author: Option<String>,
    pub content_html: Option<String>,
    pub attachment_hrefs: Vec<String>,
}

/// Reads detail fields out of a rendered page
pub trait FieldExtractor: Send + Sync {
    fn extract(
        &self,
        page: &RenderedPage,
        selectors: &DetailSelectors,
    ) -> Result<ExtractedFields, FetchError>;
}

/// CSS-selector extractor built on `scraper`
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorExtractor;

impl FieldExtractor for SelectorExtractor {
    /// Extracts detail fields
    ///
    /// # Extraction Rules
    ///
    /// - Title: text of the first `title` match, else the `<title>` element
    /// - Publish time and author: trimmed text of the first match
    /// - Content: inner HTML of the first match
    /// - Attachments: the configured attribute of every match, appended to
    ///   `attachment-prefix` when set, otherwise joined to the page URL
    ///
    /// Empty text counts as missing. An unparsable selector is an error.
    fn extract(
        &self,
        page: &RenderedPage,
        selectors: &DetailSelectors,
    ) -> Result<ExtractedFields, FetchError> {
        let document = Html::parse_document(&page.html);

        let title = first_text(&document, &selectors.title)?.or_else(|| page_title(&document));
        let publish_time_text = first_text(&document, &selectors.publish_time)?;
        let author = first_text(&document, &selectors.author)?;

        let content_selector = parse_selector(&selectors.content)?;
        let content_html = document
            .select(&content_selector)
            .next()
            .map(|element| element.inner_html())
            .filter(|html| !html.trim().is_empty());

        let attachment_selector = parse_selector(&selectors.attachments)?;
        let attachment_hrefs = document
            .select(&attachment_selector)
            .filter_map(|element| element.value().attr(&selectors.attachment_attr))
            .filter_map(|value| {
                resolve_attachment(value, &page.url, selectors.attachment_prefix.as_deref())
            })
            .collect();

        Ok(ExtractedFields {
            title,
            publish_time_text,
            author,
            content_html,
            attachment_hrefs,
        })
    }
}

/// Extracts item links from a list page, in document order
///
/// `file://` hrefs are kept verbatim; everything else is resolved against
/// `base_url`. Duplicates are dropped.
///
/// # Arguments
///
/// * `html` - The list page markup
/// * `base_url` - The list page URL
/// * `selector` - The `item-links` selector
pub fn extract_item_links(
    html: &str,
    base_url: &Url,
    selector: &str,
) -> Result<Vec<String>, FetchError> {
    let document = Html::parse_document(html);
    let selector = parse_selector(selector)?;

    let mut links: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        if let Some(link) = element_href(&element).and_then(|href| resolve_link(href, base_url)) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }

    Ok(links)
}

/// Returns the resolved href of the first element matching `selector`
pub fn extract_next_page(
    html: &str,
    base_url: &Url,
    selector: &str,
) -> Result<Option<String>, FetchError> {
    let document = Html::parse_document(html);
    let selector = parse_selector(selector)?;

    Ok(document
        .select(&selector)
        .find_map(|element| element_href(&element).and_then(|href| resolve_link(href, base_url))))
}

fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector).map_err(|_| FetchError::Selector(selector.to_string()))
}

fn first_text(document: &Html, selector: &str) -> Result<Option<String>, FetchError> {
    let selector = parse_selector(selector)?;

    Ok(document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Extracts the page title from the HTML document
fn page_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// The element's own href, or that of its first descendant link
fn element_href<'a>(element: &ElementRef<'a>) -> Option<&'a str> {
    if let Some(href) = element.value().attr("href") {
        return Some(href);
    }

    let anchor = Selector::parse("a[href]").ok()?;
    element
        .select(&anchor)
        .next()
        .and_then(|a| a.value().attr("href"))
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Anything that is not http(s) or file after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    if href.starts_with("file://") {
        return Some(href.to_string());
    }

    match base_url.join(href) {
        Ok(absolute_url) => match absolute_url.scheme() {
            "http" | "https" | "file" => Some(absolute_url.to_string()),
            _ => None,
        },
        Err(_) => None,
    }
}

fn resolve_attachment(value: &str, page_url: &Url, prefix: Option<&str>) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    match prefix {
        Some(_) if value.starts_with("http://") || value.starts_with("https://") => {
            Some(value.to_string())
        }
        Some(prefix) => Some(format!("{}{}", prefix, value)),
        None => page_url.join(value).ok().map(String::from),
    }
}
