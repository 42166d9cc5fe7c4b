//! Bytes → bounded, boilerplate-free article text.
//!
//! The pipeline is pure once given bytes: sniff, parse, narrow by selector,
//! pick the main content ([`crate::readability`]), render ([`crate::render`]),
//! post-process, truncate.

use crate::readability::extract_main_content;
use crate::render::{render_markdown, RenderOptions};
use html_scraper::{Html, Selector};
use webscout_core::{Error, ExtractOptions, ExtractedArticle, Result, TRUNCATION_MARKER};

/// Base used when the source URL does not parse, so relative hrefs still resolve.
const SYNTHETIC_BASE: &str = "https://webscout.invalid/";

/// Lines containing any of these (lowercased) are dropped from rendered output.
const BOILERPLATE_PHRASES: &[&str] = &[
    // share / social call-to-action
    "share this",
    "share on facebook",
    "share on twitter",
    "share on linkedin",
    "share on x",
    "tweet this",
    "follow us on",
    "like us on facebook",
    "sign up for our newsletter",
    "subscribe to our newsletter",
    // cookie / consent / privacy
    "we use cookies",
    "this site uses cookies",
    "this website uses cookies",
    "accept cookies",
    "accept all cookies",
    "cookie policy",
    "cookie settings",
    "manage cookies",
    "manage consent",
    "consent preferences",
    "privacy policy",
];

/// Best-effort guess for whether bytes are HTML-ish.
pub fn bytes_look_like_html(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let rest = &bytes[start..];
    let head = &rest[..rest.len().min(16)];
    let head = head.to_ascii_lowercase();
    head.starts_with(b"<!doctype html")
        || head.starts_with(b"<html")
        || head.starts_with(b"<head")
        || head.starts_with(b"<body")
}

fn is_html(content_type: Option<&str>, body: &[u8]) -> bool {
    match content_type {
        Some(ct) => {
            let mime = ct
                .split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase();
            mime == "text/html" || mime == "application/xhtml+xml"
        }
        None => bytes_look_like_html(body),
    }
}

/// Run the full pipeline over a fetched body.
pub fn extract(
    body: &[u8],
    content_type: Option<&str>,
    source_url: &str,
    opts: &ExtractOptions,
) -> Result<ExtractedArticle> {
    let max_length = opts.max_length();

    if !is_html(content_type, body) {
        let text = String::from_utf8_lossy(body).to_string();
        if text.trim().is_empty() {
            return Err(Error::NoContentFound(source_url.to_string()));
        }
        let original_length = text.chars().count();
        return Ok(ExtractedArticle {
            title: source_url.to_string(),
            content: truncate_with_marker(&text, max_length),
            byline: String::new(),
            original_length,
            source_url: source_url.to_string(),
            truncated: original_length > max_length,
        });
    }

    let html = String::from_utf8_lossy(body);
    let doc = Html::parse_document(&html);
    let base_url = url::Url::parse(source_url)
        .ok()
        .or_else(|| url::Url::parse(SYNTHETIC_BASE).ok());

    let selected = opts
        .selector
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| match Selector::parse(s) {
            Ok(sel) => {
                let hits: Vec<_> = doc.select(&sel).take(2).collect();
                tracing::debug!(selector = s, matched = hits.len(), "selector narrowing");
                match hits.as_slice() {
                    [only] => Some(*only),
                    _ => None,
                }
            }
            Err(_) => {
                tracing::debug!(selector = s, "invalid selector ignored");
                None
            }
        });
    let root = selected.unwrap_or_else(|| doc.root_element());

    let main = match extract_main_content(&doc, root) {
        Some(m) => m,
        None => {
            // A selector that pinned a single small element is content on its own.
            let Some(el) = selected.filter(|el| el.text().any(|t| !t.trim().is_empty())) else {
                return Err(Error::NoContentFound(source_url.to_string()));
            };
            crate::readability::MainContent {
                element: el,
                title: String::new(),
                byline: String::new(),
            }
        }
    };

    let rendered = render_markdown(
        main.element,
        &RenderOptions {
            include_links: opts.include_links,
            base_url,
        },
    );
    let content = post_process(&rendered);
    if content.is_empty() {
        return Err(Error::NoContentFound(source_url.to_string()));
    }

    let original_length = content.chars().count();
    tracing::debug!(
        source_url,
        tag = main.element.value().name(),
        original_length,
        max_length,
        "extracted main content"
    );
    Ok(ExtractedArticle {
        title: main.title,
        content: truncate_with_marker(&content, max_length),
        byline: main.byline,
        original_length,
        source_url: source_url.to_string(),
        truncated: original_length > max_length,
    })
}

pub fn post_process(text: &str) -> String {
    let text = collapse_blank_lines(text);
    let text = drop_empty_headings(&text);
    let text = drop_boilerplate_lines(&text);
    // Dropped lines can leave adjacent blanks behind.
    collapse_blank_lines(&text).trim().to_string()
}

/// Runs of three or more newlines become exactly one blank line.
pub fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut prev_blank = false;
    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && prev_blank {
            continue;
        }
        out.push(if blank { "" } else { line });
        prev_blank = blank;
    }
    out.join("\n")
}

fn is_empty_heading(line: &str) -> bool {
    let t = line.trim();
    let hashes = t.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && t[hashes..].trim().is_empty()
}

pub fn drop_empty_headings(text: &str) -> String {
    text.lines()
        .filter(|l| !is_empty_heading(l))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn drop_boilerplate_lines(text: &str) -> String {
    text.lines()
        .filter(|l| {
            let lc = l.to_lowercase();
            !BOILERPLATE_PHRASES.iter().any(|p| lc.contains(p))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cut to `max_chars` characters and append [`TRUNCATION_MARKER`], iff longer.
pub fn truncate_with_marker(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(&s[..byte_idx]);
            out.push_str(TRUNCATION_MARKER);
            out
        }
    }
}
