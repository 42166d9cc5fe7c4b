//! Main-content detection.
//!
//! Scores paragraph-like blocks and propagates their score to the parent
//! (full) and grandparent (half), then picks the ancestor with the best
//! link-density-adjusted score. This only selects a subtree; turning it into
//! text is [`crate::render`]'s job.

use html_scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;

/// Paragraphs shorter than this carry no signal (buttons, captions, bylines).
const MIN_PARAGRAPH_CHARS: usize = 25;

/// Below this much candidate text, a strict pass is retried without class/id exclusion.
const MIN_ARTICLE_CHARS: usize = 250;

/// Containers never considered part of the main content.
const UNLIKELY_TAGS: &[&str] = &["nav", "footer", "aside", "header", "menu", "dialog"];

const POSITIVE_HINTS: &[&str] = &[
    "article", "body", "content", "entry", "main", "page", "post", "text", "blog", "story", "doc",
    "docs", "markdown", "prose",
];

const NEGATIVE_HINTS: &[&str] = &[
    "nav", "navbar", "navigation", "footer", "sidebar", "comment", "comments", "menu", "header",
    "banner", "share", "social", "cookie", "consent", "promo", "ad", "ads", "advert", "related",
    "subscribe", "newsletter", "breadcrumb", "masthead", "popup", "modal",
];

#[derive(Debug, Clone)]
pub struct MainContent<'a> {
    pub element: ElementRef<'a>,
    pub title: String,
    pub byline: String,
}

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn element_text(el: &ElementRef) -> String {
    norm_ws(&el.text().collect::<Vec<_>>().join(" "))
}

fn hint_tokens(el: &ElementRef) -> Vec<String> {
    let mut raw = String::new();
    if let Some(c) = el.value().attr("class") {
        raw.push_str(c);
        raw.push(' ');
    }
    if let Some(i) = el.value().attr("id") {
        raw.push_str(i);
    }
    raw.to_ascii_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn token_matches(tokens: &[String], hints: &[&str]) -> bool {
    tokens.iter().any(|t| {
        hints
            .iter()
            .any(|h| t == h || (h.len() >= 4 && t.starts_with(h)))
    })
}

/// +25 for content-ish class/id names, -25 for chrome-ish ones.
fn class_weight(el: &ElementRef) -> f64 {
    let tokens = hint_tokens(el);
    let mut w = 0.0;
    if token_matches(&tokens, POSITIVE_HINTS) {
        w += 25.0;
    }
    if token_matches(&tokens, NEGATIVE_HINTS) {
        w -= 25.0;
    }
    w
}

/// How aggressively page chrome is excluded from scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strictness {
    /// Chrome tags and roles, plus wrappers whose class/id reads as chrome.
    StripHinted,
    /// Chrome tags and roles only.
    TagsOnly,
}

fn is_unlikely_container(el: &ElementRef, strictness: Strictness) -> bool {
    let tag = el.value().name();
    if UNLIKELY_TAGS.contains(&tag) {
        return true;
    }
    if matches!(
        el.value().attr("role"),
        Some("navigation" | "banner" | "contentinfo" | "complementary")
    ) {
        return true;
    }
    if strictness == Strictness::TagsOnly || matches!(tag, "body" | "html" | "article" | "main") {
        return false;
    }
    let tokens = hint_tokens(el);
    token_matches(&tokens, NEGATIVE_HINTS) && !token_matches(&tokens, POSITIVE_HINTS)
}

fn tag_prior(tag: &str) -> f64 {
    match tag {
        "article" => 10.0,
        "main" => 8.0,
        "div" => 5.0,
        "section" => 3.0,
        "pre" | "td" | "blockquote" => 3.0,
        "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" | "form" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    }
}

fn initial_score(el: &ElementRef) -> f64 {
    tag_prior(el.value().name()) + class_weight(el)
}

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "figure", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "main", "nav", "ol", "p", "pre",
    "section", "table", "ul",
];

fn has_block_children(el: &ElementRef) -> bool {
    el.children()
        .filter_map(ElementRef::wrap)
        .any(|c| BLOCK_TAGS.contains(&c.value().name()))
}

/// Elements whose own text counts as a paragraph.
fn is_paragraph_like(el: &ElementRef) -> bool {
    match el.value().name() {
        "p" | "pre" | "td" | "blockquote" => true,
        // Text-only containers (common in generated markup that skips <p>).
        "div" | "section" => !has_block_children(el),
        _ => false,
    }
}

fn is_within(el: &ElementRef, root: &ElementRef) -> bool {
    el.id() == root.id() || el.ancestors().any(|a| a.id() == root.id())
}

/// True if `el` or an ancestor below `root` is page chrome.
fn inside_unlikely(el: &ElementRef, root: &ElementRef, strictness: Strictness) -> bool {
    if el.id() == root.id() {
        return false;
    }
    if is_unlikely_container(el, strictness) {
        return true;
    }
    for a in el.ancestors() {
        if a.id() == root.id() {
            break;
        }
        if let Some(a) = ElementRef::wrap(a) {
            if is_unlikely_container(&a, strictness) {
                return true;
            }
        }
    }
    false
}

fn link_density(el: &ElementRef) -> f64 {
    let text_chars = element_text(el).chars().count();
    if text_chars == 0 {
        return 1.0;
    }
    let Ok(sel) = Selector::parse("a") else {
        return 0.0;
    };
    let link_chars: usize = el
        .select(&sel)
        .map(|a| element_text(&a).chars().count())
        .sum();
    (link_chars as f64 / text_chars as f64).min(1.0)
}

fn parent_element<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.parent().and_then(ElementRef::wrap)
}

/// Pick the best content subtree under `root` (the document root or a selector-narrowed element).
pub fn extract_main_content<'a>(doc: &'a Html, root: ElementRef<'a>) -> Option<MainContent<'a>> {
    let element = scored_candidate(root).or_else(|| semantic_fallback(root))?;
    Some(MainContent {
        element,
        title: extract_title(doc, element),
        byline: extract_byline(doc, root),
    })
}

/// Strict pass first; a layout wrapper with a chrome-ish class can hide the
/// whole article from it, so a thin or empty result is retried with only
/// tag-level exclusion and the longer of the two wins.
fn scored_candidate<'a>(root: ElementRef<'a>) -> Option<ElementRef<'a>> {
    let strict = best_candidate(root, Strictness::StripHinted);
    let strict_len = strict
        .as_ref()
        .map(|el| element_text(el).chars().count())
        .unwrap_or(0);
    if strict_len >= MIN_ARTICLE_CHARS {
        return strict;
    }
    let relaxed = best_candidate(root, Strictness::TagsOnly);
    let relaxed_len = relaxed
        .as_ref()
        .map(|el| element_text(el).chars().count())
        .unwrap_or(0);
    tracing::debug!(strict_len, relaxed_len, "readability retried without class/id exclusion");
    if relaxed_len > strict_len {
        relaxed
    } else {
        strict
    }
}

fn best_candidate<'a>(root: ElementRef<'a>, strictness: Strictness) -> Option<ElementRef<'a>> {
    let mut scores: HashMap<_, f64> = HashMap::new();
    let mut candidates: Vec<ElementRef<'a>> = Vec::new();

    for node in root.descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        if !is_paragraph_like(&el) || inside_unlikely(&el, &root, strictness) {
            continue;
        }
        let text = element_text(&el);
        let len = text.chars().count();
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }
        let commas = text.matches(',').count() as f64;
        let score = 1.0 + commas + ((len / 100) as f64).min(3.0);

        let parent = parent_element(&el).filter(|p| is_within(p, &root));
        let grand = parent
            .as_ref()
            .and_then(parent_element)
            .filter(|g| is_within(g, &root));
        for (ancestor, divisor) in [(parent, 1.0), (grand, 2.0)] {
            let Some(ancestor) = ancestor else { continue };
            let entry = scores.entry(ancestor.id()).or_insert_with(|| {
                candidates.push(ancestor);
                initial_score(&ancestor)
            });
            *entry += score / divisor;
        }
    }

    let mut best: Option<(f64, ElementRef<'a>)> = None;
    for c in candidates {
        let raw = scores.get(&c.id()).copied().unwrap_or(0.0);
        let adjusted = raw * (1.0 - link_density(&c));
        tracing::trace!(tag = c.value().name(), raw, adjusted, "readability candidate");
        if best.as_ref().map(|(s, _)| adjusted > *s).unwrap_or(true) {
            best = Some((adjusted, c));
        }
    }
    best.filter(|(s, _)| *s > 0.0).map(|(_, el)| el)
}

fn semantic_fallback<'a>(root: ElementRef<'a>) -> Option<ElementRef<'a>> {
    let sel = Selector::parse("article, main, [role=main]").ok()?;
    root.select(&sel)
        .find(|el| !element_text(el).is_empty() && !inside_unlikely(el, &root, Strictness::TagsOnly))
}

fn first_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(norm_ws)
        .find(|s| !s.is_empty())
}

fn first_text_in<'a>(scope: ElementRef<'a>, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    scope
        .select(&sel)
        .map(|el| element_text(&el))
        .find(|s| !s.is_empty())
}

fn extract_title(doc: &Html, content: ElementRef) -> String {
    first_attr(doc, r#"meta[property="og:title"]"#, "content")
        .or_else(|| first_text_in(doc.root_element(), "title"))
        .or_else(|| first_text_in(content, "h1"))
        .or_else(|| first_text_in(doc.root_element(), "h1"))
        .unwrap_or_default()
}

fn extract_byline(doc: &Html, root: ElementRef) -> String {
    first_attr(doc, r#"meta[name="author"]"#, "content")
        .or_else(|| first_text_in(root, r#"[rel="author"]"#))
        .or_else(|| first_text_in(root, ".byline, .author, [itemprop=author]"))
        .filter(|s| s.chars().count() < 100)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_text(html: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        extract_main_content(&doc, doc.root_element()).map(|m| element_text(&m.element))
    }

    #[test]
    fn prefers_article_over_navigation() {
        let html = r#"
        <html><head><title>Doc page</title></head><body>
          <nav class="navbar"><a href="/a">Home</a> <a href="/b">Docs</a> <a href="/c">Blog, news, more links here</a></nav>
          <article><h1>Title</h1><p>This is the first paragraph, with enough text to count.</p>
          <p>And a second paragraph that also carries content, commas, and meaning.</p></article>
          <footer class="footer"><p>Copyright 2024 Example Corp, all rights reserved worldwide.</p></footer>
        </body></html>"#;
        let out = main_text(html).unwrap();
        assert!(out.contains("first paragraph"));
        assert!(!out.contains("Copyright"));
        assert!(!out.contains("Home"));
    }

    #[test]
    fn empty_body_has_no_main_content() {
        assert!(main_text("<html><body></body></html>").is_none());
        assert!(main_text("").is_none());
    }

    #[test]
    fn pure_navigation_has_no_main_content() {
        let html = r#"<html><body><nav><ul>
            <li><a href="/1">A fairly long navigation link label number one</a></li>
            <li><a href="/2">A fairly long navigation link label number two</a></li>
        </ul></nav></body></html>"#;
        assert!(main_text(html).is_none());
    }

    #[test]
    fn link_heavy_blocks_lose_to_prose() {
        let html = r#"<html><body>
          <div id="links"><p><a href="/x">link one with a long label, and more</a> <a href="/y">link two with a long label, and more</a></p></div>
          <div id="story"><p>Plain prose without any links in it at all, long enough to count.</p></div>
        </body></html>"#;
        let out = main_text(html).unwrap();
        assert!(out.contains("Plain prose"));
        assert!(!out.contains("link one"));
    }

    #[test]
    fn title_and_byline_come_from_metadata() {
        let html = r#"<html><head><title>Fallback title</title>
          <meta property="og:title" content="  OG   Title ">
          <meta name="author" content="Jane Doe"></head>
          <body><article><p>Some article text that is long enough to be scored.</p></article></body></html>"#;
        let doc = Html::parse_document(html);
        let m = extract_main_content(&doc, doc.root_element()).unwrap();
        assert_eq!(m.title, "OG Title");
        assert_eq!(m.byline, "Jane Doe");
    }

    #[test]
    fn short_article_falls_back_to_semantic_container() {
        let html = "<html><body><main><h1>Hi</h1><p>Short.</p></main></body></html>";
        let out = main_text(html).unwrap();
        assert!(out.contains("Short."));
    }

    #[test]
    fn hint_matching_is_token_based() {
        let doc = Html::parse_fragment(r#"<div class="shadow-head">x</div><div class="ad-slot">y</div>"#);
        let sel = Selector::parse("div").unwrap();
        let divs: Vec<_> = doc.select(&sel).collect();
        assert!(!is_unlikely_container(&divs[0], Strictness::StripHinted), "'head' must not match 'header'");
        assert!(is_unlikely_container(&divs[1], Strictness::StripHinted));
        assert!(!is_unlikely_container(&divs[1], Strictness::TagsOnly));
    }

    const LEDE: &str = "The council approved the budget on Tuesday after a long debate over road repairs, schools and parks.";
    const FOLLOW: &str = "Spending on transit rises by four percent, while the library fund stays flat for a second year.";

    fn story() -> String {
        format!("<h1>Budget approved</h1><p>{LEDE}</p><p>{FOLLOW}</p>")
    }

    #[test]
    fn page_wrapped_in_a_form_still_has_content() {
        let html = format!(
            r#"<html><body><form id="aspnetForm" method="post"><div id="content">{}</div></form></body></html>"#,
            story()
        );
        let out = main_text(&html).unwrap();
        assert!(out.contains("approved the budget"));
        assert!(out.contains("library fund"));
    }

    #[test]
    fn chrome_named_layout_wrapper_does_not_hide_the_post() {
        let html = format!(
            r#"<html><body><div class="layout has-sidebar"><nav><a href="/">Home</a></nav><div class="post">{}</div></div></body></html>"#,
            story()
        );
        let out = main_text(&html).unwrap();
        assert!(out.contains("approved the budget"));
        assert!(!out.contains("Home"));
    }

    #[test]
    fn article_inside_shared_wrapper_is_found() {
        let html = format!(
            r#"<html><body><div id="shared-layout"><article>{}</article><footer><p>Copyright 2024 Example Corp, all rights reserved worldwide.</p></footer></div></body></html>"#,
            story()
        );
        let out = main_text(&html).unwrap();
        assert!(out.contains("approved the budget"));
        assert!(!out.contains("Copyright"));
    }

    #[test]
    fn form_and_hinted_wrapper_together() {
        let html = format!(
            r#"<html><body><form id="aspnetForm"><div class="share-wrapper"><div id="main-body">{}</div></div></form></body></html>"#,
            story()
        );
        let out = main_text(&html).unwrap();
        assert!(out.contains("Spending on transit"));
    }

    #[test]
    fn strict_pass_still_drops_hinted_chrome_when_article_is_long() {
        let para = LEDE.repeat(2);
        let html = format!(
            r#"<html><body><div class="comments"><p>{FOLLOW} A reader comment that goes on a bit.</p></div>
            <div class="entry"><p>{para}</p><p>{para}</p></div></body></html>"#
        );
        let out = main_text(&html).unwrap();
        assert!(out.contains("approved the budget"));
        assert!(!out.contains("reader comment"));
    }
}
