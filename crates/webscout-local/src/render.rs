//! Subtree → lightweight markdown.
//!
//! Images and other embedded media are always dropped. Links render as their
//! anchor text unless `include_links` is set.

use html_scraper::node::Node;
use html_scraper::{ElementRef, Selector};

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub include_links: bool,
    /// Base for resolving relative hrefs.
    pub base_url: Option<url::Url>,
}

/// Never rendered, including their subtrees.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "title", "meta", "link", "img", "picture",
    "svg", "video", "audio", "iframe", "canvas", "object", "embed", "source", "track", "map",
    "button", "input", "select", "textarea", "nav", "footer", "aside", "dialog",
];

const BLOCK_WRAP_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "header", "figure", "figcaption", "address",
    "details", "summary", "dl", "dt", "dd", "body", "html", "center",
];

pub fn render_markdown(root: ElementRef, opts: &RenderOptions) -> String {
    let r = Renderer { opts };
    let raw = r.element(root);
    tidy_lines(&raw)
}

struct Renderer<'o> {
    opts: &'o RenderOptions,
}

fn collapse_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_ws = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_ws {
                out.push(' ');
            }
            prev_ws = true;
        } else {
            out.push(ch);
            prev_ws = false;
        }
    }
    out
}

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_hidden(el: &ElementRef) -> bool {
    el.value().attr("hidden").is_some() || el.value().attr("aria-hidden") == Some("true")
}

fn block(inner: &str) -> String {
    let t = inner.trim();
    if t.is_empty() {
        return String::new();
    }
    format!("\n\n{t}\n\n")
}

/// Wrap inline content in a marker, keeping surrounding spaces outside it.
fn wrap_inline(inner: &str, marker: &str) -> String {
    let t = inner.trim();
    if t.is_empty() {
        return inner.to_string();
    }
    let lead = if inner.starts_with(' ') { " " } else { "" };
    let trail = if inner.ends_with(' ') { " " } else { "" };
    format!("{lead}{marker}{t}{marker}{trail}")
}

fn code_language(el: &ElementRef) -> String {
    let mut classes: Vec<&str> = el.value().classes().collect();
    if let Some(code) = el
        .children()
        .filter_map(ElementRef::wrap)
        .find(|c| c.value().name() == "code")
    {
        classes.extend(code.value().classes());
    }
    classes
        .iter()
        .find_map(|c| {
            c.strip_prefix("language-")
                .or_else(|| c.strip_prefix("lang-"))
        })
        .unwrap_or("")
        .to_string()
}

impl Renderer<'_> {
    fn children(&self, el: ElementRef) -> String {
        let mut out = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(t) => out.push_str(&collapse_ws(t)),
                Node::Element(_) => {
                    if let Some(c) = ElementRef::wrap(child) {
                        out.push_str(&self.element(c));
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn element(&self, el: ElementRef) -> String {
        let tag = el.value().name();
        if SKIP_TAGS.contains(&tag) || is_hidden(&el) {
            return String::new();
        }
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = tag[1..].parse::<usize>().unwrap_or(1);
                let text = norm_ws(&self.children(el));
                format!("\n\n{} {}\n\n", "#".repeat(level), text)
            }
            "br" => "\n".to_string(),
            "hr" => "\n\n---\n\n".to_string(),
            "pre" => self.code_block(el),
            "code" | "kbd" | "samp" | "tt" => {
                let t = norm_ws(&el.text().collect::<String>());
                if t.is_empty() {
                    String::new()
                } else {
                    format!("`{t}`")
                }
            }
            "strong" | "b" => wrap_inline(&self.children(el), "**"),
            "em" | "i" => wrap_inline(&self.children(el), "*"),
            "del" | "s" | "strike" => wrap_inline(&self.children(el), "~~"),
            "a" => self.link(el),
            "ul" => self.list(el, false),
            "ol" => self.list(el, true),
            "blockquote" => self.blockquote(el),
            "table" => self.table(el),
            t if BLOCK_WRAP_TAGS.contains(&t) => block(&self.children(el)),
            _ => self.children(el),
        }
    }

    fn code_block(&self, el: ElementRef) -> String {
        let mut code = String::new();
        preformatted_text(el, &mut code);
        let code = code.trim_matches('\n');
        if code.trim().is_empty() {
            return String::new();
        }
        format!("\n\n```{}\n{}\n```\n\n", code_language(&el), code)
    }

    fn link(&self, el: ElementRef) -> String {
        let inner = self.children(el);
        let text = norm_ws(&inner);
        if text.is_empty() {
            return String::new();
        }
        if !self.opts.include_links {
            return inner;
        }
        let Some(href) = el.value().attr("href").map(str::trim) else {
            return inner;
        };
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return inner;
        }
        let resolved = match &self.opts.base_url {
            Some(base) => base
                .join(href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        };
        let lead = if inner.starts_with(' ') { " " } else { "" };
        let trail = if inner.ends_with(' ') { " " } else { "" };
        format!("{lead}[{text}]({resolved}){trail}")
    }

    fn list(&self, el: ElementRef, ordered: bool) -> String {
        let mut idx = el
            .value()
            .attr("start")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(1);
        let mut out = String::from("\n\n");
        for li in el.children().filter_map(ElementRef::wrap) {
            if li.value().name() != "li" || is_hidden(&li) {
                continue;
            }
            let body = self.children(li);
            let lines: Vec<&str> = body
                .lines()
                .map(|l| l.trim_end())
                .filter(|l| !l.trim().is_empty())
                .collect();
            if lines.is_empty() {
                continue;
            }
            let marker = if ordered {
                format!("{idx}. ")
            } else {
                "- ".to_string()
            };
            let indent = " ".repeat(marker.len());
            out.push_str(&marker);
            out.push_str(lines[0].trim_start());
            out.push('\n');
            for l in &lines[1..] {
                out.push_str(&indent);
                out.push_str(l);
                out.push('\n');
            }
            idx += 1;
        }
        out.push('\n');
        out
    }

    fn blockquote(&self, el: ElementRef) -> String {
        let inner = self.children(el);
        let inner = inner.trim();
        if inner.is_empty() {
            return String::new();
        }
        let quoted: Vec<String> = inner
            .lines()
            .map(|l| {
                let l = l.trim();
                if l.is_empty() {
                    ">".to_string()
                } else {
                    format!("> {l}")
                }
            })
            .collect();
        format!("\n\n{}\n\n", quoted.join("\n"))
    }

    fn table(&self, el: ElementRef) -> String {
        let (Ok(row_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("th, td")) else {
            return block(&self.children(el));
        };
        let mut rows: Vec<String> = Vec::new();
        for tr in el.select(&row_sel) {
            let cells: Vec<String> = tr
                .select(&cell_sel)
                .map(|c| norm_ws(&self.children(c)).replace('|', "\\|"))
                .collect();
            if cells.iter().all(|c| c.is_empty()) {
                continue;
            }
            rows.push(format!("| {} |", cells.join(" | ")));
            if rows.len() == 1 {
                let sep: Vec<&str> = cells.iter().map(|_| "---").collect();
                rows.push(format!("| {} |", sep.join(" | ")));
            }
        }
        if rows.is_empty() {
            return String::new();
        }
        format!("\n\n{}\n\n", rows.join("\n"))
    }
}

/// Raw text of a `<pre>` subtree: whitespace kept, `<br>` as newline,
/// skipped and hidden children dropped.
fn preformatted_text(el: ElementRef, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => {
                let Some(c) = ElementRef::wrap(child) else {
                    continue;
                };
                if e.name() == "br" {
                    out.push('\n');
                } else if !SKIP_TAGS.contains(&e.name()) && !is_hidden(&c) {
                    preformatted_text(c, out);
                }
            }
            _ => {}
        }
    }
}

/// Trim trailing space and collapse interior space runs, leaving fenced code untouched.
fn tidy_lines(s: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;
    for line in s.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            out.push(line.trim().to_string());
            continue;
        }
        if in_fence {
            out.push(line.to_string());
            continue;
        }
        let body = line.trim_start();
        let indent = &line[..line.len() - body.len()];
        let collapsed = collapse_ws(body.trim_end());
        if collapsed.is_empty() {
            out.push(String::new());
        } else {
            // Keep list indentation, drop stray leading spaces elsewhere.
            let keep_indent = indent.chars().all(|c| c == ' ')
                && (collapsed.starts_with("- ") || collapsed.starts_with('>') || starts_with_ordinal(&collapsed));
            if keep_indent {
                out.push(format!("{indent}{collapsed}"));
            } else {
                out.push(collapsed);
            }
        }
    }
    out.join("\n").trim().to_string()
}

fn starts_with_ordinal(s: &str) -> bool {
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && s[digits..].starts_with(". ")
}
