//! Parsing and linking of the answering step's output.
//!
//! The answer text follows a fixed contract:
//!
//! ```text
//! - Bullet text ending in markers [S1 p7 "verbatim quote of six to twelve words"]
//! CITATIONS(JSON)
//! [{"bullet": 1, "S": 1, "page": 7, "quote": "..."}]
//! Sources
//! - Title — p.7, p.9 — "one of the quotes"
//! ```
//!
//! [`parse_answer`] classifies lines with a small state machine (bullets,
//! JSON span, sources) so each part degrades independently: a broken JSON
//! array does not lose the bullets, a malformed Sources line is skipped on
//! its own. [`link_answer`] then validates citations against the assembled
//! sources and renders the HTML summary.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

use crate::context::AssembledContext;
use crate::links;
use crate::models::{Citation, LinkedRef, Reference, SourceRef};

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[S(\d+)\s+p(\d+)\s+"([^"]+)"\]"#).expect("static regex"));

static REFERENCE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[-*•]\s*(.+?)\s+[—–-]\s+(p\.\s*\d+(?:\s*,\s*(?:p\.\s*)?\d+)*)(?:\s+[—–-]\s+"(.*)")?\s*$"#)
        .expect("static regex")
});

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("static regex"));

const BULLET_GLYPHS: &[char] = &['-', '*', '•'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Bullets,
    Json,
    Sources,
}

fn classify_line(line: &str) -> Option<Section> {
    let t = line.trim();
    if t.len() >= "CITATIONS(JSON)".len()
        && t.get(..15).is_some_and(|p| p.eq_ignore_ascii_case("CITATIONS(JSON)"))
    {
        return Some(Section::Json);
    }
    let header = t.trim_end_matches(':').trim_end();
    if header.eq_ignore_ascii_case("sources") {
        return Some(Section::Sources);
    }
    None
}

fn is_bullet(line: &str) -> bool {
    line.trim_start().starts_with(BULLET_GLYPHS)
}

/// The answer split into its three parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAnswer {
    pub bullets: Vec<String>,
    pub citations: Vec<Citation>,
    pub references: Vec<Reference>,
    pub source_lines: Vec<String>,
}

pub fn parse_answer(text: &str, max_bullets: usize) -> ParsedAnswer {
    let mut section = Section::Bullets;
    let mut bullets = Vec::new();
    let mut json_buf = String::new();
    let mut source_lines = Vec::new();

    for line in text.lines() {
        if let Some(next) = classify_line(line) {
            if next == Section::Json {
                // Anything after the marker on the same line is JSON.
                json_buf.push_str(line.trim().get(15..).unwrap_or_default());
                json_buf.push('\n');
            }
            section = next;
            continue;
        }
        match section {
            Section::Bullets => {
                if is_bullet(line) {
                    bullets.push(line.trim_end().to_string());
                }
            }
            Section::Json => {
                json_buf.push_str(line);
                json_buf.push('\n');
            }
            Section::Sources => {
                if !line.trim().is_empty() {
                    source_lines.push(line.trim().to_string());
                }
            }
        }
    }
    bullets.truncate(max_bullets);

    let mut citations = parse_citation_json(&json_buf);
    if citations.is_empty() {
        citations = markers_in_bullets(&bullets);
    }
    let references = source_lines
        .iter()
        .filter_map(|l| parse_reference_line(l))
        .collect();

    ParsedAnswer {
        bullets,
        citations,
        references,
        source_lines,
    }
}

fn as_int(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().trim_start_matches(['S', 's', 'p']).parse().ok(),
        _ => None,
    }
}

fn citation_from_value(v: &Value) -> Option<Citation> {
    let quote = v.get("quote").and_then(Value::as_str)?.trim().to_string();
    if quote.is_empty() {
        return None;
    }
    Some(Citation {
        bullet: as_int(v.get("bullet")).unwrap_or(1),
        s: as_int(v.get("S").or_else(|| v.get("s")))?,
        page: as_int(v.get("page"))?,
        quote,
        valid: None,
    })
}

/// Parse the JSON array span. Objects missing `S`, `page` or `quote` are
/// dropped; an unparsable span yields nothing.
pub fn parse_citation_json(span: &str) -> Vec<Citation> {
    let (Some(start), Some(end)) = (span.find('['), span.rfind(']')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(&span[start..=end]) {
        Ok(Value::Array(items)) => items.iter().filter_map(citation_from_value).collect(),
        Ok(_) => Vec::new(),
        Err(e) => {
            debug!(error = %e, "citation JSON did not parse");
            Vec::new()
        }
    }
}

/// Citations recovered from well-formed inline markers, numbered by bullet.
pub fn markers_in_bullets(bullets: &[String]) -> Vec<Citation> {
    bullets
        .iter()
        .enumerate()
        .flat_map(|(i, b)| {
            MARKER.captures_iter(b).filter_map(move |c| {
                Some(Citation {
                    bullet: i as i64 + 1,
                    s: c[1].parse().ok()?,
                    page: c[2].parse().ok()?,
                    quote: c[3].trim().to_string(),
                    valid: None,
                })
            })
        })
        .collect()
}

pub fn parse_reference_line(line: &str) -> Option<Reference> {
    let caps = REFERENCE_LINE.captures(line.trim())?;
    let pages: Vec<i64> = DIGITS
        .find_iter(&caps[2])
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if pages.is_empty() {
        return None;
    }
    Some(Reference {
        title: caps[1].trim().to_string(),
        pages,
        quote: caps.get(3).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
    })
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A citation is valid when its source exists, the page is one of the
/// source's pages, and the quote appears in that page's text.
pub fn is_valid(citation: &Citation, ctx: &AssembledContext) -> bool {
    let Some(source) = links::source_for(&ctx.sources, citation.s) else {
        return false;
    };
    if !source.pages.contains(&citation.page) {
        return false;
    }
    let quote = normalize(&citation.quote);
    !quote.is_empty()
        && ctx
            .text_for(citation.s, citation.page)
            .is_some_and(|text| normalize(text).contains(&quote))
}

pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn anchor(href: &str, label: &str) -> String {
    format!(
        r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
        html_escape(href),
        label
    )
}

/// One bullet as HTML with markers turned into links where they resolve.
fn bullet_html(bullet: &str, sources: &[SourceRef], job_id: Option<&str>) -> String {
    let text = bullet.trim().trim_start_matches(BULLET_GLYPHS).trim();
    let mut out = String::new();
    let mut last = 0;
    for caps in MARKER.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&html_escape(&text[last..whole.start()]));
        let s: i64 = caps[1].parse().unwrap_or(0);
        let page: i64 = caps[2].parse().unwrap_or(0);
        let label = format!("[S{} p{}]", s, page);
        match links::citation_href(job_id, sources, s, page, &caps[3]) {
            Some(href) => out.push_str(&anchor(&href, &html_escape(&label))),
            None => out.push_str(&html_escape(&label)),
        }
        last = whole.end();
    }
    out.push_str(&html_escape(&text[last..]));
    out
}

/// Match a listed title to a known source: case-insensitive containment
/// in either direction, first source wins.
pub fn match_source<'a>(title: &str, sources: &'a [SourceRef]) -> Option<&'a SourceRef> {
    let wanted = title.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    sources.iter().find(|s| {
        let known = s.title.trim().to_lowercase();
        !known.is_empty() && (known.contains(&wanted) || wanted.contains(&known))
    })
}

/// Parsed, validated and linked answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkedAnswer {
    pub summary: String,
    pub summary_html: String,
    pub inline_citations: Vec<Citation>,
    pub references: Vec<Reference>,
    pub links: Vec<LinkedRef>,
}

pub fn link_answer(
    text: &str,
    ctx: &AssembledContext,
    job_id: Option<&str>,
    max_bullets: usize,
) -> LinkedAnswer {
    link_parsed(parse_answer(text, max_bullets), ctx, job_id)
}

/// Validate and link an already parsed answer. Clearing
/// `parsed.source_lines` first leaves the Sources section out of both
/// summaries.
pub fn link_parsed(parsed: ParsedAnswer, ctx: &AssembledContext, job_id: Option<&str>) -> LinkedAnswer {
    let sources = &ctx.sources;

    let inline_citations: Vec<Citation> = parsed
        .citations
        .into_iter()
        .map(|mut c| {
            c.valid = Some(is_valid(&c, ctx));
            c
        })
        .collect();

    let mut links_out = Vec::new();
    let mut sources_html = Vec::new();
    for (line, reference) in parsed.source_lines.iter().map(|l| (l, parse_reference_line(l))) {
        let display = line.trim_start_matches(BULLET_GLYPHS).trim();
        let matched = reference
            .as_ref()
            .and_then(|r| match_source(&r.title, sources).map(|s| (r, s)));
        match matched {
            Some((r, best)) => {
                let page = r
                    .pages
                    .first()
                    .or(best.pages.first())
                    .copied()
                    .unwrap_or(1);
                let url = links::source_url(job_id, best, page).unwrap_or_default();
                sources_html.push(if url.is_empty() {
                    html_escape(display)
                } else {
                    anchor(&url, &html_escape(display))
                });
                links_out.push(LinkedRef {
                    title: best.title.clone(),
                    pages: if r.pages.is_empty() { best.pages.clone() } else { r.pages.clone() },
                    url,
                    document_id: best.document_id,
                    published_at: best.published_at.clone(),
                });
            }
            None => sources_html.push(html_escape(display)),
        }
    }

    let mut summary_html = String::new();
    if !parsed.bullets.is_empty() {
        summary_html.push_str("<ul>");
        for b in &parsed.bullets {
            summary_html.push_str(&format!("<li>{}</li>", bullet_html(b, sources, job_id)));
        }
        summary_html.push_str("</ul>");
    }
    if !sources_html.is_empty() {
        summary_html.push_str("<h4>Sources</h4><ul>");
        for item in &sources_html {
            summary_html.push_str(&format!("<li>{}</li>", item));
        }
        summary_html.push_str("</ul>");
    }

    let mut summary = parsed.bullets.join("\n");
    if !parsed.source_lines.is_empty() {
        summary.push_str("\n\nSources\n");
        summary.push_str(&parsed.source_lines.join("\n"));
    }

    LinkedAnswer {
        summary,
        summary_html,
        inline_citations,
        references: parsed.references,
        links: links_out,
    }
}
