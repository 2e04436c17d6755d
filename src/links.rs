//! Navigable links for sources and citations.
//!
//! With a job id the links point at the broker's viewer
//! (`/view/{job}/{doc}?page=N`), which redirects to the uploaded PDF.
//! Without one they fall back to a `file://` URL of the source's PDF.

use url::{form_urlencoded, Url};

use crate::models::SourceRef;

const MAX_QUOTE_CHARS: usize = 120;

/// Swap a `.docx` extension for `.pdf`; other paths are returned as is.
pub fn prefer_pdf(path: &str) -> String {
    let split = path.len().saturating_sub(".docx".len());
    match (path.get(..split), path.get(split..)) {
        (Some(stem), Some(ext)) if ext.eq_ignore_ascii_case(".docx") => format!("{}.pdf", stem),
        _ => path.to_string(),
    }
}

pub fn viewer_url(job_id: &str, document_id: i64, page: i64) -> String {
    format!("/view/{}/{}?page={}", job_id, document_id, page)
}

fn file_url(source_path: &str) -> Option<Url> {
    if source_path.trim().is_empty() {
        return None;
    }
    Url::from_file_path(prefer_pdf(source_path.trim())).ok()
}

fn encode_quote(quote: &str) -> String {
    let cut: String = quote.chars().take(MAX_QUOTE_CHARS).collect();
    form_urlencoded::byte_serialize(cut.as_bytes()).collect()
}

/// Link for a source opened at `page`.
pub fn source_url(job_id: Option<&str>, source: &SourceRef, page: i64) -> Option<String> {
    match job_id {
        Some(job) => Some(viewer_url(job, source.document_id, page)),
        None => file_url(&source.source_path).map(|mut u| {
            u.set_fragment(Some(&format!("page={}", page)));
            u.to_string()
        }),
    }
}

/// Set each source's `url` to its first page.
pub fn attach_source_urls(sources: &mut [SourceRef], job_id: Option<&str>) {
    for source in sources.iter_mut() {
        let page = source.pages.first().copied().unwrap_or(1);
        source.url = source_url(job_id, source, page);
    }
}

/// Deep link for an inline citation. `None` unless `s` names a source and
/// `page` is one of its pages.
pub fn citation_href(
    job_id: Option<&str>,
    sources: &[SourceRef],
    s: i64,
    page: i64,
    quote: &str,
) -> Option<String> {
    let source = source_for(sources, s)?;
    if !source.pages.contains(&page) {
        return None;
    }
    let quote = encode_quote(quote);
    match job_id {
        Some(job) => Some(format!(
            "{}&quote={}",
            viewer_url(job, source.document_id, page),
            quote
        )),
        None => file_url(&source.source_path).map(|mut u| {
            u.set_fragment(Some(&format!("page={}&search={}", page, quote)));
            u.to_string()
        }),
    }
}

/// The 1-based `S#` source, if in range.
pub fn source_for(sources: &[SourceRef], s: i64) -> Option<&SourceRef> {
    if s < 1 {
        return None;
    }
    sources.get((s - 1) as usize)
}
