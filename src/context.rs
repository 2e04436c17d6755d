//! Prompt context assembly.
//!
//! Turns the final pool order into positional sources (`S1..Sn`), a
//! numbered candidates listing, and the page-ordered context lines tagged
//! `[S# pPAGE]`. Each document contributes at most `max_chunks_per_doc`
//! chunks and `max_chars_per_doc` characters of chunk text; the line that
//! crosses the character cap is cut and ends in `[...]`. Source numbering
//! is fixed here and is never re-sorted afterwards.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::corpus::Corpus;
use crate::models::{ChunkRow, PoolEntry, SourceRef};

const MAX_LISTED_PAGES: usize = 12;

/// Everything the answering and linking steps need about the sources.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub sources: Vec<SourceRef>,
    pub candidates_block: String,
    /// Page-ordered context lines joined by blank lines.
    pub context_text: String,
    /// Per source: page → text of the chunks covering that page.
    pub page_text: Vec<BTreeMap<i64, String>>,
}

impl AssembledContext {
    /// Text of `page` in source `s` (1-based), if known.
    pub fn text_for(&self, s: i64, page: i64) -> Option<&str> {
        if s < 1 {
            return None;
        }
        self.page_text
            .get((s - 1) as usize)?
            .get(&page)
            .map(String::as_str)
    }

    /// First-page text of every source, for question reformulation.
    pub fn page_one_blocks(&self) -> Vec<String> {
        self.page_text
            .iter()
            .enumerate()
            .filter_map(|(i, pages)| {
                pages
                    .get(&1)
                    .map(|text| format!("[S{} p1] {}", i + 1, text))
            })
            .collect()
    }
}

fn cap_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n\n[...]", &text[..cut]),
        None => text,
    }
}

/// Context lines for source `s`: its chunks grouped by starting page, in
/// page order, within a budget of `max_chars` characters of chunk text.
fn source_lines(s: usize, chunks: &[ChunkRow], pages: &BTreeSet<i64>, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut budget = max_chars;
    for &page in pages {
        for chunk in chunks.iter().filter(|c| c.page == page) {
            let len = chunk.text.chars().count();
            if len <= budget {
                lines.push(format!("[S{} p{}] {}", s, page, chunk.text));
                budget -= len;
                continue;
            }
            let cut = if budget == 0 {
                "[...]".to_string()
            } else {
                cap_chars(chunk.text.clone(), budget)
            };
            lines.push(format!("[S{} p{}] {}", s, page, cut));
            return lines;
        }
    }
    lines
}

fn covers(chunk: &ChunkRow, page: i64) -> bool {
    let end = chunk.page_end.unwrap_or(chunk.page).max(chunk.page);
    chunk.page <= page && page <= end
}

pub fn candidates_block(sources: &[SourceRef]) -> String {
    if sources.is_empty() {
        return "No candidates.".to_string();
    }
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let pages: Vec<String> = s
                .pages
                .iter()
                .take(MAX_LISTED_PAGES)
                .map(|p| format!("p.{}", p))
                .collect();
            format!("{}. {} — {}", i + 1, s.title, pages.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the context for the picked documents, in order. Documents with
/// no usable chunks are skipped and take no source number; `None` when no
/// document contributes any text.
pub async fn assemble(
    corpus: &Corpus,
    picks: &[PoolEntry],
    retrieval: &RetrievalConfig,
) -> Option<AssembledContext> {
    let mut ctx = AssembledContext::default();
    let mut lines: Vec<String> = Vec::new();

    for entry in picks {
        let all_chunks = corpus.chunks(entry.document_id, None).await;
        let limit = retrieval.max_chunks_per_doc.max(0) as usize;
        let head: Vec<ChunkRow> = all_chunks.iter().take(limit).cloned().collect();
        if head.is_empty() {
            debug!(document_id = entry.document_id, "document has no usable chunks, skipped");
            continue;
        }

        let mut pages: BTreeSet<i64> = BTreeSet::new();
        for chunk in &head {
            pages.insert(chunk.page);
            if let Some(end) = chunk.page_end {
                pages.insert(end);
            }
        }

        let s = ctx.sources.len() + 1;
        lines.extend(source_lines(s, &head, &pages, retrieval.max_chars_per_doc));

        // Validation text covers every chunk on a listed page, capped or not.
        let mut page_text = BTreeMap::new();
        for &page in &pages {
            let covering: Vec<&str> = all_chunks
                .iter()
                .filter(|c| covers(c, page))
                .map(|c| c.text.as_str())
                .collect();
            if !covering.is_empty() {
                page_text.insert(page, covering.join("\n"));
            }
        }

        ctx.sources.push(SourceRef {
            document_id: entry.document_id,
            title: entry.title.clone(),
            published_at: entry.published_at.clone(),
            pages: pages.into_iter().collect(),
            source_path: entry.source_path.clone(),
            url: None,
            company_id: entry.company_id,
            total_hits: entry.hits.total_hits,
        });
        ctx.page_text.push(page_text);
    }

    if ctx.sources.is_empty() {
        return None;
    }
    ctx.candidates_block = candidates_block(&ctx.sources);
    ctx.context_text = lines.join("\n\n");
    debug!(
        sources = ctx.sources.len(),
        context_chars = ctx.context_text.len(),
        "assembled context"
    );
    Some(ctx)
}
