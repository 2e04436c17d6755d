//! Core data models used throughout the brief pipeline.
//!
//! These types represent the corpus rows (documents, chunks, hit counts),
//! the per-request candidate pool, and the structured payload returned to
//! callers once an answer has been parsed and linked.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel company id for companies discovered at request time that are
/// not in the reference table.
pub const OFF_BOOK_COMPANY_ID: i64 = -1;

/// Document metadata, with the derived fields pulled out of `meta`.
#[derive(Debug, Clone, Default)]
pub struct DocumentRecord {
    pub document_id: i64,
    pub title: String,
    pub published_at: String,
    pub file_uri: String,
    pub mime_type: String,
    pub meta: Value,
}

impl DocumentRecord {
    fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Alternate source URL: `meta.source_url`, `meta.url`, then `file_uri`.
    pub fn source_url(&self) -> String {
        self.meta_str("source_url")
            .or_else(|| self.meta_str("url"))
            .unwrap_or(self.file_uri.as_str())
            .to_string()
    }

    /// Local path of the original file: `meta.absolute_path`, then
    /// `meta.source_path`, then `meta.path`.
    pub fn source_path(&self) -> String {
        self.meta_str("absolute_path")
            .or_else(|| self.meta_str("source_path"))
            .or_else(|| self.meta_str("path"))
            .unwrap_or_default()
            .to_string()
    }

    /// Title with `meta.page_title` / `meta.title` as fallbacks.
    pub fn display_title(&self) -> String {
        if !self.title.trim().is_empty() {
            return self.title.clone();
        }
        self.meta_str("page_title")
            .or_else(|| self.meta_str("title"))
            .unwrap_or_default()
            .to_string()
    }

    /// Publish date with `meta.published_at` / `meta.date` as fallbacks.
    pub fn display_published_at(&self) -> String {
        if !self.published_at.trim().is_empty() {
            return self.published_at.clone();
        }
        self.meta_str("published_at")
            .or_else(|| self.meta_str("date"))
            .unwrap_or_default()
            .to_string()
    }
}

/// A chunk as read through one of the supported storage layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRow {
    pub page: i64,
    pub page_end: Option<i64>,
    pub chunk_index: i64,
    pub text: String,
    pub section: Option<String>,
}

/// Per-document mention counts for one company.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HitCounts {
    pub name_hits: i64,
    pub ticker_hits: i64,
    pub alias_hits: i64,
    pub total_hits: i64,
}

/// A candidate document in the per-request pool.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub document_id: i64,
    pub title: String,
    pub published_at: String,
    pub source_url: String,
    pub source_path: String,
    /// `None` when the document came from the corpus scan with no hit row.
    pub company_id: Option<i64>,
    pub hits: HitCounts,
    pub path_date: Option<NaiveDate>,
}

/// A positional source (`S1`, `S2`, ...) handed to the answering step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub document_id: i64,
    pub title: String,
    pub published_at: String,
    pub pages: Vec<i64>,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<i64>,
    #[serde(default)]
    pub total_hits: i64,
}

/// One inline citation `{bullet, S, page, quote}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub bullet: i64,
    #[serde(rename = "S")]
    pub s: i64,
    pub page: i64,
    pub quote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
}

/// A line from the answer's `Sources` block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    pub title: String,
    pub pages: Vec<i64>,
    #[serde(default)]
    pub quote: String,
}

/// A `Sources` line matched back to a known source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkedRef {
    pub title: String,
    pub pages: Vec<i64>,
    pub url: String,
    pub document_id: i64,
    #[serde(default)]
    pub published_at: String,
}

/// The result of a `search` or `expand_bullet` job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BriefPayload {
    pub summary: String,
    pub summary_html: String,
    pub sources: Vec<SourceRef>,
    pub inline_citations: Vec<Citation>,
    pub links: Vec<LinkedRef>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reformulated_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BriefPayload {
    /// Error-shaped payload used when a job cannot produce an answer.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}
