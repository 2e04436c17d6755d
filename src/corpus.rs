//! Read access to the report corpus.
//!
//! [`Corpus`] wraps the SQLite pool and exposes the handful of queries the
//! pipeline needs: company resolution against `ref_company`, the two pool
//! queries (precomputed hit counts and whole corpus), document lookup, and
//! chunk reads through [`crate::layouts`].

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::LazyLock;

use crate::layouts;
use crate::models::{ChunkRow, DocumentRecord, HitCounts, PoolEntry};

static YYMMDD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{6})").expect("static regex"));

/// Date encoded in a report path as the first `YYMMDD` run, read as 20YY.
pub fn path_date(path: &str) -> Option<NaiveDate> {
    let m = YYMMDD.find(path)?;
    NaiveDate::parse_from_str(&format!("20{}", m.as_str()), "%Y%m%d").ok()
}

fn parse_meta(raw: Option<String>) -> Value {
    raw.and_then(|s| serde_json::from_str::<Value>(&s).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Default::default()))
}

fn document_from_row(row: &SqliteRow) -> DocumentRecord {
    DocumentRecord {
        document_id: row.try_get("document_id").unwrap_or_default(),
        title: row.try_get::<Option<String>, _>("title").ok().flatten().unwrap_or_default(),
        published_at: row
            .try_get::<Option<String>, _>("published_at")
            .ok()
            .flatten()
            .unwrap_or_default(),
        file_uri: row.try_get::<Option<String>, _>("file_uri").ok().flatten().unwrap_or_default(),
        mime_type: row.try_get::<Option<String>, _>("mime_type").ok().flatten().unwrap_or_default(),
        meta: parse_meta(row.try_get::<Option<String>, _>("meta").ok().flatten()),
    }
}

/// Build a pool entry from a document and its hit counts.
pub fn pool_entry(doc: &DocumentRecord, company_id: Option<i64>, hits: HitCounts) -> PoolEntry {
    let source_path = doc.source_path();
    PoolEntry {
        document_id: doc.document_id,
        title: doc.display_title(),
        published_at: doc.display_published_at(),
        source_url: doc.source_url(),
        path_date: doc
            .meta
            .get("absolute_path")
            .and_then(Value::as_str)
            .and_then(path_date),
        source_path,
        company_id,
        hits,
    }
}

fn pool_entry_from_row(row: &SqliteRow) -> PoolEntry {
    let doc = document_from_row(row);
    let get = |col: &str| row.try_get::<Option<i64>, _>(col).ok().flatten().unwrap_or(0);
    let hits = HitCounts {
        name_hits: get("name_hits"),
        ticker_hits: get("ticker_hits"),
        alias_hits: get("alias_hits"),
        total_hits: get("total_hits"),
    };
    let company_id = row.try_get::<Option<i64>, _>("company_id").ok().flatten();
    pool_entry(&doc, company_id, hits)
}

const DOC_COLUMNS: &str = "d.document_id, d.title, d.published_at, d.file_uri, d.mime_type, d.meta";

#[derive(Clone)]
pub struct Corpus {
    pool: SqlitePool,
}

impl Corpus {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Map cues (tickers or legal-name fragments) to company ids:
    /// case-insensitive ticker equality or legal-name substring.
    pub async fn resolve_company_ids(&self, cues: &[String]) -> Result<Vec<i64>> {
        let cues: Vec<String> = cues
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if cues.is_empty() {
            return Ok(Vec::new());
        }

        let clauses = vec!["(LOWER(ticker) = ? OR LOWER(legal_name) LIKE ?)"; cues.len()];
        let sql = format!(
            "SELECT DISTINCT company_id FROM ref_company WHERE {} ORDER BY company_id",
            clauses.join(" OR ")
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for cue in &cues {
            query = query.bind(cue.clone()).bind(format!("%{}%", cue));
        }
        query
            .fetch_all(&self.pool)
            .await
            .context("Failed to resolve company ids")
    }

    async fn has_alias_hits(&self) -> bool {
        sqlx::query("PRAGMA table_info(company_term_count)")
            .fetch_all(&self.pool)
            .await
            .map(|rows| {
                rows.iter()
                    .any(|r| r.try_get::<String, _>("name").ok().as_deref() == Some("alias_hits"))
            })
            .unwrap_or(false)
    }

    /// Fast path: precomputed hit rows for the given companies, best first.
    pub async fn hit_pool(&self, company_ids: &[i64], limit: i64) -> Result<Vec<PoolEntry>> {
        if company_ids.is_empty() {
            return Ok(Vec::new());
        }
        let alias = if self.has_alias_hits().await {
            "c.alias_hits"
        } else {
            "0 AS alias_hits"
        };
        let marks = vec!["?"; company_ids.len()].join(",");
        let sql = format!(
            r#"
            SELECT {DOC_COLUMNS},
                   c.company_id, c.total_hits, c.name_hits, c.ticker_hits, {alias}
            FROM company_term_count c
            JOIN document d ON d.document_id = c.document_id
            WHERE c.company_id IN ({marks})
            ORDER BY c.total_hits DESC,
                     COALESCE(d.published_at, '') DESC,
                     c.name_hits DESC,
                     c.ticker_hits DESC
            LIMIT ?
            "#
        );
        let mut query = sqlx::query(&sql);
        for id in company_ids {
            query = query.bind(*id);
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to read company hit pool")?;
        Ok(rows.iter().map(pool_entry_from_row).collect())
    }

    /// Whole-corpus pool. Documents without any hit row are kept with zero
    /// counts; a document with several company rows appears once per row.
    pub async fn corpus_pool(&self, limit: i64) -> Result<Vec<PoolEntry>> {
        let alias = if self.has_alias_hits().await {
            "c.alias_hits"
        } else {
            "0 AS alias_hits"
        };
        let sql = format!(
            r#"
            SELECT {DOC_COLUMNS},
                   c.company_id, c.total_hits, c.name_hits, c.ticker_hits, {alias}
            FROM document d
            LEFT JOIN company_term_count c ON c.document_id = d.document_id
            ORDER BY COALESCE(c.total_hits, 0) DESC,
                     COALESCE(d.published_at, '') DESC,
                     COALESCE(c.name_hits, 0) DESC,
                     COALESCE(c.ticker_hits, 0) DESC
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to read corpus pool")?;
        Ok(rows.iter().map(pool_entry_from_row).collect())
    }

    pub async fn document(&self, document_id: i64) -> Result<Option<DocumentRecord>> {
        let sql = format!("SELECT {DOC_COLUMNS} FROM document d WHERE d.document_id = ?");
        let row = sqlx::query(&sql)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read document {}", document_id))?;
        Ok(row.as_ref().map(document_from_row))
    }

    pub async fn document_ids(&self) -> Result<Vec<i64>> {
        sqlx::query_scalar("SELECT document_id FROM document ORDER BY document_id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list documents")
    }

    /// Chunks of a document in index order, through whichever layout the
    /// corpus uses. `limit` caps the number of rows read.
    pub async fn chunks(&self, document_id: i64, limit: Option<i64>) -> Vec<ChunkRow> {
        layouts::fetch_chunks(&self.pool, document_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_date_reads_first_yymmdd() {
        assert_eq!(
            path_date("/reports/Docx Retail/240812 JBH FY24 result.docx"),
            NaiveDate::from_ymd_opt(2024, 8, 12)
        );
        assert_eq!(path_date("/reports/no date here.docx"), None);
        assert_eq!(path_date("/reports/991399 bad.docx"), None);
    }

    #[test]
    fn meta_parse_tolerates_garbage() {
        assert!(parse_meta(Some("not json".into())).is_object());
        assert!(parse_meta(None).is_object());
        assert_eq!(
            parse_meta(Some(r#"{"absolute_path":"/a"}"#.into()))["absolute_path"],
            "/a"
        );
    }
}
