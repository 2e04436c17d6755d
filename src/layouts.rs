//! Historical chunk storage layouts.
//!
//! Corpora built at different times store chunk text under different
//! table and column names. Each [`ChunkLayout`] describes one of them; the
//! reader probes them in preference order with `PRAGMA table_info` and
//! takes rows from the first layout that yields any non-empty text.

use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

use crate::models::ChunkRow;

/// One table/column arrangement for chunk rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub table: &'static str,
    pub text: &'static str,
    pub page: &'static str,
    /// Ordering column; optional, `rowid` is used when absent.
    pub index: &'static str,
}

/// Known layouts, most preferred first.
pub const LAYOUTS: &[ChunkLayout] = &[
    ChunkLayout { table: "chunk", text: "text", page: "page_start", index: "chunk_index" },
    ChunkLayout { table: "chunk", text: "chunk_text", page: "page_start", index: "chunk_index" },
    ChunkLayout { table: "chunk", text: "content", page: "page_no", index: "chunk_id" },
    ChunkLayout { table: "chunks", text: "content", page: "page_no", index: "chunk_id" },
    ChunkLayout { table: "doc_chunk", text: "content", page: "page_no", index: "chunk_idx" },
    ChunkLayout { table: "main_chunk", text: "content", page: "page_no", index: "chunk_id" },
];

async fn table_columns(pool: &SqlitePool, table: &str) -> HashSet<String> {
    let rows = match sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await
    {
        Ok(rows) => rows,
        Err(_) => return HashSet::new(),
    };
    rows.iter()
        .filter_map(|r| r.try_get::<String, _>("name").ok())
        .collect()
}

impl ChunkLayout {
    fn select_sql(&self, cols: &HashSet<String>, limit: Option<i64>) -> String {
        let index_expr = if cols.contains(self.index) {
            format!("COALESCE({}, 0)", self.index)
        } else {
            "0".to_string()
        };
        let order_expr = if cols.contains(self.index) {
            self.index
        } else {
            "rowid"
        };
        let section_expr = if cols.contains("section") { "section" } else { "NULL" };
        let page_end_expr = if cols.contains("page_end") { "page_end" } else { "NULL" };
        let limit_clause = match limit {
            Some(n) => format!(" LIMIT {}", n.max(0)),
            None => String::new(),
        };
        format!(
            "SELECT COALESCE({page}, 1) AS page, {page_end} AS page_end, {text} AS text, \
             {index} AS chunk_index, {section} AS section \
             FROM {table} WHERE document_id = ? ORDER BY {order}{limit}",
            page = self.page,
            page_end = page_end_expr,
            text = self.text,
            index = index_expr,
            section = section_expr,
            table = self.table,
            order = order_expr,
            limit = limit_clause,
        )
    }

    /// Read a document's chunks through this layout. `None` when the
    /// layout's table or required columns are missing or the query fails.
    async fn read(
        &self,
        pool: &SqlitePool,
        document_id: i64,
        limit: Option<i64>,
    ) -> Option<Vec<ChunkRow>> {
        let cols = table_columns(pool, self.table).await;
        if !cols.contains(self.text) || !cols.contains(self.page) {
            return None;
        }

        let sql = self.select_sql(&cols, limit);
        let rows = match sqlx::query(&sql).bind(document_id).fetch_all(pool).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!(table = self.table, text = self.text, error = %e, "chunk layout query failed");
                return None;
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let text: Option<String> = row.try_get("text").ok().flatten();
            let text = text.unwrap_or_default().trim().to_string();
            if text.is_empty() {
                continue;
            }
            let page: i64 = row.try_get::<Option<i64>, _>("page").ok().flatten().unwrap_or(1);
            out.push(ChunkRow {
                page,
                page_end: row.try_get::<Option<i64>, _>("page_end").ok().flatten(),
                chunk_index: row.try_get::<Option<i64>, _>("chunk_index").ok().flatten().unwrap_or(0),
                text,
                section: row
                    .try_get::<Option<String>, _>("section")
                    .ok()
                    .flatten()
                    .filter(|s| !s.trim().is_empty()),
            });
        }
        Some(out)
    }
}

/// Fetch a document's chunks in index order from the first layout that
/// yields rows. No match is not an error: the result is simply empty.
pub async fn fetch_chunks(pool: &SqlitePool, document_id: i64, limit: Option<i64>) -> Vec<ChunkRow> {
    for layout in LAYOUTS {
        if let Some(rows) = layout.read(pool, document_id, limit).await {
            if !rows.is_empty() {
                debug!(
                    document_id,
                    table = layout.table,
                    text = layout.text,
                    chunks = rows.len(),
                    "chunk layout hit"
                );
                return rows;
            }
        }
    }
    debug!(document_id, "no chunk layout matched");
    Vec::new()
}
