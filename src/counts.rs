//! Rebuild of the `company_term_count` mention index.
//!
//! For each (document, company) pair the index holds how often the
//! company's legal name, ticker and aliases occur in the document's chunk
//! text, matched case-insensitively on alphanumeric boundaries (the same
//! matching as the dynamic scan). The fast ranking path reads nothing
//! else, so a corpus without this index always falls back to scanning.
//!
//! When `document_company` carries links, only the linked pairs are
//! counted and every linked pair gets a row, zero hits included.
//! Otherwise every document is scanned against every company, and a
//! document's rows are replaced by the pairs with at least one hit.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::Config;
use crate::db;
use crate::layouts;
use crate::lexical::count_term;
use crate::migrate;
use crate::models::HitCounts;

/// Outcome of a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountSummary {
    pub documents: usize,
    pub rows: usize,
    /// Whether counting followed `document_company` links.
    pub linked: bool,
}

#[derive(Debug, Clone)]
struct CompanyTerms {
    company_id: i64,
    legal_name: String,
    ticker: String,
    aliases: Vec<String>,
}

impl CompanyTerms {
    fn count(&self, text: &str) -> HitCounts {
        let name_hits = count_term(text, &self.legal_name) as i64;
        let ticker_hits = count_term(text, &self.ticker) as i64;
        let alias_hits = self
            .aliases
            .iter()
            .map(|a| count_term(text, a) as i64)
            .sum::<i64>();
        HitCounts {
            name_hits,
            ticker_hits,
            alias_hits,
            total_hits: name_hits + ticker_hits + alias_hits,
        }
    }
}

/// Open the corpus, make sure the schema and universe are in place, and
/// rebuild the mention index.
pub async fn run_counts(config: &Config) -> Result<CountSummary> {
    let pool = db::connect(config).await?;
    migrate::create_schema(&pool).await?;
    migrate::seed_universe(&pool, &config.universe()).await?;
    let summary = rebuild_counts(&pool).await?;
    pool.close().await;
    Ok(summary)
}

pub async fn rebuild_counts(pool: &SqlitePool) -> Result<CountSummary> {
    ensure_alias_hits(pool).await?;
    let companies = company_terms(pool).await?;

    let documents: Vec<i64> = sqlx::query_scalar("SELECT document_id FROM document ORDER BY document_id")
        .fetch_all(pool)
        .await
        .context("Failed to list documents")?;
    let links = document_links(pool).await?;
    let linked = !links.is_empty();
    info!(
        documents = documents.len(),
        companies = companies.len(),
        linked,
        "rebuilding company mention counts"
    );

    let mut summary = CountSummary {
        linked,
        ..Default::default()
    };
    for (i, &document_id) in documents.iter().enumerate() {
        let text = layouts::fetch_chunks(pool, document_id, None)
            .await
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join(" \n");

        let rows: Vec<(i64, HitCounts)> = if linked {
            let Some(ids) = links.get(&document_id) else {
                continue;
            };
            companies
                .iter()
                .filter(|c| ids.contains(&c.company_id))
                .map(|c| (c.company_id, c.count(&text)))
                .collect()
        } else {
            companies
                .iter()
                .map(|c| (c.company_id, c.count(&text)))
                .filter(|(_, hits)| hits.total_hits > 0)
                .collect()
        };

        write_rows(pool, document_id, &rows, !linked)
            .await
            .with_context(|| format!("Failed to write counts for document {}", document_id))?;
        debug!(document_id, rows = rows.len(), "document counted");
        summary.documents += 1;
        summary.rows += rows.len();

        if (i + 1) % 100 == 0 {
            info!(processed = i + 1, total = documents.len(), rows = summary.rows, "counting");
        }
    }

    info!(
        documents = summary.documents,
        rows = summary.rows,
        "company mention counts rebuilt"
    );
    Ok(summary)
}

async fn write_rows(
    pool: &SqlitePool,
    document_id: i64,
    rows: &[(i64, HitCounts)],
    replace: bool,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    if replace {
        sqlx::query("DELETE FROM company_term_count WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
    }

    for (company_id, hits) in rows {
        sqlx::query(
            r#"
            INSERT INTO company_term_count
                (document_id, company_id, name_hits, ticker_hits, alias_hits, total_hits)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, company_id) DO UPDATE SET
                name_hits = excluded.name_hits,
                ticker_hits = excluded.ticker_hits,
                alias_hits = excluded.alias_hits,
                total_hits = excluded.total_hits
            "#,
        )
        .bind(document_id)
        .bind(company_id)
        .bind(hits.name_hits)
        .bind(hits.ticker_hits)
        .bind(hits.alias_hits)
        .bind(hits.total_hits)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Older corpora carry a count table without `alias_hits`.
async fn ensure_alias_hits(pool: &SqlitePool) -> Result<()> {
    let columns = sqlx::query("PRAGMA table_info(company_term_count)")
        .fetch_all(pool)
        .await?;
    let present = columns
        .iter()
        .any(|r| r.try_get::<String, _>("name").ok().as_deref() == Some("alias_hits"));
    if !present {
        sqlx::query(
            "ALTER TABLE company_term_count ADD COLUMN alias_hits INTEGER NOT NULL DEFAULT 0",
        )
        .execute(pool)
        .await
        .context("Failed to add alias_hits column")?;
    }
    Ok(())
}

async fn company_terms(pool: &SqlitePool) -> Result<Vec<CompanyTerms>> {
    let mut aliases: HashMap<i64, Vec<String>> = HashMap::new();
    for row in sqlx::query("SELECT company_id, alias FROM ref_company_alias")
        .fetch_all(pool)
        .await
        .context("Failed to read company aliases")?
    {
        let alias: String = row.try_get("alias")?;
        if !alias.trim().is_empty() {
            aliases
                .entry(row.try_get("company_id")?)
                .or_default()
                .push(alias.trim().to_string());
        }
    }

    let rows = sqlx::query(
        "SELECT company_id, legal_name, COALESCE(ticker, '') AS ticker FROM ref_company ORDER BY company_id",
    )
    .fetch_all(pool)
    .await
    .context("Failed to read companies")?;

    rows.iter()
        .map(|row| -> Result<CompanyTerms> {
            let company_id: i64 = row.try_get("company_id")?;
            Ok(CompanyTerms {
                company_id,
                legal_name: row.try_get("legal_name")?,
                ticker: row.try_get("ticker")?,
                aliases: aliases.remove(&company_id).unwrap_or_default(),
            })
        })
        .collect()
}

async fn document_links(pool: &SqlitePool) -> Result<HashMap<i64, Vec<i64>>> {
    let mut links: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in sqlx::query("SELECT document_id, company_id FROM document_company")
        .fetch_all(pool)
        .await
        .context("Failed to read document_company")?
    {
        links
            .entry(row.try_get("document_id")?)
            .or_default()
            .push(row.try_get("company_id")?);
    }
    Ok(links)
}
