//! Candidate pool construction and ranking.
//!
//! A pool is built along one of two routes depending on the question's use
//! case, then deduplicated, optionally re-ranked by how well titles and
//! paths match the non-company query terms, cut to the top K, and finally
//! re-ordered newest first. That final order becomes the `S#` numbering.

use anyhow::Result;
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::classify::{Classification, UseCase};
use crate::config::RetrievalConfig;
use crate::corpus::Corpus;
use crate::models::PoolEntry;
use crate::resolver::{self, extra_terms};
use crate::traits::CompanyIdentifier;
use crate::universe::Universe;

/// Where the pool rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRoute {
    CompanyHits,
    Corpus,
    OffBook,
}

#[derive(Debug, Clone)]
pub struct CandidatePool {
    pub entries: Vec<PoolEntry>,
    pub route: PoolRoute,
    pub tickers: Vec<String>,
    pub extra_terms: Vec<String>,
}

/// Build the raw (unranked) pool for a classified question. `None` means
/// no documents could be found by any route.
pub async fn build_pool(
    corpus: &Corpus,
    universe: &Universe,
    identifier: &dyn CompanyIdentifier,
    retrieval: &RetrievalConfig,
    query: &str,
    tokens: &[String],
    classification: &Classification,
) -> Result<Option<CandidatePool>> {
    let pool = match classification.use_case {
        UseCase::CompanySpecific => {
            let resolution = resolver::resolve_static(corpus, universe, query, tokens).await?;
            let terms = extra_terms(tokens, &resolution.cues, &resolution.tickers);
            debug!(company_ids = ?resolution.company_ids, ?terms, "use-case 1 resolution");

            let mut entries = corpus
                .hit_pool(&resolution.company_ids, retrieval.company_pool_limit)
                .await?;
            let mut route = PoolRoute::CompanyHits;
            if entries.is_empty() {
                entries = resolver::dynamic_pool(corpus, identifier, query, retrieval.company_pool_limit).await;
                route = PoolRoute::OffBook;
            }
            CandidatePool {
                entries,
                route,
                tickers: resolution.tickers,
                extra_terms: terms,
            }
        }
        UseCase::SectorMacro => {
            let tickers = universe.tickers_for_names(&classification.related_companies);
            let cues = if tickers.is_empty() {
                Vec::new()
            } else {
                universe.cues_for_tickers(&tickers)
            };
            let company_ids = corpus.resolve_company_ids(&tickers).await?;
            debug!(?tickers, ?company_ids, "use-case 2 resolution");

            let (mut entries, mut route) = if company_ids.is_empty() {
                (corpus.corpus_pool(retrieval.corpus_pool_limit).await?, PoolRoute::Corpus)
            } else {
                (
                    corpus.hit_pool(&company_ids, retrieval.sector_pool_limit).await?,
                    PoolRoute::CompanyHits,
                )
            };
            if entries.is_empty() {
                entries = resolver::dynamic_pool(corpus, identifier, query, retrieval.sector_pool_limit).await;
                route = PoolRoute::OffBook;
            }

            let mut terms = extra_terms(tokens, &cues, &tickers);
            for key_term in &classification.key_terms {
                if !terms.contains(key_term) {
                    terms.push(key_term.clone());
                }
            }
            CandidatePool {
                entries,
                route,
                tickers,
                extra_terms: terms,
            }
        }
    };

    info!(
        use_case = ?classification.use_case,
        route = ?pool.route,
        pool_size = pool.entries.len(),
        "built candidate pool"
    );
    if pool.entries.is_empty() {
        return Ok(None);
    }
    Ok(Some(pool))
}

/// Keep the first occurrence of each document.
pub fn dedup(entries: Vec<PoolEntry>) -> Vec<PoolEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(e.document_id))
        .collect()
}

fn parse_published(s: &str) -> Option<NaiveDateTime> {
    let s: String = s.trim().chars().take(19).collect();
    if s.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .or_else(|_| chrono::NaiveDate::parse_from_str(&s, "%Y/%m/%d"))
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Hits plus 2 per term in the title and 1 per term in the URL or path.
pub fn term_score(entry: &PoolEntry, terms: &[String]) -> i64 {
    let title = entry.title.to_lowercase();
    let location = format!("{} {}", entry.source_url, entry.source_path).to_lowercase();
    let bonus: i64 = terms
        .iter()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .map(|t| {
            let mut b = 0;
            if title.contains(&t) {
                b += 2;
            }
            if location.contains(&t) {
                b += 1;
            }
            b
        })
        .sum();
    entry.hits.total_hits + bonus
}

/// Publish date for tie-breaking; the date in the file path stands in
/// when the document has none.
fn tie_break_date(entry: &PoolEntry) -> Option<NaiveDateTime> {
    parse_published(&entry.published_at)
        .or_else(|| entry.path_date.and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Re-rank by [`term_score`], most recent first among equals. Entries
/// with equal score and date keep their order.
pub fn rerank_by_terms(entries: Vec<PoolEntry>, terms: &[String]) -> Vec<PoolEntry> {
    let mut scored: Vec<(i64, Option<NaiveDateTime>, PoolEntry)> = entries
        .into_iter()
        .map(|e| (term_score(&e, terms), tie_break_date(&e), e))
        .collect();
    scored.sort_by(|a, b| match b.0.cmp(&a.0) {
        Ordering::Equal => b.1.cmp(&a.1),
        other => other,
    });
    scored.into_iter().map(|(_, _, e)| e).collect()
}

fn publish_key(entry: &PoolEntry) -> &str {
    let d = entry.published_at.trim();
    if d.is_empty() {
        "0000-00-00"
    } else {
        d
    }
}

/// Dedup, optionally re-rank, keep `top_k`, then order newest first.
pub fn rank(entries: Vec<PoolEntry>, terms: &[String], top_k: usize) -> Vec<PoolEntry> {
    let mut ranked = dedup(entries);
    if !terms.is_empty() {
        ranked = rerank_by_terms(ranked, terms);
    }
    ranked.truncate(top_k);
    ranked.sort_by(|a, b| publish_key(b).cmp(publish_key(a)));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HitCounts;

    fn entry(id: i64, title: &str, published: &str, total: i64) -> PoolEntry {
        PoolEntry {
            document_id: id,
            title: title.to_string(),
            published_at: published.to_string(),
            source_url: String::new(),
            source_path: String::new(),
            company_id: Some(1),
            hits: HitCounts {
                total_hits: total,
                ..Default::default()
            },
            path_date: None,
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let out = dedup(vec![
            entry(1, "a", "", 9),
            entry(2, "b", "", 5),
            entry(1, "a-dup", "", 1),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "a");
    }

    #[test]
    fn title_and_path_bonuses() {
        let mut e = entry(1, "Gross margin deep dive", "", 3);
        e.source_path = "/reports/240101 margin review.docx".into();
        let terms = vec!["margin".to_string(), "outlook".to_string()];
        assert_eq!(term_score(&e, &terms), 3 + 2 + 1);
    }

    #[test]
    fn rerank_breaks_ties_by_date() {
        let terms = vec!["margins".to_string()];
        let out = rerank_by_terms(
            vec![
                entry(1, "old", "2023-01-01", 5),
                entry(2, "new", "2024-06-30", 5),
                entry(3, "Margins note", "2022-01-01", 4),
            ],
            &terms,
        );
        let ids: Vec<i64> = out.iter().map(|e| e.document_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn rank_selects_top_k_then_sorts_newest_first() {
        let out = rank(
            vec![
                entry(1, "a", "2022-03-01", 50),
                entry(2, "b", "", 40),
                entry(3, "c", "2024-03-01", 30),
                entry(1, "a", "2022-03-01", 50),
                entry(4, "d", "2025-01-01", 1),
            ],
            &[],
            3,
        );
        let ids: Vec<i64> = out.iter().map(|e| e.document_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn path_date_breaks_ties_for_undated_documents() {
        let mut undated = entry(1, "undated", "", 5);
        undated.path_date = chrono::NaiveDate::from_ymd_opt(2025, 2, 1);
        let out = rerank_by_terms(
            vec![entry(2, "dated", "2024-01-01", 5), undated],
            &["x".to_string()],
        );
        assert_eq!(out[0].document_id, 1);
    }

    #[test]
    fn parse_published_formats() {
        assert!(parse_published("2024-08-12").is_some());
        assert!(parse_published("2024/08/12").is_some());
        assert!(parse_published("2024-08-12 10:30:00+00:00").is_some());
        assert!(parse_published("August 2024").is_none());
    }
}
