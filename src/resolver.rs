//! Company resolution.
//!
//! Static resolution maps tickers and aliases in the question to ids in
//! `ref_company`. When that finds nothing, [`dynamic_pool`] asks a
//! [`CompanyIdentifier`] who the question is about and counts mentions of
//! that company across every document's text.

use anyhow::Result;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::corpus::{self, Corpus};
use crate::lexical::{count_term, guess_tickers};
use crate::models::{DocumentRecord, HitCounts, PoolEntry, OFF_BOOK_COMPANY_ID};
use crate::traits::{CompanyGuess, CompanyIdentifier};
use crate::universe::Universe;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticResolution {
    pub tickers: Vec<String>,
    pub cues: Vec<String>,
    pub company_ids: Vec<i64>,
}

/// Resolve the companies a question names against the reference table.
pub async fn resolve_static(
    corpus: &Corpus,
    universe: &Universe,
    query: &str,
    tokens: &[String],
) -> Result<StaticResolution> {
    let tickers = guess_tickers(tokens, universe);
    let cues = if tickers.is_empty() {
        universe.cues_in_query(query)
    } else {
        universe.cues_for_tickers(&tickers)
    };
    debug!(?tickers, cues = cues.len(), "static company cues");

    let mut company_ids = corpus.resolve_company_ids(&cues).await?;
    if company_ids.is_empty() && !tickers.is_empty() {
        company_ids = corpus.resolve_company_ids(&tickers).await?;
    }

    Ok(StaticResolution {
        tickers,
        cues,
        company_ids,
    })
}

/// Query tokens that are not company cues or tickers, in token order.
pub fn extra_terms(tokens: &[String], cues: &[String], tickers: &[String]) -> Vec<String> {
    let company_words: HashSet<String> = cues
        .iter()
        .chain(tickers)
        .map(|w| w.to_lowercase())
        .collect();
    tokens
        .iter()
        .filter(|t| !t.is_empty() && !company_words.contains(&t.to_lowercase()))
        .cloned()
        .collect()
}

/// Word-bounded search terms derived from a company guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionTerms {
    name: Option<String>,
    short: Option<String>,
    aliases: Vec<String>,
}

impl MentionTerms {
    pub fn from_guess(guess: &CompanyGuess) -> Self {
        let name = guess.company_name.trim().to_lowercase();
        let short = guess.short_name.trim().to_lowercase();
        let aliases = guess
            .aliases
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty() && *a != name && *a != short)
            .collect();
        Self {
            short: (!short.is_empty() && short != name).then_some(short),
            name: (!name.is_empty()).then_some(name),
            aliases,
        }
    }

    /// Mention counts in `text`. The short name is counted in the ticker
    /// bucket.
    pub fn count(&self, text: &str) -> HitCounts {
        let name_hits = self.name.as_deref().map_or(0, |t| count_term(text, t)) as i64;
        let ticker_hits = self.short.as_deref().map_or(0, |t| count_term(text, t)) as i64;
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

/// Build a pool for a company that is not in the reference table by
/// scanning every document. Never fails: collaborator and storage errors
/// degrade to fewer (or no) hits.
pub async fn dynamic_pool(
    corpus: &Corpus,
    identifier: &dyn CompanyIdentifier,
    query: &str,
    limit: i64,
) -> Vec<PoolEntry> {
    let guess = match identifier.identify(query).await {
        Ok(Some(guess)) => guess,
        Ok(None) => {
            debug!("no identifiable off-book company");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "company identifier failed");
            return Vec::new();
        }
    };
    let terms = MentionTerms::from_guess(&guess);

    let doc_ids = match corpus.document_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "failed to list documents for dynamic scan");
            return Vec::new();
        }
    };
    info!(
        company = %guess.company_name,
        short_name = %guess.short_name,
        documents = doc_ids.len(),
        "scanning corpus for off-book company"
    );

    let mut hits: Vec<(i64, HitCounts)> = Vec::new();
    for document_id in doc_ids {
        let chunks = corpus.chunks(document_id, None).await;
        if chunks.is_empty() {
            continue;
        }
        let text = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let counts = terms.count(&text);
        if counts.total_hits > 0 {
            hits.push((document_id, counts));
        }
    }

    hits.sort_by(|a, b| (b.1.total_hits, b.0).cmp(&(a.1.total_hits, a.0)));
    hits.truncate(limit.max(0) as usize);

    let mut pool = Vec::with_capacity(hits.len());
    for (document_id, counts) in hits {
        let doc = match corpus.document(document_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => DocumentRecord {
                document_id,
                ..Default::default()
            },
            Err(e) => {
                debug!(document_id, error = %e, "document metadata unavailable");
                DocumentRecord {
                    document_id,
                    ..Default::default()
                }
            }
        };
        pool.push(corpus::pool_entry(&doc, Some(OFF_BOOK_COMPANY_ID), counts));
    }

    info!(pool_size = pool.len(), "built off-book pool");
    pool
}
