//! End-to-end brief pipeline: classify, pool, rank, assemble, answer, link.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::citations;
use crate::classify::{self, UseCase};
use crate::config::{Config, RetrievalConfig};
use crate::context::{self, AssembledContext};
use crate::corpus::{self, Corpus};
use crate::lexical::tokenize;
use crate::links;
use crate::models::{BriefPayload, HitCounts};
use crate::pool;
use crate::qalog;
use crate::traits::{AnswerMode, AnswerRequest, Collaborators};
use crate::universe::Universe;

#[derive(Clone)]
pub struct Pipeline {
    corpus: Corpus,
    universe: Universe,
    retrieval: RetrievalConfig,
    collaborators: Collaborators,
    qa_log: Option<PathBuf>,
    answer_timeout: Duration,
}

impl Pipeline {
    pub fn new(corpus: Corpus, config: &Config, collaborators: Collaborators) -> Self {
        let attempts = u64::from(config.llm.max_retries) + 1;
        Self {
            corpus,
            universe: config.universe(),
            retrieval: config.retrieval.clone(),
            collaborators,
            qa_log: config.log.qa_log.clone(),
            answer_timeout: Duration::from_secs(config.llm.timeout_secs.saturating_mul(attempts)),
        }
    }

    pub fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.answer_timeout = timeout;
        self
    }

    async fn answer(&self, request: &AnswerRequest) -> Result<String> {
        match tokio::time::timeout(self.answer_timeout, self.collaborators.answerer.answer(request)).await {
            Ok(result) => result.context("Answering service failed"),
            Err(_) => anyhow::bail!(
                "Answering service timed out after {}s",
                self.answer_timeout.as_secs()
            ),
        }
    }

    async fn reformulated(&self, query: &str, ctx: &AssembledContext) -> String {
        let page_one = ctx.page_one_blocks();
        match self
            .collaborators
            .answerer
            .reformulate(query, &page_one, &ctx.candidates_block)
            .await
        {
            Ok(q) if !q.trim().is_empty() => q.trim().to_string(),
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!(error = %e, "reformulation failed, keeping original question");
                query.to_string()
            }
        }
    }

    /// Run a `search` job. `Ok(None)` means no documents could be found
    /// for the question, which is not an error.
    ///
    /// `requested_top_k` is accepted for the wire contract but the
    /// configured `retrieval.top_k` is what selects the sources.
    pub async fn search(
        &self,
        query: &str,
        requested_top_k: Option<usize>,
        reformulate: bool,
        job_id: Option<&str>,
    ) -> Result<Option<BriefPayload>> {
        let tokens = tokenize(query);
        let classification =
            classify::classify(query, &self.universe, self.collaborators.classifier.as_ref()).await;

        let Some(candidates) = pool::build_pool(
            &self.corpus,
            &self.universe,
            self.collaborators.identifier.as_ref(),
            &self.retrieval,
            query,
            &tokens,
            &classification,
        )
        .await?
        else {
            info!("no documents for question");
            return Ok(None);
        };

        let top_k = self.retrieval.top_k;
        if let Some(requested) = requested_top_k {
            if requested != top_k {
                info!(requested, top_k, "caller top_k replaced by configured value");
            }
        }
        let picks = pool::rank(candidates.entries, &candidates.extra_terms, top_k);

        let Some(mut ctx) = context::assemble(&self.corpus, &picks, &self.retrieval).await else {
            info!(picked = picks.len(), "picked documents have no text");
            return Ok(None);
        };
        links::attach_source_urls(&mut ctx.sources, job_id);

        let reformulated_query = if reformulate {
            Some(self.reformulated(query, &ctx).await)
        } else {
            None
        };

        let request = AnswerRequest {
            query: reformulated_query.clone().unwrap_or_else(|| query.to_string()),
            use_case: classification.use_case,
            candidates_block: ctx.candidates_block.clone(),
            context: ctx.context_text.clone(),
            max_bullets: self.retrieval.max_bullets,
            mode: AnswerMode::Brief,
        };
        let raw = self.answer(&request).await?;
        let linked = citations::link_answer(&raw, &ctx, job_id, self.retrieval.max_bullets);

        if let Some(path) = &self.qa_log {
            if let Err(e) = qalog::append(path, query, &linked.summary, &linked.references) {
                warn!(error = %e, "failed to append Q/A log");
            }
        }

        info!(
            sources = ctx.sources.len(),
            citations = linked.inline_citations.len(),
            links = linked.links.len(),
            "brief ready"
        );

        Ok(Some(BriefPayload {
            summary: linked.summary,
            summary_html: linked.summary_html,
            sources: ctx.sources,
            inline_citations: linked.inline_citations,
            links: linked.links,
            references: linked.references,
            reformulated_query,
            error: None,
        }))
    }

    /// Run an `expand_bullet` job against one document. Unknown or empty
    /// documents produce an error-shaped payload rather than an `Err`.
    pub async fn expand_bullet(
        &self,
        document_id: i64,
        bullet: &str,
        parent_query: Option<&str>,
        job_id: Option<&str>,
    ) -> Result<BriefPayload> {
        let Some(doc) = self.corpus.document(document_id).await? else {
            return Ok(BriefPayload::failed(format!("document {} not found", document_id)));
        };
        let entry = corpus::pool_entry(&doc, None, HitCounts::default());
        let Some(mut ctx) = context::assemble(&self.corpus, &[entry], &self.retrieval).await else {
            return Ok(BriefPayload::failed(format!("document {} has no text", document_id)));
        };
        links::attach_source_urls(&mut ctx.sources, job_id);

        let request = AnswerRequest {
            query: bullet.to_string(),
            use_case: UseCase::CompanySpecific,
            candidates_block: ctx.candidates_block.clone(),
            context: ctx.context_text.clone(),
            max_bullets: 1,
            mode: AnswerMode::ExpandBullet {
                parent_query: parent_query.map(str::to_string),
            },
        };
        let raw = self.answer(&request).await?;
        // An expansion carries no source list of its own.
        let mut parsed = citations::parse_answer(&raw, 1);
        parsed.source_lines.clear();
        parsed.references.clear();
        let linked = citations::link_parsed(parsed, &ctx, job_id);

        let inline_citations = linked
            .inline_citations
            .into_iter()
            .filter(|c| c.s == 1 && c.valid == Some(true))
            .collect();

        Ok(BriefPayload {
            summary: linked.summary,
            summary_html: linked.summary_html,
            sources: Vec::new(),
            inline_citations,
            links: Vec::new(),
            references: Vec::new(),
            reformulated_query: None,
            error: None,
        })
    }
}
