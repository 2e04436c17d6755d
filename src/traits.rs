//! Collaborator contracts for the model-backed steps of the pipeline.
//!
//! The pipeline never talks to a language model directly. It goes through
//! three narrow traits so that tests (and alternative backends) can swap
//! the implementation:
//!
//! | Trait | Step |
//! |-------|------|
//! | [`AnsweringService`] | writes the cited brief, optionally rewrites the question |
//! | [`CompanyIdentifier`] | open-world company detection for off-book names |
//! | [`UseCaseClassifier`] | company-specific vs. sector/macro routing |
//!
//! [`Collaborators`] bundles one of each behind `Arc` so a pipeline can be
//! cloned cheaply across worker iterations.
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use research_brief::traits::{AnswerRequest, AnsweringService};
//!
//! struct Canned;
//!
//! #[async_trait]
//! impl AnsweringService for Canned {
//!     async fn answer(&self, _request: &AnswerRequest) -> Result<String> {
//!         Ok("- Nothing to report.\nCITATIONS(JSON)\n[]".to_string())
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::classify::{ClassifierVerdict, UseCase};
use crate::universe::Universe;

/// Which kind of answer the service should write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerMode {
    /// Up to `max_bullets` cited bullets plus the JSON and Sources blocks.
    Brief,
    /// One deeper bullet about a single document, answering the bullet
    /// text in the light of the question that produced it.
    ExpandBullet { parent_query: Option<String> },
}

/// Everything the answering step sees for one request.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub query: String,
    pub use_case: UseCase,
    /// Numbered listing of sources with their available pages.
    pub candidates_block: String,
    /// Page-ordered chunk text, each line tagged `[S# pPAGE]`.
    pub context: String,
    pub max_bullets: usize,
    pub mode: AnswerMode,
}

/// Produces the raw answer text that the citation parser consumes.
#[async_trait]
pub trait AnsweringService: Send + Sync {
    async fn answer(&self, request: &AnswerRequest) -> Result<String>;

    /// Rewrite the question into a more specific one using the first page
    /// of each selected source. The default keeps the question unchanged.
    async fn reformulate(
        &self,
        query: &str,
        _page_one: &[String],
        _candidates_block: &str,
    ) -> Result<String> {
        Ok(query.to_string())
    }
}

/// A best guess at the company an off-book question is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyGuess {
    pub company_name: String,
    pub short_name: String,
    pub aliases: Vec<String>,
}

#[async_trait]
pub trait CompanyIdentifier: Send + Sync {
    /// `Ok(None)` means "no identifiable company".
    async fn identify(&self, query: &str) -> Result<Option<CompanyGuess>>;
}

#[async_trait]
pub trait UseCaseClassifier: Send + Sync {
    async fn classify(
        &self,
        query: &str,
        universe: &Universe,
        hint: Option<UseCase>,
    ) -> Result<ClassifierVerdict>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub answerer: Arc<dyn AnsweringService>,
    pub identifier: Arc<dyn CompanyIdentifier>,
    pub classifier: Arc<dyn UseCaseClassifier>,
}
