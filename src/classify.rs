//! Company-specific vs. sector/macro question routing.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::traits::UseCaseClassifier;
use crate::universe::{mentions_company_term, Universe};

const MACRO_WORDS: &[&str] = &[
    "forecast",
    "outlook",
    "drivers",
    "industry",
    "rate cut",
    "rate cuts",
    "savings rate",
    "online penetration",
    "australian dollar",
    "inflation",
    "volume growth",
    "themes",
    "macro",
    "sector",
    "market-wide",
    "retail spending",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UseCase {
    /// Use-case 1: the question is about one (or a few) named companies.
    #[serde(rename = "use_case_1")]
    CompanySpecific,
    /// Use-case 2: the question is about a sector or the macro backdrop.
    #[serde(rename = "use_case_2")]
    SectorMacro,
}

/// What a classifier collaborator reports. Every field is optional so a
/// partially filled answer still routes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifierVerdict {
    #[serde(default)]
    pub use_case: Option<UseCase>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub related_companies: Vec<String>,
    #[serde(default)]
    pub key_terms: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heuristic {
    pub company_hit: bool,
    pub macro_hit: bool,
}

impl Heuristic {
    pub fn guess(&self) -> Option<UseCase> {
        if self.company_hit {
            Some(UseCase::CompanySpecific)
        } else if self.macro_hit {
            Some(UseCase::SectorMacro)
        } else {
            None
        }
    }
}

pub fn heuristic(query: &str) -> Heuristic {
    let lowered = query.to_lowercase();
    Heuristic {
        company_hit: mentions_company_term(query),
        macro_hit: MACRO_WORDS.iter().any(|w| lowered.contains(w)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub use_case: UseCase,
    pub confidence: f64,
    pub reason: String,
    pub heuristic: Option<UseCase>,
    pub company_hit: bool,
    pub related_companies: Vec<String>,
    pub key_terms: Vec<String>,
}

/// Classify a question. Any named company forces use-case 1; collaborator
/// failures fall back to the keyword heuristic.
pub async fn classify(
    query: &str,
    universe: &Universe,
    classifier: &dyn UseCaseClassifier,
) -> Classification {
    let h = heuristic(query);
    let hint = h.guess();

    let classification = match classifier.classify(query, universe, hint).await {
        Ok(verdict) => {
            let mut use_case = verdict
                .use_case
                .or(hint)
                .unwrap_or(UseCase::CompanySpecific);
            let mut reason = verdict.reason.unwrap_or_default().trim().to_string();
            let mut related = verdict.related_companies;

            if h.company_hit && use_case != UseCase::CompanySpecific {
                use_case = UseCase::CompanySpecific;
                reason = format!("{} | forced: company detected", reason)
                    .trim()
                    .to_string();
                related.clear();
            }

            Classification {
                use_case,
                confidence: verdict.confidence.unwrap_or(0.5),
                reason,
                heuristic: hint,
                company_hit: h.company_hit,
                related_companies: related,
                key_terms: verdict.key_terms,
            }
        }
        Err(e) => {
            warn!(error = %e, "use-case classifier failed, using heuristic");
            let use_case = if h.company_hit {
                UseCase::CompanySpecific
            } else if h.macro_hit {
                UseCase::SectorMacro
            } else {
                UseCase::CompanySpecific
            };
            Classification {
                use_case,
                confidence: 0.4,
                reason: "fallback heuristic (classifier error)".to_string(),
                heuristic: hint,
                company_hit: h.company_hit,
                related_companies: Vec::new(),
                key_terms: Vec::new(),
            }
        }
    };

    debug!(?classification, "classified query");
    classification
}
