//! Language-model backed collaborators.
//!
//! - **[`Disabled`]**: no model configured. Answering fails, the company
//!   identifier finds nothing, and the classifier errors so routing falls
//!   back to the keyword heuristic.
//! - **[`OpenAiChat`]**: calls the chat completions endpoint with retry
//!   and backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::classify::{ClassifierVerdict, UseCase};
use crate::config::LlmConfig;
use crate::traits::{
    AnswerMode, AnswerRequest, AnsweringService, Collaborators, CompanyGuess, CompanyIdentifier,
    UseCaseClassifier,
};
use crate::universe::Universe;

const DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";

static JSON_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));

// ============ Disabled ============

pub struct Disabled;

#[async_trait]
impl AnsweringService for Disabled {
    async fn answer(&self, _request: &AnswerRequest) -> Result<String> {
        bail!("No answering model configured (llm.provider = \"disabled\")")
    }
}

#[async_trait]
impl CompanyIdentifier for Disabled {
    async fn identify(&self, _query: &str) -> Result<Option<CompanyGuess>> {
        Ok(None)
    }
}

#[async_trait]
impl UseCaseClassifier for Disabled {
    async fn classify(
        &self,
        _query: &str,
        _universe: &Universe,
        _hint: Option<UseCase>,
    ) -> Result<ClassifierVerdict> {
        bail!("No classifier model configured")
    }
}

// ============ OpenAI ============

/// Chat-completions client shared by all three collaborator roles.
pub struct OpenAiChat {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    classify_model: String,
    max_retries: u32,
}

impl OpenAiChat {
    /// # Errors
    ///
    /// Returns an error if `llm.model` is unset or `OPENAI_API_KEY` is not
    /// in the environment.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
            api_key,
            classify_model: config.classify_model.clone().unwrap_or_else(|| model.clone()),
            model,
            max_retries: config.max_retries,
        })
    }

    async fn chat(&self, model: &str, messages: Value, temperature: f64, json_mode: bool) -> Result<String> {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
    }
}

fn parse_chat_response(json: &Value) -> Result<String> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))?;
    Ok(content.trim().to_string())
}

const MARKER_RULES: &str = "\
Output format (follow exactly):
1. Bullets, each starting with \"- \". Every factual claim ends with a marker
   [S# pPAGE \"QUOTE\"] where S# is the candidate number, PAGE is the page from the
   [S# pN] prefix of the context line, and QUOTE is 6-12 consecutive words copied
   verbatim from that line.
2. A line reading exactly: CITATIONS(JSON)
   followed by a JSON array with one {\"bullet\", \"S\", \"page\", \"quote\"} object per marker.
3. A line reading exactly: Sources
   followed by one line per cited source: - <title from CANDIDATES> — p.N[, p.M] — \"<one quote used>\"
Use only the supplied context. Prefer the most recent source. Australian English.";

fn answer_messages(request: &AnswerRequest) -> Value {
    let persona = match (&request.mode, request.use_case) {
        (AnswerMode::ExpandBullet { parent_query }, _) => format!(
            "You expand one research bullet into a single deeper bullet using only the supplied \
             document. Add drivers, segment detail and timing; do not restate the bullet.{}",
            parent_query
                .as_deref()
                .map(|q| format!(" Keep it relevant to the question: {}", q))
                .unwrap_or_default()
        ),
        (AnswerMode::Brief, UseCase::SectorMacro) => format!(
            "You write sector and macro briefs for Australian retail executives. \
             Newest first, quantified, at most {} bullets. No investment advice.",
            request.max_bullets
        ),
        (AnswerMode::Brief, UseCase::CompanySpecific) => format!(
            "You write company briefs for Australian retail executives. \
             Newest first, quantified, forward-looking, at most {} bullets. No investment advice.",
            request.max_bullets
        ),
    };
    let system = format!(
        "{}\n\n{}\n\nCANDIDATES:\n{}",
        persona, MARKER_RULES, request.candidates_block
    );
    let user = format!(
        "User query: {}\n\nContext snippets (each prefixed with [S# pN]):\n{}\n\n\
         Write the bullets, then CITATIONS(JSON), then Sources. Nothing else.",
        request.query, request.context
    );
    json!([
        {"role": "system", "content": system},
        {"role": "user", "content": user},
    ])
}

#[async_trait]
impl AnsweringService for OpenAiChat {
    async fn answer(&self, request: &AnswerRequest) -> Result<String> {
        self.chat(&self.model, answer_messages(request), 0.2, false).await
    }

    async fn reformulate(&self, query: &str, page_one: &[String], candidates_block: &str) -> Result<String> {
        if page_one.is_empty() {
            return Ok(query.to_string());
        }
        let system = "Rewrite the user's question into one specific analytical question that the \
                      overview pages can answer. Keep the user's intent and any company names. \
                      Output only the rewritten question.";
        let user = format!(
            "ORIGINAL QUESTION:\n{}\n\nOVERVIEW CONTEXT (PAGE 1):\n{}\n\nDOCUMENTS:\n{}\n\nRewrite the question now:",
            query,
            page_one.join("\n\n"),
            candidates_block
        );
        let rewritten = self
            .chat(
                &self.model,
                json!([{"role": "system", "content": system}, {"role": "user", "content": user}]),
                0.2,
                false,
            )
            .await?;
        if rewritten.is_empty() {
            Ok(query.to_string())
        } else {
            Ok(rewritten)
        }
    }
}

#[async_trait]
impl CompanyIdentifier for OpenAiChat {
    async fn identify(&self, query: &str) -> Result<Option<CompanyGuess>> {
        let system = "Identify the ONE real-world company or consumer brand the query is mainly \
                      about; you are not limited to any list. Return only JSON: \
                      {\"company_name\": <formal name>, \"short_name\": <name as usually written>, \
                      \"aliases\": [<brand names, domain-style names, spelling variants>]}. \
                      Never use generic words as aliases. If no single company is clear, return \
                      {\"company_name\": null, \"short_name\": null, \"aliases\": []}.";
        let raw = self
            .chat(
                &self.model,
                json!([{"role": "system", "content": system}, {"role": "user", "content": query}]),
                0.0,
                false,
            )
            .await?;
        Ok(parse_company_guess(&raw))
    }
}

#[async_trait]
impl UseCaseClassifier for OpenAiChat {
    async fn classify(&self, query: &str, universe: &Universe, hint: Option<UseCase>) -> Result<ClassifierVerdict> {
        let system = "You classify retail research questions.\n\
            1. use_case_1 = company-specific, use_case_2 = sector / macro. If any company is \
               mentioned, answer use_case_1.\n\
            2. For use_case_2 only, list the coverage_universe companies whose primary business \
               is in the sector asked about (none if the question spans all of retail).\n\
            3. Extract key_terms: the meaningful concepts in the question.\n\
            Return JSON only: {use_case, confidence, reason, related_companies, key_terms}.";
        let hint = match hint {
            Some(UseCase::CompanySpecific) => "use_case_1",
            Some(UseCase::SectorMacro) => "use_case_2",
            None => "unknown",
        };
        let raw = self
            .chat(
                &self.classify_model,
                json!([
                    {"role": "system", "content": system},
                    {"role": "user", "content": format!("coverage_universe: {:?}", universe.legal_names())},
                    {"role": "user", "content": query},
                    {"role": "user", "content": format!("Heuristic hint: {}", hint)},
                ]),
                0.0,
                true,
            )
            .await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Parse a company-identification reply. Any text around the outermost
/// JSON object is ignored; unusable replies yield `None`.
pub fn parse_company_guess(raw: &str) -> Option<CompanyGuess> {
    let span = JSON_SPAN.find(raw).map(|m| m.as_str()).unwrap_or(raw);
    let data: Value = serde_json::from_str(span).ok()?;

    let field = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };
    let company_name = field("company_name");
    let short_name = field("short_name");
    if company_name.is_empty() && short_name.is_empty() {
        return None;
    }

    let mut aliases: Vec<String> = data
        .get("aliases")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if !short_name.is_empty() && !aliases.contains(&short_name) {
        aliases.insert(0, short_name.clone());
    }

    Some(CompanyGuess {
        company_name: if company_name.is_empty() { short_name.clone() } else { company_name.clone() },
        short_name: if short_name.is_empty() { company_name } else { short_name },
        aliases,
    })
}

/// Build the collaborator set for the configured provider.
pub fn create_collaborators(config: &LlmConfig) -> Result<Collaborators> {
    match config.provider.as_str() {
        "disabled" => {
            let disabled = Arc::new(Disabled);
            Ok(Collaborators {
                answerer: disabled.clone(),
                identifier: disabled.clone(),
                classifier: disabled,
            })
        }
        "openai" => {
            let chat = Arc::new(OpenAiChat::new(config)?);
            Ok(Collaborators {
                answerer: chat.clone(),
                identifier: chat.clone(),
                classifier: chat,
            })
        }
        other => bail!("Unknown llm provider: {}", other),
    }
}
