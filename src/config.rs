use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::universe::{CompanyEntry, Universe};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub companies: Vec<CompanyEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_company_pool_limit")]
    pub company_pool_limit: i64,
    #[serde(default = "default_sector_pool_limit")]
    pub sector_pool_limit: i64,
    #[serde(default = "default_corpus_pool_limit")]
    pub corpus_pool_limit: i64,
    /// Replaces the caller-supplied `top_k`. Kept configurable until the
    /// product decides whether callers should control it.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_chunks_per_doc")]
    pub max_chunks_per_doc: i64,
    #[serde(default = "default_max_chars_per_doc")]
    pub max_chars_per_doc: usize,
    #[serde(default = "default_max_bullets")]
    pub max_bullets: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            company_pool_limit: default_company_pool_limit(),
            sector_pool_limit: default_sector_pool_limit(),
            corpus_pool_limit: default_corpus_pool_limit(),
            top_k: default_top_k(),
            max_chunks_per_doc: default_max_chunks_per_doc(),
            max_chars_per_doc: default_max_chars_per_doc(),
            max_bullets: default_max_bullets(),
        }
    }
}

fn default_company_pool_limit() -> i64 {
    200
}
fn default_sector_pool_limit() -> i64 {
    500
}
fn default_corpus_pool_limit() -> i64 {
    2000
}
fn default_top_k() -> usize {
    10
}
fn default_max_chunks_per_doc() -> i64 {
    12
}
fn default_max_chars_per_doc() -> usize {
    8000
}
fn default_max_bullets() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub admin_key: Option<String>,
    /// How long a finished job (and its artifacts) stays pollable.
    /// `0` keeps jobs for the life of the process.
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            admin_key: None,
            job_ttl_secs: default_job_ttl_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}
fn default_job_ttl_secs() -> u64 {
    3600
}

impl BrokerConfig {
    /// The admin key from config, or `BRIEF_ADMIN_KEY` when unset.
    pub fn resolved_admin_key(&self) -> Option<String> {
        self.admin_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("BRIEF_ADMIN_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_upload_artifacts")]
    pub upload_artifacts: bool,
    /// Extra attempts at posting a result when the broker is unreachable
    /// or answers 429/5xx.
    #[serde(default = "default_complete_retries")]
    pub complete_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            poll_interval_secs: default_poll_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            upload_artifacts: default_upload_artifacts(),
            complete_retries: default_complete_retries(),
        }
    }
}

fn default_broker_url() -> String {
    "http://127.0.0.1:7331".to_string()
}
fn default_poll_interval_secs() -> u64 {
    2
}
fn default_error_backoff_secs() -> u64 {
    5
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_upload_artifacts() -> bool {
    true
}
fn default_complete_retries() -> u32 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub classify_model: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            classify_model: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub qa_log: Option<PathBuf>,
}

impl Config {
    /// The configured coverage universe, or the built-in one.
    pub fn universe(&self) -> Universe {
        if self.companies.is_empty() {
            Universe::builtin()
        } else {
            Universe::new(self.companies.clone())
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate retrieval
    let r = &config.retrieval;
    if r.company_pool_limit < 1 || r.sector_pool_limit < 1 || r.corpus_pool_limit < 1 {
        anyhow::bail!("retrieval pool limits must be >= 1");
    }
    if r.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be > 0");
    }
    if r.max_chunks_per_doc < 1 {
        anyhow::bail!("retrieval.max_chunks_per_doc must be >= 1");
    }
    if r.max_chars_per_doc == 0 {
        anyhow::bail!("retrieval.max_chars_per_doc must be > 0");
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    // Validate universe
    let mut seen = HashSet::new();
    for entry in &config.companies {
        if entry.ticker.trim().is_empty() || entry.legal_name.trim().is_empty() {
            anyhow::bail!("companies entries need both ticker and legal_name");
        }
        if !seen.insert(entry.ticker.to_uppercase()) {
            anyhow::bail!("duplicate ticker in companies: {}", entry.ticker);
        }
    }

    Ok(())
}
